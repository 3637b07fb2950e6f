//! Chunked execution of scripts too large for a single batch message.

use crate::{
    batch::{BatchPlan, StepResult},
    conn::{execute_one, expect_batch},
    params::build_stmt,
    rows::{ExecResult, ResultSet},
    split::{is_transaction_control, StatementSplitter},
    transport::Transport,
    wire::SqlRef,
    HranaError, Params, Result,
};

/// Runs `sql` as a sequence of non-transactional batches of at most
/// `chunk_size` statements.
///
/// Transaction-control statements in the script are dropped. With `wrap`
/// set, the chunks run between an explicit `BEGIN` and `COMMIT`; any failure
/// closes the stream instead of committing, so the server discards the
/// transaction.
pub(crate) async fn execute_chunked<T: Transport>(
    transport: &mut T,
    sql: &str,
    chunk_size: usize,
    wrap: bool,
) -> Result<ExecResult> {
    let chunk_size = chunk_size.max(1);
    #[cfg(feature = "tracing")]
    log_dropped_control(sql);
    let mut statements =
        StatementSplitter::new(sql).filter(|statement: &&str| !is_transaction_control(statement));

    let mut lookahead = statements.clone();
    match (lookahead.next(), lookahead.next()) {
        (None, _) => return Ok(ExecResult::default()),
        (Some(only), None) => {
            let set = execute_one(transport, only, &Params::default(), false)
                .await
                .map_err(|err| err.with_sql(only))?;
            return Ok(ExecResult::aggregate([&set]));
        }
        _ => {}
    }

    match run_chunks(transport, &mut statements, chunk_size, wrap).await {
        Ok(summary) => Ok(summary),
        Err(err) => {
            transport.close();
            Err(err)
        }
    }
}

#[cfg(feature = "tracing")]
fn log_dropped_control(sql: &str) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let dropped = StatementSplitter::new(sql).filter(|statement| is_transaction_control(statement));
    for statement in dropped {
        tracing::debug!(
            statement,
            "transaction control statement dropped from chunked script"
        );
    }
}

async fn run_chunks<'a, T: Transport>(
    transport: &mut T,
    statements: &mut impl Iterator<Item = &'a str>,
    chunk_size: usize,
    wrap: bool,
) -> Result<ExecResult> {
    if wrap {
        execute_one(transport, "BEGIN", &Params::default(), false)
            .await
            .map_err(|err| err.with_sql("BEGIN"))?;
    }

    let mut summary = ExecResult::default();
    loop {
        let chunk: Vec<&str> = statements.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(statements = chunk.len(), "sending script chunk");

        for set in run_chunk(transport, &chunk).await? {
            summary.merge(&set);
        }
    }

    if wrap {
        execute_one(transport, "COMMIT", &Params::default(), false)
            .await
            .map_err(|err| err.with_sql("COMMIT"))?;
    }

    Ok(summary)
}

async fn run_chunk<T: Transport>(transport: &mut T, chunk: &[&str]) -> Result<Vec<ResultSet>> {
    let stmts = chunk
        .iter()
        .map(|sql| build_stmt(SqlRef::Text((*sql).to_owned()), &Params::default(), false))
        .collect::<Result<Vec<_>>>()?;
    let mut plan = BatchPlan::new(stmts, false)?;
    let responses = transport.send(vec![plan.take_request()]).await?;
    let steps = plan.caller_results(expect_batch(responses)?, false)?;

    let mut sets = Vec::with_capacity(steps.len());
    for (sql, step) in chunk.iter().zip(steps) {
        match step {
            StepResult::Ok(result) => sets.push(ResultSet::decode(result)?),
            StepResult::Err(error) => {
                return Err(HranaError::Server {
                    message: error.message,
                    code: error.code,
                }
                .with_sql(sql))
            }
            StepResult::Skipped => {}
        }
    }
    Ok(sets)
}
