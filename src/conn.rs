use crate::{
    batch::{BatchPlan, StepResult},
    bind::{bind_script, BoundStatement, ParamShape},
    error::ProtocolError,
    http::HttpStream,
    params::build_stmt,
    rows::{ExecResult, ResultSet, Rows, StepOutcome},
    script::execute_chunked,
    session::Session,
    split::{is_transaction_control, split_statements},
    transport::Transport,
    wire::{BatchResult, SqlRef, StmtResult, StreamRequest, StreamResponse},
    ClientOptions, HranaError, Params, Result, Statement,
};

/// Id of SQL text stored on the server with [`Connection::store_sql`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SqlId(i32);

impl SqlId {
    pub fn get(self) -> i32 {
        self.0
    }
}

/// A validated single statement and its parameter shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepared {
    sql: String,
    shape: ParamShape,
}

impl Prepared {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn shape(&self) -> &ParamShape {
        &self.shape
    }

    /// Number of positional parameters, or `None` when the statement uses
    /// named parameters.
    pub fn param_count(&self) -> Option<usize> {
        (!self.shape.has_named()).then(|| self.shape.positional_count())
    }
}

/// One logical connection: a stream plus its transaction bookkeeping.
///
/// Calls take `&mut self`; a connection serves one caller at a time. Use
/// separate connections for concurrent work.
#[derive(Debug)]
pub struct Connection<T = HttpStream> {
    transport: T,
    options: ClientOptions,
    in_transaction: bool,
    next_sql_id: i32,
}

impl Connection<HttpStream> {
    /// Connects over HTTP with a raw authorization header value.
    pub fn new(base_url: impl AsRef<str>, authorization: impl Into<String>) -> Self {
        Self::from_transport(HttpStream::new(base_url, authorization))
    }

    /// Connects over HTTP with a bearer token.
    pub fn new_bearer(base_url: impl AsRef<str>, token: impl AsRef<str>) -> Self {
        Self::from_transport(HttpStream::new_bearer(base_url, token))
    }

    /// Reads `HRANA_URL` and `HRANA_AUTH_TOKEN`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> std::result::Result<Self, String> {
        HttpStream::from_env().map(Self::from_transport)
    }
}

impl<T: Transport> Connection<T> {
    pub fn from_transport(transport: T) -> Self {
        Self {
            transport,
            options: ClientOptions::default(),
            in_transaction: false,
            next_sql_id: 0,
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.transport.apply_options(&options);
        self.options = options;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn session(&self) -> &Session {
        self.transport.session()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Runs `sql` and returns one result set per statement.
    ///
    /// Several statements are sent as one non-transactional batch; the first
    /// failing statement fails the call.
    pub async fn query<P: Into<Params>>(&mut self, sql: &str, params: P) -> Result<Rows> {
        let sets = self.run(sql, params.into(), true).await?;
        Ok(Rows::new(sets))
    }

    /// Runs `sql` and returns affected rows and the last inserted rowid.
    pub async fn execute<P: Into<Params>>(&mut self, sql: &str, params: P) -> Result<ExecResult> {
        let sets = self.run(sql, params.into(), false).await?;
        Ok(ExecResult::aggregate(&sets))
    }

    /// Runs a script without arguments, all or nothing.
    ///
    /// Scripts over the chunk threshold are sent in chunks inside an explicit
    /// transaction; smaller ones go as a single transactional batch. Inside
    /// an explicit transaction, or when the script manages transactions
    /// itself, statements are not wrapped again.
    pub async fn execute_script(&mut self, sql: &str) -> Result<ExecResult> {
        if sql.len() > self.options.chunk_threshold_bytes {
            #[cfg(feature = "tracing")]
            tracing::debug!(bytes = sql.len(), "executing script in chunks");
            return execute_chunked(
                &mut self.transport,
                sql,
                self.options.chunk_size,
                !self.in_transaction,
            )
            .await;
        }

        let bound = bind_script(sql, &Params::default()).map_err(|err| err.with_sql(sql))?;
        match bound.as_slice() {
            [] => Ok(ExecResult::default()),
            [single] => {
                let set = execute_one(&mut self.transport, single.sql, &single.params, false)
                    .await
                    .map_err(|err| err.with_sql(single.sql))?;
                Ok(ExecResult::aggregate([&set]))
            }
            statements => {
                let transactional = !self.in_transaction
                    && !statements
                        .iter()
                        .any(|statement| is_transaction_control(statement.sql));
                let sets = self.run_batch(statements, false, transactional).await?;
                Ok(ExecResult::aggregate(&sets))
            }
        }
    }

    /// Sends caller-built statements as one batch and reports every step.
    ///
    /// Step failures are returned as [`StepOutcome::Failed`] rather than
    /// failing the call. In a transactional batch, steps after a failure are
    /// [`StepOutcome::Skipped`] and the batch is rolled back.
    pub async fn batch<I>(&mut self, statements: I, transactional: bool) -> Result<Vec<StepOutcome>>
    where
        I: IntoIterator<Item = Statement>,
    {
        let stmts = statements
            .into_iter()
            .map(|statement| {
                build_stmt(
                    SqlRef::Text(statement.sql),
                    &statement.params,
                    statement.want_rows,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        if stmts.is_empty() {
            return Ok(Vec::new());
        }

        let mut plan = BatchPlan::new(stmts, transactional)?;
        let responses = self.transport.send(vec![plan.take_request()]).await?;
        plan.caller_results(expect_batch(responses)?, self.options.schema_db)?
            .into_iter()
            .map(|step| match step {
                StepResult::Ok(result) => ResultSet::decode(result).map(StepOutcome::Executed),
                StepResult::Err(error) => Ok(StepOutcome::Failed {
                    message: error.message,
                    code: error.code,
                }),
                StepResult::Skipped => Ok(StepOutcome::Skipped),
            })
            .collect()
    }

    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.execute("BEGIN", ()).await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT", ()).await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Rolls back; the connection is out of the transaction even on error.
    pub async fn rollback(&mut self) -> Result<()> {
        let result = self.execute("ROLLBACK", ()).await;
        self.in_transaction = false;
        result.map(|_| ())
    }

    /// Validates that `sql` is exactly one statement and reads its parameters.
    pub fn prepare(&self, sql: &str) -> Result<Prepared> {
        let (statements, _) = split_statements(sql);
        let [statement] = statements.as_slice() else {
            return Err(HranaError::StatementCount(statements.len()).with_sql(sql));
        };
        let shape = ParamShape::parse(statement).map_err(|err| err.with_sql(sql))?;
        Ok(Prepared {
            sql: (*statement).to_owned(),
            shape,
        })
    }

    /// Stores `sql` on the server for later execution by id.
    pub async fn store_sql(&mut self, sql: &str) -> Result<SqlId> {
        let sql_id = self.next_sql_id;
        self.next_sql_id = self.next_sql_id.wrapping_add(1);
        self.transport
            .send(vec![StreamRequest::StoreSql {
                sql: sql.to_owned(),
                sql_id,
            }])
            .await
            .map_err(|err| err.with_sql(sql))?;
        Ok(SqlId(sql_id))
    }

    pub async fn execute_stored<P: Into<Params>>(
        &mut self,
        id: SqlId,
        params: P,
        want_rows: bool,
    ) -> Result<ResultSet> {
        let stmt = build_stmt(SqlRef::Stored(id.0), &params.into(), want_rows)?;
        let responses = self
            .transport
            .send(vec![StreamRequest::Execute { stmt }])
            .await?;
        ResultSet::decode(expect_execute(responses)?)
    }

    pub async fn close_sql(&mut self, id: SqlId) -> Result<()> {
        self.transport
            .send(vec![StreamRequest::CloseSql { sql_id: id.0 }])
            .await?;
        Ok(())
    }

    /// Releases the stream. The server is notified in the background.
    pub fn close(&mut self) {
        self.transport.close();
        self.in_transaction = false;
    }

    async fn run(&mut self, sql: &str, params: Params, want_rows: bool) -> Result<Vec<ResultSet>> {
        let bound = bind_script(sql, &params).map_err(|err| err.with_sql(sql))?;
        match bound.as_slice() {
            [] => Ok(Vec::new()),
            [single] => {
                let set = execute_one(&mut self.transport, single.sql, &single.params, want_rows)
                    .await
                    .map_err(|err| err.with_sql(single.sql))?;
                Ok(vec![set])
            }
            statements => self.run_batch(statements, want_rows, false).await,
        }
    }

    async fn run_batch(
        &mut self,
        statements: &[BoundStatement<'_>],
        want_rows: bool,
        transactional: bool,
    ) -> Result<Vec<ResultSet>> {
        let stmts = statements
            .iter()
            .map(|statement| {
                build_stmt(
                    SqlRef::Text(statement.sql.to_owned()),
                    &statement.params,
                    want_rows,
                )
                .map_err(|err| err.with_sql(statement.sql))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut plan = BatchPlan::new(stmts, transactional)?;
        let responses = self.transport.send(vec![plan.take_request()]).await?;
        let steps = plan.caller_results(expect_batch(responses)?, self.options.schema_db)?;

        let mut sets = Vec::with_capacity(statements.len());
        for (statement, step) in statements.iter().zip(steps) {
            match step {
                StepResult::Ok(result) => sets.push(ResultSet::decode(result)?),
                StepResult::Err(error) => {
                    return Err(HranaError::Server {
                        message: error.message,
                        code: error.code,
                    }
                    .with_sql(statement.sql))
                }
                StepResult::Skipped => {}
            }
        }
        Ok(sets)
    }
}

pub(crate) async fn execute_one<T: Transport>(
    transport: &mut T,
    sql: &str,
    params: &Params,
    want_rows: bool,
) -> Result<ResultSet> {
    let stmt = build_stmt(SqlRef::Text(sql.to_owned()), params, want_rows)?;
    let responses = transport.send(vec![StreamRequest::Execute { stmt }]).await?;
    ResultSet::decode(expect_execute(responses)?)
}

fn expect_execute(responses: Vec<StreamResponse>) -> Result<StmtResult> {
    match responses.into_iter().next() {
        Some(StreamResponse::Execute { result }) => Ok(result),
        _ => Err(ProtocolError::UnknownResponseType {
            request_index: 0,
            expected: "execute",
        }
        .into()),
    }
}

pub(crate) fn expect_batch(responses: Vec<StreamResponse>) -> Result<BatchResult> {
    match responses.into_iter().next() {
        Some(StreamResponse::Batch { result }) => Ok(result),
        _ => Err(ProtocolError::UnknownResponseType {
            request_index: 0,
            expected: "batch",
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use crate::{Connection, HranaError};

    #[test]
    fn prepare_requires_one_statement() {
        let conn = Connection::new("http://db", "");

        let prepared = conn.prepare("SELECT ?, ?;").expect("must prepare");
        assert_eq!(prepared.sql(), "SELECT ?, ?");
        assert_eq!(prepared.param_count(), Some(2));

        let prepared = conn.prepare("SELECT :a, :b, :a").expect("must prepare");
        assert_eq!(prepared.param_count(), None);
        assert_eq!(prepared.shape().named().len(), 2);

        let err = conn.prepare("SELECT 1; SELECT 2").expect_err("must fail");
        assert!(matches!(err.root(), HranaError::StatementCount(2)));
        assert!(matches!(
            conn.prepare("-- nothing").expect_err("must fail").root(),
            HranaError::StatementCount(0)
        ));
    }

    #[test]
    fn connection_debug_redacts_token() {
        let conn = Connection::new_bearer("libsql://db.example.com", "secret");
        let debug = format!("{conn:?}");
        assert!(debug.contains("https://db.example.com"));
        assert!(!debug.contains("secret"));
    }
}
