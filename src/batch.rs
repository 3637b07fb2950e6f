//! Server-evaluated batches with step conditions.
//!
//! A transactional batch is laid out as
//! `BEGIN, s1 .. sn, COMMIT, ROLLBACK` where each caller step runs only if the
//! step before it succeeded, `COMMIT` runs only after the last caller step,
//! and `ROLLBACK` runs only when `COMMIT` did not succeed. The common case
//! therefore costs one round trip and a failure rolls back without another.

use crate::{
    wire::{self, BatchCondition, BatchStep, StreamRequest},
    HranaError, Result,
};

/// A built batch plus what is needed to map its results back to caller steps.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BatchPlan {
    pub batch: wire::Batch,
    total_steps: usize,
    caller_steps: usize,
    transactional: bool,
}

/// Raw result of one caller-visible step.
#[derive(Clone, Debug)]
pub(crate) enum StepResult {
    Ok(wire::StmtResult),
    Err(wire::WireError),
    Skipped,
}

fn plain(sql: &str) -> wire::Stmt {
    wire::Stmt {
        sql: Some(sql.to_owned()),
        ..wire::Stmt::default()
    }
}

/// Conditions address steps with a `u32` index.
fn step_index(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| HranaError::BatchTooLarge(index.saturating_add(1)))
}

impl BatchPlan {
    pub fn new(stmts: Vec<wire::Stmt>, transactional: bool) -> Result<Self> {
        let caller_steps = stmts.len();
        if !transactional {
            let steps = stmts
                .into_iter()
                .map(|stmt| BatchStep {
                    stmt,
                    condition: None,
                })
                .collect();
            return Ok(Self {
                batch: wire::Batch {
                    steps,
                    replication_index: None,
                },
                total_steps: caller_steps,
                caller_steps,
                transactional,
            });
        }

        let mut steps = Vec::with_capacity(caller_steps + 3);
        steps.push(BatchStep {
            stmt: plain("BEGIN"),
            condition: None,
        });
        for stmt in stmts {
            let previous = steps.len() - 1;
            steps.push(BatchStep {
                stmt,
                condition: Some(BatchCondition::ok(step_index(previous)?)),
            });
        }
        let last_caller = steps.len() - 1;
        steps.push(BatchStep {
            stmt: plain("COMMIT"),
            condition: Some(BatchCondition::ok(step_index(last_caller)?)),
        });
        let commit = steps.len() - 1;
        steps.push(BatchStep {
            stmt: plain("ROLLBACK"),
            condition: Some(BatchCondition::not(BatchCondition::ok(step_index(commit)?))),
        });

        Ok(Self {
            total_steps: steps.len(),
            batch: wire::Batch {
                steps,
                replication_index: None,
            },
            caller_steps,
            transactional,
        })
    }

    /// Moves the batch out as a stream request; the plan keeps its layout.
    pub fn take_request(&mut self) -> StreamRequest {
        StreamRequest::Batch {
            batch: std::mem::take(&mut self.batch),
        }
    }

    /// Maps a batch result onto caller steps.
    ///
    /// Synthetic `BEGIN` and `COMMIT` steps are dropped; a failure in either
    /// fails the whole call. The synthetic `ROLLBACK` step is kept as the last
    /// entry only when `keep_rollback` is set.
    pub fn caller_results(&self, result: wire::BatchResult, keep_rollback: bool) -> Result<Vec<StepResult>> {
        let total = self.total_steps;
        let mut results = result.step_results.into_iter();
        let mut errors = result.step_errors.into_iter();
        let mut steps = (0..total).map(|_| {
            let error = errors.next().flatten();
            let result = results.next().flatten();
            match (error, result) {
                (Some(error), _) => StepResult::Err(error),
                (None, Some(result)) => StepResult::Ok(result),
                (None, None) => StepResult::Skipped,
            }
        });

        if !self.transactional {
            return Ok(steps.collect());
        }

        if let Some(StepResult::Err(error)) = steps.next() {
            return Err(synthetic_failure("BEGIN", error));
        }
        let mut caller: Vec<StepResult> = steps.by_ref().take(self.caller_steps).collect();
        if let Some(StepResult::Err(error)) = steps.next() {
            return Err(synthetic_failure("COMMIT", error));
        }
        let rollback = steps.next().unwrap_or(StepResult::Skipped);

        if keep_rollback {
            caller.push(rollback);
        }
        Ok(caller)
    }
}

fn synthetic_failure(sql: &str, error: wire::WireError) -> HranaError {
    HranaError::Server {
        message: error.message,
        code: error.code,
    }
    .with_sql(sql)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        batch::{step_index, BatchPlan, StepResult},
        wire::{self, BatchCondition},
        HranaError,
    };

    fn stmts(sqls: &[&str]) -> Vec<wire::Stmt> {
        sqls.iter()
            .map(|sql| wire::Stmt {
                sql: Some((*sql).to_owned()),
                ..wire::Stmt::default()
            })
            .collect()
    }

    fn batch_result(body: serde_json::Value) -> wire::BatchResult {
        serde_json::from_value(body).expect("must parse")
    }

    #[test]
    fn non_transactional_steps_are_unconditioned() {
        let plan = BatchPlan::new(stmts(&["A", "B"]), false).expect("plan");
        assert_eq!(plan.batch.steps.len(), 2);
        assert!(plan.batch.steps.iter().all(|step| step.condition.is_none()));
    }

    #[test]
    fn transactional_steps_form_a_chain() {
        let plan = BatchPlan::new(stmts(&["S1", "S2"]), true).expect("plan");
        let sqls: Vec<_> = plan
            .batch
            .steps
            .iter()
            .map(|step| step.stmt.sql.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(sqls, vec!["BEGIN", "S1", "S2", "COMMIT", "ROLLBACK"]);

        let conds: Vec<_> = plan.batch.steps.iter().map(|step| step.condition.clone()).collect();
        assert_eq!(
            conds,
            vec![
                None,
                Some(BatchCondition::ok(0)),
                Some(BatchCondition::ok(1)),
                Some(BatchCondition::ok(2)),
                Some(BatchCondition::not(BatchCondition::ok(3))),
            ]
        );

        let wire = serde_json::to_value(&plan.batch).expect("must encode");
        assert_eq!(
            wire["steps"][4]["condition"],
            json!({"type": "not", "cond": {"type": "ok", "step": 3}})
        );
    }

    #[test]
    fn failed_step_skips_the_rest_and_hides_rollback() {
        let plan = BatchPlan::new(stmts(&["S1", "S2"]), true).expect("plan");
        let result = batch_result(json!({
            "step_results": [{}, {"affected_row_count": 1}, null, null, {}],
            "step_errors": [null, null, {"message": "constraint failed"}, null, null]
        }));

        let steps = plan.caller_results(result.clone(), false).expect("must map");
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], StepResult::Ok(set) if set.affected_row_count == 1));
        assert!(matches!(&steps[1], StepResult::Err(error) if error.message == "constraint failed"));

        let steps = plan.caller_results(result, true).expect("must map");
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[2], StepResult::Ok(_)));
    }

    #[test]
    fn synthetic_step_failures_fail_the_call() {
        let plan = BatchPlan::new(stmts(&["S1"]), true).expect("plan");
        let result = batch_result(json!({
            "step_results": [null, null, null, {}],
            "step_errors": [{"message": "cannot start a transaction within a transaction"}, null, null, null]
        }));

        let err = plan.caller_results(result, false).expect_err("must fail");
        match err {
            HranaError::Sql { sql, source } => {
                assert_eq!(sql, "BEGIN");
                assert!(matches!(*source, HranaError::Server { .. }));
            }
            _ => panic!("expected sql context"),
        }
    }

    #[test]
    fn short_result_arrays_read_as_skipped() {
        let plan = BatchPlan::new(stmts(&["A", "B", "C"]), false).expect("plan");
        let steps = plan
            .caller_results(batch_result(json!({"step_results": [{}]})), false)
            .expect("must map");
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[1], StepResult::Skipped));
    }

    #[test]
    fn step_indices_beyond_u32_are_rejected() {
        assert_eq!(step_index(7).expect("fits"), 7);
        assert_eq!(step_index(u32::MAX as usize).expect("fits"), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            step_index(u32::MAX as usize + 1),
            Err(HranaError::BatchTooLarge(_))
        ));
    }
}
