use hrana_client::{Connection, Statement, StepOutcome, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut db = Connection::from_env().map_err(anyhow::Error::msg)?;

    let outcomes = db
        .batch(
            [
                Statement::execute(
                    "CREATE TABLE IF NOT EXISTS batch_users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                    (),
                ),
                Statement::execute(
                    "INSERT INTO batch_users (name) VALUES (?)",
                    [Value::text("Alice")],
                ),
                Statement::query("SELECT id, name FROM batch_users", ()),
            ],
            true,
        )
        .await?;

    for outcome in outcomes {
        match outcome {
            StepOutcome::Executed(set) if set.columns.is_empty() => println!(
                "exec: affected={}, last_insert_rowid={:?}",
                set.affected_row_count, set.last_insert_rowid
            ),
            StepOutcome::Executed(set) => {
                for row in set.iter() {
                    println!("row: {:?}", row.values());
                }
            }
            StepOutcome::Failed { message, code } => println!("failed: {message} ({code:?})"),
            StepOutcome::Skipped => println!("skipped"),
        }
    }

    db.close();
    Ok(())
}
