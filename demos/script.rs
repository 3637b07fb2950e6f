//! Runs a SQL script file against `HRANA_URL`.
//!
//! `cargo run --example script --features tracing -- schema.sql`

use hrana_client::{ClientOptions, Connection};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: script <file.sql>"))?;
    let sql = std::fs::read_to_string(&path)?;

    let mut db = Connection::from_env()
        .map_err(anyhow::Error::msg)?
        .with_options(ClientOptions::default().with_chunk_size(256));

    let result = db.execute_script(&sql).await?;
    tracing::info!(
        affected = result.affected_row_count,
        last_insert_rowid = ?result.last_insert_rowid,
        "script finished"
    );

    db.close();
    Ok(())
}
