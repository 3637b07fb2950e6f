use hrana_client::{Connection, Params, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut db = Connection::from_env().map_err(anyhow::Error::msg)?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        (),
    )
    .await?;

    let inserted = db
        .execute("INSERT INTO users (name) VALUES (?)", [Value::text("Kit")])
        .await?;
    println!("inserted rowid {:?}", inserted.last_insert_rowid);

    let mut rows = db
        .query(
            "SELECT id, name FROM users WHERE name = :name",
            Params::named([("name", Value::text("Kit"))]),
        )
        .await?;

    while let Some(row) = rows.next_row() {
        println!("{:?} {:?}", row.get_i64("id"), row.get_text("name"));
    }

    db.close();
    Ok(())
}
