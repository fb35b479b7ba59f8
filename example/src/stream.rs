use futures::StreamExt;
use sqlwire::{
    Config, Result,
    cursor::PgCursor,
    statement::StatementCache,
    stream,
    transport::Replay,
};

use crate::script::{pg, pg_columns, pg_complete, pg_ready, pg_row};

pub async fn main(config: &Config) -> Result<()> {
    let cache = StatementCache::from_config(config);
    let stmt = cache.prepare("SELECT id FROM foo");

    let io = Replay::new([
        pg(b'1', b""),
        pg(b'2', b""),
        pg_columns(&["id"]),
        pg_row(&[1]),
        pg_row(&[2]),
        pg_complete("SELECT 2"),
        pg_ready(),
        pg(b'3', b""),
        pg_ready(),
    ]);

    let (rows, worker) = stream::row_stream::<_, (i32,)>(PgCursor::new(io, stmt, vec![]), config.fetch_size());
    let worker = tokio::spawn(worker);

    let mut subscription = rows.subscribe();
    drop(rows);

    while let Some(row) = subscription.next().await {
        let (id,) = row?;
        tracing::info!(id, "row");
    }

    drop(subscription);
    worker.await.ok();

    Ok(())
}
