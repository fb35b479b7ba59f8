use sqlwire::{
    Encode, Result,
    collect::{Collect, Count},
    cursor::{CursorExt, PgCursor},
    postgres,
    statement::StatementCache,
    transport::Replay,
};

use crate::script::{pg, pg_columns, pg_complete, pg_ready, pg_row};

pub async fn main() -> Result<()> {
    let cache = StatementCache::default();

    // Execute, the first execution parses

    for _ in 0..2 {
        let stmt = cache.prepare("SELECT id FROM foo WHERE id > $1");
        let parsed = stmt.is_parsed();

        let mut io = Replay::new(match parsed {
            true => vec![],
            false => vec![pg(b'1', b"")],
        });
        io.push([
            pg(b'2', b""),
            pg_columns(&["id"]),
            pg_row(&[4]),
            pg_row(&[20]),
            pg_complete("SELECT 2"),
            pg_ready(),
        ]);

        let ids = postgres::execute(&mut io, stmt, &[0i32.encode()], 0, Collect::<(i32,)>::new())
            .await?
            .into_value()
            .unwrap_or_default();

        assert_eq!(ids, [(4,), (20,)]);
        tracing::info!(parsed, "ids: {ids:?}");
    }

    // Simple query

    let mut io = Replay::new([pg_complete("DELETE 3"), pg_ready()]);
    let result = postgres::query(&mut io, "DELETE FROM foo", Count).await?;
    assert_eq!(result.affected_rows(), 3);

    // Cursor

    let stmt = cache.prepare("SELECT id FROM foo");
    let mut io = Replay::new([
        pg(b'1', b""),
        pg(b'2', b""),
        pg_columns(&["id"]),
        pg_row(&[1]),
        pg(b's', b""),
        pg_ready(),
        pg_row(&[2]),
        pg_complete("SELECT 1"),
        pg_ready(),
        pg(b'3', b""),
        pg_ready(),
    ]);

    let mut cursor = PgCursor::new(&mut io, stmt, vec![]);
    loop {
        let page = cursor.next_page(1).await?;
        tracing::info!(rows = page.rows.len(), more = page.has_more, "page");
        if !page.has_more {
            break;
        }
    }
    cursor.shutdown().await?;

    Ok(())
}
