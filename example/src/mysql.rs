use sqlwire::{Config, Result, collect::Collect, mysql, transport::Replay};

use crate::script;

const LONGLONG: u8 = 0x08;
const VAR_STRING: u8 = 0xfd;

pub async fn main(config: &Config) -> Result<()> {
    let eof = |seq| match config.deprecate_eof() {
        true => script::mysql(seq, b"\xfe\x00\x00\x02\x00\x00\x00"),
        false => script::mysql(seq, b"\xfe\x00\x00\x02\x00"),
    };

    let mut io = Replay::new([
        script::mysql(1, b"\x02"),
        script::mysql_column(2, "id", LONGLONG),
        script::mysql_column(3, "name", VAR_STRING),
    ]);
    let mut seq = 4;
    if !config.deprecate_eof() {
        io.push([eof(seq)]);
        seq += 1;
    }
    io.push([
        script::mysql_row(seq, &["1", "Deez"]),
        script::mysql_row(seq + 1, &["2", "Foo"]),
        eof(seq + 2),
    ]);

    let users = mysql::query(&mut io, "SELECT id, name FROM users", Collect::<(i64, String)>::new(), config)
        .await?
        .into_value()
        .unwrap_or_default();

    assert_eq!(users, [(1, "Deez".to_owned()), (2, "Foo".to_owned())]);
    tracing::info!("users: {users:?}");

    Ok(())
}
