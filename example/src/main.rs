use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use sqlwire::{Config, Result};

mod script;
mod mysql;
mod postgres;
mod stream;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env();

    mysql::main(&config).instrument(trace_span!("mysql")).await?;
    postgres::main().instrument(trace_span!("postgres")).await?;
    stream::main(&config).instrument(trace_span!("stream")).await?;

    Ok(())
}
