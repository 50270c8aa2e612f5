use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let port: u16 = std::env::var("SLINK_AUTH_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8001);
    let db_folder = std::env::var("SLINK_DB_FOLDER").unwrap_or_else(|_| "dbs".to_string());
    let secret = std::env::var("SLINK_TOKEN_KEY").context("SLINK_TOKEN_KEY environment variable is not set")?;

    info!(target: "slink", "identity service starting: port={}, db_root='{}'", port, db_folder);
    slink::identity_server::run_with_port(port, &db_folder, &secret).await
}
