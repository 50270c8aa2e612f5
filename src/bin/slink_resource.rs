use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let port: u16 = std::env::var("SLINK_RESOURCE_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8000);
    let db_folder = std::env::var("SLINK_DB_FOLDER").unwrap_or_else(|_| "dbs".to_string());
    let identity_url =
        std::env::var("SLINK_AUTH_URL").unwrap_or_else(|_| "http://localhost:8001".to_string());

    info!(
        target: "slink",
        "resource service starting: port={}, db_root='{}', identity_url='{}'",
        port, db_folder, identity_url
    );
    slink::resource_server::run_with_port(port, &db_folder, &identity_url).await
}
