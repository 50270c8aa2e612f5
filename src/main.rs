use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Runs both services in one process: the identity service and the resource
/// service that trusts it. Production deployments run the dedicated binaries
/// instead.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let auth_port: u16 = std::env::var("SLINK_AUTH_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8001);
    let resource_port: u16 = std::env::var("SLINK_RESOURCE_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8000);
    let db_folder = std::env::var("SLINK_DB_FOLDER").unwrap_or_else(|_| "dbs".to_string());
    let identity_url =
        std::env::var("SLINK_AUTH_URL").unwrap_or_else(|_| format!("http://localhost:{auth_port}"));
    // The signing key has no default: an unset or empty key must stop the
    // process here, not surface later as unverifiable tokens.
    let secret = std::env::var("SLINK_TOKEN_KEY").context("SLINK_TOKEN_KEY environment variable is not set")?;

    info!(
        target: "slink",
        "slink starting: auth_port={}, resource_port={}, db_root='{}', identity_url='{}'",
        auth_port, resource_port, db_folder, identity_url
    );

    tokio::try_join!(
        slink::identity_server::run_with_port(auth_port, &db_folder, &secret),
        slink::resource_server::run_with_port(resource_port, &db_folder, &identity_url),
    )?;
    Ok(())
}
