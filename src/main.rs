use health_companion::config::AppConfig;
use health_companion::seed::{seed_demo, DEMO_USER};
use health_companion::server::Server;
use health_companion::storage::{LocalBlobStore, SqliteStore};
use log::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    env_logger::init();

    let store = SqliteStore::new(&config.database_path)?;
    if config.seed_demo {
        let uid = config
            .session
            .as_ref()
            .map(|session| session.uid.as_str())
            .unwrap_or(DEMO_USER);
        seed_demo(&store, uid).await?;
    }

    let server = Server::new(store, LocalBlobStore::new(&config.blob_dir));
    let server_addr = config.server_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(&server_addr).await {
            error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down server...");

    Ok(())
}
