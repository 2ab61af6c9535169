use std::env;
use std::path::PathBuf;

use dotenv::dotenv;

use crate::auth::Session;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub server_addr: String,
    pub blob_dir: PathBuf,
    pub preferences_path: String,
    pub session: Option<Session>,
    pub seed_demo: bool,
}

impl AppConfig {
    /// Reads the environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        dotenv().ok();

        let session = env::var("HEALTH_USER_ID").ok().map(|uid| Session {
            uid,
            email: env::var("HEALTH_USER_EMAIL").ok(),
            display_name: env::var("HEALTH_USER_NAME").ok(),
        });

        AppConfig {
            database_path: env::var("DATABASE_URL").unwrap_or("./health.db".to_string()),
            server_addr: env::var("SERVER_ADDR").unwrap_or("127.0.0.1:8080".to_string()),
            blob_dir: PathBuf::from(env::var("BLOB_DIR").unwrap_or("./blobs".to_string())),
            preferences_path: env::var("PREFERENCES_PATH")
                .unwrap_or("./preferences.db".to_string()),
            session,
            seed_demo: env::var("SEED_DEMO")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}
