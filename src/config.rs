use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/lms.db?mode=rwc";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_DATA_DIR: &str = "./data";

/// Public URL prefix for files rendered under `DATA_DIR`.
pub const CONTENT_PREFIX: &str = "/content";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let port = match env::var("PORT") {
            Ok(val) => val.parse().context("Failed to parse PORT")?,
            Err(_) => DEFAULT_PORT,
        };

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(val) => val
                .parse()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
            Err(_) => 5,
        };

        let data_dir = PathBuf::from(
            env::var("DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()),
        );

        Ok(Config {
            database_url,
            port,
            data_dir,
            max_connections,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
