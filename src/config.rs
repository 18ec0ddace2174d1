use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenvy::dotenv;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: usize,
    pub login_log_path: PathBuf,
    /// JSON file holding the injected credential table; logins are rejected
    /// when unset.
    pub credentials_path: Option<PathBuf>,
}

pub fn load_config() -> Result<Config> {
    // Load .env first so the vars below can come from it
    dotenv().ok();

    let bind_addr = std::env::var("EDA_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .context("parsing EDA_BIND_ADDR")?;

    let max_file_size = match std::env::var("EDA_MAX_FILE_SIZE") {
        Ok(raw) => raw.parse().context("parsing EDA_MAX_FILE_SIZE")?,
        Err(_) => default_max_file_size(),
    };

    let login_log_path = std::env::var("EDA_LOGIN_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("login_log.csv"));

    let credentials_path = std::env::var("EDA_CREDENTIALS").ok().map(PathBuf::from);

    Ok(Config {
        bind_addr,
        max_file_size,
        login_log_path,
        credentials_path,
    })
}
