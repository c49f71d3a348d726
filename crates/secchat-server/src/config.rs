use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

/// Real-time chat relay server
#[derive(Parser, Debug, Clone)]
#[command(name = "secchat", version, about = "Real-time chat relay")]
pub struct Config {
    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Shared chat password. Clients send its SHA-256 hex digest.
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: String,

    /// SQLite database file
    #[arg(long = "db", env = "DB_PATH", default_value = "./data/chat.db")]
    pub db_path: PathBuf,

    /// Directory for uploaded files
    #[arg(long = "uploads", env = "UPLOAD_DIR", default_value = "./data/uploads")]
    pub upload_dir: PathBuf,

    /// Frontend build served at `/`
    #[arg(long, env = "STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    /// Create the database parent and upload directories if missing.
    pub fn prepare_dirs(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::create_dir_all(&self.upload_dir)
            .with_context(|| format!("creating {}", self.upload_dir.display()))?;
        Ok(())
    }
}
