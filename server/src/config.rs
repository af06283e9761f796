use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::http::ReadLimits;

/// Server settings. Every flag falls back to an environment variable, and a
/// `.env` file is loaded before parsing.
#[derive(Debug, Clone, Parser)]
#[command(name = "catalog-server", about = "Product catalog HTTP service")]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// PEM certificate chain; serving TLS needs both this and --tls-key
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Store connection string: memory://, objmem://, file://<path> or s3://<bucket>
    #[arg(long, env = "STORE_URL", default_value = "file://./data")]
    pub store_url: String,

    /// Page size used when a listing names no limit
    #[arg(long, env = "DEFAULT_READ_LIMIT", default_value_t = 20)]
    pub default_limit: usize,

    /// Largest page a listing may ask for; bigger requests are clamped
    #[arg(long, env = "MAX_READ_LIMIT", default_value_t = 100)]
    pub max_limit: usize,

    /// API keys to provision at start-up, comma separated
    #[arg(long, env = "API_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub api_keys: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_limit < 1 || self.max_limit < 1 {
            anyhow::bail!("read limits must be at least 1");
        }
        if self.default_limit > self.max_limit {
            anyhow::bail!(
                "default read limit {} exceeds the maximum {}",
                self.default_limit,
                self.max_limit
            );
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            anyhow::bail!("--tls-cert and --tls-key must be given together");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))
    }

    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn read_limits(&self) -> ReadLimits {
        ReadLimits {
            default: self.default_limit,
            max: self.max_limit,
        }
    }
}
