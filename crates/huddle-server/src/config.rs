use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets that ship in sample env files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret", "your-secret-here"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: Option<String>,
    pub upload_dir: PathBuf,
    pub answer_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match non_empty("HUDDLE_PORT") {
            Some(port) => port.parse().with_context(|| format!("invalid HUDDLE_PORT {:?}", port))?,
            None => 3000,
        };

        let jwt_secret = non_empty("HUDDLE_JWT_SECRET");
        if let Some(secret) = &jwt_secret {
            if PLACEHOLDER_SECRETS.contains(&secret.as_str()) {
                bail!("HUDDLE_JWT_SECRET is a placeholder value; set a real secret or unset it");
            }
        }

        Ok(Self {
            host: non_empty("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: non_empty("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into()).into(),
            jwt_secret,
            upload_dir: non_empty("HUDDLE_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            answer_url: non_empty("HUDDLE_ANSWER_URL"),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
