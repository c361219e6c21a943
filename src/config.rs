//! On-disk configuration surface for the CLI binary (spec.md §6.1, expanded). `ServerConfig`
//! itself stays the programmatic surface; `FileConfig` is a `serde`/`serde_yaml` shape the CLI
//! loads from disk and turns into one, following the teacher's `Config::load`/`from_str`/
//! `validate`/`save` shape. A `PolicyCallback` is supplied by the embedding program, not read
//! from a file, so it is threaded in separately by [`FileConfig::into_server_config`].

use crate::policy::PolicyCallback;
use crate::server::{ServerConfig, ServerType};
use crate::tls::HttpsOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

/// `serverType` ∈ {`http`, `https`}, spec.md §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileServerType {
    Http,
    Https,
}

impl From<FileServerType> for ServerType {
    fn from(t: FileServerType) -> Self {
        match t {
            FileServerType::Http => ServerType::Http,
            FileServerType::Https => ServerType::Https,
        }
    }
}

/// `httpsOptions`, spec.md §6.1: key, cert, optional `maxCachedSessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHttpsOptions {
    #[serde(rename = "cert-path")]
    pub cert_path: String,
    #[serde(rename = "key-path")]
    pub key_path: String,
    #[serde(default = "default_max_cached_sessions", rename = "max-cached-sessions")]
    pub max_cached_sessions: usize,
}

fn default_max_cached_sessions() -> usize {
    1024
}

/// On-disk form of [`ServerConfig`], loaded by the CLI binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub port: u16,
    pub host: String,
    #[serde(rename = "server-type")]
    pub server_type: FileServerType,
    #[serde(rename = "https-options")]
    pub https_options: Option<FileHttpsOptions>,
    #[serde(rename = "auth-realm")]
    pub auth_realm: String,
    pub verbose: bool,
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            port: 0,
            host: "0.0.0.0".to_string(),
            server_type: FileServerType::Http,
            https_options: None,
            auth_realm: "chainproxy".to_string(),
            verbose: false,
            log_level: "info".to_string(),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a file (synchronous).
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from a file (async).
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Parses configuration from an in-memory YAML document.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: FileConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency: an `https` server type requires `https-options`, and vice
    /// versa a plain `http` server ignores them if present.
    pub fn validate(&self) -> Result<()> {
        if self.server_type == FileServerType::Https && self.https_options.is_none() {
            return Err(Error::config("server-type: https requires https-options"));
        }
        Ok(())
    }

    /// Writes configuration to a file.
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Builds the programmatic [`ServerConfig`] this file describes, pairing it with a
    /// host-supplied `policy` callback (never itself part of the file format, spec.md §9
    /// "policy callback is the sole authority").
    pub fn into_server_config(self, policy: Arc<dyn PolicyCallback>) -> Result<ServerConfig> {
        let https_options = match self.https_options {
            Some(opts) => Some(HttpsOptions {
                cert_path: opts.cert_path.into(),
                key_path: opts.key_path.into(),
                max_cached_sessions: opts.max_cached_sessions,
            }),
            None => None,
        };

        Ok(ServerConfig {
            port: self.port,
            host: self.host,
            server_type: self.server_type.into(),
            https_options,
            auth_realm: self.auth_realm,
            policy,
            verbose: self.verbose,
        })
    }
}
