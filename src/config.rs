//! Server configuration: loaded once at startup from `config.yaml`, then
//! shared as an immutable `Arc<Config>`.
//!
//! Grounded on `original_source/server/config.go`'s `tConfig` (field names,
//! defaults) and on `own-ai-app`'s `utils/paths.rs` for the "resolve app
//! data paths, create directories if absent" pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> String {
    "50051".to_string()
}

fn default_tasks_file() -> String {
    "tasks.yaml".to_string()
}

fn default_log_folder() -> String {
    "logs".to_string()
}

fn default_log_limit() -> i64 {
    -1
}

/// Optional TLS material. When `crt`/`key` are absent, the transport binds
/// plaintext HTTP. When `client_cert` is present, the transport requires and
/// verifies a client certificate (mutual TLS), mirroring
/// `original_source/server/grpc.go`'s conditional `ClientAuthType` switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub crt: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_server_port")]
    pub server_port: String,
    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,
    #[serde(default = "default_log_folder")]
    pub log_folder: String,
    /// Number of daily log files to retain; values `< 1` disable pruning.
    #[serde(default = "default_log_limit")]
    pub log_limit: i64,
    #[serde(default)]
    pub ssl: TlsConfig,
    /// app name -> executable path, the only apps a `Task` may invoke.
    pub apps: HashMap<String, String>,
}

impl Config {
    /// Loads and validates a config file from `path`.
    pub fn load(path: &Path) -> Result<Config, ServiceError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::ConfigLoad(anyhow::anyhow!(
                "reading config file {}: {e}",
                path.display()
            ))
        })?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.apps.is_empty() {
            return Err(ServiceError::ConfigLoad(anyhow::anyhow!(
                "config.apps must declare at least one app"
            )));
        }
        Ok(())
    }

    pub fn tasks_file_path(&self) -> PathBuf {
        PathBuf::from(&self.tasks_file)
    }

    pub fn log_folder_path(&self) -> PathBuf {
        PathBuf::from(&self.log_folder)
    }

    pub fn tls_enabled(&self) -> bool {
        self.ssl.crt.is_some() && self.ssl.key.is_some()
    }

    pub fn mutual_tls_enabled(&self) -> bool {
        self.tls_enabled() && self.ssl.client_cert.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apps:\n  echo: /bin/echo\n").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server_address, "127.0.0.1");
        assert_eq!(config.server_port, "50051");
        assert_eq!(config.log_limit, -1);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn rejects_config_with_no_apps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apps: {{}}\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn tls_requires_both_cert_and_key() {
        let mut config_yaml = String::from("apps:\n  echo: /bin/echo\nssl:\n  crt: a.pem\n");
        config_yaml.push_str("");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{config_yaml}").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(!config.tls_enabled());
    }
}
