/// Configuration
///
/// Settings come from a TOML file under the proxy home directory with
/// programmatic defaults for every key, so a missing file yields a runnable
/// local setup. Paths accept `~` and are expanded at load time.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ProxyError;

pub const DEFAULT_HOME: &str = "~/.chainproxy";
pub const DEFAULT_CONFIG_FILE: &str = "chainproxy.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub home: String,
    pub db_url: String,
    pub use_tls: bool,
    pub btc_url: String,
    pub eth_url: String,
    pub rpc_port: u16,
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<String>,
    pub log_auditor: LogAuditorSettings,
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogAuditorSettings {
    pub log_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub password: String,
    pub db: i64,
}

impl RedisSettings {
    /// Build a redis connection URL from the host/password/db triple. A value
    /// that already carries a scheme is used as-is.
    pub fn connection_url(&self) -> String {
        if self.url.starts_with("redis://") || self.url.starts_with("rediss://") {
            return self.url.clone();
        }
        let auth = if self.password.is_empty() {
            String::new()
        } else {
            format!(":{}@", self.password)
        };
        format!("redis://{}{}/{}", auth, self.url, self.db)
    }
}

impl Settings {
    /// Load settings from `path`, or from `<home>/chainproxy.toml` when no
    /// path is given. A missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let home = shellexpand::tilde(DEFAULT_HOME).into_owned();
        let file = path
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&home).join(DEFAULT_CONFIG_FILE));

        let cfg = config::Config::builder()
            .set_default("home", home.clone())?
            .set_default("db_url", format!("file:{}/chainproxy.db", home))?
            .set_default("use_tls", false)?
            .set_default("btc_url", "btc")?
            .set_default("eth_url", "eth")?
            .set_default("rpc_port", 8080_i64)?
            .set_default("log_level", "info")?
            .set_default("log_format", "pretty")?
            .set_default("log_auditor.log_file", format!("{}/audit.log", home))?
            .set_default("redis.url", "127.0.0.1:6379")?
            .set_default("redis.password", "")?
            .set_default("redis.db", 0_i64)?
            .add_source(config::File::from(file).required(false))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        settings.home = shellexpand::tilde(&settings.home).into_owned();
        settings.db_url = shellexpand::tilde(&settings.db_url).into_owned();
        settings.log_auditor.log_file =
            shellexpand::tilde(&settings.log_auditor.log_file).into_owned();
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_config_file() {
        let missing = Path::new("/nonexistent/chainproxy.toml");
        let settings = Settings::load(Some(missing)).unwrap();
        assert_eq!(settings.rpc_port, 8080);
        assert_eq!(settings.eth_url, "eth");
        assert_eq!(settings.btc_url, "btc");
        assert_eq!(settings.log_level, "info");
        assert!(!settings.use_tls);
        assert_eq!(settings.redis.url, "127.0.0.1:6379");
        assert_eq!(settings.redis.db, 0);
        assert!(settings.log_auditor.log_file.ends_with("audit.log"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainproxy.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "rpc_port = 9090\neth_url = \"mainnet\"\n\n[redis]\nurl = \"redis-host:6379\"\npassword = \"hunter2\"\ndb = 3\n"
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.rpc_port, 9090);
        assert_eq!(settings.eth_url, "mainnet");
        assert_eq!(
            settings.redis.connection_url(),
            "redis://:hunter2@redis-host:6379/3"
        );
    }

    #[test]
    fn test_redis_connection_url() {
        let plain = RedisSettings {
            url: "127.0.0.1:6379".into(),
            password: String::new(),
            db: 0,
        };
        assert_eq!(plain.connection_url(), "redis://127.0.0.1:6379/0");

        let full = RedisSettings {
            url: "redis://elsewhere:6380/2".into(),
            password: "ignored".into(),
            db: 0,
        };
        assert_eq!(full.connection_url(), "redis://elsewhere:6380/2");
    }
}
