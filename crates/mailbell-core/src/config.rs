use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 2_000; // first tick after start()
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Top-level config (mailbell.toml + MAILBELL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailbellConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Outbound SMTP accounts, keyed by `id` at delivery time.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Background scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the recurring tick.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Delay before the first tick after `start()`.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// A scheduled send is marked failed once this many attempts have failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on a single delivery call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Reset sends stranded in `sending` back to `pending` on first start.
    #[serde(default = "bool_true")]
    pub recover_interrupted_sends: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            recover_interrupted_sends: true,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// SMTP credentials for one sending account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Matches `account_id` on scheduled sends.
    pub id: String,
    /// Address used in the `From:` header.
    pub email: String,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mailbell/mailbell.db", home)
}

impl MailbellConfig {
    /// Load config from a TOML file with MAILBELL_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `MAILBELL_SCHEDULER__POLL_INTERVAL_SECS=10`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MailbellConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MAILBELL_").split("__"))
            .extract()
            .map_err(|e| crate::error::MailbellError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let s = &self.scheduler;
        if s.poll_interval_secs == 0 {
            return Err(must_be_positive("scheduler.poll_interval_secs"));
        }
        if s.send_timeout_secs == 0 {
            return Err(must_be_positive("scheduler.send_timeout_secs"));
        }
        if s.max_retries == 0 {
            return Err(must_be_positive("scheduler.max_retries"));
        }
        Ok(())
    }

    pub fn account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }
}

fn must_be_positive(key: &'static str) -> crate::error::MailbellError {
    crate::error::MailbellError::InvalidSetting {
        key,
        reason: "must be greater than 0",
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mailbell/mailbell.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_poll_contract() {
        let config = MailbellConfig::default();
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.scheduler.initial_delay(), Duration::from_secs(2));
        assert_eq!(config.scheduler.max_retries, 3);
        assert!(config.scheduler.recover_interrupted_sends);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut config = MailbellConfig::default();
        config.scheduler.poll_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(crate::error::MailbellError::InvalidSetting {
                key: "scheduler.poll_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "mailbell.toml",
                r#"
                [scheduler]
                poll_interval_secs = 10

                [[accounts]]
                id = "a1"
                email = "me@example.com"
                smtp_host = "smtp.example.com"
                username = "me"
                password = "secret"
                "#,
            )?;
            jail.set_env("MAILBELL_SCHEDULER__MAX_RETRIES", "5");

            let config = MailbellConfig::load(Some("mailbell.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.poll_interval_secs, 10);
            assert_eq!(config.scheduler.max_retries, 5);
            assert_eq!(config.scheduler.send_timeout_secs, DEFAULT_SEND_TIMEOUT_SECS);

            let account = config.account("a1").ok_or_else(|| "account a1 missing".to_string())?;
            assert_eq!(account.smtp_port, DEFAULT_SMTP_PORT);
            assert!(config.account("nope").is_none());
            Ok(())
        });
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = MailbellConfig::load(Some("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
            assert!(config.accounts.is_empty());
            Ok(())
        });
    }
}
