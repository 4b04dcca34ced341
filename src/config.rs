//! Worker configuration.
//!
//! Settings come from the environment (optionally seeded from a `.env` file) and are
//! deserialized by `envy` into [`Config`]. Every setting has a default.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): SQLite connection string, defaults to `sqlite://api_governance.db`
/// - `SERVER_PORT` (optional): liveness HTTP port, defaults to 3000
/// - `DB_MAX_CONNECTIONS` (optional): pool size, defaults to 1 (single writer)
/// - `REFRESH_INTERVAL_SECS` (optional): summary refresh + quota check cadence, defaults to 300
/// - `SCHEDULER_INTERVAL_SECS` (optional): policy transition tick, defaults to 60
/// - `QUOTA_WARNING_THRESHOLD` (optional): percent of a limit that files `approaching_limit`, defaults to 80
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    #[serde(default = "default_warning_threshold")]
    pub quota_warning_threshold: f64,
}

fn default_database_url() -> String {
    "sqlite://api_governance.db".to_string()
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    1
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_scheduler_interval() -> u64 {
    60
}

fn default_warning_threshold() -> f64 {
    80.0
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first when present; real environment variables win over it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment variable values cannot be parsed into expected types
    /// - `QUOTA_WARNING_THRESHOLD` is outside (0, 100) or an interval is zero
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), envy::Error> {
        if !(self.quota_warning_threshold > 0.0 && self.quota_warning_threshold < 100.0) {
            return Err(envy::Error::Custom(
                "QUOTA_WARNING_THRESHOLD must be between 0 and 100".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 || self.scheduler_interval_secs == 0 {
            return Err(envy::Error::Custom(
                "refresh and scheduler intervals must be positive".to_string(),
            ));
        }
        if self.db_max_connections == 0 {
            return Err(envy::Error::Custom(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, envy::Error> {
        let config = envy::from_iter::<_, Config>(
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        )?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite://api_governance.db");
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.db_max_connections, 1);
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.scheduler_interval(), Duration::from_secs(60));
        assert_eq!(config.quota_warning_threshold, 80.0);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(parse(&[("QUOTA_WARNING_THRESHOLD", "120")]).is_err());
        assert!(parse(&[("QUOTA_WARNING_THRESHOLD", "0")]).is_err());
        assert!(parse(&[("QUOTA_WARNING_THRESHOLD", "90")]).is_ok());
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(parse(&[("SCHEDULER_INTERVAL_SECS", "0")]).is_err());
    }
}
