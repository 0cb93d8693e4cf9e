use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;

use crate::workflows::pledges::{LendingPolicy, SweepSchedule, DEFAULT_LOAN_TERM_DAYS};

/// Longest loan term the desk accepts, in days.
pub const MAX_LOAN_TERM_DAYS: u32 = 3650;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the desk.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub storage: StorageConfig,
    pub lending: LendingConfig,
    pub scheduler: SchedulerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let db_path = env::var("PAWNSHOP_DB_PATH").unwrap_or_else(|_| "pawnshop.db".to_string());

        let loan_term_days = match env::var("PAWNSHOP_LOAN_TERM_DAYS") {
            Ok(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|days| (1..=MAX_LOAN_TERM_DAYS).contains(days))
                .ok_or(ConfigError::InvalidLoanTerm { value })?,
            Err(_) => DEFAULT_LOAN_TERM_DAYS,
        };

        let sweep_at = env::var("PAWNSHOP_SWEEP_AT").unwrap_or_else(|_| "00:01".to_string());
        let run_at = NaiveTime::parse_from_str(sweep_at.trim(), "%H:%M").map_err(|source| {
            ConfigError::InvalidSweepTime {
                value: sweep_at.clone(),
                source,
            }
        })?;

        let poll_secs = match env::var("PAWNSHOP_SWEEP_POLL_SECS") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidPollInterval { value })?,
            Err(_) => 60,
        };

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            storage: StorageConfig {
                db_path: PathBuf::from(db_path),
            },
            lending: LendingConfig { loan_term_days },
            scheduler: SchedulerConfig {
                run_at,
                poll_interval: Duration::from_secs(poll_secs),
            },
            telemetry: TelemetryConfig { log_level },
        })
    }
}

/// Location of the SQLite ledger.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct LendingConfig {
    pub loan_term_days: u32,
}

impl LendingConfig {
    pub fn policy(&self) -> LendingPolicy {
        LendingPolicy {
            loan_term_days: self.loan_term_days,
        }
    }
}

/// Daily expiry sweep timing.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub run_at: NaiveTime,
    pub poll_interval: Duration,
}

impl SchedulerConfig {
    pub fn schedule(&self) -> SweepSchedule {
        SweepSchedule::daily_at(self.run_at)
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidLoanTerm {
        value: String,
    },
    InvalidSweepTime {
        value: String,
        source: chrono::ParseError,
    },
    InvalidPollInterval {
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLoanTerm { value } => write!(
                f,
                "PAWNSHOP_LOAN_TERM_DAYS must be between 1 and {MAX_LOAN_TERM_DAYS} days (got '{value}')"
            ),
            ConfigError::InvalidSweepTime { value, .. } => {
                write!(f, "PAWNSHOP_SWEEP_AT must be HH:MM (got '{value}')")
            }
            ConfigError::InvalidPollInterval { value } => write!(
                f,
                "PAWNSHOP_SWEEP_POLL_SECS must be a positive number of seconds (got '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidSweepTime { source, .. } => Some(source),
            ConfigError::InvalidLoanTerm { .. } | ConfigError::InvalidPollInterval { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_LOG_LEVEL",
            "PAWNSHOP_DB_PATH",
            "PAWNSHOP_LOAN_TERM_DAYS",
            "PAWNSHOP_SWEEP_AT",
            "PAWNSHOP_SWEEP_POLL_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.storage.db_path, PathBuf::from("pawnshop.db"));
        assert_eq!(config.lending.loan_term_days, 30);
        assert_eq!(
            config.scheduler.run_at,
            NaiveTime::from_hms_opt(0, 1, 0).expect("valid time")
        );
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(60));
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn reads_overrides_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        env::set_var("PAWNSHOP_LOAN_TERM_DAYS", "45");
        env::set_var("PAWNSHOP_SWEEP_AT", "02:30");
        env::set_var("PAWNSHOP_SWEEP_POLL_SECS", "5");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.environment, AppEnvironment::Production);
        assert_eq!(config.lending.policy().loan_term_days, 45);
        assert_eq!(
            config.scheduler.schedule().run_at(),
            NaiveTime::from_hms_opt(2, 30, 0).expect("valid time")
        );
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
        reset_env();
    }

    #[test]
    fn rejects_invalid_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PAWNSHOP_LOAN_TERM_DAYS", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidLoanTerm { .. })
        ));

        env::set_var("PAWNSHOP_LOAN_TERM_DAYS", "4294967295");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidLoanTerm { .. })
        ));

        reset_env();
        env::set_var("PAWNSHOP_SWEEP_AT", "midnight");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidSweepTime { .. })
        ));
        reset_env();
    }
}
