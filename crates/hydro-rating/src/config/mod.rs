use std::env;
use std::fmt;

/// Distinguishes runtime behavior for different deployments of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingEnvironment {
    Development,
    Test,
    Production,
}

impl RatingEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the rating engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub environment: RatingEnvironment,
    pub safety: SafetyPolicy,
    pub shift_decimals: Option<u32>,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = RatingEnvironment::from_str(
            &env::var("RATING_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let defaults = SafetyPolicy::default();
        let allow_unsafe = read_flag("RATING_ALLOW_UNSAFE", defaults.allow_unsafe)?;
        let warn_unsafe = read_flag("RATING_WARN_UNSAFE", defaults.warn_unsafe)?;

        let shift_decimals = match env::var("RATING_SHIFT_DECIMALS") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|decimals| *decimals <= 12)
                    .ok_or(ConfigError::InvalidShiftDecimals { value: raw })?,
            ),
            _ => None,
        };

        let log_level = env::var("RATING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let format = match env::var("RATING_LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).ok_or(ConfigError::InvalidLogFormat { value: raw })?,
            Err(_) => LogFormat::Compact,
        };

        Ok(Self {
            environment,
            safety: SafetyPolicy {
                allow_unsafe,
                warn_unsafe,
            },
            shift_decimals,
            telemetry: TelemetryConfig { log_level, format },
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: RatingEnvironment::Development,
            safety: SafetyPolicy::default(),
            shift_decimals: None,
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn read_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value: raw }),
    }
}

/// Gate for operations that proceed with mismatched or unknown units.
///
/// When `allow_unsafe` is false such operations fail with an unsafe-operation
/// error. Otherwise they continue with unconverted values and, when
/// `warn_unsafe` is set, emit a warning event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyPolicy {
    pub allow_unsafe: bool,
    pub warn_unsafe: bool,
}

impl SafetyPolicy {
    pub const fn strict() -> Self {
        Self {
            allow_unsafe: false,
            warn_unsafe: true,
        }
    }

    pub const fn permissive() -> Self {
        Self {
            allow_unsafe: true,
            warn_unsafe: true,
        }
    }

    pub const fn silent() -> Self {
        Self {
            allow_unsafe: true,
            warn_unsafe: false,
        }
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// Output layout for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidFlag { name: &'static str, value: String },
    InvalidShiftDecimals { value: String },
    InvalidLogFormat { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be true or false, got '{value}'")
            }
            ConfigError::InvalidShiftDecimals { value } => write!(
                f,
                "RATING_SHIFT_DECIMALS must be an integer between 0 and 12, got '{value}'"
            ),
            ConfigError::InvalidLogFormat { value } => write!(
                f,
                "RATING_LOG_FORMAT must be one of compact, pretty or json, got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

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
        env::remove_var("RATING_ENV");
        env::remove_var("RATING_ALLOW_UNSAFE");
        env::remove_var("RATING_WARN_UNSAFE");
        env::remove_var("RATING_SHIFT_DECIMALS");
        env::remove_var("RATING_LOG_LEVEL");
        env::remove_var("RATING_LOG_FORMAT");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = EngineConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, RatingEnvironment::Development);
        assert_eq!(config.safety, SafetyPolicy::strict());
        assert_eq!(config.shift_decimals, None);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.format, LogFormat::Compact);
    }

    #[test]
    fn load_reads_safety_flags_and_precision() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RATING_ENV", "production");
        env::set_var("RATING_ALLOW_UNSAFE", "yes");
        env::set_var("RATING_WARN_UNSAFE", "off");
        env::set_var("RATING_SHIFT_DECIMALS", "2");
        env::set_var("RATING_LOG_FORMAT", "JSON");
        let config = EngineConfig::load().expect("config loads");
        reset_env();

        assert_eq!(config.environment, RatingEnvironment::Production);
        assert_eq!(config.safety, SafetyPolicy::silent());
        assert_eq!(config.shift_decimals, Some(2));
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn malformed_flag_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RATING_ALLOW_UNSAFE", "sometimes");
        let err = EngineConfig::load().expect_err("flag should not parse");
        reset_env();

        match err {
            ConfigError::InvalidFlag { name, .. } => assert_eq!(name, "RATING_ALLOW_UNSAFE"),
            other => panic!("expected invalid flag, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_precision_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RATING_SHIFT_DECIMALS", "40");
        let result = EngineConfig::load();
        reset_env();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidShiftDecimals { .. })
        ));
    }
}
