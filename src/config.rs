use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub library: LibraryConfig,
    pub quiz: QuizConfig,
    pub state: StateConfig,
    pub classifier: ClassifierConfig,
    pub filter: FilterConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Question bank document location
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub path: String,
}

/// Attempt parameters
#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    pub duration_seconds: u64,
    pub question_count: usize,
}

/// Continuation state signing
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    pub signing_enabled: bool,
    pub signing_key: Option<String>,
}

/// BTL classifier selection
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub url: Option<String>,
    pub timeout_seconds: u64,
}

/// Difficulty filter hyperparameters
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub vocabulary_size: usize,
    pub latent_dim: usize,
    pub epochs: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            library: LibraryConfig::from_env()?,
            quiz: QuizConfig::from_env()?,
            state: StateConfig::from_env()?,
            classifier: ClassifierConfig::from_env()?,
            filter: FilterConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            library_path = %self.library.path,
            quiz_duration_seconds = self.quiz.duration_seconds,
            quiz_question_count = self.quiz.question_count,
            state_signing = self.state.signing_enabled,
            signing_key_masked = ?self.state.signing_key.as_deref().map(mask_sensitive_data),
            classifier_url = ?self.classifier.url,
            classifier_timeout_seconds = self.classifier.timeout_seconds,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.library.path.trim().is_empty() {
            return Err(anyhow!("LIBRARY_FILE must not be empty"));
        }

        if self.quiz.duration_seconds == 0 {
            return Err(anyhow!("QUIZ_DURATION_SECONDS must be greater than 0"));
        }

        if self.quiz.question_count == 0 {
            return Err(anyhow!("QUIZ_QUESTION_COUNT must be greater than 0"));
        }

        if self.classifier.timeout_seconds == 0 {
            return Err(anyhow!("CLASSIFIER_TIMEOUT_SECONDS must be greater than 0"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.filter.latent_dim == 0 || self.filter.vocabulary_size == 0 {
            return Err(anyhow!("Filter latent dimension and vocabulary size must be greater than 0"));
        }

        if !self.state.signing_enabled {
            warn!("Quiz state signing is disabled - clients can alter their own scores");
        } else if self.state.signing_key.is_none() {
            warn!("STATE_SIGNING_KEY not set - using a random per-process key, quiz links will not survive a restart");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw))
}

fn parse_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

impl LibraryConfig {
    fn from_env() -> Result<Self> {
        let path = env::var("LIBRARY_FILE").unwrap_or_else(|_| "library.json".to_string());
        Ok(LibraryConfig { path })
    }
}

impl QuizConfig {
    fn from_env() -> Result<Self> {
        Ok(QuizConfig {
            duration_seconds: parse_env("QUIZ_DURATION_SECONDS", "1200")?,
            question_count: parse_env("QUIZ_QUESTION_COUNT", "25")?,
        })
    }
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 20 * 60,
            question_count: 25,
        }
    }
}

impl StateConfig {
    fn from_env() -> Result<Self> {
        let signing_key = env::var("STATE_SIGNING_KEY")
            .ok()
            .filter(|key| !key.is_empty());

        Ok(StateConfig {
            signing_enabled: parse_flag("STATE_SIGNING_ENABLED", true),
            signing_key,
        })
    }
}

impl ClassifierConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("CLASSIFIER_URL").ok().filter(|u| !u.is_empty());
        Ok(ClassifierConfig {
            url,
            timeout_seconds: parse_env("CLASSIFIER_TIMEOUT_SECONDS", "10")?,
        })
    }
}

impl FilterConfig {
    fn from_env() -> Result<Self> {
        Ok(FilterConfig {
            vocabulary_size: parse_env("FILTER_VOCABULARY_SIZE", "500")?,
            latent_dim: parse_env("FILTER_LATENT_DIM", "16")?,
            epochs: parse_env("FILTER_EPOCHS", "200")?,
        })
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            vocabulary_size: 500,
            latent_dim: 16,
            epochs: 200,
        }
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "3000".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str)
        })?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,btl_quiz=debug".to_string());
        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled: parse_flag("LOG_FILE_ENABLED", true),
            console_enabled: parse_flag("LOG_CONSOLE_ENABLED", true),
            log_directory,
        })
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            library: LibraryConfig {
                path: "library.json".to_string(),
            },
            quiz: QuizConfig::default(),
            state: StateConfig {
                signing_enabled: true,
                signing_key: Some("a-long-signing-key".to_string()),
            },
            classifier: ClassifierConfig {
                url: None,
                timeout_seconds: 10,
            },
            filter: FilterConfig::default(),
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_enabled: true,
                console_enabled: true,
                log_directory: "logs".to_string(),
            },
        }
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("a-long-signing-key"), "a-lo***-key");
    }

    #[test]
    fn test_quiz_defaults() {
        let quiz = QuizConfig::default();
        assert_eq!(quiz.duration_seconds, 1200);
        assert_eq!(quiz.question_count, 25);
    }

    #[test]
    fn test_config_validation() {
        let config = valid_config();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.classifier.timeout_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.quiz.duration_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.quiz.question_count = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.filter.latent_dim = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_signing_can_be_disabled() {
        let mut config = valid_config();
        config.state.signing_enabled = false;
        config.state.signing_key = None;
        assert!(config.validate().is_ok());
    }
}
