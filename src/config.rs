use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::fsrs_scheduler::DEFAULT_DESIRED_RETENTION;
use crate::learning_steps::{DEFAULT_LEARNING_STEPS, LearningSteps};
use crate::models::{CandidateConfig, QueueConfig};

use crate::{log_system_event, log_validation};

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Tunables of the scheduling core, shared by every service.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub learning_steps: LearningSteps,
    pub desired_retention: f64,
    pub queue: QueueConfig,
    pub candidates: CandidateConfig,
    /// Memory-model reviews required before parameters are re-fit.
    pub optimizer_min_reviews: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            learning_steps: LearningSteps::default(),
            desired_retention: DEFAULT_DESIRED_RETENTION,
            queue: QueueConfig::default(),
            candidates: CandidateConfig::default(),
            optimizer_min_reviews: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            learning_steps = self.scheduler.learning_steps.len(),
            desired_retention = self.scheduler.desired_retention,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        self.scheduler.validate()?;

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unusual log filter '{}', EnvFilter may fall back to defaults", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:tutor_srs.db".to_string());

        Ok(DatabaseConfig { url })
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
    /// Readable on its own, before any subscriber is installed.
    pub fn from_env() -> Result<Self> {
        Ok(LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info,tutor_srs=debug".to_string()),
            file_enabled: env_flag("LOG_FILE_ENABLED", true),
            console_enabled: env_flag("LOG_CONSOLE_ENABLED", true),
            log_directory: env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string()),
        })
    }
}

/// Boolean switch; anything other than `true`/`false` keeps the default.
fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<bool>().ok())
        .unwrap_or(default)
}

impl SchedulerConfig {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults; set but
    /// malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SchedulerConfig::default();

        let learning_steps = match lookup("LEARNING_STEPS") {
            Some(raw) => {
                let parts: Vec<&str> = raw.split(',').filter(|s| !s.trim().is_empty()).collect();
                LearningSteps::parse(parts.as_slice())
                    .map_err(|e| anyhow!("Invalid LEARNING_STEPS '{}': {}", raw, e))?
            }
            None => LearningSteps::parse(&DEFAULT_LEARNING_STEPS)?,
        };

        let config = SchedulerConfig {
            learning_steps,
            desired_retention: parse_or(&lookup, "DESIRED_RETENTION", defaults.desired_retention)?,
            queue: QueueConfig {
                new_cards: parse_or(&lookup, "QUEUE_NEW_CARDS", defaults.queue.new_cards)?,
                max_due: parse_or(&lookup, "QUEUE_MAX_DUE", defaults.queue.max_due)?,
                min_due: parse_or(&lookup, "QUEUE_MIN_DUE", defaults.queue.min_due)?,
            },
            candidates: CandidateConfig {
                count: defaults.candidates.count,
                vocabulary_confidence_threshold: parse_or(
                    &lookup,
                    "VOCABULARY_CONFIDENCE_THRESHOLD",
                    defaults.candidates.vocabulary_confidence_threshold,
                )?,
                listening_candidate_threshold: parse_or(
                    &lookup,
                    "LISTENING_CANDIDATE_THRESHOLD",
                    defaults.candidates.listening_candidate_threshold,
                )?,
            },
            optimizer_min_reviews: parse_or(
                &lookup,
                "OPTIMIZER_MIN_REVIEWS",
                defaults.optimizer_min_reviews,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.desired_retention > 0.0 && self.desired_retention < 1.0) {
            return Err(anyhow!(
                "DESIRED_RETENTION must be between 0 and 1, got {}",
                self.desired_retention
            ));
        }

        for (name, value) in [
            ("VOCABULARY_CONFIDENCE_THRESHOLD", self.candidates.vocabulary_confidence_threshold),
            ("LISTENING_CANDIDATE_THRESHOLD", self.candidates.listening_candidate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }

        if self.optimizer_min_reviews == 0 {
            return Err(anyhow!("OPTIMIZER_MIN_REVIEWS must be greater than 0"));
        }

        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Keep the first and last four characters of a value that may carry credentials.
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
