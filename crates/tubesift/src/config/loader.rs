use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.youtube.batch_size == 0 || config.youtube.batch_size > 50 {
        return Err(ConfigError::Validation {
            message: format!(
                "youtube.batchSize must be in 1..=50, got {}",
                config.youtube.batch_size
            ),
        });
    }

    if config.ranking.freshness_half_life_days <= 0.0 {
        return Err(ConfigError::Validation {
            message: "ranking.freshnessHalfLifeDays must be positive".to_string(),
        });
    }

    for (name, threshold) in [
        ("watchNowThreshold", config.ranking.watch_now_threshold),
        ("saveThreshold", config.ranking.save_threshold),
    ] {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Validation {
                message: format!("ranking.{} must be in [0, 1], got {}", name, threshold),
            });
        }
    }

    if config.ranking.save_threshold > config.ranking.watch_now_threshold {
        return Err(ConfigError::Validation {
            message: "ranking.saveThreshold must not exceed ranking.watchNowThreshold".to_string(),
        });
    }

    let w = &config.ranking.feature_weights;
    for (name, weight) in [
        ("sender", w.sender),
        ("thread", w.thread),
        ("freshness", w.freshness),
        ("topic", w.topic),
        ("noisePenalty", w.noise_penalty),
    ] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ConfigError::Validation {
                message: format!(
                    "ranking.featureWeights.{} must be finite and non-negative, got {}",
                    name, weight
                ),
            });
        }
    }

    for (name, policy) in [
        ("emailProcess", &config.queues.email_process),
        ("enrich", &config.queues.enrich),
        ("rankCompute", &config.queues.rank_compute),
        ("inboxSync", &config.queues.inbox_sync),
    ] {
        if policy.attempts == 0 {
            return Err(ConfigError::Validation {
                message: format!("queues.{}.attempts must be at least 1", name),
            });
        }
        if policy.concurrency == 0 {
            return Err(ConfigError::Validation {
                message: format!("queues.{}.concurrency must be at least 1", name),
            });
        }
    }

    Ok(())
}
