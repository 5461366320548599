use crate::config::types::{
    ApiConfig, Config, QueueConfig, RunnerConfig, StorageConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
///
/// Runs before any component is constructed so a bad file fails at startup
/// rather than mid-crawl.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_storage_config(&config.storage)?;
    validate_queue_config(&config.queue)?;
    validate_worker_config(&config.worker, &config.queue)?;
    validate_runner_config(&config.runner)?;
    Ok(())
}

/// Validates upstream API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "api base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.bearer_token.trim().is_empty() {
        return Err(ConfigError::MissingField("api.bearer-token"));
    }

    if config.page_size < 1 || config.page_size > 5000 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 5000, got {}",
            config.page_size
        )));
    }

    if config.requests_per_minute < 1 {
        return Err(ConfigError::Validation(
            "requests-per-minute must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::MissingField("storage.database-path"));
    }

    if config.blob_root.trim().is_empty() {
        return Err(ConfigError::MissingField("storage.blob-root"));
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::MissingField("queue.database-path"));
    }

    if config.visibility_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "visibility-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_receive_count < 1 {
        return Err(ConfigError::Validation(
            "max-receive-count must be >= 1".to_string(),
        ));
    }

    // A zero delay would let a throttled message spin straight back to a worker
    if config.retry_delay_secs < 1 {
        return Err(ConfigError::Validation(
            "retry-delay-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker configuration against the queue's lease length
fn validate_worker_config(config: &WorkerConfig, queue: &QueueConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "worker concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.message_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "message-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.message_timeout_secs >= queue.visibility_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "message-timeout-secs ({}) must be less than visibility-timeout-secs ({})",
            config.message_timeout_secs, queue.visibility_timeout_secs
        )));
    }

    if config.max_media_bytes < 1 {
        return Err(ConfigError::Validation(
            "max-media-bytes must be >= 1".to_string(),
        ));
    }

    if config.adjacency_write_attempts < 1 {
        return Err(ConfigError::Validation(
            "adjacency-write-attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_runner_config(config: &RunnerConfig) -> Result<(), ConfigError> {
    if config.interval_secs < 1 {
        return Err(ConfigError::Validation(
            "runner interval-secs must be >= 1".to_string(),
        ));
    }

    if config.resources.is_empty() {
        return Err(ConfigError::Validation(
            "runner resources cannot be empty".to_string(),
        ));
    }

    Ok(())
}
