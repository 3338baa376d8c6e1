use super::{types::Config, ConfigError, InterpreterBackend};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let queue = &config.queue;
    if queue.max_concurrent == 0 {
        return Err(invalid("queue.max_concurrent must be at least 1"));
    }
    if queue.max_per_submitter == 0 {
        return Err(invalid("queue.max_per_submitter must be at least 1"));
    }
    if queue.task_timeout_secs == 0 {
        return Err(invalid("queue.task_timeout_secs must be at least 1"));
    }

    let stream = &config.stream;
    if stream.fps.is_nan() || stream.fps <= 0.0 {
        return Err(invalid("stream.fps must be positive"));
    }
    if stream.jpeg_quality == 0 || stream.jpeg_quality > 100 {
        return Err(invalid("stream.jpeg_quality must be within 1..=100"));
    }
    if stream.max_width == 0 || stream.max_height == 0 {
        return Err(invalid("stream.max_width and stream.max_height must be non-zero"));
    }
    if stream.failure_rate_threshold <= 0.0 || stream.failure_rate_threshold > 1.0 {
        return Err(invalid("stream.failure_rate_threshold must be within (0, 1]"));
    }
    if stream.subscriber_buffer == 0 {
        return Err(invalid("stream.subscriber_buffer must be at least 1"));
    }
    if stream.boundary.is_empty() || stream.boundary.contains(char::is_whitespace) {
        return Err(invalid("stream.boundary must be a non-empty token"));
    }

    if config.interpreter.backend == InterpreterBackend::Http && config.interpreter.url.is_none()
    {
        return Err(invalid("interpreter.url is required when backend = \"http\""));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
