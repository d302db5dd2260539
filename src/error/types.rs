//! Conversions from library errors into [`AppError`].

use super::AppError;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io_operation".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            message: err.to_string(),
            line: err.location().map(|loc| loc.line()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::HttpClientBuild {
                message: err.to_string(),
            }
        } else {
            Self::Internal {
                message: format!("HTTP client error: {err}"),
            }
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::StorageUnavailable {
                message: err.to_string(),
            }
        } else {
            Self::Storage {
                operation: "redis_operation".to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::StorageUnavailable {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::CreatePoolError> for AppError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::StorageUnavailable {
            message: format!("Failed to create Redis pool: {err}"),
        }
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::config_validation(format!("Invalid URL: {err}"), None::<String>)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err
            .field_errors()
            .keys()
            .next()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        Self::ConfigValidation {
            message: err.to_string(),
            field: Some(field),
        }
    }
}
