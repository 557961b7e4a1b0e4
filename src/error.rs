//! Error types for the PostgreSQL log sink
//!
//! Configuration problems surface to the caller at construction time. Everything
//! that can go wrong while a batch is being written is represented here too, but
//! those errors stay inside the flush boundary and are only reported through the
//! self-log channel.

use thiserror::Error;

/// Main error type for sink operations
#[derive(Error, Debug)]
pub enum PgSinkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigFileMissing(String),

    /// TOML parsing errors
    #[error("TOML parsing error: {source}")]
    TomlError {
        #[from]
        source: toml::de::Error,
    },

    /// I/O errors while reading configuration
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// Database connection and operation errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization errors
    #[error("Serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    /// 附加列的值无法转换为声明的列类型
    #[error("Cannot convert value '{value}' for column '{column}' to {target}")]
    CoercionError {
        column: String,
        value: String,
        target: String,
    },

    /// Background task errors
    #[error("Background task error: {0}")]
    BackgroundTaskError(String),

    /// 停机相关错误
    #[error("Shutdown timeout")]
    ShutdownTimeout,

    #[error("Already shutdown")]
    AlreadyShutdown,
}

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, PgSinkError>;

impl PgSinkError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new database error
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Create a new background task error
    pub fn background_task<S: Into<String>>(msg: S) -> Self {
        Self::BackgroundTaskError(msg.into())
    }

    /// Create a new coercion error
    pub fn coercion(
        column: impl Into<String>,
        value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::CoercionError {
            column: column.into(),
            value: value.into(),
            target: target.into(),
        }
    }

    /// Check whether the error is scoped to a single flush attempt.
    ///
    /// Flush-scoped errors lose the current batch but leave the sink usable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::DatabaseError(_) => true,
            Self::SerializationError { .. } => true,
            Self::CoercionError { .. } => true,
            Self::BackgroundTaskError(_) => true,
            Self::IoError { .. } => true,
            Self::ConfigError(_)
            | Self::ConfigFileMissing(_)
            | Self::TomlError { .. }
            | Self::ShutdownTimeout
            | Self::AlreadyShutdown => false,
        }
    }

    /// Get the error category for logging purposes
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::ConfigFileMissing(_) => "config",
            Self::TomlError { .. } => "toml",
            Self::IoError { .. } => "io",
            Self::DatabaseError(_) => "database",
            Self::SerializationError { .. } => "serialization",
            Self::CoercionError { .. } => "coercion",
            Self::BackgroundTaskError(_) => "background_task",
            Self::ShutdownTimeout | Self::AlreadyShutdown => "shutdown",
        }
    }
}
