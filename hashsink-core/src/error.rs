use thiserror::Error;

pub type SinkResult<T> = std::result::Result<T, SinkError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors reported by a storage backend adapter.
///
/// Backends surface failures in many shapes; adapters normalize them into
/// this enum so that the pipelines only have to tell "not found" and
/// "already exists" apart from everything else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("object not found: {key}")]
    NotFound { key: String, data: Vec<String> },

    #[error("key {key:?} cannot be stored: {message}")]
    InvalidKey { key: String, message: String },

    #[error("already exists: {name}")]
    AlreadyExists { name: String },

    #[error("{message}")]
    Protocol { message: String, data: Vec<String> },
}

impl BackendError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.into(),
            data: Vec::new(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<object_store::Error> for BackendError {
    fn from(err: object_store::Error) -> Self {
        let data = source_chain(&err);
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound { key: path, data },
            object_store::Error::AlreadyExists { path, .. } => Self::AlreadyExists { name: path },
            other => Self::Protocol {
                message: other.to_string(),
                data,
            },
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
            data: source_chain(&err),
        }
    }
}

/// Collects the messages of every nested source error.
fn source_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut data = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        data.push(source.to_string());
        current = source.source();
    }
    data
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("service unavailable for {key} after {attempts} attempts: {source}")]
    ServiceUnavailable {
        key: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("container conflict: {0}")]
    Conflict(String),

    #[error("backend error: {message}")]
    Backend { message: String, data: Vec<String> },

    #[error("missing folder or empty result: {prefix}")]
    EmptyListing { prefix: String },

    #[error("storage bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("write pipeline aborted before finish")]
    Aborted,

    #[error("pipeline closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SinkError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<BackendError> for SinkError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { key, .. } => Self::NotFound { key },
            BackendError::InvalidKey { key, message } => {
                Self::InvalidArgument(format!("key \"{}\": {}", key, message))
            }
            BackendError::AlreadyExists { name } => Self::Conflict(name),
            BackendError::Protocol { message, data } => Self::Backend { message, data },
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<::config::ConfigError> for SinkError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
