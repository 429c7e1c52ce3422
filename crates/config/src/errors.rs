use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Error kinds the configuration engine surfaces, per spec.md §7.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: hcl::Error,
    },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("max parse depth ({max}) exceeded while parsing {path}")]
    MaxParseDepth { max: u32, path: String },

    #[error("dependency `{target}` failed: {message}")]
    Dependency { target: String, message: String },

    #[error("malformed dependency output JSON from `{target}`: {source}")]
    MalformedOutputs {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
