use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

/// Errors raised while lexing arguments, binding flags, or dispatching a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("setting the flag multiple times")]
    MultipleSet,

    #[error("invalid value for flag `{flag}`: {source}")]
    TypeParse {
        flag: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("flag provided but not defined: {0}")]
    Undefined(String),

    #[error("invalid key=value pair `{value}` (expected separator `{sep}`)")]
    InvalidKeyValue { sep: char, value: String },

    #[error("max parse depth exceeded")]
    MaxDepth,

    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

/// An error that carries its own process exit code, surfaced by `App::run`.
pub trait ExitCoder: std::error::Error {
    fn exit_code(&self) -> i32;
}

impl ExitCoder for CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::MultipleSet
            | CliError::TypeParse { .. }
            | CliError::Undefined(_)
            | CliError::InvalidKeyValue { .. }
            | CliError::MaxDepth => 2,
            CliError::Hook(_) => 1,
        }
    }
}
