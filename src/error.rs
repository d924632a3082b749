use thiserror::Error;

#[derive(Debug, Error)]
pub enum SldscError {
    #[error("format error in {source_name}: {reason}")]
    Format { source_name: String, reason: String },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("singular linear system while solving {context}")]
    Numerical { context: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SldscError>;
