use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Token error: {0}")]
    Token(#[from] crate::token::TokenError),

    #[error("Dispatch rejected: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] uuid::Error),
}
