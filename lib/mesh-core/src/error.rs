use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid service registration: {0}")]
    Validation(String),

    #[error("Service not found: {0}")]
    NotFound(String),
}
