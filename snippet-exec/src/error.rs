use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorised Access")]
    Unauthorized,

    #[error("Missing code")]
    MissingCode,

    #[error("Failed to stage snippet: {0}")]
    Stage(String),

    #[error("Failed to spawn interpreter: {0}")]
    Spawn(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
