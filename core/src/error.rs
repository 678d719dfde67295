use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plan '{0}' not found")]
    PlanNotFound(String),

    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("transaction '{0}' not found")]
    TransactionNotFound(String),

    #[error("account '{0}' is not reserved for redemption")]
    AccountNotReserved(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PoolResult<T> = Result<T, PoolError>;
