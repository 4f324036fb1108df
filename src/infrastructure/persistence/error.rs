use thiserror::Error;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from SeaORM
    #[error("Database error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),
    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),
    /// Query error
    #[error("Query error: {0}")]
    QueryError(String),
    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
    /// JSON column could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
