#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid stored value for {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

impl StoreError {
    pub fn invalid(column: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            column,
            value: value.into(),
        }
    }
}
