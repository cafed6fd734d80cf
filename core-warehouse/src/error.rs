use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid stored value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
