//! Error taxonomy shared by the ingestor, the local store, the request cache
//! and the sync facade.
//!
//! Every fallible operation in the library returns [`AppError`]. Command
//! handlers turn it into a single `{ success: false, error, message }`
//! payload so that no failure reaches the user as an unhandled fault.

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// The byte stream could not be decoded as a spreadsheet.
    #[error("Failed to parse spreadsheet: {0}")]
    Parse(String),

    /// A storage transaction failed and was rolled back.
    #[error("Local storage error: {0}")]
    Storage(String),

    /// A referenced product or session does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The backend was unreachable or answered with a non-2xx status.
    #[error("{0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Barcode {barcode} is already assigned to product {product_id}")]
    DuplicateBarcode { barcode: String, product_id: String },

    #[error("Export failed: {0}")]
    Export(String),
}

impl AppError {
    /// Stable machine-readable kind used in command responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "parse_error",
            AppError::Storage(_) => "storage_error",
            AppError::NotFound(_) => "not_found",
            AppError::Network(_) => "network_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::DuplicateBarcode { .. } => "duplicate_barcode",
            AppError::Export(_) => "export_error",
        }
    }

    pub fn product_not_found(id: &str) -> Self {
        AppError::NotFound(format!("Product {id}"))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, AppError::Network(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<calamine::Error> for AppError {
    fn from(err: calamine::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::Export(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("serialization: {err}"))
    }
}
