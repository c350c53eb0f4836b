use thiserror::Error;

/// Errors raised synchronously by the scheduler before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SchedulerError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }
}

/// Raised when a category predicate cannot evaluate the rows it was given.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("column {column} is missing for every row of category {category}")]
    MissingColumn { category: String, column: String },
}
