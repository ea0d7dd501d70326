use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShortvolError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// The symbol list could not be obtained. Fatal: no fetching proceeds.
    #[error("Symbol retrieval error: {0}")]
    RetrievalError(String),

    /// A provider request failed for one symbol. The run skips it and continues.
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// A persisted file could not be parsed. The symbol is treated as having
    /// no prior history and is re-fetched in full.
    #[error("Stored data parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, ShortvolError>;
