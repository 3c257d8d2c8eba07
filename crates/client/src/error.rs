/// Failure of any index store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}: {body}")]
    Status { endpoint: String, status: u16, body: String },
    #[error("query error {code}: {message}")]
    Query { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl StoreError {
    pub fn query(code: i64, message: impl Into<String>) -> Self {
        StoreError::Query { code, message: message.into() }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        StoreError::Decode(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
