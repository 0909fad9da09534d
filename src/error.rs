use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjectorError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid format for '{value}'. Expected pattern: {pattern}")]
    InvalidPattern { value: String, pattern: String },

    #[error("Invalid value for {field}: '{value}' is not numeric")]
    InvalidFormat { field: String, value: String },

    #[error("Record {index} is invalid: {source}")]
    InvalidRecord {
        index: usize,
        #[source]
        source: Box<InjectorError>,
    },

    #[error("Remote service error: {0}")]
    RemoteService(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unable to handle data format {name}. Available data formats are: {}", available.join(", "))]
    UnsupportedFormat { name: String, available: Vec<String> },

    #[error("Injection run is in state {actual}, expected {expected}")]
    InvalidState { expected: String, actual: String },

    #[error("Injection queue is shut down")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl InjectorError {
    /// Whether the failure came from talking to the SensorThings server.
    pub fn is_remote(&self) -> bool {
        matches!(self, InjectorError::RemoteService(_) | InjectorError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, InjectorError>;
