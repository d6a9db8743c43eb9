use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("row {row}: unknown event kind {kind:?}")]
    UnknownEventKind { row: u64, kind: String },

    #[error("row {row}: new-tx row is missing its {field} field")]
    MissingField { row: u64, field: &'static str },

    #[error("row {row}: recipient {value:?} is not a valid client id")]
    InvalidRecipient { row: u64, value: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
}
