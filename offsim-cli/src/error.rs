use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] offsim_io::ConfigError),

    #[error(transparent)]
    Csv(#[from] offsim_io::CsvError),
}

pub type SimResult<T> = std::result::Result<T, SimError>;
