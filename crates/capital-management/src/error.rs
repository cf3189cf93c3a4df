use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapitalError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
