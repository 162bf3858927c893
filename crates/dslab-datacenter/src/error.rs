//! Error types.

use thiserror::Error;

/// Errors returned on invalid configuration and illegal state transitions.
///
/// Admission failures (VM does not fit a host) are not errors, see [`Suitability`](crate::suitability::Suitability).
#[derive(Error, Debug)]
pub enum DatacenterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("host {0} not found")]
    HostNotFound(u32),

    #[error("vm {0} not found")]
    VmNotFound(u32),

    #[error("can't read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DatacenterError>;
