use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("scan contributed no TSDF observations (empty or fully out of bounds)")]
    DegenerateScan,

    #[error("normal equations singular at iteration {iteration}")]
    Singular { iteration: u32 },

    #[error("optimizer produced a non-finite update at iteration {iteration}")]
    NonFinite { iteration: u32 },
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
