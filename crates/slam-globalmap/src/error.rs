use thiserror::Error;

#[derive(Debug, Error)]
pub enum GlobalMapError {
    #[error("persistence backend error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("pose index {index} is not contiguous with the stored history (next expected: {expected})")]
    NonContiguousPose { index: u64, expected: u64 },

    #[error("corrupt chunk record at {cx},{cy},{cz}: expected {expected} bytes, got {got}")]
    CorruptChunk { cx: i32, cy: i32, cz: i32, expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, GlobalMapError>;
