use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("point count {points} is not a multiple of ring count {rings}")]
    RingCountMismatch { points: usize, rings: u16 },

    #[error("tsdf bridge payload truncated: expected {expected} bytes, got {got}")]
    TruncatedPayload { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
