use thiserror::Error;

/// Caller-data integrity violations raised by the lookup kernels.
///
/// None of these are retryable: they mean the caller assembled inputs that
/// disagree with each other. Output written before the error is undefined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("segment {segment} requests index entry {current} but only {index_size} indices were given")]
    IndexStreamExhausted { segment: usize, current: usize, index_size: usize },

    #[error("index {position} is out of bounds: {index}, range 0 to {data_size}")]
    InvalidIndex { position: usize, index: i64, data_size: usize },

    #[error(
        "lengths consumed {consumed} indices but {index_size} were given; \
         the sum of lengths must equal the number of indices"
    )]
    LengthMismatch { consumed: usize, index_size: usize },

    #[error("segment {segment} has negative length {length}")]
    NegativeLength { segment: usize, length: i32 },

    #[error("{buffer} buffer too small: need {needed} elements, got {got}")]
    BufferTooSmall { buffer: &'static str, needed: usize, got: usize },

    #[error("kernel tier {tier} is not available for {element} tables on this CPU")]
    TierUnavailable { tier: &'static str, element: &'static str },

    #[error("table of {len} elements cannot be split into rows of {block_size}")]
    RaggedTable { len: usize, block_size: usize },
}

pub type Result<T> = std::result::Result<T, LookupError>;
