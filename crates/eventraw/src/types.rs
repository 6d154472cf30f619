// === Error types ===

/// Errors that can occur while decoding a raw event block.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of block data at offset {0}")]
    UnexpectedEof(usize),

    #[error("invalid block size: {0}")]
    InvalidBlockSize(i64),

    #[error("block declares {declared} bytes but only {available} are available")]
    TruncatedBlock { declared: usize, available: usize },

    #[error("varint at offset {0} overflows 64 bits")]
    VarintOverflow(usize),

    #[error("unknown value type: {0}")]
    UnknownValueType(u8),

    #[error("invalid floating point width: {0} bytes")]
    InvalidFloatWidth(u64),

    #[error("invalid parameter count: {0}")]
    InvalidParamCount(i32),

    #[error("parameter {index} ({key:?}): {source}")]
    Param {
        index: usize,
        key: String,
        #[source]
        source: Box<DecodeError>,
    },
}

/// Errors that can occur while encoding a single parameter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("parameter {key:?} encodes to {size} bytes, exceeding the block limit")]
    ParamTooLarge { key: String, size: usize },

    #[error("parameter {key:?} would grow the block to {size} bytes")]
    BlockOverflow { key: String, size: usize },
}
