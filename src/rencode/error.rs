use thiserror::Error;

/// Recoverable decode failure. Every variant means "drop this message and close
/// the connection"; none of them indicate a programming bug in the decoder
/// itself (the decoder never panics or reads past the input).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated rencode message")]
    Truncated,
    #[error("string or bignum length prefix overflowed")]
    LengthOverflow,
    #[error("nesting depth exceeded the {0}-level cap")]
    DepthExceeded(u32),
    #[error("integer literal overflowed 64 bits")]
    IntegerOverflow,
    #[error("token array capacity ({0}) exhausted")]
    TokenCapacityExceeded(usize),
    #[error("unrecognized type byte 0x{0:02x}")]
    InvalidTypeByte(u8),
}
