//! Self-describing binary codec compatible with the legacy control
//! protocol's wire format: ints, strings, bools, null, floats, lists and
//! dicts, with compact fixed-width forms for small values and a
//! terminator-based long form for anything bigger.

mod encode;
mod error;
mod schema;
mod token;

pub use encode::Encoder;
pub use error::DecodeError;
pub use schema::{parse as parse_schema, validate, validate_document, Term};
pub use token::{decode, skip_item, Kind, Token, MAX_DEPTH};

/// Maximum number of tokens a single decoded document may contain. Bounds
/// memory use for a hostile or corrupt peer regardless of message length.
pub const MAX_TOKENS: usize = 4096;

/// Decodes one rencode document into a freshly allocated token vector,
/// capped at [`MAX_TOKENS`] tokens.
pub fn decode_document(buf: &[u8]) -> Result<Vec<Token>, DecodeError> {
    let mut tokens = vec![Token::default(); MAX_TOKENS];
    let n = decode(buf, &mut tokens)?;
    tokens.truncate(n);
    Ok(tokens)
}
