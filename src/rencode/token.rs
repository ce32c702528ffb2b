//! Flat token representation of a decoded rencode value.
//!
//! Tokens borrow nothing themselves (they're `Copy`); the (offset, len) pair
//! on a `Str` token indexes into whatever byte buffer was passed to `decode`.
//! The caller must keep that buffer alive for as long as the tokens are used.

use super::error::DecodeError;

pub const MAX_DEPTH: u32 = 64;

// Type-byte layout of the wire format, matching the reference rencode codec
// used by the legacy control protocol this daemon is compatible with.
const INT_POS_FIXED_START: u8 = 0;
const INT_POS_FIXED_COUNT: u8 = 44;
const FLOAT64: u8 = 44;
const DICT_FIXED_START: u8 = 102;
const DICT_FIXED_COUNT: u8 = 25;
const INT_NEG_FIXED_START: u8 = 70;
const INT_NEG_FIXED_COUNT: u8 = 32;
const STR_FIXED_START: u8 = 128;
const STR_FIXED_COUNT: u8 = 64;
// LIST_FIXED_START..=255 is exactly 64 values, so no separate count constant
// is needed: the fixed-list range runs to the top of the byte.
const LIST_FIXED_START: u8 = 192;
const LIST_LONG: u8 = 59;
const DICT_LONG: u8 = 60;
const INT_LONG: u8 = 61;
const INT1: u8 = 62;
const INT2: u8 = 63;
const INT4: u8 = 64;
const INT8: u8 = 65;
const FLOAT32: u8 = 66;
const TRUE: u8 = 67;
const FALSE: u8 = 68;
const NONE: u8 = 69;
const TERM: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Str,
    Bool,
    Null,
    Float,
    List,
    Dict,
}

/// One node of a decoded rencode document. Container tokens (`List`/`Dict`)
/// record how many direct child tokens follow them so that `skip_item` can
/// jump clean over a subtree without re-parsing it.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: Kind,
    /// Byte offset of a string's payload in the source buffer. Unused for
    /// every other kind.
    pub offset: usize,
    /// Byte length of a string's payload. Unused for every other kind.
    pub len: usize,
    /// Number of direct child tokens for `List`/`Dict` (a dict's children are
    /// its flattened key/value tokens, so an N-pair dict has `2*N` items).
    pub num_items: usize,
    pub int_value: i64,
    pub bool_value: bool,
    /// Stored widened to `f64` regardless of wire width (32- or 64-bit).
    pub float_value: f64,
}

impl Default for Token {
    fn default() -> Token {
        Token::scalar(Kind::Null)
    }
}

impl Token {
    pub(crate) fn scalar(kind: Kind) -> Token {
        Token {
            kind,
            offset: 0,
            len: 0,
            num_items: 0,
            int_value: 0,
            bool_value: false,
            float_value: 0.0,
        }
    }

    pub fn string<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.len]
    }
}

/// Returns the index of the token immediately following `tokens[idx]`'s
/// subtree. For scalar tokens that's simply `idx + 1`; for containers it
/// recurses into each of the `num_items` direct children. Recursion is
/// bounded by `MAX_DEPTH`, which `decode` already enforces on the way in, so
/// this never overruns the stack on well-formed token arrays.
pub fn skip_item(tokens: &[Token], idx: usize) -> usize {
    let t = &tokens[idx];
    match t.kind {
        Kind::List | Kind::Dict => {
            let mut next = idx + 1;
            for _ in 0..t.num_items {
                next = skip_item(tokens, next);
            }
            next
        }
        _ => idx + 1,
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    tokens: &'a mut [Token],
    next_token: usize,
}

impl<'a> Decoder<'a> {
    fn byte(&self) -> Result<u8, DecodeError> {
        self.buf.get(self.pos).copied().ok_or(DecodeError::Truncated)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::LengthOverflow)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn push(&mut self, token: Token) -> Result<usize, DecodeError> {
        let idx = self.next_token;
        let slot = self
            .tokens
            .get_mut(idx)
            .ok_or(DecodeError::TokenCapacityExceeded(self.tokens.len()))?;
        *slot = token;
        self.next_token += 1;
        Ok(idx)
    }

    /// Reads an ASCII-decimal-encoded length terminated by `stop`, used by the
    /// long-form string encoding ("<len>:<bytes>").
    fn read_decimal_until(&mut self, stop: u8) -> Result<usize, DecodeError> {
        let start = self.pos;
        loop {
            let b = self.byte()?;
            if b == stop {
                break;
            }
            if !b.is_ascii_digit() {
                return Err(DecodeError::LengthOverflow);
            }
            self.pos += 1;
        }
        let digits = &self.buf[start..self.pos];
        self.pos += 1; // consume `stop`
        if digits.is_empty() {
            return Err(DecodeError::LengthOverflow);
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(DecodeError::LengthOverflow)
    }

    fn decode_value(&mut self, depth: u32) -> Result<usize, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthExceeded(MAX_DEPTH));
        }
        let tag = self.byte()?;
        match tag {
            _ if tag >= INT_POS_FIXED_START && tag < INT_POS_FIXED_START + INT_POS_FIXED_COUNT => {
                self.pos += 1;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = (tag - INT_POS_FIXED_START) as i64;
                self.push(tok)
            }
            _ if tag >= INT_NEG_FIXED_START && tag < INT_NEG_FIXED_START + INT_NEG_FIXED_COUNT => {
                self.pos += 1;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = -1 - (tag - INT_NEG_FIXED_START) as i64;
                self.push(tok)
            }
            _ if tag >= STR_FIXED_START && tag < STR_FIXED_START + STR_FIXED_COUNT => {
                self.pos += 1;
                let len = (tag - STR_FIXED_START) as usize;
                let offset = self.pos;
                self.take(len)?;
                let mut tok = Token::scalar(Kind::Str);
                tok.offset = offset;
                tok.len = len;
                self.push(tok)
            }
            _ if tag >= LIST_FIXED_START => {
                self.pos += 1;
                let n = (tag - LIST_FIXED_START) as usize;
                self.decode_container(Kind::List, n, depth)
            }
            _ if tag >= DICT_FIXED_START && tag < DICT_FIXED_START + DICT_FIXED_COUNT => {
                self.pos += 1;
                let pairs = (tag - DICT_FIXED_START) as usize;
                self.decode_container(Kind::Dict, pairs * 2, depth)
            }
            LIST_LONG => {
                self.pos += 1;
                self.decode_terminated(Kind::List, depth)
            }
            DICT_LONG => {
                self.pos += 1;
                self.decode_terminated(Kind::Dict, depth)
            }
            INT_LONG => {
                self.pos += 1;
                let value = self.read_decimal_until(TERM)?;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = i64::try_from(value).map_err(|_| DecodeError::IntegerOverflow)?;
                self.push(tok)
            }
            INT1 => {
                self.pos += 1;
                let b = self.take(1)?;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = b[0] as i8 as i64;
                self.push(tok)
            }
            INT2 => {
                self.pos += 1;
                let b = self.take(2)?;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = i16::from_be_bytes([b[0], b[1]]) as i64;
                self.push(tok)
            }
            INT4 => {
                self.pos += 1;
                let b = self.take(4)?;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value = i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64;
                self.push(tok)
            }
            INT8 => {
                self.pos += 1;
                let b = self.take(8)?;
                let mut tok = Token::scalar(Kind::Int);
                tok.int_value =
                    i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                self.push(tok)
            }
            FLOAT32 => {
                self.pos += 1;
                let b = self.take(4)?;
                let mut tok = Token::scalar(Kind::Float);
                tok.float_value = f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64;
                self.push(tok)
            }
            FLOAT64 => {
                self.pos += 1;
                let b = self.take(8)?;
                let mut tok = Token::scalar(Kind::Float);
                tok.float_value =
                    f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                self.push(tok)
            }
            TRUE => {
                self.pos += 1;
                let mut tok = Token::scalar(Kind::Bool);
                tok.bool_value = true;
                self.push(tok)
            }
            FALSE => {
                self.pos += 1;
                let mut tok = Token::scalar(Kind::Bool);
                tok.bool_value = false;
                self.push(tok)
            }
            NONE => {
                self.pos += 1;
                self.push(Token::scalar(Kind::Null))
            }
            b if b.is_ascii_digit() => {
                // long-form string: "<len>:<bytes>"
                let len = self.read_decimal_until(b':')?;
                let offset = self.pos;
                self.take(len)?;
                let mut tok = Token::scalar(Kind::Str);
                tok.offset = offset;
                tok.len = len;
                self.push(tok)
            }
            other => Err(DecodeError::InvalidTypeByte(other)),
        }
    }

    fn decode_container(&mut self, kind: Kind, num_items: usize, depth: u32) -> Result<usize, DecodeError> {
        let idx = self.push(Token {
            num_items,
            ..Token::scalar(kind)
        })?;
        for _ in 0..num_items {
            self.decode_value(depth + 1)?;
        }
        Ok(idx)
    }

    fn decode_terminated(&mut self, kind: Kind, depth: u32) -> Result<usize, DecodeError> {
        let idx = self.push(Token::scalar(kind))?;
        let mut count = 0usize;
        loop {
            if self.byte()? == TERM {
                self.pos += 1;
                break;
            }
            self.decode_value(depth + 1)?;
            count += 1;
        }
        self.tokens[idx].num_items = count;
        Ok(idx)
    }
}

/// Decodes one rencode document from `buf` into `tokens`, returning the
/// number of tokens written. `tokens` must outlive nothing beyond `buf`
/// itself; string tokens borrow directly from `buf`.
pub fn decode(buf: &[u8], tokens: &mut [Token]) -> Result<usize, DecodeError> {
    let mut dec = Decoder {
        buf,
        pos: 0,
        tokens,
        next_token: 0,
    };
    dec.decode_value(0)?;
    Ok(dec.next_token)
}

#[cfg(test)]
mod tests {
    use super::super::encode::Encoder;
    use super::*;

    fn decode_one(bytes: &[u8]) -> (Vec<Token>, usize) {
        let mut tokens = vec![Token::scalar(Kind::Null); 256];
        let n = decode(bytes, &mut tokens).unwrap();
        (tokens, n)
    }

    #[test]
    fn small_positive_int_is_one_byte() {
        let mut enc = Encoder::new();
        enc.append_int(12);
        assert_eq!(enc.data(), &[12]);
    }

    #[test]
    fn small_negative_int_round_trips() {
        let mut enc = Encoder::new();
        enc.append_int(-5);
        let (tokens, n) = decode_one(enc.data());
        assert_eq!(n, 1);
        assert_eq!(tokens[0].kind, Kind::Int);
        assert_eq!(tokens[0].int_value, -5);
    }

    #[test]
    fn large_int_round_trips() {
        let mut enc = Encoder::new();
        enc.append_int(1_000_000_000_000);
        let (tokens, _) = decode_one(enc.data());
        assert_eq!(tokens[0].int_value, 1_000_000_000_000);
    }

    #[test]
    fn short_string_round_trips() {
        let mut enc = Encoder::new();
        enc.append_string(b"hello");
        let (tokens, _) = decode_one(enc.data());
        assert_eq!(tokens[0].kind, Kind::Str);
        assert_eq!(tokens[0].string(enc.data()), b"hello");
    }

    #[test]
    fn long_string_round_trips() {
        let long = vec![b'x'; 200];
        let mut enc = Encoder::new();
        enc.append_string(&long);
        let (tokens, _) = decode_one(enc.data());
        assert_eq!(tokens[0].string(enc.data()), &long[..]);
    }

    #[test]
    fn fixed_list_round_trips() {
        let mut enc = Encoder::new();
        enc.append_list(2);
        enc.append_int(1);
        enc.append_int(2);
        let (tokens, n) = decode_one(enc.data());
        assert_eq!(n, 3);
        assert_eq!(tokens[0].kind, Kind::List);
        assert_eq!(tokens[0].num_items, 2);
        assert_eq!(skip_item(&tokens, 0), 3);
    }

    #[test]
    fn long_list_round_trips() {
        let mut enc = Encoder::new();
        enc.append_list(70);
        for i in 0..70 {
            enc.append_int(i);
        }
        let (tokens, n) = decode_one(enc.data());
        assert_eq!(n, 71);
        assert_eq!(tokens[0].num_items, 70);
    }

    #[test]
    fn dict_round_trips_as_flattened_pairs() {
        let mut enc = Encoder::new();
        enc.append_dict(2);
        enc.append_string(b"a");
        enc.append_int(1);
        enc.append_string(b"b");
        enc.append_int(2);
        let (tokens, n) = decode_one(enc.data());
        assert_eq!(n, 5);
        assert_eq!(tokens[0].kind, Kind::Dict);
        assert_eq!(tokens[0].num_items, 4);
    }

    #[test]
    fn bool_and_null_round_trip() {
        let mut enc = Encoder::new();
        enc.append_list(3);
        enc.append_bool(true);
        enc.append_bool(false);
        enc.append_null();
        let (tokens, _) = decode_one(enc.data());
        assert!(tokens[1].bool_value);
        assert!(!tokens[2].bool_value);
        assert_eq!(tokens[3].kind, Kind::Null);
    }

    #[test]
    fn float_round_trips() {
        let mut enc = Encoder::new();
        enc.append_float(3.5);
        let (tokens, _) = decode_one(enc.data());
        assert_eq!(tokens[0].kind, Kind::Float);
        assert!((tokens[0].float_value - 3.5).abs() < 1e-9);
    }

    #[test]
    fn truncated_input_never_panics() {
        let mut enc = Encoder::new();
        enc.append_list(2);
        enc.append_string(b"hello world");
        enc.append_int(99);
        let full = enc.data().to_vec();
        for cut in 1..full.len() {
            let mut tokens = vec![Token::scalar(Kind::Null); 256];
            let _ = decode(&full[..cut], &mut tokens);
        }
    }

    #[test]
    fn token_capacity_overflow_is_recoverable() {
        let mut enc = Encoder::new();
        enc.append_list(70);
        for i in 0..70 {
            enc.append_int(i);
        }
        let mut tokens = vec![Token::scalar(Kind::Null); 5];
        let err = decode(enc.data(), &mut tokens).unwrap_err();
        assert_eq!(err, DecodeError::TokenCapacityExceeded(5));
    }

    #[test]
    fn depth_cap_is_enforced() {
        let mut enc = Encoder::new();
        for _ in 0..(MAX_DEPTH + 2) {
            enc.append_list(1);
        }
        enc.append_int(0);
        let mut tokens = vec![Token::scalar(Kind::Null); 512];
        let err = decode(enc.data(), &mut tokens).unwrap_err();
        assert!(matches!(err, DecodeError::DepthExceeded(_)));
    }
}
