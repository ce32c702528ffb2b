//! Builder for rencode wire documents.
//!
//! Containers opened with `append_list`/`append_dict` already know their
//! final item count up front (the caller always knows how many children it
//! is about to append), so the encoder never needs a second pass: it picks
//! the fixed-form byte when the count fits, or the long-form byte plus a
//! deferred terminator otherwise. `tick()` is the bookkeeping that knows when
//! a container is done and, if it was opened long-form, appends the `TERM`
//! byte — and then recurses, because closing a container is itself an item
//! of whatever container holds it.

const INT_POS_FIXED_START: u8 = 0;
const INT_POS_FIXED_COUNT: i64 = 44;
const INT_NEG_FIXED_START: u8 = 70;
const INT_NEG_FIXED_COUNT: i64 = 32;
const STR_FIXED_START: u8 = 128;
const STR_FIXED_COUNT: usize = 64;
const DICT_FIXED_START: u8 = 102;
const DICT_FIXED_COUNT: usize = 25;
const LIST_FIXED_START: u8 = 192;
const LIST_FIXED_COUNT: usize = 64;
const LIST_LONG: u8 = 59;
const DICT_LONG: u8 = 60;
const INT_LONG: u8 = 61;
const INT1: u8 = 62;
const INT2: u8 = 63;
const INT4: u8 = 64;
const INT8: u8 = 65;
const FLOAT64: u8 = 44;
const TRUE: u8 = 67;
const FALSE: u8 = 68;
const NONE: u8 = 69;
const TERM: u8 = 127;

struct Pending {
    remaining: usize,
    terminated: bool,
}

pub struct Encoder {
    data: Vec<u8>,
    stack: Vec<Pending>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            data: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.stack.clear();
    }

    /// Called once per item appended (scalar or just-closed container).
    /// Decrements the innermost open container and, once it reaches zero,
    /// closes it (emitting `TERM` if it was opened long-form) and propagates
    /// the same bookkeeping to whatever contains it.
    fn tick(&mut self) {
        while let Some(top) = self.stack.last_mut() {
            debug_assert!(top.remaining > 0);
            top.remaining -= 1;
            if top.remaining == 0 {
                let terminated = top.terminated;
                self.stack.pop();
                if terminated {
                    self.data.push(TERM);
                }
                continue;
            }
            break;
        }
    }

    pub fn append_list(&mut self, num_items: usize) {
        if num_items < LIST_FIXED_COUNT {
            self.data.push(LIST_FIXED_START + num_items as u8);
            self.tick();
            if num_items > 0 {
                self.stack.push(Pending {
                    remaining: num_items,
                    terminated: false,
                });
            }
        } else {
            self.data.push(LIST_LONG);
            self.tick();
            self.stack.push(Pending {
                remaining: num_items,
                terminated: true,
            });
        }
    }

    /// `num_pairs` is the number of key/value pairs; internally this is
    /// tracked as `2 * num_pairs` items since keys and values are appended
    /// one at a time, same as a flat list.
    pub fn append_dict(&mut self, num_pairs: usize) {
        let num_items = num_pairs * 2;
        if num_pairs < DICT_FIXED_COUNT {
            self.data.push(DICT_FIXED_START + num_pairs as u8);
            self.tick();
            if num_items > 0 {
                self.stack.push(Pending {
                    remaining: num_items,
                    terminated: false,
                });
            }
        } else {
            self.data.push(DICT_LONG);
            self.tick();
            self.stack.push(Pending {
                remaining: num_items,
                terminated: true,
            });
        }
    }

    pub fn append_int(&mut self, v: i64) {
        if v >= 0 && v < INT_POS_FIXED_COUNT {
            self.data.push(INT_POS_FIXED_START + v as u8);
        } else if v < 0 && v >= -INT_NEG_FIXED_COUNT {
            self.data.push(INT_NEG_FIXED_START + (-1 - v) as u8);
        } else if let Ok(b) = i8::try_from(v) {
            self.data.push(INT1);
            self.data.push(b as u8);
        } else if let Ok(b) = i16::try_from(v) {
            self.data.push(INT2);
            self.data.extend_from_slice(&b.to_be_bytes());
        } else if let Ok(b) = i32::try_from(v) {
            self.data.push(INT4);
            self.data.extend_from_slice(&b.to_be_bytes());
        } else {
            self.data.push(INT8);
            self.data.extend_from_slice(&v.to_be_bytes());
        }
        self.tick();
    }

    pub fn append_string(&mut self, bytes: &[u8]) {
        if bytes.len() < STR_FIXED_COUNT {
            self.data.push(STR_FIXED_START + bytes.len() as u8);
            self.data.extend_from_slice(bytes);
        } else {
            self.data.extend_from_slice(bytes.len().to_string().as_bytes());
            self.data.push(b':');
            self.data.extend_from_slice(bytes);
        }
        self.tick();
    }

    pub fn append_bool(&mut self, v: bool) {
        self.data.push(if v { TRUE } else { FALSE });
        self.tick();
    }

    pub fn append_null(&mut self) {
        self.data.push(NONE);
        self.tick();
    }

    pub fn append_float(&mut self, v: f64) {
        self.data.push(FLOAT64);
        self.data.extend_from_slice(&v.to_be_bytes());
        self.tick();
    }

    /// True once every opened container has seen its full item count and
    /// been closed. A well-formed caller always leaves this true; used by
    /// tests to catch mismatched `append_list`/`append_dict` counts.
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty()
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rencode::token::{decode, Kind, Token};

    #[test]
    fn long_int_uses_decimal_form() {
        let mut enc = Encoder::new();
        enc.append_int(10_000_000_000);
        assert!(enc.is_complete());
        assert_eq!(enc.data()[0], INT8);
    }

    #[test]
    fn empty_list_needs_no_terminator() {
        let mut enc = Encoder::new();
        enc.append_list(0);
        assert!(enc.is_complete());
        assert_eq!(enc.data(), &[LIST_FIXED_START]);
    }

    #[test]
    fn nested_long_containers_close_in_order() {
        let mut enc = Encoder::new();
        enc.append_list(70);
        for _ in 0..69 {
            enc.append_int(1);
        }
        enc.append_list(70);
        for _ in 0..70 {
            enc.append_int(2);
        }
        assert!(enc.is_complete());
        let mut tokens = vec![Token::default();
            256
        ];
        let n = decode(enc.data(), &mut tokens).unwrap();
        assert_eq!(tokens[0].num_items, 70);
        assert!(n > 70);
    }

    #[test]
    fn envelope_shape_encodes_as_four_item_list() {
        let mut enc = Encoder::new();
        enc.append_list(4);
        enc.append_int(1);
        enc.append_string(b"daemon.login");
        enc.append_list(2);
        enc.append_string(b"user");
        enc.append_string(b"pass");
        enc.append_dict(0);
        assert!(enc.is_complete());
    }
}
