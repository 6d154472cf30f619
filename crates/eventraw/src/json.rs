//! Compiles flat JSON object text straight into an [`EventBuilder`].
//!
//! The input is scanned one byte at a time by a table driven automaton.
//! There is no intermediate document tree and no stack: only a single object
//! level and a single array level are understood. Every completed key/value
//! pair goes through [`EventBuilder::append_value`], so reserved keys such as
//! `domain_` land in the header.
//!
//! Malformed input never fails. Pairs the automaton cannot complete are
//! skipped, which may leave the builder partially populated or empty.

use std::mem;

use once_cell::sync::Lazy;

use crate::builder::EventBuilder;
use crate::param::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    None,
    Run,
    Key,
    Value,
    String,
    Escape,
    Double,
    Int,
    Array,
    StringItem,
    EscapeItem,
    DoubleItem,
    IntItem,
}

const STATE_COUNT: usize = 13;

type Table = [[State; 256]; STATE_COUNT];

const DIGITS: std::ops::RangeInclusive<u8> = b'0'..=b'9';
const WHITESPACE: [u8; 4] = [b' ', b'\t', b'\n', b'\r'];

static TRANSITIONS: Lazy<Table> = Lazy::new(|| {
    let mut t: Table = [[State::None; 256]; STATE_COUNT];
    let digits: Vec<u8> = DIGITS.collect();
    let number_start: Vec<u8> = DIGITS.chain([b'-']).collect();

    let r = &mut t[State::None as usize];
    set(r, b"{", State::Run);

    let r = &mut t[State::Run as usize];
    r.fill(State::Run);
    set(r, b"\"", State::Key);
    set(r, b":", State::Value);
    set(r, b"}", State::None);

    let r = &mut t[State::Key as usize];
    r.fill(State::Key);
    set(r, b"\"", State::Run);

    let r = &mut t[State::Value as usize];
    r.fill(State::Value);
    set(r, &number_start, State::Int);
    set(r, b"\"", State::String);
    set(r, b".", State::Double);
    set(r, b"[", State::Array);
    set(r, b",", State::Run);
    // Nested objects are not supported and end the scan.
    set(r, b"{}", State::None);

    let r = &mut t[State::String as usize];
    r.fill(State::String);
    set(r, b"\"", State::Run);
    set(r, b"\\", State::Escape);

    t[State::Escape as usize].fill(State::String);

    let r = &mut t[State::Int as usize];
    set(r, &digits, State::Int);
    set(r, b".eE", State::Double);
    set(r, b",", State::Run);
    set(r, &WHITESPACE, State::Run);

    let r = &mut t[State::Double as usize];
    set(r, &digits, State::Double);
    set(r, b"eE+-", State::Double);
    set(r, b",", State::Run);
    set(r, &WHITESPACE, State::Run);

    let r = &mut t[State::Array as usize];
    r.fill(State::Array);
    set(r, &number_start, State::IntItem);
    set(r, b"\"", State::StringItem);
    set(r, b".", State::DoubleItem);
    set(r, b"]", State::Run);

    let r = &mut t[State::StringItem as usize];
    r.fill(State::StringItem);
    set(r, b"\"", State::Array);
    set(r, b"\\", State::EscapeItem);

    t[State::EscapeItem as usize].fill(State::StringItem);

    let r = &mut t[State::IntItem as usize];
    set(r, &digits, State::IntItem);
    set(r, b".eE", State::DoubleItem);
    set(r, b",", State::Array);
    set(r, b"]", State::Run);
    set(r, &WHITESPACE, State::Array);

    let r = &mut t[State::DoubleItem as usize];
    set(r, &digits, State::DoubleItem);
    set(r, b"eE+-", State::DoubleItem);
    set(r, b",", State::Array);
    set(r, b"]", State::Run);
    set(r, &WHITESPACE, State::Array);
    t
});

fn set(row: &mut [State; 256], chars: &[u8], next: State) {
    for &c in chars {
        row[c as usize] = next;
    }
}

/// Compiles `text` into a new builder.
pub fn compile(text: &str) -> EventBuilder {
    let mut compiler = JsonCompiler::new();
    compiler.feed(text.as_bytes());
    compiler.finish()
}

/// The JSON to wire automaton. Input may be fed in several chunks.
#[derive(Debug)]
pub struct JsonCompiler {
    state: State,
    /// Kind of the value text collected since the last `:`.
    value_kind: State,
    key: Vec<u8>,
    value: Vec<u8>,
    items: Vec<String>,
    builder: EventBuilder,
}

impl Default for JsonCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCompiler {
    pub fn new() -> Self {
        Self::with_builder(EventBuilder::new())
    }

    /// Compiles into an existing builder, replacing fields with the same key.
    pub fn with_builder(builder: EventBuilder) -> Self {
        Self {
            state: State::None,
            value_kind: State::None,
            key: Vec::new(),
            value: Vec::new(),
            items: Vec::new(),
            builder,
        }
    }

    pub fn feed(&mut self, text: &[u8]) -> &mut Self {
        for &c in text {
            self.step(c);
        }
        self
    }

    /// Returns the builder. A pair whose object was never closed is dropped.
    pub fn finish(self) -> EventBuilder {
        self.builder
    }

    fn step(&mut self, c: u8) {
        let prev = self.state;
        let next = TRANSITIONS[prev as usize][c as usize];
        match next {
            State::None => {
                if prev != State::None {
                    self.commit();
                }
            }
            State::Run => match prev {
                State::IntItem | State::DoubleItem => self.push_item(),
                // Closing quote; also covers the empty string.
                State::String => self.value_kind = State::String,
                _ => {}
            },
            State::Key => {
                if prev == State::Key {
                    self.key.push(c);
                } else {
                    self.commit();
                }
            }
            State::Value => {
                if prev == State::Run {
                    self.value.clear();
                    self.items.clear();
                    self.value_kind = State::None;
                }
            }
            State::String => match prev {
                State::Value => {
                    self.value.clear();
                    self.value_kind = State::String;
                }
                State::Escape => push_unescaped(&mut self.value, c),
                _ => self.value.push(c),
            },
            State::StringItem => match prev {
                State::Array => {
                    self.value.clear();
                    self.value_kind = State::StringItem;
                }
                State::EscapeItem => push_unescaped(&mut self.value, c),
                _ => self.value.push(c),
            },
            State::Escape | State::EscapeItem => {}
            State::Int | State::Double | State::IntItem | State::DoubleItem => {
                if prev == State::Value {
                    self.value.clear();
                }
                self.value.push(c);
                self.value_kind = next;
            }
            State::Array => match prev {
                State::Value => {
                    self.value.clear();
                    self.items.clear();
                }
                State::IntItem | State::DoubleItem | State::StringItem => self.push_item(),
                _ => {}
            },
        }
        self.state = next;
    }

    fn push_item(&mut self) {
        let item = String::from_utf8_lossy(&self.value).into_owned();
        self.items.push(item);
        self.value.clear();
    }

    fn commit(&mut self) {
        let key = String::from_utf8_lossy(&mem::take(&mut self.key)).into_owned();
        let kind = mem::replace(&mut self.value_kind, State::None);
        let value = String::from_utf8_lossy(&mem::take(&mut self.value)).into_owned();
        let items = mem::take(&mut self.items);
        if key.is_empty() {
            return;
        }

        let param = match kind {
            State::String => Some(ParamValue::String(value)),
            State::Int => parse_int(&value),
            State::Double => value.parse::<f64>().ok().map(ParamValue::Double),
            State::StringItem => Some(ParamValue::StringArray(items)),
            State::IntItem | State::DoubleItem if !items.is_empty() => parse_numbers(&items),
            _ => {
                log::debug!("no value to commit for key {}", key);
                return;
            }
        };
        match param {
            Some(param) => {
                log::debug!("committing {} = {:?}", key, param);
                self.builder.append_value(&key, param);
            }
            None => log::warn!("skipping unparsable {:?} value for key {}", kind, key),
        }
    }
}

fn parse_int(token: &str) -> Option<ParamValue> {
    let int = if token.contains('-') {
        token.parse::<i64>().ok().map(ParamValue::Signed)
    } else {
        token.parse::<u64>().ok().map(ParamValue::Unsigned)
    };
    // Out of range integers keep their magnitude as a floating value.
    int.or_else(|| token.parse::<f64>().ok().map(ParamValue::Double))
}

fn parse_numbers(items: &[String]) -> Option<ParamValue> {
    let doubles = || {
        items
            .iter()
            .map(|s| s.parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()
            .map(ParamValue::DoubleArray)
    };
    if items.iter().any(|s| s.contains(['.', 'e', 'E'])) {
        return doubles();
    }
    let ints = if items.iter().any(|s| s.contains('-')) {
        items
            .iter()
            .map(|s| s.parse::<i64>().ok())
            .collect::<Option<Vec<i64>>>()
            .map(ParamValue::SignedArray)
    } else {
        items
            .iter()
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()
            .map(ParamValue::UnsignedArray)
    };
    ints.or_else(doubles)
}

fn push_unescaped(out: &mut Vec<u8>, c: u8) {
    let unescaped = match c {
        b'"' | b'\\' | b'/' => c,
        b'b' => 0x08,
        b'f' => 0x0C,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        _ => {
            out.push(b'\\');
            c
        }
    };
    out.push(unescaped);
}
