//! Tolerant parser for JSON text that is still arriving.
//!
//! Tool arguments and component props stream in as JSON text fragments. After
//! every fragment the whole accumulated text is re-parsed with [`parse`] into a
//! fresh [`PartialJsonState`]; states are never patched in place.
//!
//! The parser walks the text once, left to right. Whatever is still open when
//! the text ends is closed implicitly:
//!
//! - an open string keeps the characters received so far, minus any escape
//!   sequence that is itself cut off,
//! - open arrays and objects keep the members parsed so far,
//! - a cut-off number keeps its longest numeric prefix (`1.` → `1`, `-` → dropped),
//! - a cut-off literal (`tr`, `fal`, `nu`) becomes the literal it starts,
//! - an object key without a value yet is dropped.
//!
//! Containers nested deeper than [`MAX_DEPTH`] are treated as malformed: the
//! value keeps what was parsed above that level and everything still open
//! stays pending.
//!
//! ## Field status
//!
//! Every value that made it into the result gets an entry in
//! [`PartialJsonState::field_status`], keyed by JSON pointer (`""` is the root,
//! `/city`, `/stops/0/name`, ...). A value is [`FieldStatus::Complete`] once its
//! closing token is present in the text: the closing quote, bracket or brace,
//! or for numbers and literals a following `,`, `}`, `]` or whitespace. A
//! number or literal at the very end of the text stays pending because more
//! characters may still belong to it.
//!
//! Appending text never turns a complete field back into a pending one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Deepest array/object nesting the parser descends into
pub const MAX_DEPTH: usize = 128;

/// Completeness of a single value within partial JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    /// More text may still change this value
    Pending,
    /// The value's closing token has been received
    Complete,
}

/// Best-effort view of a JSON text prefix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialJsonState {
    /// Raw text received so far
    pub text: String,
    /// Best-effort value, `None` while nothing parseable has arrived
    pub value: Option<Value>,
    /// Completeness per JSON pointer
    pub field_status: BTreeMap<String, FieldStatus>,
}

impl PartialJsonState {
    /// New state for `self.text + delta`
    pub fn append(&self, delta: &str) -> Self {
        let mut text = String::with_capacity(self.text.len() + delta.len());
        text.push_str(&self.text);
        text.push_str(delta);
        parse_owned(text)
    }

    /// Whether the root value has been closed
    pub fn is_complete(&self) -> bool {
        self.status("") == Some(FieldStatus::Complete)
    }

    /// Status at a JSON pointer, `None` if no value exists there yet
    pub fn status(&self, pointer: &str) -> Option<FieldStatus> {
        self.field_status.get(pointer).copied()
    }

    /// Pointers whose values are still arriving
    pub fn pending_fields(&self) -> impl Iterator<Item = &str> {
        self.field_status
            .iter()
            .filter(|(_, status)| **status == FieldStatus::Pending)
            .map(|(pointer, _)| pointer.as_str())
    }
}

/// Parse a (possibly incomplete) JSON text.
///
/// Never fails: empty or unusable text yields `value: None` and no field
/// statuses. Text after a complete root value is ignored.
pub fn parse(text: &str) -> PartialJsonState {
    parse_owned(text.to_string())
}

fn parse_owned(text: String) -> PartialJsonState {
    let (value, field_status) = {
        let mut parser = Parser::new(&text);
        let value = parser.value("").map(|(value, _)| value);
        (value, parser.field_status)
    };

    PartialJsonState {
        text,
        value,
        field_status,
    }
}

fn child_pointer(parent: &str, key: &str) -> String {
    format!("{}/{}", parent, key.replace('~', "~0").replace('/', "~1"))
}

fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r')
}

enum Escape {
    Char(char),
    /// The text ends inside the escape sequence
    Truncated,
    Invalid,
}

enum Hex {
    Code(u16),
    Truncated,
    Invalid,
}

/// Parsed value plus whether its closing token was seen
type Parsed = (Value, bool);

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    field_status: BTreeMap<String, FieldStatus>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
            field_status: BTreeMap::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// Parse the value at `pointer`.
    ///
    /// Returns `None` when nothing usable starts here, either because the text
    /// ended or because it is malformed. An incomplete result means the caller
    /// must stop as well.
    fn value(&mut self, pointer: &str) -> Option<Parsed> {
        self.skip_whitespace();

        let parsed = match self.peek()? {
            b'{' | b'[' if self.depth >= MAX_DEPTH => return None,
            b'{' => self.nested(|p| p.object(pointer)),
            b'[' => self.nested(|p| p.array(pointer)),
            b'"' => {
                let (text, closed) = self.string();
                (Value::String(text), closed)
            }
            b'-' | b'0'..=b'9' => self.number()?,
            b't' | b'f' | b'n' => self.literal()?,
            _ => return None,
        };

        let status = if parsed.1 {
            FieldStatus::Complete
        } else {
            FieldStatus::Pending
        };
        self.field_status.insert(pointer.to_string(), status);

        Some(parsed)
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Parsed) -> Parsed {
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn object(&mut self, pointer: &str) -> Parsed {
        self.pos += 1;
        let mut map = Map::new();
        let mut first = true;

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'}') if first => {
                    self.pos += 1;
                    return (Value::Object(map), true);
                }
                Some(b'"') => {}
                _ => return (Value::Object(map), false),
            }
            first = false;

            let (key, closed) = self.string();
            if !closed {
                return (Value::Object(map), false);
            }

            self.skip_whitespace();
            if self.peek() != Some(b':') {
                return (Value::Object(map), false);
            }
            self.pos += 1;

            let child = child_pointer(pointer, &key);
            let Some((value, complete)) = self.value(&child) else {
                return (Value::Object(map), false);
            };
            map.insert(key, value);
            if !complete {
                return (Value::Object(map), false);
            }

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return (Value::Object(map), true);
                }
                _ => return (Value::Object(map), false),
            }
        }
    }

    fn array(&mut self, pointer: &str) -> Parsed {
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            if items.is_empty() && self.peek() == Some(b']') {
                self.pos += 1;
                return (Value::Array(items), true);
            }

            let child = format!("{}/{}", pointer, items.len());
            let Some((value, complete)) = self.value(&child) else {
                return (Value::Array(items), false);
            };
            items.push(value);
            if !complete {
                return (Value::Array(items), false);
            }

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return (Value::Array(items), true);
                }
                _ => return (Value::Array(items), false),
            }
        }
    }

    /// Parse a string starting at an opening quote. The flag is false when the
    /// closing quote is missing or the string is malformed.
    fn string(&mut self) -> (String, bool) {
        self.pos += 1;
        let mut out = String::new();

        loop {
            let Some(c) = self.src[self.pos..].chars().next() else {
                return (out, false);
            };

            match c {
                '"' => {
                    self.pos += 1;
                    return (out, true);
                }
                '\\' => match self.escape() {
                    Escape::Char(ch) => out.push(ch),
                    Escape::Truncated => {
                        self.pos = self.src.len();
                        return (out, false);
                    }
                    Escape::Invalid => return (out, false),
                },
                c => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Decode the escape sequence at `self.pos` (which points at the backslash)
    fn escape(&mut self) -> Escape {
        let Some(kind) = self.src.as_bytes().get(self.pos + 1).copied() else {
            return Escape::Truncated;
        };

        let simple = match kind {
            b'"' => Some('"'),
            b'\\' => Some('\\'),
            b'/' => Some('/'),
            b'b' => Some('\u{8}'),
            b'f' => Some('\u{c}'),
            b'n' => Some('\n'),
            b'r' => Some('\r'),
            b't' => Some('\t'),
            b'u' => None,
            _ => return Escape::Invalid,
        };
        if let Some(ch) = simple {
            self.pos += 2;
            return Escape::Char(ch);
        }

        let high = match self.hex4(self.pos + 2) {
            Hex::Code(code) => code,
            Hex::Truncated => return Escape::Truncated,
            Hex::Invalid => return Escape::Invalid,
        };

        if !(0xD800..=0xDBFF).contains(&high) {
            self.pos += 6;
            return Escape::Char(char::from_u32(u32::from(high)).unwrap_or('\u{FFFD}'));
        }

        // High surrogate: the low half decides the character.
        let bytes = self.src.as_bytes();
        let after = self.pos + 6;
        match (bytes.get(after), bytes.get(after + 1)) {
            (None, _) | (Some(b'\\'), None) => return Escape::Truncated,
            (Some(b'\\'), Some(b'u')) => {}
            _ => {
                self.pos = after;
                return Escape::Char('\u{FFFD}');
            }
        }

        match self.hex4(after + 2) {
            Hex::Code(low) if (0xDC00..=0xDFFF).contains(&low) => {
                self.pos = after + 6;
                let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
                Escape::Char(char::from_u32(code).unwrap_or('\u{FFFD}'))
            }
            Hex::Code(_) => {
                self.pos = after;
                Escape::Char('\u{FFFD}')
            }
            Hex::Truncated => Escape::Truncated,
            Hex::Invalid => Escape::Invalid,
        }
    }

    fn hex4(&self, at: usize) -> Hex {
        let bytes = self.src.as_bytes();
        let end = (at + 4).min(bytes.len());
        let digits = &bytes[at.min(end)..end];

        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return Hex::Invalid;
        }
        if digits.len() < 4 {
            return Hex::Truncated;
        }

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| u16::from_str_radix(s, 16).ok())
            .map_or(Hex::Invalid, Hex::Code)
    }

    fn number(&mut self) -> Option<Parsed> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        let token = &self.src[start..self.pos];

        match self.peek() {
            Some(next) if is_delimiter(next) => token
                .parse::<Number>()
                .ok()
                .map(|n| (Value::Number(n), true)),
            // More digits may still arrive: keep the longest numeric prefix.
            _ => (1..=token.len())
                .rev()
                .find_map(|end| token[..end].parse::<Number>().ok())
                .map(|n| (Value::Number(n), false)),
        }
    }

    fn literal(&mut self) -> Option<Parsed> {
        const LITERALS: [(&str, Value); 3] = [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ];

        let rest = &self.src[self.pos..];
        for (word, value) in LITERALS {
            if rest.starts_with(word) {
                self.pos += word.len();
                let complete = self.peek().is_some_and(is_delimiter);
                return Some((value, complete));
            }
            if word.starts_with(rest) {
                self.pos = self.src.len();
                return Some((value, false));
            }
        }
        None
    }
}
