//! Fixed-order field decoding of text lines and byte buffers.
//!
//! Layouts are declared as constant tables of [`Field`]s. Decoding never
//! fails: input that is too short yields all-zero (or all-empty) values, and a
//! single unparseable token only zeroes its own field.

use std::collections::BTreeMap;

/// A named position in a tokenized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    /// Zero-based token index.
    pub index: usize,
}

impl Field {
    pub const fn new(name: &'static str, index: usize) -> Self {
        Self { name, index }
    }
}

/// How a line is split into tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Runs of ASCII whitespace.
    Whitespace,
    /// A single character; empty tokens are kept.
    Char(char),
}

/// Byte order of a binary field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Split a line into tokens.
pub fn split_fields(text: &str, delimiter: Delimiter) -> Vec<&str> {
    match delimiter {
        Delimiter::Whitespace => text.split_ascii_whitespace().collect(),
        Delimiter::Char(c) => text.split(c).map(str::trim).collect(),
    }
}

fn covers<const N: usize>(tokens: &[&str], layout: &[Field; N]) -> bool {
    layout
        .iter()
        .map(|f| f.index)
        .max()
        .is_none_or(|max| max < tokens.len())
}

/// Decode integer fields from `tokens` according to `layout`.
///
/// Returns all zeros when there are not enough tokens for the highest
/// declared index.
pub fn decode_longs<const N: usize>(tokens: &[&str], layout: &[Field; N]) -> [i64; N] {
    let mut values = [0i64; N];
    if !covers(tokens, layout) {
        return values;
    }
    for (value, field) in values.iter_mut().zip(layout) {
        *value = parse_long_or(tokens[field.index], 0);
    }
    values
}

/// Decode raw substrings from `tokens` according to `layout`.
///
/// Returns all empty strings when there are not enough tokens.
pub fn decode_strings<'a, const N: usize>(tokens: &[&'a str], layout: &[Field; N]) -> [&'a str; N] {
    let mut values = [""; N];
    if !covers(tokens, layout) {
        return values;
    }
    for (value, field) in values.iter_mut().zip(layout) {
        *value = tokens[field.index];
    }
    values
}

/// Split and decode a line in one step.
pub fn decode_line<const N: usize>(text: &str, delimiter: Delimiter, layout: &[Field; N]) -> [i64; N] {
    decode_longs(&split_fields(text, delimiter), layout)
}

/// Parse a signed integer, tolerating surrounding whitespace and values too
/// large for `i64` (which saturate).
pub fn parse_long_or(text: &str, default: i64) -> i64 {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return v;
    }
    match text.parse::<u64>() {
        Ok(_) => i64::MAX,
        Err(_) => default,
    }
}

/// Parse an unsigned integer, negative or malformed input yielding `default`.
pub fn parse_u64_or(text: &str, default: u64) -> u64 {
    text.trim().parse::<u64>().unwrap_or(default)
}

/// Parse a value that may be `0x`-prefixed hexadecimal or decimal.
pub fn parse_hex_or_decimal(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse the last whitespace-separated token of `text` as an integer.
///
/// `"CPU part\t: 0xd03"` style values are accepted in hex or decimal.
pub fn parse_last_int(text: &str, default: u64) -> u64 {
    text.split_whitespace()
        .last()
        .and_then(parse_hex_or_decimal)
        .unwrap_or(default)
}

/// Parse `key<delimiter>value` lines into a map.
///
/// Lines without the delimiter are skipped; keys and values are trimmed.
/// Later duplicates win.
pub fn parse_key_values<S: AsRef<str>>(lines: &[S], delimiter: char) -> BTreeMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            let (k, v) = line.as_ref().split_once(delimiter)?;
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Strip one pair of surrounding double quotes.
pub fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// Read an unsigned integer of `width` bytes (1..=8) at `offset`.
///
/// Returns `None` when the buffer is too short.
pub fn read_uint(bytes: &[u8], offset: usize, width: usize, endian: Endian) -> Option<u64> {
    if width == 0 || width > 8 {
        return None;
    }
    let slice = bytes.get(offset..offset.checked_add(width)?)?;
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    Some(match endian {
        Endian::Big => slice.iter().fold(0, fold),
        Endian::Little => slice.iter().rev().fold(0, fold),
    })
}

/// Decode a hex blob such as `<00e1f505>` or `00 e1 f5 05` into bytes.
///
/// Returns `None` on odd length or non-hex characters.
pub fn hex_to_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: String = text
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

/// Split a NUL-separated buffer (cmdline, environ) into strings.
pub fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}
