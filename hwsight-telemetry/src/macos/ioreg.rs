//! Parser for `ioreg -l` registry dumps.
//!
//! An entry line looks like
//! `| +-o AppleSmartBattery  <class AppleSmartBattery, id 0x100000254, ...>`
//! and is followed by its properties, one `"Key" = value` per line. Nesting
//! is given by the column of the `+-o` marker.

use std::collections::BTreeMap;

use crate::decode::hex_to_bytes;

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum IoValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Data(Vec<u8>),
    Dict(BTreeMap<String, IoValue>),
    /// Arrays and anything else left as printed.
    Raw(String),
}

impl IoValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            IoValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            IoValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            IoValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            IoValue::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, IoValue>> {
        match self {
            IoValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IoregEntry {
    pub name: String,
    pub class: String,
    /// Registry entry id, e.g. "0x100000254".
    pub id: String,
    /// Index of the parent entry in the parsed list.
    pub parent: Option<usize>,
    pub properties: BTreeMap<String, IoValue>,
}

impl IoregEntry {
    pub fn int(&self, key: &str) -> Option<i64> {
        self.properties.get(key)?.as_int()
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.properties.get(key)?.as_str()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key)?.as_bool()
    }

    pub fn data(&self, key: &str) -> Option<&[u8]> {
        self.properties.get(key)?.as_data()
    }

    pub fn dict(&self, key: &str) -> Option<&BTreeMap<String, IoValue>> {
        self.properties.get(key)?.as_dict()
    }
}

/// Parse a registry dump into entries in printed order.
pub fn parse_ioreg<S: AsRef<str>>(lines: &[S]) -> Vec<IoregEntry> {
    let mut entries: Vec<IoregEntry> = Vec::new();
    // (column of "+-o", entry index)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for line in lines {
        let line = line.as_ref();
        if let Some(column) = line.find("+-o ") {
            while stack.last().is_some_and(|(c, _)| *c >= column) {
                stack.pop();
            }
            let mut entry = parse_header(&line[column + 4..]);
            entry.parent = stack.last().map(|(_, idx)| *idx);
            stack.push((column, entries.len()));
            entries.push(entry);
            continue;
        }

        let body = line.trim_start_matches(|c: char| c == '|' || c.is_whitespace());
        let Some(current) = entries.last_mut() else {
            continue;
        };
        if let Some((key, value)) = parse_property(body) {
            current.properties.insert(key, value);
        }
    }

    entries
}

fn parse_header(text: &str) -> IoregEntry {
    let (name, rest) = match text.find("  <") {
        Some(at) => (&text[..at], &text[at + 2..]),
        None => (text, ""),
    };
    let attrs = rest.trim_start_matches('<').trim_end_matches('>');
    let mut entry = IoregEntry {
        name: name.trim().to_string(),
        ..Default::default()
    };
    for attr in attrs.split(", ") {
        if let Some(class) = attr.strip_prefix("class ") {
            entry.class = class.to_string();
        } else if let Some(id) = attr.strip_prefix("id ") {
            entry.id = id.to_string();
        }
    }
    entry
}

fn parse_property(body: &str) -> Option<(String, IoValue)> {
    let rest = body.strip_prefix('"')?;
    let end = rest.find('"')?;
    let key = &rest[..end];
    let value = rest[end + 1..].trim_start().strip_prefix('=')?;
    Some((key.to_string(), parse_value(value.trim())))
}

/// Parse a single printed value.
pub fn parse_value(text: &str) -> IoValue {
    match text {
        "Yes" => return IoValue::Bool(true),
        "No" => return IoValue::Bool(false),
        _ => {}
    }
    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return IoValue::Str(inner.to_string());
    }
    if let Some(inner) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        if let Some(bytes) = hex_to_bytes(inner) {
            return IoValue::Data(bytes);
        }
        if let Some(s) = inner.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return IoValue::Str(s.to_string());
        }
    }
    if text.starts_with('{') && text.ends_with('}') {
        return IoValue::Dict(parse_dict(text));
    }
    if let Ok(v) = text.parse::<i64>() {
        return IoValue::Int(v);
    }
    // Negative values are printed as their unsigned 64-bit pattern.
    if let Ok(v) = text.parse::<u64>() {
        return IoValue::Int(v as i64);
    }
    IoValue::Raw(text.to_string())
}

/// Parse a one-line dictionary such as
/// `{"Bytes (Read)"=4096,"Operations (Read)"=2}`.
pub fn parse_dict(text: &str) -> BTreeMap<String, IoValue> {
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or("");
    split_top_level(inner)
        .into_iter()
        .filter_map(|item| {
            let rest = item.trim().strip_prefix('"')?;
            let end = rest.find('"')?;
            let value = rest[end + 1..].trim_start().strip_prefix('=')?;
            Some((rest[..end].to_string(), parse_value(value.trim())))
        })
        .collect()
}

/// Split on commas outside quotes, braces and parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '{' | '(' | '<' if !quoted => depth += 1,
            '}' | ')' | '>' if !quoted => depth -= 1,
            ',' if !quoted && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

/// Indices of the direct children of `index`.
pub fn children_of(entries: &[IoregEntry], index: usize) -> impl Iterator<Item = usize> + '_ {
    entries
        .iter()
        .enumerate()
        .filter(move |(_, e)| e.parent == Some(index))
        .map(|(i, _)| i)
}

/// Indices of every entry below `index`, depth first.
pub fn descendants_of(entries: &[IoregEntry], index: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack: Vec<usize> = children_of(entries, index).collect();
    stack.reverse();
    while let Some(i) = stack.pop() {
        out.push(i);
        let mut kids: Vec<usize> = children_of(entries, i).collect();
        kids.reverse();
        stack.extend(kids);
    }
    out
}
