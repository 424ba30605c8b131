//! Thin typed parser over a descriptor's top-level shape.
//!
//! Recognizes three assignment forms — quoted string, one-element bracketed
//! list, and a brace-delimited block — and leaves anything else unparsed.
//! `classify` consumes the resulting [`RawDescriptor`]; unrecognized keys fall
//! back to a direct string-assignment probe rather than failing the parse.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Str(String),
    List(Vec<String>),
    /// Names of resources declared one level inside the block, e.g. the `"b1"`
    /// in `object_store_buckets = { "b1" = { ... } }`.
    Block(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct RawDescriptor {
    pub entries: HashMap<String, RawValue>,
}

impl RawDescriptor {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(RawValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Region may be given as a one-element bracketed list rather than a bare string.
    pub fn get_list_single(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(RawValue::List(items)) if items.len() == 1 => Some(items[0].as_str()),
            _ => None,
        }
    }

    pub fn get_block_names(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key) {
            Some(RawValue::Block(names)) => Some(names.as_slice()),
            _ => None,
        }
    }
}

static STRING_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*"([^"]*)"\s*$"#).expect("valid regex"));

static LIST_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*\[\s*"([^"]*)"\s*\]\s*$"#).expect("valid regex")
});

static BLOCK_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*\{\s*$").expect("valid regex"));

static NESTED_RESOURCE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"([a-z0-9](?:[a-z0-9-]*[a-z0-9])?)"\s*=\s*\{\s*$"#).expect("valid regex")
});

/// Tokenize top-level `key = value` declarations and bracketed blocks out of
/// descriptor text. Lines matching none of the recognized forms are skipped —
/// the regex fallback for an otherwise-unrecognized key is just a direct
/// [`STRING_ASSIGN`] probe, which this same pass already performs.
pub fn parse(contents: &str) -> RawDescriptor {
    let lines: Vec<&str> = contents.lines().collect();
    let mut entries = HashMap::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = STRING_ASSIGN.captures(line) {
            entries.insert(caps[1].to_string(), RawValue::Str(caps[2].to_string()));
            i += 1;
            continue;
        }

        if let Some(caps) = LIST_ASSIGN.captures(line) {
            entries.insert(caps[1].to_string(), RawValue::List(vec![caps[2].to_string()]));
            i += 1;
            continue;
        }

        if let Some(caps) = BLOCK_OPEN.captures(line) {
            let key = caps[1].to_string();
            let mut depth: i32 = 1;
            let mut names = Vec::new();
            i += 1;
            while i < lines.len() && depth > 0 {
                let l = lines[i];
                if depth == 1 {
                    if let Some(nc) = NESTED_RESOURCE_KEY.captures(l) {
                        names.push(nc[1].to_string());
                    }
                }
                depth += l.matches('{').count() as i32;
                depth -= l.matches('}').count() as i32;
                i += 1;
            }
            entries.insert(key, RawValue::Block(names));
            continue;
        }

        i += 1;
    }

    RawDescriptor { entries }
}
