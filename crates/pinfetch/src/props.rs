//! Java-style `.properties` files.
//!
//! Used both for the cache's sidecar metadata and for the property files that
//! callers read through [`PropertyStore`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Error, Result};

const WHITESPACE: [char; 3] = [' ', '\t', '\x0c'];

/// Parsed key/value pairs, ordered by key.
pub type Properties = BTreeMap<String, String>;

/// Parse the text of a `.properties` file.
///
/// Supports `=`, `:` or whitespace separators, `#`/`!` comments, backslash
/// line continuations, and the `\t \n \r \f \uXXXX` escapes.
pub fn parse(text: &str) -> Properties {
    let mut props = Properties::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let mut logical = line.trim_start_matches(WHITESPACE).to_string();
        if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
            continue;
        }
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start_matches(WHITESPACE)),
                None => break,
            }
        }
        let (key, value) = split_key_value(&logical);
        props.insert(unescape(key), unescape(value));
    }
    props
}

/// Render properties in a form [`parse`] reads back, preceded by a comment line.
pub fn render(comment: &str, props: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for line in comment.lines() {
        let _ = writeln!(out, "#{line}");
    }
    for (key, value) in props {
        let _ = writeln!(out, "{}={}", escape(key, true), escape(value, false));
    }
    out
}

/// Read and parse a properties file.
///
/// Files that are not valid UTF-8 are decoded as ISO-8859-1, the historical
/// encoding of `.properties` files.
pub fn load(path: &Path) -> Result<Properties> {
    let bytes =
        fs::read(path).map_err(|e| Error::io(format!("reading properties {}", path.display()), e))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    Ok(parse(&text))
}

fn ends_with_continuation(line: &str) -> bool {
    let backslashes = line.bytes().rev().take_while(|b| *b == b'\\').count();
    backslashes % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                return (&line[..idx], line[idx + 1..].trim_start_matches(WHITESPACE));
            }
            ' ' | '\t' | '\x0c' => {
                let rest = line[idx..].trim_start_matches(WHITESPACE);
                let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
                return (&line[..idx], rest.trim_start_matches(WHITESPACE));
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut pending_high: Option<u16> = None;

    while let Some(c) = chars.next() {
        if c != '\\' {
            flush_surrogate(&mut out, &mut pending_high);
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u16::from_str_radix(&hex, 16) {
                    Ok(unit) => push_utf16_unit(&mut out, &mut pending_high, unit),
                    Err(_) => {
                        flush_surrogate(&mut out, &mut pending_high);
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                flush_surrogate(&mut out, &mut pending_high);
                out.push(match other {
                    't' => '\t',
                    'n' => '\n',
                    'r' => '\r',
                    'f' => '\x0c',
                    c => c,
                });
            }
            None => flush_surrogate(&mut out, &mut pending_high),
        }
    }
    flush_surrogate(&mut out, &mut pending_high);
    out
}

fn push_utf16_unit(out: &mut String, pending_high: &mut Option<u16>, unit: u16) {
    if let Some(high) = pending_high.take() {
        if let Some(Ok(c)) = char::decode_utf16([high, unit]).next() {
            out.push(c);
            return;
        }
        out.push(char::REPLACEMENT_CHARACTER);
    }
    if (0xD800..0xDC00).contains(&unit) {
        *pending_high = Some(unit);
    } else {
        out.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
}

fn flush_surrogate(out: &mut String, pending_high: &mut Option<u16>) {
    if pending_high.take().is_some() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, c) in raw.chars().enumerate() {
        match c {
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04X}");
                }
            }
        }
    }
    out
}

/// Process-lifetime cache of parsed property files, keyed by resolved path.
///
/// Files are assumed immutable once fetched, so entries are never invalidated
/// except by [`PropertyStore::clear`].
#[derive(Debug, Default)]
pub struct PropertyStore {
    parsed: Mutex<HashMap<PathBuf, Arc<Properties>>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed contents of `path`, reading it only on first use.
    pub fn load(&self, path: &Path) -> Result<Arc<Properties>> {
        let mut parsed = self.parsed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(props) = parsed.get(path) {
            return Ok(Arc::clone(props));
        }
        debug!("Parsing properties {}", path.display());
        let props = Arc::new(load(path)?);
        parsed.insert(path.to_path_buf(), Arc::clone(&props));
        Ok(props)
    }

    /// Look up `key` in `path`, with an error listing the keys that do exist.
    pub fn get(&self, path: &Path, key: &str) -> Result<String> {
        let props = self.load(path)?;
        lookup(&props, &path.display().to_string(), key)
    }

    pub fn clear(&self) {
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Look up `key`, naming `file` and the available keys when it is absent.
pub fn lookup(props: &Properties, file: &str, key: &str) -> Result<String> {
    props.get(key).cloned().ok_or_else(|| Error::MissingKey {
        file: file.to_string(),
        key: key.to_string(),
        available: props.keys().cloned().collect::<Vec<_>>().join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_separators_and_comments() {
        let props = parse(
            "# comment\n! also comment\n\na=1\nb:2\nc 3\n  d = 4  \ne\n",
        );
        assert_eq!(props.get("a").map(String::as_str), Some("1"));
        assert_eq!(props.get("b").map(String::as_str), Some("2"));
        assert_eq!(props.get("c").map(String::as_str), Some("3"));
        assert_eq!(props.get("d").map(String::as_str), Some("4  "));
        assert_eq!(props.get("e").map(String::as_str), Some(""));
        assert_eq!(props.len(), 5);
    }

    #[test]
    fn test_parse_whitespace_then_separator() {
        let props = parse("key = value\nother :value");
        assert_eq!(props["key"], "value");
        assert_eq!(props["other"], "value");
    }

    #[test]
    fn test_parse_continuation_and_escapes() {
        let props = parse("list=a,\\\n    b,\\\n    c\nurl=https\\://x.org/a\\=b\nuni=caf\\u00e9\ntab=a\\tb");
        assert_eq!(props["list"], "a,b,c");
        assert_eq!(props["url"], "https://x.org/a=b");
        assert_eq!(props["uni"], "café");
        assert_eq!(props["tab"], "a\tb");
    }

    #[test]
    fn test_render_reads_back() {
        let url = "https://raw.githubusercontent.com/org/repo/v1/a b#c!d";
        let text = render(
            "pinfetch metadata",
            &[("version", "1"), ("url", url), ("note", " lead\u{1F600}")],
        );
        assert!(text.starts_with("#pinfetch metadata\n"));
        let props = parse(&text);
        assert_eq!(props["version"], "1");
        assert_eq!(props["url"], url);
        assert_eq!(props["note"], " lead\u{1F600}");
    }

    #[test]
    fn test_store_caches_by_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.properties");
        fs::write(&path, "a=1\n").unwrap();

        let store = PropertyStore::new();
        assert_eq!(store.get(&path, "a").unwrap(), "1");

        // Files are treated as immutable: edits are not observed until cleared.
        fs::write(&path, "a=2\n").unwrap();
        assert_eq!(store.get(&path, "a").unwrap(), "1");
        store.clear();
        assert_eq!(store.get(&path, "a").unwrap(), "2");
    }

    #[test]
    fn test_load_latin1_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.properties");
        fs::write(&path, b"name=caf\xe9\nkey=v\n").unwrap();

        let props = load(&path).unwrap();
        assert_eq!(props["name"], "caf\u{e9}");
        assert_eq!(props["key"], "v");

        fs::write(&path, "name=caf\u{e9}\n").unwrap();
        assert_eq!(load(&path).unwrap()["name"], "caf\u{e9}");
    }

    #[test]
    fn test_missing_key_lists_available() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.properties");
        fs::write(&path, "zeta=1\nalpha=2\n").unwrap();

        let err = PropertyStore::new().get(&path, "missing").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("does not have key 'missing'"), "{message}");
        assert!(message.ends_with("does have [alpha, zeta]"), "{message}");
    }
}
