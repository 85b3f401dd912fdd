//! # JAR Manifest
//!
//! In-memory model of `META-INF/MANIFEST.MF`: a main attribute section followed by
//! optional per-entry sections introduced by a `Name:` header.
//!
//! Serialization follows the JAR file rules: `Key: Value` lines terminated by CRLF,
//! folded at 72 bytes with continuation lines starting with a single space, and a
//! blank line closing every section.

use std::collections::BTreeMap;
use thiserror::Error;

/// Header name → header value. Ordered so that serialization is deterministic.
pub type Headers = BTreeMap<String, String>;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
pub const MANIFEST_VERSION: &str = "Manifest-Version";
pub const DEFAULT_MANIFEST_VERSION: &str = "1.0";

const MAX_LINE_BYTES: usize = 72;
const SECTION_NAME: &str = "Name";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest is not valid UTF-8")]
    Encoding,
    #[error("line {line}: expected 'Name: Value'")]
    MalformedLine { line: usize },
    #[error("line {line}: continuation line without a preceding header")]
    OrphanContinuation { line: usize },
    #[error("line {line}: section does not start with a Name header")]
    UnnamedSection { line: usize },
    #[error("header {name:?} cannot be written: names need no ':' and neither part may break a line")]
    UnwritableHeader { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Headers,
    sections: Vec<(String, Headers)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a manifest whose main section holds `headers`.
    pub fn from_headers(headers: Headers) -> Self {
        Self { main: headers, sections: Vec::new() }
    }

    pub fn main_attributes(&self) -> &Headers {
        &self.main
    }

    pub fn main_attributes_mut(&mut self) -> &mut Headers {
        &mut self.main
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.main.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.main.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.main.remove(name)
    }

    /// Per-entry sections in the order they were added.
    pub fn sections(&self) -> &[(String, Headers)] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Headers> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    /// Adds or replaces the section for `name`. A replaced section keeps its position.
    pub fn set_section(&mut self, name: impl Into<String>, headers: Headers) {
        let name = name.into();
        match self.sections.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = headers,
            None => self.sections.push((name, headers)),
        }
    }

    /// Parses manifest bytes. Blank lines separate sections; the first section is the main one.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::Encoding)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut manifest = Manifest::new();
        let mut current: Vec<(String, String)> = Vec::new();
        let mut section_start = 1usize;
        let mut in_main = true;

        let mut close_section = |attrs: &mut Vec<(String, String)>, in_main: &mut bool, start: usize| -> Result<(), ManifestError> {
            if attrs.is_empty() {
                return Ok(());
            }
            let drained: Vec<(String, String)> = attrs.drain(..).collect();
            if *in_main {
                manifest.main.extend(drained);
                *in_main = false;
                return Ok(());
            }
            let mut iter = drained.into_iter();
            let name = match iter.next() {
                Some((k, v)) if k.eq_ignore_ascii_case(SECTION_NAME) => v,
                _ => return Err(ManifestError::UnnamedSection { line: start }),
            };
            manifest.set_section(name, iter.collect());
            Ok(())
        };

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                close_section(&mut current, &mut in_main, section_start)?;
                section_start = line_no + 1;
                continue;
            }
            if let Some(cont) = line.strip_prefix(' ') {
                match current.last_mut() {
                    Some((_, value)) => value.push_str(cont),
                    None => return Err(ManifestError::OrphanContinuation { line: line_no }),
                }
                continue;
            }
            let (key, value) = line.split_once(':').ok_or(ManifestError::MalformedLine { line: line_no })?;
            if key.is_empty() {
                return Err(ManifestError::MalformedLine { line: line_no });
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            current.push((key.to_string(), value.to_string()));
        }
        close_section(&mut current, &mut in_main, section_start)?;
        drop(close_section);

        Ok(manifest)
    }

    /// Serializes to JAR manifest bytes. `Manifest-Version` always comes first.
    ///
    /// A header whose name or value would break the line structure (CR, LF, NUL, or a
    /// colon or empty name) is refused rather than written.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut out = String::new();
        let version = self.main.get(MANIFEST_VERSION).map(String::as_str).unwrap_or(DEFAULT_MANIFEST_VERSION);
        write_header(&mut out, MANIFEST_VERSION, version)?;
        for (key, value) in &self.main {
            if key != MANIFEST_VERSION {
                write_header(&mut out, key, value)?;
            }
        }
        out.push_str("\r\n");

        for (name, attrs) in &self.sections {
            write_header(&mut out, SECTION_NAME, name)?;
            for (key, value) in attrs {
                write_header(&mut out, key, value)?;
            }
            out.push_str("\r\n");
        }
        Ok(out.into_bytes())
    }
}

fn breaks_line(c: char) -> bool {
    matches!(c, '\r' | '\n' | '\0')
}

/// Writes one `Key: Value` line, folding it at 72 bytes on char boundaries.
fn write_header(out: &mut String, key: &str, value: &str) -> Result<(), ManifestError> {
    if key.is_empty() || key.contains(|c: char| c == ':' || breaks_line(c)) || value.contains(breaks_line) {
        return Err(ManifestError::UnwritableHeader { name: key.to_string() });
    }
    let line = format!("{}: {}", key, value);
    let mut rest = line.as_str();
    let mut limit = MAX_LINE_BYTES;
    let mut first = true;
    loop {
        if !first {
            out.push(' ');
        }
        if rest.len() <= limit {
            out.push_str(rest);
            out.push_str("\r\n");
            return Ok(());
        }
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n");
        rest = &rest[cut..];
        // continuation lines spend one byte on the leading space
        limit = MAX_LINE_BYTES - 1;
        first = false;
    }
}
