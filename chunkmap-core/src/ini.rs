//! Minimal reader/writer for the `[section]` / `key = value` text layout used
//! by map files. Typing and validation live in `map`.

use crate::error::{Error, Result};
use std::fmt::Write as _;

#[derive(Debug)]
pub(crate) struct RawEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug)]
pub(crate) struct RawSection {
    pub name: String,
    pub entries: Vec<RawEntry>,
}

pub(crate) fn parse(text: &str) -> Result<Vec<RawSection>> {
    let mut sections: Vec<RawSection> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let lineno = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            return Err(Error::malformed(
                trimmed,
                format!("line {lineno}: continuation lines are not supported"),
            ));
        }
        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| {
                Error::malformed(trimmed, format!("line {lineno}: unterminated section header"))
            })?;
            if name.is_empty() || name.contains(']') {
                return Err(Error::malformed(
                    trimmed,
                    format!("line {lineno}: invalid section name"),
                ));
            }
            if sections.iter().any(|s| s.name == name) {
                return Err(Error::malformed(name, format!("line {lineno}: duplicate section")));
            }
            sections.push(RawSection { name: name.to_string(), entries: Vec::new() });
            continue;
        }
        let Some(sep) = trimmed.find(|c: char| c == '=' || c == ':') else {
            return Err(Error::malformed(trimmed, format!("line {lineno}: expected key = value")));
        };
        let key = trimmed[..sep].trim();
        let value = trimmed[sep + 1..].trim();
        if key.is_empty() {
            return Err(Error::malformed(trimmed, format!("line {lineno}: empty key")));
        }
        let Some(section) = sections.last_mut() else {
            return Err(Error::malformed(key, format!("line {lineno}: entry outside any section")));
        };
        if section.entries.iter().any(|e| e.key == key) {
            return Err(Error::malformed(
                key,
                format!("line {lineno}: duplicate key in [{}]", section.name),
            ));
        }
        section.entries.push(RawEntry { key: key.to_string(), value: value.to_string() });
    }
    Ok(sections)
}

/// Append one section, followed by a blank separator line.
pub(crate) fn write_section<'a, I>(out: &mut String, name: &str, entries: I)
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let _ = writeln!(out, "[{name}]");
    for (key, value) in entries {
        let _ = writeln!(out, "{key} = {value}");
    }
    out.push('\n');
}
