//! Newline-delimited field encoding shared by the options side file and the
//! legacy configuration record.

use super::PersistenceError;
use crate::config::OptionRegistry;

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LEN: usize = 512;

/// Sequential reader over `\n`-terminated fields.
///
/// A field without its terminator counts as truncated: records are written
/// in full or not at all, so a missing newline means the stream was cut.
pub struct LineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the next field; `field` names it in errors.
    pub fn next_line(&mut self, field: &str) -> Result<&'a str, PersistenceError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| PersistenceError::Truncated(field.to_string()))?;
        if end > MAX_LINE_LEN {
            return Err(PersistenceError::Malformed(format!(
                "{} exceeds {} bytes",
                field, MAX_LINE_LEN
            )));
        }
        let line = std::str::from_utf8(&rest[..end])
            .map_err(|_| PersistenceError::Malformed(format!("{} is not valid UTF-8", field)))?;
        self.pos += end + 1;
        Ok(line)
    }

    /// Read the next field and parse it.
    pub fn next_parsed<T: std::str::FromStr>(&mut self, field: &str) -> Result<T, PersistenceError> {
        let line = self.next_line(field)?;
        line.trim()
            .parse()
            .map_err(|_| PersistenceError::Malformed(format!("{}: '{}' is not a number", field, line)))
    }

    /// Bytes left after the last field read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Writer producing `\n`-terminated fields.
#[derive(Default)]
pub struct LineWriter {
    buf: Vec<u8>,
}

impl LineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one field. Values containing a line break cannot be represented.
    pub fn push(&mut self, field: &str, value: &str) -> Result<(), PersistenceError> {
        if value.contains('\n') {
            return Err(PersistenceError::InvalidValue(format!(
                "{} contains a line break",
                field
            )));
        }
        if value.len() > MAX_LINE_LEN {
            return Err(PersistenceError::InvalidValue(format!(
                "{} exceeds {} bytes",
                field, MAX_LINE_LEN
            )));
        }
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(b'\n');
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Append the option count followed by each option's name and effective value.
pub fn write_options(writer: &mut LineWriter, options: &OptionRegistry) -> Result<(), PersistenceError> {
    writer.push("option count", &options.count().to_string())?;
    for option in options {
        writer.push("option name", option.name())?;
        writer.push(option.name(), option.value())?;
    }
    Ok(())
}

/// Read an option list written by [`write_options`] into `options`.
///
/// Definitions are not persisted, so every option comes back as nullable
/// with an empty default.
pub fn read_options(
    reader: &mut LineReader<'_>,
    options: &mut OptionRegistry,
) -> Result<(), PersistenceError> {
    let count: usize = reader.next_parsed("option count")?;
    for _ in 0..count {
        let name = reader.next_line("option name")?;
        let value = reader.next_line("option value")?;
        options.register(name, "", true);
        options.set_value(name, value).map_err(|e| {
            PersistenceError::Malformed(format!("option '{}': {}", name, e))
        })?;
    }
    Ok(())
}
