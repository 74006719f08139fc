//! Delimited input records with a single sensitive field.

use std::ops::Range;

use crate::config::PipelineConfig;
use crate::error::{TokenVaultError, TokenVaultResult};
use crate::types::{AccountNormalization, AccountValue};

/// Where the account lives in a line and how it is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Zero-based position of the account field.
    pub account_field: usize,
    /// Field delimiter.
    pub delimiter: char,
    /// Key normalization applied to the account field.
    pub normalization: AccountNormalization,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            account_field: 1,
            delimiter: ',',
            normalization: AccountNormalization::Exact,
        }
    }
}

impl From<&PipelineConfig> for RecordLayout {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            account_field: config.account_field,
            delimiter: config.delimiter,
            normalization: config.normalization,
        }
    }
}

/// One input line with the byte span of its account field.
///
/// The line is kept as raw bytes, terminator included. Everything outside
/// the account span is emitted byte-for-byte; only the account field has to
/// be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: Vec<u8>,
    account_span: Range<usize>,
    account: AccountValue,
}

impl Record {
    /// Splits `line` according to `layout`.
    ///
    /// A trailing `\n` or `\r\n` is treated as the terminator and kept for
    /// rendering.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::MalformedRecord`] if the line has fewer
    /// fields than the account position requires, and
    /// [`TokenVaultError::NonUtf8Account`] if the account field is not UTF-8.
    pub fn parse(line: Vec<u8>, line_number: u64, layout: &RecordLayout) -> TokenVaultResult<Self> {
        let body = &line[..body_len(&line)];
        let mut delimiter = [0u8; 4];
        let delimiter = layout.delimiter.encode_utf8(&mut delimiter).as_bytes();

        let Some(account_span) = Fields::new(body, delimiter).nth(layout.account_field) else {
            return Err(TokenVaultError::MalformedRecord {
                line: line_number,
                fields: Fields::new(body, delimiter).count(),
                account_field: layout.account_field,
            });
        };
        let raw = std::str::from_utf8(&line[account_span.clone()])
            .map_err(|_| TokenVaultError::NonUtf8Account { line: line_number })?;
        let account = layout.normalization.apply(raw);
        Ok(Self {
            line,
            account_span,
            account,
        })
    }

    /// Account key used for vault lookups.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The raw input line, terminator included.
    #[must_use]
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Appends the line with its account field replaced by `token`.
    ///
    /// The original terminator is kept; a line read without one gets `\n`.
    pub fn render_into(&self, token: &str, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.line[..self.account_span.start]);
        out.extend_from_slice(token.as_bytes());
        out.extend_from_slice(&self.line[self.account_span.end..]);
        if !self.line.ends_with(b"\n") {
            out.push(b'\n');
        }
    }

    /// The line with its account field replaced by `token`.
    #[must_use]
    pub fn render(&self, token: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.line.len() + token.len() + 1);
        self.render_into(token, &mut out);
        out
    }
}

/// Length of `line` without its `\n` or `\r\n` terminator.
fn body_len(line: &[u8]) -> usize {
    match line {
        [.., b'\r', b'\n'] => line.len() - 2,
        [.., b'\n'] => line.len() - 1,
        _ => line.len(),
    }
}

/// Byte ranges of the fields of a line body.
struct Fields<'a> {
    rest: Option<&'a [u8]>,
    offset: usize,
    delimiter: &'a [u8],
}

impl<'a> Fields<'a> {
    const fn new(body: &'a [u8], delimiter: &'a [u8]) -> Self {
        Self {
            rest: Some(body),
            offset: 0,
            delimiter,
        }
    }
}

impl Iterator for Fields<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        let start = self.offset;
        match rest
            .windows(self.delimiter.len())
            .position(|window| window == self.delimiter)
        {
            Some(at) => {
                let step = at + self.delimiter.len();
                self.rest = Some(&rest[step..]);
                self.offset += step;
                Some(start..start + at)
            }
            None => {
                self.rest = None;
                Some(start..start + rest.len())
            }
        }
    }
}
