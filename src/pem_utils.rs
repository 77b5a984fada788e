//! Scanning and encoding of PEM armored blocks.
//!
//! Output framing matches the classic `-----BEGIN X-----` layout written by
//! OpenSSL and Go: optional RFC 1421 headers (`Proc-Type` first) followed by a
//! blank line, base64 body wrapped at 64 columns, LF line endings.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PushCertError;

const BEGIN_PREFIX: &str = "-----BEGIN ";

static BEGIN_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A-----BEGIN ([A-Z0-9 ]+)-----\r?\n").expect("valid regex"));

/// Iterator over the PEM blocks of an input, in order.
///
/// Text before a BEGIN line is skipped, so `openssl pkcs12` style
/// `Bag Attributes` preambles are accepted. Non-whitespace text after the
/// last block is an error. The iterator stops after yielding the first error.
pub struct BlockScanner<'a> {
    rest: &'a str,
    failed: bool,
}

impl<'a> BlockScanner<'a> {
    /// Creates a scanner, failing when the input is not UTF-8 text.
    pub fn new(input: &'a [u8]) -> Result<Self, PushCertError> {
        let rest = std::str::from_utf8(input)
            .map_err(|e| PushCertError::ArmorDecodeError(format!("input is not text: {e}")))?;
        Ok(Self {
            rest,
            failed: false,
        })
    }

    fn next_block(&mut self) -> Result<pem::Pem, PushCertError> {
        let Some(begin) = BEGIN_LINE.captures(self.rest) else {
            let snippet: String = self.rest.chars().take(32).collect();
            return Err(PushCertError::ArmorDecodeError(format!(
                "malformed BEGIN line {snippet:?}"
            )));
        };
        let label = &begin[1];
        let end_marker = format!("-----END {label}-----");
        let end = self.rest.find(&end_marker).ok_or_else(|| {
            PushCertError::ArmorDecodeError(format!("missing END line for {label} block"))
        })?;
        let block_len = end + end_marker.len();
        let block = &self.rest[..block_len];
        let parsed = pem::parse(block)
            .map_err(|e| PushCertError::ArmorDecodeError(format!("malformed {label} block: {e}")))?;
        self.rest = &self.rest[block_len..];
        Ok(parsed)
    }
}

impl Iterator for BlockScanner<'_> {
    type Item = Result<pem::Pem, PushCertError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.rest.find(BEGIN_PREFIX) {
            Some(start) => self.rest = &self.rest[start..],
            None => {
                let trailing = self.rest.trim();
                if trailing.is_empty() {
                    return None;
                }
                self.failed = true;
                let snippet: String = trailing.chars().take(32).collect();
                return Some(Err(PushCertError::ArmorDecodeError(format!(
                    "unexpected data after PEM blocks: {snippet:?}"
                ))));
            }
        }
        let block = self.next_block();
        self.failed = block.is_err();
        Some(block)
    }
}

/// Encodes a PEM block, headers included, with LF line endings.
pub fn encode(block: &pem::Pem) -> String {
    pem::encode_config(
        block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    encode(&pem::Pem::new(label, der))
}
