//! Payload decryption.
//!
//! Payloads are `base64(IV[16] || AES-256-CBC(ciphertext))` where the AES key
//! is the SHA-256 digest of a base64-encoded secret. The decrypted bytes may
//! be gzip or DEFLATE compressed and may wrap the playlist in a JSON string.

use crate::error::{RelayError, Result};
use aes::Aes256;
use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::{Decompress, FlushDecompress, Status, read::GzDecoder};
use sha2::{Digest, Sha256};
use std::io::Read;
use tracing::{debug, warn};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Secret used when the caller does not supply one.
pub const DEFAULT_KEY: &str = "ZG1fdGhhbmdfc3VjX3ZhdF9nZXRfbGlua19hbl9kYnQ=";

/// AES block / IV length in bytes.
pub const IV_LENGTH: usize = 16;

/// Decompression stage that produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gzip,
    Deflate,
    ZlibBody,
    PlainText,
}

/// Decrypt a base64 payload into normalized (CRLF) text.
///
/// `key` is a base64 secret; [`DEFAULT_KEY`] is used when `None`. JSON
/// objects and arrays are returned in their canonical form without line
/// ending normalization.
///
/// # Errors
///
/// Returns [`RelayError::Decryption`] for malformed base64, payloads shorter
/// than 17 bytes, and padding or key mismatches.
pub fn decrypt(payload: &str, key: Option<&str>) -> Result<String> {
    let secret = decode_base64(key.unwrap_or(DEFAULT_KEY))
        .map_err(|e| RelayError::decryption(format!("invalid key encoding: {e}")))?;
    let aes_key = Sha256::digest(&secret);

    let encrypted = decode_base64(payload)
        .map_err(|e| RelayError::decryption(format!("invalid payload encoding: {e}")))?;

    if encrypted.len() <= IV_LENGTH {
        return Err(RelayError::decryption("payload too short"));
    }

    let (iv, ciphertext) = encrypted.split_at(IV_LENGTH);
    let decryptor = Aes256CbcDec::new_from_slices(&aes_key, iv)
        .map_err(|e| RelayError::decryption(format!("failed to initialize AES decryptor: {e}")))?;

    let mut buffer = ciphertext.to_vec();
    let plain_len = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| RelayError::decryption(format!("bad padding or key: {e}")))?
        .len();
    buffer.truncate(plain_len);

    let (stage, text) = decompress_to_string(&buffer);
    debug!("Decrypted {} bytes via {:?} stage", plain_len, stage);

    match unwrap_json(text) {
        Unwrapped::Canonical(json) => Ok(json),
        Unwrapped::Text(text) => Ok(normalize_crlf(&text)),
    }
}

fn decode_base64(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Try each decompression stage in fixed order; the first that succeeds wins.
///
/// Order: gzip (when the `1F 8B` magic is present), raw DEFLATE over the whole
/// buffer, DEFLATE after skipping a 2-byte zlib header (`78 01|9C|DA`), and
/// finally the bytes as lossy UTF-8.
pub fn decompress_to_string(bytes: &[u8]) -> (Stage, String) {
    if looks_like_gzip(bytes)
        && let Some(text) = gunzip(bytes)
    {
        return (Stage::Gzip, text);
    }

    if let Some(text) = inflate_whole(bytes, 0) {
        return (Stage::Deflate, text);
    }

    if looks_like_zlib(bytes)
        && let Some(text) = inflate_whole(&bytes[2..], ADLER32_LENGTH)
    {
        return (Stage::ZlibBody, text);
    }

    (Stage::PlainText, String::from_utf8_lossy(bytes).into_owned())
}

fn looks_like_gzip(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0x1F && data[1] == 0x8B
}

fn looks_like_zlib(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0x78 && matches!(data[1], 0x01 | 0x9C | 0xDA)
}

fn gunzip(data: &[u8]) -> Option<String> {
    let mut out = Vec::new();
    match GzDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Some(String::from_utf8_lossy(&out).into_owned()),
        Err(e) => {
            debug!("gzip stage failed: {}", e);
            None
        }
    }
}

/// Length of the checksum trailing a zlib stream.
const ADLER32_LENGTH: usize = 4;

/// Inflate a raw DEFLATE stream that must span the input, save for at most
/// `trailer` unread bytes.
///
/// Truncated streams, extra bytes and non-UTF-8 output all count as failure.
/// No checksum is verified here, so the UTF-8 check keeps plain text that
/// happens to parse as a DEFLATE block from being accepted.
fn inflate_whole(data: &[u8], trailer: usize) -> Option<String> {
    if data.is_empty() {
        return None;
    }

    let mut inflater = Decompress::new(false);
    let mut out: Vec<u8> = Vec::with_capacity(data.len().saturating_mul(4).max(256));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }

        let consumed = inflater.total_in() as usize;
        let produced = out.len();

        match inflater.decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => break,
            Ok(Status::Ok) | Ok(Status::BufError) => {
                let stalled =
                    inflater.total_in() as usize == consumed && out.len() == produced;
                if stalled && out.len() < out.capacity() {
                    return None;
                }
            }
            Err(e) => {
                debug!("deflate stage failed: {}", e);
                return None;
            }
        }
    }

    let unread = data.len() - inflater.total_in() as usize;
    if unread > trailer {
        return None;
    }

    String::from_utf8(out).ok()
}

enum Unwrapped {
    /// Non-string JSON document, returned as-is
    Canonical(String),
    Text(String),
}

fn unwrap_json(text: String) -> Unwrapped {
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::String(inner)) => Unwrapped::Text(inner),
        Ok(other) => Unwrapped::Canonical(other.to_string()),
        Err(_) if is_quoted(&text) => match unescape_quoted(&text) {
            Some(inner) => Unwrapped::Text(inner),
            None => {
                warn!("Payload looks like a quoted string but could not be unescaped");
                Unwrapped::Text(text)
            }
        },
        Err(_) => Unwrapped::Text(text),
    }
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('"') && text.ends_with('"')
}

/// Best-effort unescape for quoted text that is not strictly valid JSON.
fn unescape_quoted(text: &str) -> Option<String> {
    let body = &text[1..text.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            '/' => out.push('/'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Some(out)
}

/// Normalize every line ending (`\r\n`, `\r`, `\n`) to `\r\n`.
pub fn normalize_crlf(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n")
}
