// ABOUTME: Best-effort text decoding and cleanup for data from non-compliant drivers
// ABOUTME: Decodes bytes through an ordered list of fallback encodings, never failing

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use thiserror::Error;

/// Decode bytes to text, trying strict UTF-8 first and then each fallback in order.
///
/// Fallbacks are tried without replacement characters, so the first encoding that maps
/// every byte wins. When none does, non-ASCII bytes are dropped.
///
/// # Examples
///
/// ```
/// # use tabular_etl::encoding::decode_best_effort;
/// use encoding_rs::WINDOWS_1252;
///
/// assert_eq!(decode_best_effort(b"caf\xc3\xa9", &[WINDOWS_1252]), "café");
/// assert_eq!(decode_best_effort(b"caf\xe9", &[WINDOWS_1252]), "café");
/// assert_eq!(decode_best_effort(b"caf\xe9", &[]), "caf");
/// ```
pub fn decode_best_effort(bytes: &[u8], fallbacks: &[&'static Encoding]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    for encoding in fallbacks {
        if *encoding == UTF_8 {
            continue;
        }
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            tracing::trace!("Decoded {} bytes as {}", bytes.len(), encoding.name());
            return text.into_owned();
        }
    }

    tracing::debug!(
        "No encoding decoded {} bytes cleanly, keeping ASCII only",
        bytes.len()
    );
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// Resolve encoding labels such as `"latin1"` or `"windows-1252"`.
///
/// Unknown labels are skipped with a warning.
pub fn encodings_from_labels<S: AsRef<str>>(labels: &[S]) -> Vec<&'static Encoding> {
    labels
        .iter()
        .filter_map(|label| {
            let found = Encoding::for_label(label.as_ref().trim().as_bytes());
            if found.is_none() {
                tracing::warn!("Unknown text encoding '{}', ignoring", label.as_ref());
            }
            found
        })
        .collect()
}

/// Fallbacks used when nothing is configured
pub fn default_fallbacks() -> Vec<&'static Encoding> {
    vec![WINDOWS_1252]
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Text already passed through a lossy decode; the original cannot be recovered
    #[error("text contains replacement characters")]
    Lossy,
}

/// Repair UTF-8 text that was mis-decoded as latin-1 (`"cafÃ©"` becomes `"café"`).
///
/// Text that is not representable in latin-1, or whose latin-1 bytes are not valid
/// UTF-8, is returned unchanged.
pub fn clean_text(text: &str) -> Result<String, EncodingError> {
    if text.contains('\u{FFFD}') {
        return Err(EncodingError::Lossy);
    }
    if text.is_ascii() {
        return Ok(text.to_string());
    }

    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        if code > 0xFF {
            return Ok(text.to_string());
        }
        bytes.push(code as u8);
    }

    match String::from_utf8(bytes) {
        Ok(repaired) => Ok(repaired),
        Err(_) => Ok(text.to_string()),
    }
}

/// Replace every non-ASCII character with `replacement` (which may be empty)
pub fn replace_nonascii(text: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(replacement);
        }
    }
    out
}
