//! Key encoding.
//!
//! The backend publishes its VAPID key as unpadded base64url; the platform
//! wants raw bytes. Subscription keys travel back to the backend as padded
//! standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::PushError;

/// Decode a base64url string, padded or not, into raw bytes.
pub fn decode(input: &str) -> Result<Vec<u8>, PushError> {
    let mut normalized: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let padding = (4 - normalized.len() % 4) % 4;
    normalized.extend(std::iter::repeat('=').take(padding));

    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| PushError::MalformedKey(e.to_string()))
}

/// Encode raw bytes as padded standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
