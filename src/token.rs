//! Resumption-token codec.
//!
//! A token is the UTF-8 JSON of a [`ResumptionToken`], encoded with URL-safe
//! unpadded base64 so it can ride in a `resumeKey` query parameter untouched.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::errors::RiverError;
use crate::types::ResumptionToken;

/// Encode a token to its transport form.
pub fn encode_resumption_token(token: &ResumptionToken) -> String {
    // A struct of four strings cannot fail to serialize.
    let json = serde_json::to_string(token).expect("token serialization");
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decode a transport-form token.
///
/// Fails with `INVALID_RESUMPTION_TOKEN` on malformed base64, malformed
/// JSON, or missing fields.
pub fn decode_resumption_token(encoded: &str) -> Result<ResumptionToken, RiverError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        RiverError::invalid_resumption_token(format!("Invalid resumption token: {e}"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        RiverError::invalid_resumption_token(format!("Invalid resumption token: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
