//! Decoding of `switchyard://open/` URLs.
//!
//! Other applications hand URLs to the dispatcher through its own scheme by
//! base64-encoding the real target after the `open/` prefix.

use base64::prelude::{BASE64_STANDARD, BASE64_URL_SAFE, BASE64_URL_SAFE_NO_PAD};
use base64::{DecodeError, Engine as _};
use tracing::{debug, warn};

const SCHEME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::scheme");

/// Prefix of URLs wrapping another URL.
pub const OPEN_PREFIX: &str = "switchyard://open/";

/// Returns the wrapped URL for `switchyard://open/<payload>`, or `url` itself.
///
/// Undecodable payloads are logged and the original URL is kept.
#[must_use]
pub fn resolve(url: &str) -> String {
    let Some(payload) = url.strip_prefix(OPEN_PREFIX) else {
        return url.to_owned();
    };
    match decode(payload) {
        Ok(decoded) => {
            debug!(
                target: SCHEME_TARGET,
                original = url,
                decoded = %decoded,
                "decoded wrapped url"
            );
            decoded
        }
        Err(error) => {
            warn!(
                target: SCHEME_TARGET,
                url,
                %error,
                "failed to decode wrapped url"
            );
            url.to_owned()
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PayloadError {
    #[error("payload is not base64: {0}")]
    Base64(#[from] DecodeError),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn decode(payload: &str) -> Result<String, PayloadError> {
    let trimmed = payload.trim_end_matches('/');
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| BASE64_URL_SAFE.decode(trimmed))
        .or_else(|_| BASE64_STANDARD.decode(trimmed))?;
    Ok(String::from_utf8(bytes)?)
}
