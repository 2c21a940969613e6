//! Route handlers.

pub mod content;
pub mod direct_link;
pub mod health;
pub mod thumbnail;

use axum::http::HeaderValue;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

/// Query of signed endpoints.
#[derive(Debug, Deserialize)]
pub struct SignQuery {
    /// `{expires}:{signature}` token.
    pub sign: Option<String>,
}

/// `Content-Disposition` with an RFC 5987 encoded file name.
pub(crate) fn content_disposition(kind: &str, name: &str) -> HeaderValue {
    let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC);
    HeaderValue::from_str(&format!("{kind}; filename*=UTF-8''{encoded}"))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// MIME type recorded on the object, or guessed from the name.
pub(crate) fn content_type(recorded: Option<&str>, name: &str) -> HeaderValue {
    let guessed;
    let mime = match recorded {
        Some(mime) if !mime.is_empty() => mime,
        _ => {
            guessed = mime_guess::from_path(name).first_or_octet_stream();
            guessed.essence_str()
        }
    };
    HeaderValue::from_str(mime).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_helpers() {
        assert_eq!(
            content_disposition("inline", "a b.txt"),
            "inline; filename*=UTF-8''a%20b%2Etxt"
        );
        assert_eq!(content_type(None, "photo.JPG"), "image/jpeg");
        assert_eq!(content_type(Some("text/csv"), "x.bin"), "text/csv");
        assert_eq!(content_type(None, "noext"), "application/octet-stream");
    }
}
