//! Opaque page tokens.
//!
//! A token is a JSON document wrapped in unpadded URL-safe base64. Clients
//! must treat the string as opaque; the embedded filter state always wins
//! over same-request parameters so a paged scan cannot drift mid-stream.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use curio_domain::error::Result;

pub fn encode<T: Serialize>(token: &T) -> Result<String> {
    let bytes = serde_json::to_vec(token)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode a token. Any failure (bad base64, bad JSON, wrong shape) yields
/// `None`; the caller decides whether that means "first page" (providers)
/// or `InvalidRequest` (skills).
pub fn decode<T: DeserializeOwned>(token: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(token.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tok {
        names: Vec<String>,
        page_size: usize,
        cursor: Option<String>,
    }

    #[test]
    fn round_trip() {
        let tok = Tok {
            names: vec!["a".into()],
            page_size: 25,
            cursor: Some("x|y".into()),
        };
        let s = encode(&tok).unwrap();
        assert!(!s.contains('='), "unpadded");
        assert_eq!(decode::<Tok>(&s), Some(tok));
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert_eq!(decode::<Tok>("!!!not-base64!!!"), None);
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert_eq!(decode::<Tok>(&not_json), None);
    }
}
