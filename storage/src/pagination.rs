//! Opaque continuation tokens for paginated listings.
//!
//! The token is the URL-safe base64 encoding of the decimal row offset.
//! Malformed tokens are rejected with `InvalidInput` so SDK clients get a
//! deterministic error instead of a silently empty page.

use kecs_common::{Error, Result};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 100;

pub fn encode_token(offset: i64) -> String {
    base64_url::encode(&offset.to_string())
}

pub fn decode_token(token: &str) -> Result<i64> {
    let bytes = base64_url::decode(token)
        .map_err(|_| Error::invalid_input(format!("invalid pagination token: {token}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::invalid_input(format!("invalid pagination token: {token}")))?;
    let offset: i64 = text
        .parse()
        .map_err(|_| Error::invalid_input(format!("invalid pagination token: {token}")))?;
    if offset < 0 {
        return Err(Error::invalid_input(format!(
            "invalid pagination token: {token}"
        )));
    }
    Ok(offset)
}

/// Resolve the caller-supplied page parameters into a concrete
/// (limit, offset) window.
pub fn page_window(max_results: Option<i64>, token: Option<&str>) -> Result<(i64, i64)> {
    let limit = match max_results {
        Some(n) if n <= 0 => {
            return Err(Error::invalid_input("maxResults must be positive"));
        }
        Some(n) => n.min(MAX_PAGE_SIZE),
        None => DEFAULT_PAGE_SIZE,
    };
    let offset = match token {
        Some(t) => decode_token(t)?,
        None => 0,
    };
    Ok((limit, offset))
}

/// Token for the next page, or `None` when `full_count` is exhausted.
pub fn next_token(offset: i64, returned: usize, full_count: i64) -> Option<String> {
    let consumed = offset + returned as i64;
    if consumed < full_count {
        Some(encode_token(consumed))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let token = encode_token(42);
        assert_eq!(decode_token(&token).unwrap(), 42);
    }

    #[test]
    fn malformed_tokens_are_invalid_input() {
        for bad in ["!!!", "bm90LWEtbnVtYmVy", ""] {
            let err = decode_token(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "token {bad:?}");
        }
    }

    #[test]
    fn negative_offsets_are_rejected() {
        let token = base64_url::encode("-5");
        assert!(decode_token(&token).is_err());
    }

    #[test]
    fn next_token_stops_at_full_count() {
        assert_eq!(next_token(0, 3, 10), Some(encode_token(3)));
        assert_eq!(next_token(9, 1, 10), None);
        assert_eq!(next_token(0, 0, 0), None);
    }

    #[test]
    fn window_caps_limit() {
        let (limit, offset) = page_window(Some(500), None).unwrap();
        assert_eq!(limit, MAX_PAGE_SIZE);
        assert_eq!(offset, 0);
        assert!(page_window(Some(0), None).is_err());
        assert!(page_window(None, Some("???")).is_err());
    }
}
