//! Primary store key layout.
//!
//! Record blobs live under their raw content hash. Freshness blobs live under
//! `_url:` followed by the percent-encoded source URL. Percent-encoding keeps
//! every freshness key printable ASCII after the prefix.

use crate::types::ContentHash;

/// Reserved prefix for freshness keys
pub(crate) const SOURCE_PREFIX: &[u8] = b"_url:";

/// Exclusive upper bound of the freshness key range (`_url;` sorts right after `_url:`)
pub(crate) const SOURCE_PREFIX_END: &[u8] = b"_url;";

pub(crate) fn source_key(url: &str) -> Vec<u8> {
    let encoded = urlencoding::encode(url);
    let mut key = Vec::with_capacity(SOURCE_PREFIX.len() + encoded.len());
    key.extend_from_slice(SOURCE_PREFIX);
    key.extend_from_slice(encoded.as_bytes());
    key
}

/// Recover the URL from a freshness key, `None` if the key is not one
pub(crate) fn url_from_source_key(key: &[u8]) -> Option<String> {
    let encoded = key.strip_prefix(SOURCE_PREFIX)?;
    let encoded = std::str::from_utf8(encoded).ok()?;
    urlencoding::decode(encoded).ok().map(|url| url.into_owned())
}

pub(crate) fn record_key(hash: &ContentHash) -> &[u8] {
    hash.as_bytes()
}

/// Printable form of any key for logs and error messages
pub(crate) fn display_key(key: &[u8]) -> String {
    match url_from_source_key(key) {
        Some(url) => format!("source {}", url),
        None => format!("record {}", hex::encode(key)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_round_trips_url() {
        let url = "http://example.com/some dir/app.opk?x=1&y=2";
        let key = source_key(url);

        assert!(key.starts_with(SOURCE_PREFIX));
        assert!(!key[SOURCE_PREFIX.len()..].contains(&b'/'));
        assert_eq!(url_from_source_key(&key).unwrap(), url);
    }

    #[test]
    fn source_keys_fall_inside_the_prefix_range() {
        let key = source_key("~~~~");
        assert!(key.as_slice() >= SOURCE_PREFIX);
        assert!(key.as_slice() < SOURCE_PREFIX_END);
    }

    #[test]
    fn record_keys_are_not_source_keys() {
        let hash = ContentHash::new(vec![0xab; 32]);
        assert!(url_from_source_key(record_key(&hash)).is_none());
        assert!(display_key(record_key(&hash)).starts_with("record abab"));
    }
}
