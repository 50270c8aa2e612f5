//! Short identifier generation and URL validation for the resource service.
//! Ids are six base62 characters derived from a hash of the target URL plus
//! random noise, so repeated submissions of the same URL yield distinct ids.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

const BASE62_ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const SHORT_ID_LEN: usize = 6;

static URL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*\.[A-Za-z]{2,}(:\d+)?(/[A-Za-z0-9._~!$&'()*+,;=:@/%?#-]*)?$",
    )
    .unwrap()
});

pub fn base62_encode(mut num: u64) -> String {
    if num == 0 {
        return (BASE62_ALPHABET[0] as char).to_string();
    }
    let mut encoded: Vec<char> = Vec::new();
    while num > 0 {
        encoded.push(BASE62_ALPHABET[(num % 62) as usize] as char);
        num /= 62;
    }
    encoded.iter().rev().collect()
}

/// Derive a candidate short id for a URL.
///
/// Collisions are possible in six characters; the caller retries with a new
/// candidate until the id is free, which fresh random noise makes terminate.
pub fn generate_short_id(url: &str) -> String {
    let mut noise = [0u8; 8];
    let _ = getrandom::getrandom(&mut noise);
    let suffix: String = noise.iter().map(|b| BASE62_ALPHABET[(*b as usize) % 62] as char).collect();
    let digest = Sha256::digest(format!("{url}{suffix}").as_bytes());
    // First 40 bits of the digest, matching a 10-hex-digit prefix.
    let num = digest[..5].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    let mut id = base62_encode(num);
    id.truncate(SHORT_ID_LEN);
    id
}

/// Cheap structural check on submitted URLs, applied before any storage call.
pub fn valid_url(url: &str) -> bool {
    URL_SHAPE.is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base62_zero_and_known_values() {
        assert_eq!(base62_encode(0), "0");
        assert_eq!(base62_encode(61), "Z");
        assert_eq!(base62_encode(62), "10");
    }

    #[test]
    fn short_ids_are_six_alphabet_chars() {
        for _ in 0..32 {
            let id = generate_short_id("http://example.com/path");
            assert!(id.len() <= SHORT_ID_LEN && !id.is_empty());
            assert!(id.bytes().all(|b| BASE62_ALPHABET.contains(&b)), "bad char in {id}");
        }
    }

    #[test]
    fn url_validation_accepts_and_rejects() {
        assert!(valid_url("http://example.com"));
        assert!(valid_url("https://www.example.co.uk/some/path?q=1"));
        assert!(valid_url("example.com/path"));
        assert!(valid_url("http://localhost.dev:8080/x"));
        assert!(!valid_url("not a url"));
        assert!(!valid_url("http://"));
        assert!(!valid_url(""));
    }
}
