//! Content addressing for Depot.
//!
//! Every blob stored by the server is addressed by a CIDv1 string: a
//! multibase base32 (lower-case, unpadded) encoding of the binary CID
//! `<version> <codec> <multihash>`, where the multihash is SHA-256.
//!
//! The text form is what travels on the wire and what keys the storage
//! driver; the binary layout only exists inside this module.

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

/// CID version byte (CIDv1).
const CID_VERSION: u8 = 0x01;

/// Multicodec for raw binary payloads.
const RAW_CODEC: u8 = 0x55;

/// Multihash code for SHA-256.
const SHA2_256_CODE: u8 = 0x12;

/// SHA-256 digest length in bytes.
const DIGEST_LEN: u8 = 0x20;

/// Multibase prefix for lower-case base32.
const MULTIBASE_PREFIX: char = 'b';

/// Total binary CID length: 4 header bytes + 32 digest bytes.
const BINARY_CID_LEN: usize = 36;

/// Computes the CIDv1 text form of arbitrary bytes.
///
/// The result is deterministic; the same bytes always yield the same CID on
/// every node, which is what makes cross-node content deduplication and the
/// pointer tie-break sound.
pub fn content_cid(data: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(data).into();

    let mut cid = [0u8; BINARY_CID_LEN];
    cid[0] = CID_VERSION;
    cid[1] = RAW_CODEC;
    cid[2] = SHA2_256_CODE;
    cid[3] = DIGEST_LEN;
    cid[4..].copy_from_slice(&digest);

    let mut text = String::with_capacity(1 + BASE32_NOPAD.encode_len(BINARY_CID_LEN));
    text.push(MULTIBASE_PREFIX);
    text.push_str(&BASE32_NOPAD.encode(&cid).to_ascii_lowercase());
    text
}

/// Checks whether a string is a well-formed CIDv1 for a raw SHA-256 payload.
///
/// Accepts exactly the shape produced by [`content_cid`]: multibase prefix
/// `b`, base32 lower-case body, and the `0x01 0x55 0x12 0x20` header in the
/// decoded bytes.
pub fn is_valid_cid(value: &str) -> bool {
    let Some(body) = value.strip_prefix(MULTIBASE_PREFIX) else {
        return false;
    };
    if body.chars().any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit()) {
        return false;
    }
    let Ok(decoded) = BASE32_NOPAD.decode(body.to_ascii_uppercase().as_bytes()) else {
        return false;
    };
    decoded.len() == BINARY_CID_LEN
        && decoded[0] == CID_VERSION
        && decoded[1] == RAW_CODEC
        && decoded[2] == SHA2_256_CODE
        && decoded[3] == DIGEST_LEN
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn cid_is_deterministic() {
        assert_eq!(content_cid(b"some payload"), content_cid(b"some payload"));
        assert_ne!(content_cid(b"some payload"), content_cid(b"other payload"));
    }

    #[test]
    fn cid_has_multibase_prefix_and_fixed_length() {
        let cid = content_cid(b"hello");
        assert!(cid.starts_with('b'));
        // 36 bytes → ceil(36 * 8 / 5) = 58 base32 chars, plus the prefix.
        assert_eq!(cid.len(), 59);
    }

    #[test]
    fn generated_cids_validate() {
        for payload in [&b""[..], b"a", b"hello world", &[0u8; 1024]] {
            let cid = content_cid(payload);
            assert!(is_valid_cid(&cid), "generated CID must validate: {cid}");
        }
    }

    #[test]
    fn rejects_missing_prefix() {
        let cid = content_cid(b"hello");
        assert!(!is_valid_cid(&cid[1..]));
    }

    #[test]
    fn rejects_upper_case_body() {
        let cid = content_cid(b"hello");
        assert!(!is_valid_cid(&cid.to_ascii_uppercase()));
    }

    #[test]
    fn rejects_truncated_and_garbage() {
        let cid = content_cid(b"hello");
        assert!(!is_valid_cid(&cid[..cid.len() - 4]));
        assert!(!is_valid_cid(""));
        assert!(!is_valid_cid("b"));
        assert!(!is_valid_cid("not-a-cid"));
        assert!(!is_valid_cid("Qm0000000000000000000000000000000000000000000"));
    }

    #[test]
    fn rejects_wrong_header_bytes() {
        // Re-encode a valid CID body with a corrupted codec byte.
        let cid = content_cid(b"hello");
        let mut raw = BASE32_NOPAD.decode(cid[1..].to_ascii_uppercase().as_bytes()).unwrap();
        raw[1] = 0x70; // dag-pb instead of raw
        let forged = format!("b{}", BASE32_NOPAD.encode(&raw).to_ascii_lowercase());
        assert!(!is_valid_cid(&forged));
    }

    #[test]
    fn digest_matches_sha256() {
        // The digest section of the binary CID is a plain SHA-256.
        let cid = content_cid(b"hello");
        let raw = BASE32_NOPAD.decode(cid[1..].to_ascii_uppercase().as_bytes()).unwrap();
        assert_eq!(
            hex::encode(&raw[4..]),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
