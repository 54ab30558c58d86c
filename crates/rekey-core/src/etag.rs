//! Content fingerprint (ETag) helpers.
//!
//! Stores report ETags quoted (`"<hex>"`); multipart uploads report
//! `"<hex>-<partCount>"`. All comparisons in the rename protocol happen on
//! normalized, unquoted values.

use digest::Digest;

/// Strip one leading and one trailing double quote.
///
/// # Examples
///
/// ```
/// use rekey_core::etag::normalize_etag;
///
/// assert_eq!(normalize_etag("\"abc\""), "abc");
/// assert_eq!(normalize_etag("abc"), "abc");
/// ```
#[must_use]
pub fn normalize_etag(etag: &str) -> &str {
    let etag = etag.strip_prefix('"').unwrap_or(etag);
    etag.strip_suffix('"').unwrap_or(etag)
}

/// Whether the fingerprint has the multipart `<digest>-<n>` form.
#[must_use]
pub fn is_multipart_etag(etag: &str) -> bool {
    multipart_part_count(etag).is_some()
}

/// Return the part count encoded in a multipart fingerprint.
///
/// # Examples
///
/// ```
/// use rekey_core::etag::multipart_part_count;
///
/// assert_eq!(multipart_part_count("\"9b2cf535f27731c974343645a3985328-3\""), Some(3));
/// assert_eq!(multipart_part_count("9b2cf535f27731c974343645a3985328"), None);
/// ```
#[must_use]
pub fn multipart_part_count(etag: &str) -> Option<u32> {
    let (digest, count) = normalize_etag(etag).rsplit_once('-')?;
    if digest.is_empty() {
        return None;
    }
    count.parse().ok()
}

/// Compute the hex-encoded MD5 digest of `data`.
#[must_use]
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(md5::Md5::digest(data))
}

/// Compute the quoted MD5 ETag of `data`.
///
/// # Examples
///
/// ```
/// use rekey_core::etag::compute_etag;
///
/// assert_eq!(compute_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
/// ```
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    format!("\"{}\"", compute_md5(data))
}

/// Compute a composite multipart ETag: the MD5 of the concatenated binary
/// part digests, suffixed with the part count.
#[must_use]
pub fn compute_multipart_etag(part_md5_hexes: &[impl AsRef<str>]) -> String {
    let mut combined = Vec::with_capacity(part_md5_hexes.len() * 16);
    for hex_str in part_md5_hexes {
        if let Ok(bytes) = hex::decode(normalize_etag(hex_str.as_ref())) {
            combined.extend_from_slice(&bytes);
        }
    }
    let final_md5 = hex::encode(md5::Md5::digest(&combined));
    format!("\"{final_md5}-{}\"", part_md5_hexes.len())
}
