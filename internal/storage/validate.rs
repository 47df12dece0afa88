use percent_encoding::percent_decode_str;
use std::net::Ipv4Addr;

pub const MAX_OBJECT_KEY_BYTES: usize = 1024;

/// S3-style bucket naming rules. Returns the first rule that failed.
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    if name.len() < 3 || name.len() > 63 {
        return Err("bucket name must be between 3 and 63 characters".into());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err("bucket name may only contain lowercase letters, digits, dots and dashes".into());
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err("bucket name must start and end with a letter or digit".into());
    }
    if name.contains("..") {
        return Err("bucket name must not contain consecutive dots".into());
    }
    if name.parse::<Ipv4Addr>().is_ok() || looks_like_ipv4(name) {
        return Err("bucket name must not be formatted as an IP address".into());
    }
    if name.starts_with("xn--") {
        return Err("bucket name must not start with the reserved prefix xn--".into());
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err("bucket name must not end with a reserved suffix".into());
    }
    Ok(())
}

// Four dot-separated groups of 1-3 digits, regardless of numeric range.
fn looks_like_ipv4(name: &str) -> bool {
    let groups: Vec<&str> = name.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|group| !group.is_empty() && group.len() <= 3 && group.bytes().all(|b| b.is_ascii_digit()))
}

/// Object key rules. Keys may contain `/` separators but never empty
/// segments or path escapes.
pub fn validate_object_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("object key must not be empty".into());
    }
    if key.len() > MAX_OBJECT_KEY_BYTES {
        return Err("object key must not exceed 1024 bytes".into());
    }
    for ch in key.chars() {
        if ch.is_control() {
            return Err("object key must not contain control characters".into());
        }
        if ch == '\\' {
            return Err("object key must not contain backslashes".into());
        }
        if !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-' | '/') {
            return Err(format!("object key contains forbidden character {ch:?}"));
        }
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err("object key must not start or end with a slash".into());
    }
    if key.contains("//") {
        return Err("object key must not contain empty path segments".into());
    }
    Ok(())
}

/// Percent-decode a raw key exactly once before validation.
pub fn normalize_object_key(raw: &str) -> Result<String, String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| "object key is not valid percent-encoded UTF-8".to_string())
}
