use std::borrow::Cow;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

static INVALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]+").unwrap());

/// Longest name accepted by Kubernetes for most object kinds (DNS-1123 label).
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

/// Generate a short random hexadecimal id, 8 characters long.
pub fn short_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Append a fresh short id to `prefix`, producing a name that is unique
/// enough for one-shot jobs and config maps.
pub fn unique_name(prefix: &str) -> String {
    let suffix = short_id();
    let prefix = transform_string_as_resource_name(prefix);
    // keep room for `-` and the suffix
    let max_prefix = MAX_RESOURCE_NAME_LEN - suffix.len() - 1;
    let prefix = if prefix.len() > max_prefix {
        prefix[..max_prefix].trim_end_matches('-')
    } else {
        &prefix[..]
    };
    format!("{}-{}", prefix, suffix)
}

/// Transform a random string into a valid resource name (lowercase
/// alphanumerics and dashes, not starting or ending with a dash).
///
/// Runs of invalid characters are replaced by a single `-`.
pub fn transform_string_as_resource_name(s: &str) -> Cow<str> {
    let is_valid = !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !INVALID_NAME_CHARS.is_match(s);
    if is_valid {
        return Cow::Borrowed(s);
    }
    let lowered = s.to_ascii_lowercase();
    let replaced = INVALID_NAME_CHARS.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        Cow::Owned("job".into())
    } else {
        Cow::Owned(trimmed.to_owned())
    }
}
