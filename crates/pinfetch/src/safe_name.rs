//! Filesystem-safe names for cached URLs.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Longest name returned without abbreviation.
pub const MAX_FILE_LENGTH: usize = 92;
/// Characters kept verbatim at each end of an abbreviated name.
const ABBREVIATED: usize = 40;

/// Encode a URL into a filesystem-safe, length-bounded name.
///
/// Every character outside `[a-zA-Z0-9-+_.]` becomes `-` and runs of `-` are
/// collapsed. Names longer than [`MAX_FILE_LENGTH`] keep their first and last
/// 40 characters, and the middle is replaced by `--` followed by a base64
/// murmur3 hash of it:
///
/// ```
/// assert_eq!(
///     pinfetch::safe_name::encode("http://shortName.com/a+b-0-9~Z"),
///     "http-shortName.com-a+b-0-9-Z"
/// );
/// ```
pub fn encode(url: &str) -> String {
    let url = preserve_query_filename(url);

    let mut safe = String::with_capacity(url.len());
    for c in url.chars() {
        let c = if is_safe(c) { c } else { '-' };
        if c == '-' && safe.ends_with('-') {
            continue;
        }
        safe.push(c);
    }

    if safe.len() <= MAX_FILE_LENGTH {
        return safe;
    }

    // Only ASCII survives the loop above, so byte offsets are char offsets.
    let second_point = safe.len() - ABBREVIATED;
    let first = &safe[..ABBREVIATED];
    let middle = &safe[ABBREVIATED..second_point];
    let end = &safe[second_point..];
    format!("{first}--{}{end}", hash_middle(middle))
}

/// Encode a URL, forcing the name to end with `required_suffix`.
///
/// Characters of the suffix outside `[a-zA-Z0-9-+_.]` become `-`, so the
/// result is always a single path component.
pub fn encode_with_suffix(url: &str, required_suffix: Option<&str>) -> String {
    let mut safe = encode(url);
    if let Some(suffix) = required_suffix {
        let suffix: String = suffix
            .chars()
            .map(|c| if is_safe(c) { c } else { '-' })
            .collect();
        if !safe.ends_with(&suffix) {
            safe.push_str(&suffix);
        }
    }
    safe
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_' | '.')
}

fn hash_middle(middle: &str) -> String {
    // Reading from memory cannot fail.
    let hash = murmur3::murmur3_32(&mut Cursor::new(middle.as_bytes()), 0).unwrap_or_default();
    STANDARD
        .encode(hash.to_le_bytes())
        .replace(['/', '='], "-")
}

/// Keep the filename visible when it is followed by an `?at=<ref>` query.
///
/// `.../checkstyle/rules.xml?at=abc` becomes `.../checkstyle/rules.xml?at=abc-rules.xml`.
fn preserve_query_filename(url: &str) -> std::borrow::Cow<'_, str> {
    match url.find("?at") {
        Some(idx) => {
            let without_query = &url[..idx];
            let filename = without_query
                .rsplit('/')
                .next()
                .unwrap_or(without_query);
            format!("{url}-{filename}").into()
        }
        None => url.into(),
    }
}
