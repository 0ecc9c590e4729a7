//! URL decoding utilities

/// Decodes a percent-encoded string
///
/// # Arguments
/// * `input` - The URL-encoded string to decode
///
/// # Returns
/// * String containing the decoded input
/// * Returns the original string if decoding fails
///
/// # Examples
/// ```
/// use singbox_subparser::utils::url::url_decode;
///
/// let decoded = url_decode("Hello%20World%21");
/// assert_eq!(decoded, "Hello World!");
/// ```
pub fn url_decode(input: &str) -> String {
    urlencoding::decode(input)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

/// Decodes a display name taken from a link fragment.
///
/// Display names are cosmetic, so invalid UTF-8 after decoding degrades to a
/// lossy conversion instead of failing.
pub fn decode_fragment(fragment: &str) -> String {
    let bytes = urlencoding::decode_binary(fragment.as_bytes());
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// Splits a link into `(before_fragment, fragment)`.
pub fn split_fragment(link: &str) -> (&str, Option<&str>) {
    match link.find('#') {
        Some(pos) => (&link[..pos], Some(&link[pos + 1..])),
        None => (link, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fragment_unicode() {
        assert_eq!(
            decode_fragment("%F0%9F%87%A9%F0%9F%87%AA%20Germany"),
            "🇩🇪 Germany"
        );
        assert_eq!(decode_fragment("🇩🇪 Germany [black lists]"), "🇩🇪 Germany [black lists]");
    }

    #[test]
    fn test_decode_fragment_invalid_utf8() {
        let decoded = decode_fragment("bad%FFname");
        assert!(decoded.starts_with("bad"));
        assert!(decoded.ends_with("name"));
    }

    #[test]
    fn test_url_decode_fallback() {
        assert_eq!(url_decode("%2Fnews"), "/news");
        assert_eq!(url_decode("%FF"), "%FF");
    }

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("a://b#c#d"), ("a://b", Some("c#d")));
        assert_eq!(split_fragment("a://b"), ("a://b", None));
    }
}
