use base64::{engine::general_purpose, Engine as _};

/// Encodes a string to Base64 format.
pub fn base64_encode(input: &str) -> String {
    general_purpose::STANDARD.encode(input)
}

/// Decodes Base64 bytes, accepting the standard and URL-safe alphabets with or
/// without padding. Embedded whitespace (line-wrapped payloads) is ignored.
///
/// # Returns
/// The decoded bytes, or `None` if no alphabet accepts the input.
pub fn base64_decode_bytes(input: &str) -> Option<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let engines = [
        &general_purpose::STANDARD,
        &general_purpose::STANDARD_NO_PAD,
        &general_purpose::URL_SAFE,
        &general_purpose::URL_SAFE_NO_PAD,
    ];
    engines.iter().find_map(|engine| engine.decode(&compact).ok())
}

/// Decodes a Base64 string to its original form.
///
/// # Returns
/// The decoded string (lossy UTF-8), or an empty string if the input is invalid.
pub fn base64_decode(input: &str) -> String {
    base64_decode_bytes(input)
        .map(|decoded| String::from_utf8_lossy(&decoded).to_string())
        .unwrap_or_default()
}

const BOM: char = '\u{feff}';

/// Decodes a subscription body.
///
/// The body is treated as Base64 only when it decodes to valid UTF-8 text;
/// otherwise it is taken as already-plain text. A leading byte order mark is
/// dropped in both cases.
pub fn decode_subscription_content(content: &[u8]) -> String {
    let text = String::from_utf8_lossy(content);
    let text = text.trim_start_matches(BOM);

    if let Some(decoded) = base64_decode_bytes(text.trim()) {
        if let Ok(plain) = String::from_utf8(decoded) {
            return plain.trim_start_matches(BOM).to_string();
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_standard_and_urlsafe() {
        let plain = "vless://id@host:443?a=b#Name";
        let std = base64_encode(plain);
        let url = general_purpose::URL_SAFE_NO_PAD.encode(plain);
        assert_eq!(base64_decode(&std), plain);
        assert_eq!(base64_decode(&url), plain);
    }

    #[test]
    fn test_decode_wrapped_lines() {
        let encoded = general_purpose::STANDARD.encode("line one\nline two\n");
        let (a, b) = encoded.split_at(10);
        let wrapped = format!("{}\r\n{}", a, b);
        assert_eq!(
            decode_subscription_content(wrapped.as_bytes()),
            "line one\nline two\n"
        );
    }

    #[test]
    fn test_plain_text_passthrough() {
        let plain = "vless://id@host:443?encryption=none#A\ntrojan://pw@h:443#B";
        assert_eq!(decode_subscription_content(plain.as_bytes()), plain);
    }

    #[test]
    fn test_leading_bom_is_dropped() {
        let plain = "trojan://pw@h.example:443#A\nhy2://pw@h.example#B";
        let body = format!("\u{feff}{}", plain);
        assert_eq!(decode_subscription_content(body.as_bytes()), plain);

        let encoded = format!("\u{feff}{}", base64_encode(plain));
        assert_eq!(decode_subscription_content(encoded.as_bytes()), plain);
    }

    #[test]
    fn test_invalid_input_is_empty() {
        assert_eq!(base64_decode("***"), "");
        assert_eq!(base64_decode(""), "");
    }
}
