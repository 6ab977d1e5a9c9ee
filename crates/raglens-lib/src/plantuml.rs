//! Diagram transport encoding
//!
//! PlantUML servers accept diagram source in the URL, compressed with raw
//! deflate and spelled in a 6-bit alphabet of their own (digits first,
//! then uppercase, lowercase, `-`, `_`). The bit packing mirrors base64
//! with a different character table and must match the server's decoder
//! exactly.

use crate::error::{Result, TraceError};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::warn;

/// Public rendering endpoint used when no override is configured.
pub const DEFAULT_SERVER_URL: &str = "https://www.plantuml.com/plantuml/svg";
/// Environment variable overriding the rendering endpoint.
pub const SERVER_URL_ENV: &str = "RAGLENS_PLANTUML_URL";
/// Assembled URLs longer than this fall back to clipboard delivery.
pub const MAX_URL_LEN: usize = 7000;

const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

/// How the host should deliver a diagram to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramTarget {
    /// Open this URL; the encoded diagram rides in the query string.
    Url(String),
    /// The URL would exceed the transport limit. Hand the raw source to
    /// the user instead of truncating it.
    ClipboardFallback { source: String },
}

/// Compress and encode diagram source for the `?text=` URL parameter.
pub fn encode_diagram(source: &str) -> Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(source.as_bytes())?;
    let deflated = encoder.finish()?;
    Ok(encode64(&deflated))
}

/// Invert [`encode_diagram`]: 6-bit alphabet back to bytes, then inflate.
pub fn decode_diagram(encoded: &str) -> Result<String> {
    let mut sextets = Vec::with_capacity(encoded.trim().len());
    for c in encoded.trim().chars() {
        match alphabet_value(c) {
            Some(value) => sextets.push(value),
            None => {
                return Err(TraceError::decode(format!(
                    "invalid transport character {c:?}"
                )))
            }
        }
    }

    let mut bytes = Vec::with_capacity(sextets.len() / 4 * 3 + 3);
    for group in sextets.chunks(4) {
        let s0 = group[0];
        let s1 = group.get(1).copied().unwrap_or(0);
        let s2 = group.get(2).copied().unwrap_or(0);
        let s3 = group.get(3).copied().unwrap_or(0);
        bytes.push((s0 << 2) | (s1 >> 4));
        bytes.push(((s1 & 0xF) << 4) | (s2 >> 2));
        bytes.push(((s2 & 0x3) << 6) | s3);
    }

    // Zero padding past the end of the deflate stream is ignored by the
    // decoder, so whole-group decoding needs no padding bookkeeping.
    let mut source = String::new();
    DeflateDecoder::new(bytes.as_slice())
        .read_to_string(&mut source)
        .map_err(|e| TraceError::decode_with_source("deflate stream is corrupt", e))?;
    Ok(source)
}

/// Rendering endpoint: environment override or the public default.
pub fn server_url() -> String {
    std::env::var(SERVER_URL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

/// Assemble the renderer URL for a diagram, or signal clipboard fallback
/// when the result would exceed [`MAX_URL_LEN`].
pub fn diagram_link(base_url: &str, source: &str) -> Result<DiagramTarget> {
    let encoded = encode_diagram(source)?;
    let separator = if base_url.contains('?') { '&' } else { '?' };
    let url = format!("{base_url}{separator}text={encoded}");
    if url.len() > MAX_URL_LEN {
        warn!(
            url_len = url.len(),
            limit = MAX_URL_LEN,
            "diagram URL over transport limit, falling back to clipboard"
        );
        return Ok(DiagramTarget::ClipboardFallback {
            source: source.to_string(),
        });
    }
    Ok(DiagramTarget::Url(url))
}

/// 3 input bytes become 4 alphabet characters; the final group is
/// zero-padded on the input side.
fn encode64(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied().unwrap_or(0);
        let b2 = chunk.get(2).copied().unwrap_or(0);
        let sextets = [
            b0 >> 2,
            ((b0 & 0x3) << 4) | (b1 >> 4),
            ((b1 & 0xF) << 2) | (b2 >> 6),
            b2 & 0x3F,
        ];
        for sextet in sextets {
            out.push(ALPHABET[sextet as usize] as char);
        }
    }
    out
}

fn alphabet_value(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'A'..='Z' => Some(c as u8 - b'A' + 10),
        'a'..='z' => Some(c as u8 - b'a' + 36),
        '-' => Some(62),
        '_' => Some(63),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bytes_encode_to_digit_zero_characters() {
        assert_eq!(encode64(&[0, 0, 0]), "0000");
    }

    #[test]
    fn alphabet_orders_digits_upper_lower_dash_underscore() {
        // Sextets 0, 10, 36, 62, 63 span the alphabet's sections.
        assert_eq!(alphabet_value('0'), Some(0));
        assert_eq!(alphabet_value('A'), Some(10));
        assert_eq!(alphabet_value('a'), Some(36));
        assert_eq!(alphabet_value('-'), Some(62));
        assert_eq!(alphabet_value('_'), Some(63));
        assert_eq!(alphabet_value('='), None);

        // 0b111111_111111_111111_111111 packs to the last alphabet entry.
        assert_eq!(encode64(&[0xFF, 0xFF, 0xFF]), "____");
    }

    #[test]
    fn partial_groups_are_zero_padded() {
        // 'M' = 0x4D = 0b010011_01xxxx: sextets 19 and 16.
        assert_eq!(encode64(&[0x4D]), "JG00");
    }

    #[test]
    fn encode_decode_round_trips_diagram_text() {
        let source = "@startuml\nstart\n:1. fetch [Retrieval] OK;\nstop\n@enduml\n";
        let encoded = encode_diagram(source).unwrap();
        assert!(encoded.chars().all(|c| alphabet_value(c).is_some()));
        assert_eq!(decode_diagram(&encoded).unwrap(), source);
    }

    #[test]
    fn round_trip_survives_non_ascii_content() {
        let source = "@startuml\n:résumé → done;\n@enduml\n";
        let encoded = encode_diagram(source).unwrap();
        assert_eq!(decode_diagram(&encoded).unwrap(), source);
    }

    #[test]
    fn invalid_transport_characters_are_a_decode_error() {
        let err = decode_diagram("abc!").unwrap_err();
        assert!(matches!(err, TraceError::Decode { .. }));
    }

    #[test]
    fn link_uses_question_mark_or_ampersand() {
        let url = match diagram_link("https://uml.example/svg", "@startuml\n@enduml").unwrap() {
            DiagramTarget::Url(url) => url,
            other => panic!("expected URL, got {other:?}"),
        };
        assert!(url.starts_with("https://uml.example/svg?text="));

        let url = match diagram_link("https://uml.example/svg?theme=dark", "@startuml\n@enduml")
            .unwrap()
        {
            DiagramTarget::Url(url) => url,
            other => panic!("expected URL, got {other:?}"),
        };
        assert!(url.starts_with("https://uml.example/svg?theme=dark&text="));
    }

    #[test]
    fn oversized_urls_fall_back_to_clipboard_with_raw_source() {
        let long_base = format!("https://uml.example/{}", "p".repeat(MAX_URL_LEN));
        let source = "@startuml\n@enduml";
        match diagram_link(&long_base, source).unwrap() {
            DiagramTarget::ClipboardFallback { source: raw } => assert_eq!(raw, source),
            other => panic!("expected clipboard fallback, got {other:?}"),
        }
    }
}
