use anyhow::anyhow;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

static DECL_ENCODING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._\-]+)["']"#)
        .expect("xml decl encoding regex")
});

/// A document decoded to text, remembering how to write it back.
#[derive(Clone, Debug)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub bom: bool,
}

/// Decodes a whole document: byte-order mark first, then the XML declaration's encoding label,
/// then UTF-8.
pub fn decode_document(bytes: &[u8]) -> anyhow::Result<DecodedText> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(anyhow!("document is not valid {}", encoding.name()));
        }
        return Ok(DecodedText {
            text: text.into_owned(),
            encoding,
            bom: true,
        });
    }

    let encoding = sniff_utf16(bytes)
        .or_else(|| declared_encoding(bytes))
        .unwrap_or(UTF_8);
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(anyhow!("document is not valid {}", encoding.name()));
    }
    Ok(DecodedText {
        text: text.into_owned(),
        encoding,
        bom: false,
    })
}

/// Encodes `text` with the encoding and BOM convention of `like`.
pub fn encode_document(text: &str, like: &DecodedText) -> anyhow::Result<Vec<u8>> {
    let enc = like.encoding;
    let mut out = Vec::with_capacity(text.len() + 3);
    if enc == UTF_16LE || enc == UTF_16BE {
        // encoding_rs only encodes UTF-16 labels as UTF-8, so write the code units directly.
        let le = enc == UTF_16LE;
        if like.bom {
            out.extend_from_slice(if le { &[0xFFu8, 0xFE] } else { &[0xFEu8, 0xFF] });
        }
        for unit in text.encode_utf16() {
            let bytes = if le { unit.to_le_bytes() } else { unit.to_be_bytes() };
            out.extend_from_slice(&bytes);
        }
        return Ok(out);
    }

    if like.bom && enc == UTF_8 {
        out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    }
    let (bytes, _, unmappable) = enc.encode(text);
    if unmappable {
        return Err(anyhow!(
            "output contains characters not representable in {}",
            enc.name()
        ));
    }
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// UTF-16 without a BOM still starts with `<` (and usually `<?`) as a two-byte unit.
fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    match bytes {
        [b'<', 0, _, 0, ..] => Some(UTF_16LE),
        [0, b'<', 0, _, ..] => Some(UTF_16BE),
        _ => None,
    }
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(256)];
    let caps = DECL_ENCODING_RE.captures(head)?;
    let label = caps.get(1)?.as_bytes();
    let enc = Encoding::for_label_no_replacement(label)?;
    // A declaration claiming UTF-16 over single-byte content is a lie; read it as UTF-8.
    if enc == UTF_16LE || enc == UTF_16BE {
        return None;
    }
    Some(enc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le_with_bom(s: &str) -> Vec<u8> {
        let mut out = vec![0xFF, 0xFE];
        for u in s.encode_utf16() {
            out.extend_from_slice(&u.to_le_bytes());
        }
        out
    }

    #[test]
    fn utf16_with_bom_round_trips() {
        let src = "<?xml version=\"1.0\" encoding=\"UTF-16\"?><tmx>çà</tmx>";
        let bytes = utf16le_with_bom(src);
        let decoded = decode_document(&bytes).expect("decode");
        assert_eq!(decoded.text, src);
        assert_eq!(decoded.encoding, UTF_16LE);
        assert!(decoded.bom);
        assert_eq!(encode_document(&decoded.text, &decoded).expect("encode"), bytes);
    }

    #[test]
    fn utf8_bom_is_preserved() {
        let bytes = b"\xEF\xBB\xBF<tmx/>".to_vec();
        let decoded = decode_document(&bytes).expect("decode");
        assert_eq!(decoded.text, "<tmx/>");
        assert_eq!(encode_document("<tmx/>", &decoded).expect("encode"), bytes);
    }

    #[test]
    fn declared_single_byte_encoding_is_used() {
        let mut bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><seg>".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"t\xE9</seg>");
        let decoded = decode_document(&bytes).expect("decode");
        assert!(decoded.text.ends_with("<seg>été</seg>"));
        assert!(!decoded.bom);
        assert_eq!(encode_document(&decoded.text, &decoded).expect("encode"), bytes);
    }

    #[test]
    fn undeclared_input_defaults_to_utf8() {
        let decoded = decode_document("<tmx>ü</tmx>".as_bytes()).expect("decode");
        assert_eq!(decoded.encoding, UTF_8);
        assert!(decode_document(b"<tmx>\xFF</tmx>").is_err());
    }
}
