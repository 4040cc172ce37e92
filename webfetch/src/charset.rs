//! Response body decoding.
//!
//! The charset comes from the `Content-Type` header, then from a `charset=`
//! declaration in the first KiB of markup, and otherwise defaults to UTF-8.
//! UTF-8, ISO-8859-1 and windows-1252 are decoded; any other label falls back
//! to UTF-8. Invalid UTF-8 sequences become U+FFFD.

/// How far into the body to look for a `<meta>` charset declaration.
const META_SNIFF_BYTES: usize = 1024;

/// windows-1252 code points for bytes 0x80..=0x9F. Bytes the encoding leaves
/// undefined map to the matching C1 control.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Windows1252,
}

/// Where the charset used for decoding came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CharsetResolution {
    Header(Charset),
    /// The header named a charset we cannot decode.
    HeaderFallbackUtf8(String),
    HtmlMeta(Charset),
    DefaultUtf8,
}

impl CharsetResolution {
    pub fn charset(&self) -> Charset {
        match self {
            CharsetResolution::Header(charset) | CharsetResolution::HtmlMeta(charset) => *charset,
            CharsetResolution::HeaderFallbackUtf8(_) | CharsetResolution::DefaultUtf8 => {
                Charset::Utf8
            }
        }
    }
}

pub(crate) fn determine_charset(content_type: Option<&str>, body: &[u8]) -> CharsetResolution {
    if let Some(label) = content_type.and_then(header_charset) {
        return match normalize_charset(label) {
            Some(charset) => CharsetResolution::Header(charset),
            None => CharsetResolution::HeaderFallbackUtf8(label.to_string()),
        };
    }

    let is_html = content_type.is_none_or(|ct| ct.to_ascii_lowercase().contains("html"));
    if is_html
        && let Some(meta) = sniff_charset_from_html(body)
        && let Some(charset) = normalize_charset(&meta)
    {
        return CharsetResolution::HtmlMeta(charset);
    }

    CharsetResolution::DefaultUtf8
}

pub(crate) fn decode(body: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Utf8 => String::from_utf8_lossy(body).into_owned(),
        Charset::Latin1 => body.iter().map(|&b| char::from(b)).collect(),
        Charset::Windows1252 => body
            .iter()
            .map(|&b| match b {
                0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
                _ => char::from(b),
            })
            .collect(),
    }
}

fn header_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').trim_matches('\''))
            .filter(|value| !value.is_empty())
    })
}

fn normalize_charset(label: &str) -> Option<Charset> {
    let label = label
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase();
    match label.as_str() {
        "utf-8" | "utf8" | "utf_8" => Some(Charset::Utf8),
        "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "latin-1" => {
            Some(Charset::Latin1)
        }
        "windows-1252" | "cp1252" => Some(Charset::Windows1252),
        _ => None,
    }
}

fn sniff_charset_from_html(body: &[u8]) -> Option<String> {
    let prefix = &body[..body.len().min(META_SNIFF_BYTES)];
    let lower = String::from_utf8_lossy(prefix).to_ascii_lowercase();

    let idx = lower.find("charset=")?;
    let value: String = lower[idx + "charset=".len()..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | ';' | '>' | '/'))
        .collect();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins() {
        let body = b"<meta charset=\"windows-1252\">";
        assert_eq!(
            determine_charset(Some("text/html; charset=ISO-8859-1"), body),
            CharsetResolution::Header(Charset::Latin1)
        );
    }

    #[test]
    fn quoted_header_charset_is_accepted() {
        assert_eq!(
            determine_charset(Some("text/html; charset=\"utf-8\""), b""),
            CharsetResolution::Header(Charset::Utf8)
        );
    }

    #[test]
    fn unknown_header_charset_falls_back_to_utf8() {
        let resolution = determine_charset(Some("text/html; charset=koi8-r"), b"");
        assert_eq!(
            resolution,
            CharsetResolution::HeaderFallbackUtf8("koi8-r".to_string())
        );
        assert_eq!(resolution.charset(), Charset::Utf8);
    }

    #[test]
    fn meta_charset_is_sniffed_for_html() {
        let body = b"<html><head><meta charset=\"windows-1252\"></head></html>";
        assert_eq!(
            determine_charset(Some("text/html"), body),
            CharsetResolution::HtmlMeta(Charset::Windows1252)
        );

        let http_equiv =
            b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">";
        assert_eq!(
            determine_charset(None, http_equiv),
            CharsetResolution::HtmlMeta(Charset::Latin1)
        );
    }

    #[test]
    fn meta_is_ignored_for_non_html() {
        let body = b"charset=iso-8859-1";
        assert_eq!(
            determine_charset(Some("text/plain"), body),
            CharsetResolution::DefaultUtf8
        );
    }

    #[test]
    fn latin1_decodes_every_byte() {
        assert_eq!(decode(b"Caf\xe9 au lait", Charset::Latin1), "Café au lait");
    }

    #[test]
    fn windows_1252_maps_high_range() {
        assert_eq!(
            decode(b"\x93quoted\x94 \x80 5", Charset::Windows1252),
            "\u{201C}quoted\u{201D} \u{20AC} 5"
        );
        assert_eq!(decode(b"na\xefve", Charset::Windows1252), "naïve");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(decode(b"Caf\xe9", Charset::Utf8), "Caf\u{FFFD}");
    }
}
