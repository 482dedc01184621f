//! Content-Type parsing and response body decoding.

use encoding_rs::Encoding;

/// Name of the codec used when a response declares no usable charset.
pub const DEFAULT_CODEC: &str = "iso8859-1";

/// A parsed `Content-Type` header value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentType {
    /// The media type, lowercased with whitespace removed.
    pub media_type: String,
    /// The `charset` parameter, lowercased, if present and non-empty.
    pub charset: Option<String>,
}

/// Parse a `Content-Type` value such as `text/html; charset="UTF-8"`.
pub fn parse_content_type(value: &str) -> ContentType {
    let mut parts = value.split(';');
    let media_type = parts
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    let mut charset = None;
    for part in parts {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("charset") {
            continue;
        }
        let raw = raw.trim_start();
        let value = match raw.strip_prefix('"') {
            Some(quoted) => quoted.split('"').next().unwrap_or_default(),
            None => raw.split(char::is_whitespace).next().unwrap_or_default(),
        };
        if !value.is_empty() {
            charset = Some(value.to_ascii_lowercase());
        }
        break;
    }

    ContentType {
        media_type,
        charset,
    }
}

/// Translate an IANA charset name into a codec name.
///
/// Known aliases are normalized (`ISO-8859-2` to `iso8859-2`, `windows-1251`
/// to `cp1251`, `latin5` to `iso8859-9`, ...). Names the table does not
/// recognize are returned lowercased and otherwise unchanged.
pub fn codec_name(charset: &str) -> String {
    let charset = charset.trim().to_ascii_lowercase();
    translate(&charset).unwrap_or(charset)
}

fn translate(charset: &str) -> Option<String> {
    if let Some(rest) = charset.strip_prefix("iso") {
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        if let Some(part) = rest.strip_prefix("8859-") {
            return all_digits(part).then(|| format!("iso8859-{part}"));
        }
        if let Some(variant) = rest.strip_prefix("2022-") {
            return matches!(variant, "jp" | "kr").then(|| format!("iso2022-{variant}"));
        }
        if rest.starts_with("lat") {
            return latin(rest);
        }
        return None;
    }

    if let Some(rest) = charset.strip_prefix("shift") {
        let rest = rest
            .strip_prefix('-')
            .or_else(|| rest.strip_prefix('_'))
            .unwrap_or(rest);
        return (rest == "jis").then(|| "shiftjis".to_string());
    }

    if let Some(rest) = charset
        .strip_prefix("windows")
        .or_else(|| charset.strip_prefix("cp"))
    {
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        return all_digits(rest).then(|| format!("cp{rest}"));
    }

    if charset == "us-ascii" {
        return Some("ascii".to_string());
    }

    if charset.starts_with("lat") {
        return latin(charset);
    }

    None
}

fn latin(name: &str) -> Option<String> {
    let rest = name.strip_prefix("lat")?;
    let rest = rest.strip_prefix("in").unwrap_or(rest);
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    if !all_digits(rest) {
        return None;
    }
    Some(match rest {
        "5" => "iso8859-9".to_string(),
        "1" | "2" | "3" => format!("iso8859-{rest}"),
        _ => DEFAULT_CODEC.to_string(),
    })
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decoder {
    Latin1,
    Ascii,
    Whatwg(&'static Encoding),
}

/// A named text codec used to decode response bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Codec {
    name: String,
    decoder: Decoder,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            name: DEFAULT_CODEC.to_string(),
            decoder: Decoder::Latin1,
        }
    }
}

impl Codec {
    /// Look up a codec by name (`iso8859-2`, `cp1251`, `utf-8`, `shiftjis`, ...).
    ///
    /// Returns `None` for names no decoder is known for.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let decoder = match name.as_str() {
            DEFAULT_CODEC => Decoder::Latin1,
            "ascii" => Decoder::Ascii,
            other => {
                let encoding = Encoding::for_label(encoding_label(other).as_bytes())?;
                if encoding == encoding_rs::REPLACEMENT {
                    return None;
                }
                Decoder::Whatwg(encoding)
            }
        };
        Some(Self { name, decoder })
    }

    /// Resolve the codec for a response's `Content-Type` value.
    ///
    /// Falls back to [`DEFAULT_CODEC`] when the header is absent, carries no
    /// charset, or names a charset without a known decoder.
    pub fn for_content_type(content_type: Option<&str>) -> Self {
        content_type
            .and_then(|value| parse_content_type(value).charset)
            .and_then(|charset| Self::from_name(&codec_name(&charset)))
            .unwrap_or_default()
    }

    /// The codec's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode bytes into text. Undecodable input is replaced, never rejected.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.decoder {
            Decoder::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Decoder::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Decoder::Whatwg(encoding) => encoding
                .decode_without_bom_handling(bytes)
                .0
                .into_owned(),
        }
    }
}

/// Map a codec name back to a label `encoding_rs` understands.
fn encoding_label(codec: &str) -> String {
    if let Some(part) = codec.strip_prefix("iso8859-") {
        return format!("iso-8859-{part}");
    }
    if let Some(variant) = codec.strip_prefix("iso2022-") {
        return format!("iso-2022-{variant}");
    }
    if codec == "shiftjis" {
        return "shift_jis".to_string();
    }
    if let Some(number) = codec.strip_prefix("cp") {
        if matches!(number, "874" | "1250" | "1251" | "1252" | "1253" | "1254" | "1255" | "1256" | "1257" | "1258") {
            return format!("windows-{number}");
        }
    }
    codec.to_string()
}
