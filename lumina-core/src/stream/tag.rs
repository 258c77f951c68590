//! Lexing of a single `<...>` tag at the start of a buffer.
//!
//! Every decision is a function of the first `max_len` bytes only, so the
//! result does not depend on how the text was chunked.

/// Outcome of scanning a buffer that starts with `<`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TagScan {
    /// Not enough input yet to decide.
    Incomplete,
    /// The `<` does not start a tag; treat it as prose.
    NotATag,
    Tag(Tag),
}

/// A lexed open or close tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag {
    /// Lower-cased tag name
    pub name: String,
    pub closing: bool,
    pub self_closing: bool,
    pub attrs: Vec<(String, String)>,
    /// Bytes consumed, including both angle brackets
    pub len: usize,
}

impl Tag {
    /// Value of the first attribute named `key` (case-insensitive).
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

/// Scan the tag at the start of `buf` (which must begin with `<`).
pub(crate) fn scan_tag(buf: &str, max_len: usize) -> TagScan {
    let bytes = buf.as_bytes();
    debug_assert_eq!(bytes.first(), Some(&b'<'));

    let mut start = 1;
    let closing = bytes.get(1) == Some(&b'/');
    if closing {
        start = 2;
    }
    match bytes.get(start) {
        None => return TagScan::Incomplete,
        Some(b) if !b.is_ascii_alphabetic() => return TagScan::NotATag,
        _ => {}
    }

    // Find the closing '>' outside of quoted attribute values.
    let limit = bytes.len().min(max_len);
    let mut quote: Option<u8> = None;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate().take(limit).skip(start) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => {
                    end = Some(i);
                    break;
                }
                b'<' => return TagScan::NotATag,
                _ => {}
            },
        }
    }
    let Some(end) = end else {
        return if bytes.len() >= max_len {
            TagScan::NotATag
        } else {
            TagScan::Incomplete
        };
    };

    let mut inner = &buf[start..end];
    let self_closing = inner.ends_with('/');
    if self_closing {
        inner = &inner[..inner.len() - 1];
    }

    let name_len = inner.bytes().take_while(|b| is_name_byte(*b)).count();
    let (name, rest) = inner.split_at(name_len);
    if !(rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_whitespace())) {
        return TagScan::NotATag;
    }
    if closing && !rest.trim().is_empty() {
        return TagScan::NotATag;
    }

    TagScan::Tag(Tag {
        name: name.to_ascii_lowercase(),
        closing,
        self_closing,
        attrs: parse_attrs(rest),
        len: end + 1,
    })
}

/// Parse `key="v" key='v' key=v key` attribute lists.
fn parse_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let key_len = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_len];
        rest = rest[key_len..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let close = body.find(q).unwrap_or(body.len());
                    rest = body.get(close + 1..).unwrap_or("");
                    body[..close].to_string()
                }
                _ => {
                    let len = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    rest = &after_eq[len..];
                    after_eq[..len].to_string()
                }
            }
        } else {
            String::new()
        };

        if !key.is_empty() {
            attrs.push((key.to_ascii_lowercase(), decode_entities(&value)));
        }
    }
    attrs
}

/// Decode the handful of entities that show up in attribute values.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
