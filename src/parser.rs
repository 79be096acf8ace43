//! RSS document parsing and text normalization.
//!
//! [`parse`] walks the XML with a streaming reader and picks out the
//! `channel` and `item` fields by element name. Anything else in the
//! document is skipped. After a successful parse, HTML entities left in the
//! human-readable fields are decoded by [`decode_html_entities`].

use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unmarshalling XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unmarshalling XML: {0}")]
    Text(String),
    #[error("unmarshalling XML: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Field currently collecting text, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ChannelTitle,
    ChannelLink,
    ChannelDescription,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPubDate,
}

fn field_for(path: &[Vec<u8>]) -> Option<Field> {
    // path[0] is the root element, whatever its name
    match path {
        [_, channel, leaf] if channel == b"channel" => match leaf.as_slice() {
            b"title" => Some(Field::ChannelTitle),
            b"link" => Some(Field::ChannelLink),
            b"description" => Some(Field::ChannelDescription),
            _ => None,
        },
        [_, channel, item, leaf] if channel == b"channel" && item == b"item" => {
            match leaf.as_slice() {
                b"title" => Some(Field::ItemTitle),
                b"link" => Some(Field::ItemLink),
                b"description" => Some(Field::ItemDescription),
                b"pubDate" => Some(Field::ItemPubDate),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_item_path(path: &[Vec<u8>]) -> bool {
    matches!(path, [_, channel, item] if channel == b"channel" && item == b"item")
}

fn slot<'a>(doc: &'a mut FeedDocument, item: &'a mut FeedItem, field: Field) -> &'a mut String {
    match field {
        Field::ChannelTitle => &mut doc.title,
        Field::ChannelLink => &mut doc.link,
        Field::ChannelDescription => &mut doc.description,
        Field::ItemTitle => &mut item.title,
        Field::ItemLink => &mut item.link,
        Field::ItemDescription => &mut item.description,
        Field::ItemPubDate => &mut item.pub_date,
    }
}

/// Parse raw feed bytes into a normalized [`FeedDocument`].
pub fn parse(bytes: &[u8]) -> Result<FeedDocument, ParseError> {
    let mut doc = parse_raw(bytes)?;
    normalize(&mut doc);
    Ok(doc)
}

fn parse_raw(bytes: &[u8]) -> Result<FeedDocument, ParseError> {
    // No trimming: field text is kept exactly as written, and whitespace
    // between elements never lands in a field.
    let mut reader = Reader::from_reader(bytes);

    let mut doc = FeedDocument::default();
    let mut item = FeedItem::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut seen_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if path.is_empty() {
                    if seen_root {
                        return Err(ParseError::Malformed("multiple root elements"));
                    }
                    seen_root = true;
                }
                path.push(e.name().as_ref().to_vec());
                if is_item_path(&path) {
                    item = FeedItem::default();
                }
            }
            Event::Empty(e) => {
                if path.is_empty() {
                    if seen_root {
                        return Err(ParseError::Malformed("multiple root elements"));
                    }
                    seen_root = true;
                }
                path.push(e.name().as_ref().to_vec());
                if is_item_path(&path) {
                    doc.items.push(FeedItem::default());
                }
                path.pop();
            }
            Event::End(_) => {
                if is_item_path(&path) {
                    doc.items.push(std::mem::take(&mut item));
                }
                path.pop();
            }
            Event::Text(e) => {
                if let Some(field) = field_for(&path) {
                    let text = e
                        .unescape_with(resolve_html5_entity)
                        .map_err(|err| ParseError::Text(err.to_string()))?;
                    slot(&mut doc, &mut item, field).push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(field) = field_for(&path) {
                    let text = String::from_utf8_lossy(&e);
                    slot(&mut doc, &mut item, field).push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ParseError::Malformed("no root element"));
    }
    if !path.is_empty() {
        return Err(ParseError::Malformed("unexpected end of document"));
    }

    debug!(items = doc.items.len(), title = %doc.title, "Parsed feed document");
    Ok(doc)
}

/// Decode HTML entities in the human-readable fields. Links and publish
/// dates are left as they were in the source.
pub fn normalize(doc: &mut FeedDocument) {
    decode_in_place(&mut doc.title);
    decode_in_place(&mut doc.description);
    for item in &mut doc.items {
        decode_in_place(&mut item.title);
        decode_in_place(&mut item.description);
    }
}

fn decode_in_place(field: &mut String) {
    if let Cow::Owned(decoded) = decode_html_entities(field) {
        *field = decoded;
    }
}

/// Longest entity name we try to resolve, `&` and `;` excluded.
const MAX_ENTITY_LEN: usize = 40;

/// Names HTML still decodes when the trailing `;` is missing.
const LEGACY_ENTITIES: &[&str] = &[
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren",
    "deg", "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34",
    "gt", "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr",
    "micro", "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm",
    "oslash", "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy",
    "sup1", "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml",
    "uuml", "yacute", "yen", "yuml",
];

const LONGEST_LEGACY_ENTITY: usize = 6;

/// Numeric references in 0x80..=0x9F are read as Windows-1252.
const WINDOWS_1252: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
    '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}',
    '\u{017D}', '\u{008F}', '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
    '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
    '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Replace HTML character references (`&amp;`, `&rsquo;`, `&#39;`, `&#x2014;`)
/// with the characters they stand for. Legacy names such as `&amp` and `&lt`
/// decode without their `;`. Sequences that do not form a known reference
/// are copied through untouched.
pub fn decode_html_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        match decode_reference(after) {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

/// Decode the reference that follows an `&`. Returns the replacement text
/// and the number of bytes of `after` it covers.
fn decode_reference(after: &str) -> Option<(Cow<'static, str>, usize)> {
    if let Some(number) = after.strip_prefix('#') {
        return decode_numeric(number).map(|(c, used)| (Cow::Owned(c.to_string()), used + 1));
    }

    let name_len = after
        .bytes()
        .take_while(u8::is_ascii_alphanumeric)
        .take(MAX_ENTITY_LEN)
        .count();
    if name_len == 0 {
        return None;
    }
    let name = &after[..name_len];

    if after[name_len..].starts_with(';') {
        if let Some(text) = resolve_html5_entity(name) {
            return Some((Cow::Borrowed(text), name_len + 1));
        }
    }

    // "&lt3" and "&notit;" decode their longest legacy prefix
    (2..=name_len.min(LONGEST_LEGACY_ENTITY))
        .rev()
        .map(|len| &name[..len])
        .filter(|prefix| LEGACY_ENTITIES.contains(prefix))
        .find_map(|prefix| {
            resolve_html5_entity(prefix).map(|text| (Cow::Borrowed(text), prefix.len()))
        })
}

fn decode_numeric(number: &str) -> Option<(char, usize)> {
    let (radix, start) = match number.as_bytes().first() {
        Some(b'x' | b'X') => (16, 1),
        _ => (10, 0),
    };
    let digits = number[start..]
        .bytes()
        .take_while(|b| char::from(*b).is_digit(radix))
        .count();
    if digits == 0 {
        return None;
    }
    let end = start + digits;

    let value = u32::from_str_radix(&number[start..end], radix).unwrap_or(u32::MAX);
    let c = match value {
        0x80..=0x9F => WINDOWS_1252[(value - 0x80) as usize],
        0 => char::REPLACEMENT_CHARACTER,
        _ => char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER),
    };

    let used = if number[end..].starts_with(';') { end + 1 } else { end };
    Some((c, used))
}
