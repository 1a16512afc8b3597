//! Decoding of catalog name/value attributes.
//!
//! Each `CAT_NAMEVALUE_OBJID` extension carries a small DER blob:
//!
//! ```asn1
//! CatNameValue ::= SEQUENCE {
//!   tag   BMPString,
//!   flags INTEGER OPTIONAL,
//!   value OCTET STRING   -- UTF-16LE, not BMP
//! }
//! ```
//!
//! Catalog writers are not strict about this encoding, so the blob is walked
//! with a small, forgiving reader instead of a full `der` decode. Any
//! malformation yields `None` for that attribute.

use der::Tag;
#[cfg(feature = "serde")]
use serde::Serialize;

/// A single decoded catalog attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CatalogMetadataEntry {
    /// The attribute's label, e.g. `OSAttr`.
    pub key: String,
    /// The attribute's free-text payload.
    pub value: String,
}

/// Decodes a DER definite length starting at `pos`.
///
/// Returns `(length, consumed)`. Short form consumes one byte; long form
/// consumes `1 + n` bytes, where `n` is the low seven bits of the first byte.
/// A truncated or oversized long form, or a `pos` past the end, yields `(0, 0)`.
pub fn decode_length(data: &[u8], pos: usize) -> (usize, usize) {
    let Some(&first) = data.get(pos) else {
        return (0, 0);
    };

    if first & 0x80 == 0 {
        return (first as usize, 1);
    }

    let n = (first & 0x7F) as usize;
    let Some(bytes) = pos
        .checked_add(1)
        .and_then(|start| data.get(start..start.checked_add(n)?))
    else {
        return (0, 0);
    };

    let mut len: usize = 0;
    for &b in bytes {
        match len.checked_mul(256) {
            Some(shifted) => len = shifted | b as usize,
            None => return (0, 0),
        }
    }

    (len, 1 + n)
}

/// Decodes UTF-16 code units stored big-endian (`BMPString`).
pub fn utf16_be(bytes: &[u8]) -> String {
    decode_utf16(bytes, |pair| u16::from_be_bytes([pair[0], pair[1]]))
}

/// Decodes UTF-16 code units stored little-endian.
pub fn utf16_le(bytes: &[u8]) -> String {
    decode_utf16(bytes, |pair| u16::from_le_bytes([pair[0], pair[1]]))
}

fn decode_utf16(bytes: &[u8], unit: impl Fn(&[u8]) -> u16) -> String {
    if bytes.len() % 2 != 0 {
        return String::new();
    }

    let decoded: String = char::decode_utf16(bytes.chunks_exact(2).map(unit))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();

    // Writers NUL-terminate both strings.
    match decoded.trim_end_matches('\0').len() {
        len if len == decoded.len() => decoded,
        len => decoded[..len].to_owned(),
    }
}

fn tag_at(data: &[u8], pos: usize, tag: Tag) -> bool {
    data.get(pos)
        .map_or(false, |&b| Tag::try_from(b).ok() == Some(tag))
}

/// Reads a length at `pos` and returns the content span that follows it.
fn content_at(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let (len, consumed) = decode_length(data, pos);
    if consumed == 0 {
        return None;
    }
    let start = pos.checked_add(consumed)?;
    let end = start.checked_add(len)?;
    (end <= data.len()).then_some((start, end))
}

/// Decodes one `CatNameValue` blob into a key/value pair.
///
/// Returns `None` on a tag mismatch or any truncation; never reads out of
/// bounds.
pub fn decode_name_value(data: &[u8]) -> Option<CatalogMetadataEntry> {
    if !tag_at(data, 0, Tag::Sequence) {
        return None;
    }

    // The outer length is skipped, not enforced.
    let (_, consumed) = decode_length(data, 1);
    let mut p = 1 + consumed;

    if !tag_at(data, p, Tag::BmpString) {
        return None;
    }
    let (start, end) = content_at(data, p + 1)?;
    let key = utf16_be(&data[start..end]);
    p = end;

    if tag_at(data, p, Tag::Integer) {
        p += 1;
        let (len, consumed) = decode_length(data, p);
        if consumed == 0 {
            return None;
        }
        p = p.checked_add(consumed)?.checked_add(len)?;
    }

    if !tag_at(data, p, Tag::OctetString) {
        return None;
    }
    let (start, end) = content_at(data, p + 1)?;
    let value = utf16_le(&data[start..end]);

    Some(CatalogMetadataEntry { key, value })
}
