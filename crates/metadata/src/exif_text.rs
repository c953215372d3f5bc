//! EXIF text from JPEG, WebP and TIFF containers.
//!
//! Generators that can't write PNG chunks put the parameter string in
//! `UserComment`, prefixed by an 8-byte charset header. `ImageDescription`
//! is the fallback some tools use instead.

use std::collections::HashMap;
use std::io::Cursor;

use exif::{Field, In, Tag, Value};
use tracing::debug;

/// Text keyed like PNG chunks so the same parsers apply. Both tags land
/// under `parameters`; `UserComment` wins.
pub fn text_fields(bytes: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return out,
        Err(err) => {
            debug!("unreadable exif: {err}");
            return out;
        }
    };

    let text = exif
        .get_field(Tag::UserComment, In::PRIMARY)
        .and_then(user_comment)
        .or_else(|| {
            exif.get_field(Tag::ImageDescription, In::PRIMARY)
                .and_then(ascii)
        });
    if let Some(text) = text {
        out.insert("parameters".to_string(), text);
    }
    out
}

fn user_comment(field: &Field) -> Option<String> {
    let text = match &field.value {
        Value::Undefined(data, _) => decode_user_comment(data)?,
        Value::Ascii(_) => ascii(field)?,
        _ => return None,
    };
    non_blank(text)
}

fn ascii(field: &Field) -> Option<String> {
    let Value::Ascii(parts) = &field.value else {
        return None;
    };
    let text = parts
        .iter()
        .map(|part| String::from_utf8_lossy(part))
        .collect::<Vec<_>>()
        .join("\n");
    non_blank(text)
}

fn non_blank(text: String) -> Option<String> {
    let text = text.trim_end_matches('\0').to_string();
    (!text.trim().is_empty()).then_some(text)
}

fn decode_user_comment(data: &[u8]) -> Option<String> {
    if data.len() < 8 {
        return None;
    }
    let (header, body) = data.split_at(8);
    Some(match header {
        b"UNICODE\0" => decode_utf16(body),
        _ => String::from_utf8_lossy(body).into_owned(),
    })
}

/// Writers disagree on UTF-16 endianness; ASCII-heavy text tells us which.
fn decode_utf16(body: &[u8]) -> String {
    let big_endian = body.len() >= 2 && body[0] == 0 && body[1] != 0;
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}
