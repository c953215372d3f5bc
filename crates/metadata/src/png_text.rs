//! PNG text chunks (`tEXt`, `zTXt`, `iTXt`) read through the `png` decoder.
//!
//! Only chunks ahead of the image data are seen; every generator we read
//! writes its metadata there.

use std::collections::HashMap;
use std::io::Cursor;

use tracing::debug;

const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

/// Every readable text chunk keyed by keyword. Later chunks win.
pub fn text_chunks(bytes: &[u8]) -> HashMap<String, String> {
    let mut chunks = HashMap::new();
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = match decoder.read_info() {
        Ok(reader) => reader,
        Err(err) => {
            debug!("unreadable png header: {err}");
            return chunks;
        }
    };
    let info = reader.info();

    for t in &info.uncompressed_latin1_text {
        insert(&mut chunks, &t.keyword, repair_latin1(&t.text));
    }
    for t in &info.compressed_latin1_text {
        match t.get_text() {
            Ok(text) => insert(&mut chunks, &t.keyword, repair_latin1(&text)),
            Err(err) => debug!("skipping zTXt {}: {err}", t.keyword),
        }
    }
    for t in &info.utf8_text {
        match t.get_text() {
            Ok(text) => insert(&mut chunks, &t.keyword, text),
            Err(err) => debug!("skipping iTXt {}: {err}", t.keyword),
        }
    }

    chunks
}

fn insert(chunks: &mut HashMap<String, String>, keyword: &str, text: String) {
    if !keyword.is_empty() {
        chunks.insert(keyword.to_string(), text);
    }
}

/// Latin-1 chunks often carry UTF-8 bytes; recover them when they decode cleanly.
fn repair_latin1(text: &str) -> String {
    if text.is_ascii() || text.chars().any(|c| c as u32 > 0xFF) {
        return text.to_string();
    }
    let raw: Vec<u8> = text.chars().map(|c| c as u8).collect();
    String::from_utf8(raw).unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use png::text_metadata::ITXtChunk;

    pub enum Text<'a> {
        Plain(&'a str, &'a str),
        Zipped(&'a str, &'a str),
        International(&'a str, &'a str, bool),
        /// Raw `tEXt` bytes, bypassing the encoder's Latin-1 conversion.
        RawLatin1(&'a str, &'a [u8]),
    }

    /// Encode a black RGB image with the given text chunks ahead of the pixels.
    pub fn png_with_text(width: u32, height: u32, texts: &[Text]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            for text in texts {
                match text {
                    Text::Plain(k, v) => encoder.add_text_chunk(k.to_string(), v.to_string()),
                    Text::Zipped(k, v) => encoder.add_ztxt_chunk(k.to_string(), v.to_string()),
                    Text::RawLatin1(k, v) => {
                        let latin1 = v.iter().map(|&b| b as char).collect();
                        encoder.add_text_chunk(k.to_string(), latin1)
                    }
                    Text::International(..) => Ok(()),
                }
                .unwrap();
            }
            let mut writer = encoder.write_header().unwrap();
            for text in texts {
                if let Text::International(k, v, compressed) = text {
                    let mut chunk = ITXtChunk::new(k.to_string(), v.to_string());
                    if *compressed {
                        chunk.compress_text().unwrap();
                    }
                    writer.write_text_chunk(&chunk).unwrap();
                }
            }
            let pixels = vec![0u8; (width * height * 3) as usize];
            writer.write_image_data(&pixels).unwrap();
            writer.finish().unwrap();
        }
        out
    }
}
