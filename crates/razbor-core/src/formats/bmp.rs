//! Windows bitmap decoding.
//!
//! A bitmap is a 14-byte file header, a DIB header whose first field is its
//! own size, optional bit-field masks, an optional colour table and the pixel
//! array at the offset the file header declares. The 12-byte core header
//! and every info header from 40 bytes up are understood; V4 and V5 colour
//! space fields are shown when present. All fields are little-endian.

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::debug;

/// `BM`
pub const BMP_MAGIC: &[u8] = b"BM";

/// Size of the file header
pub const FILE_HEADER_SIZE: u32 = 14;

/// Size of the OS/2 1.x core header
pub const CORE_HEADER_SIZE: u32 = 12;

/// Size of the Windows 3.x info header
pub const INFO_HEADER_SIZE: u32 = 40;

const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;
const BI_ALPHABITFIELDS: u32 = 6;

fn compression_name(compression: u32) -> &'static str {
    match compression {
        0 => "BI_RGB",
        1 => "BI_RLE8",
        2 => "BI_RLE4",
        3 => "BI_BITFIELDS",
        4 => "BI_JPEG",
        5 => "BI_PNG",
        6 => "BI_ALPHABITFIELDS",
        11 => "BI_CMYK",
        12 => "BI_CMYKRLE8",
        13 => "BI_CMYKRLE4",
        _ => "unknown",
    }
}

fn header_name(size: u32) -> &'static str {
    match size {
        12 => "BITMAPCOREHEADER",
        40 => "BITMAPINFOHEADER",
        52 => "BITMAPV2INFOHEADER",
        56 => "BITMAPV3INFOHEADER",
        64 => "OS22XBITMAPHEADER",
        108 => "BITMAPV4HEADER",
        124 => "BITMAPV5HEADER",
        _ => "unknown",
    }
}

/// The 14-byte file header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BmpFileHeader {
    /// Declared size of the whole file
    pub file_size: u32,
    /// Offset of the pixel array
    pub pixel_offset: u32,
}

/// Channel masks for bit-field encoded pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitMasks {
    /// Red channel
    pub red: u32,
    /// Green channel
    pub green: u32,
    /// Blue channel
    pub blue: u32,
    /// Alpha channel, if present
    pub alpha: Option<u32>,
}

/// The DIB header, normalized across core and info variants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DibHeader {
    /// Declared header size
    pub size: u32,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels; negative for top-down images
    pub height: i32,
    /// Colour planes, always 1
    pub planes: u16,
    /// Bits per pixel
    pub bit_count: u16,
    /// Compression method
    pub compression: u32,
    /// Declared size of the pixel array; may be 0 for `BI_RGB`
    pub image_size: u32,
    /// Horizontal resolution in pixels per metre
    pub x_pixels_per_meter: i32,
    /// Vertical resolution in pixels per metre
    pub y_pixels_per_meter: i32,
    /// Colour table entries; 0 means the maximum for `bit_count`
    pub colors_used: u32,
    /// Important colours; 0 means all
    pub colors_important: u32,
    /// Channel masks, from the header or the block after it
    pub masks: Option<BitMasks>,
    /// Embedded profile as offset from the DIB header and size (V5 only)
    pub profile: Option<(u32, u32)>,
}

impl DibHeader {
    /// True for the 12-byte OS/2 core header
    pub fn is_core(&self) -> bool {
        self.size == CORE_HEADER_SIZE
    }

    /// Bytes per row including padding to a 4-byte boundary
    pub fn row_size(&self) -> u64 {
        (self.bit_count as u64 * self.width.unsigned_abs() as u64 + 31) / 32 * 4
    }
}

/// A decoded bitmap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BmpImage {
    /// The file header
    pub file_header: BmpFileHeader,
    /// The DIB header
    pub dib: DibHeader,
    /// Colour table entries as `[blue, green, red]`
    pub palette: Vec<[u8; 3]>,
    /// Span of the pixel array, if it could be located
    pub pixels: Option<Span>,
}

impl BmpImage {
    /// Width and height in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.dib.width.unsigned_abs(), self.dib.height.unsigned_abs())
    }

    /// True if rows are stored top row first
    pub fn is_top_down(&self) -> bool {
        self.dib.height < 0
    }
}

/// Decoder for BMP and DIB files
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpDecoder;

impl Decoder for BmpDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Bmp
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let mut cursor = ByteCursor::new(&data);

        let magic = &data[..data.len().min(BMP_MAGIC.len())];
        if magic != BMP_MAGIC {
            return Err(Error::signature_mismatch(0, BMP_MAGIC, magic));
        }

        let file_header = decode_file_header(&mut cursor, &mut out)?;
        let mut dib = decode_dib_header(&mut cursor, &mut out)?;
        debug!(
            "Bitmap {}x{} at {} bpp, {}",
            dib.width,
            dib.height,
            dib.bit_count,
            compression_name(dib.compression)
        );

        if dib.size == INFO_HEADER_SIZE
            && matches!(dib.compression, BI_BITFIELDS | BI_ALPHABITFIELDS)
        {
            let mut node = ComponentBuilder::at("Bit Masks", &cursor);
            let masks = read_masks(&mut node, &mut cursor, dib.compression == BI_ALPHABITFIELDS)?;
            out.insert(node.finish(&cursor)?)?;
            dib.masks = Some(masks);
        }

        let palette = decode_color_table(&mut cursor, &mut out, &dib, file_header.pixel_offset)?;
        let pixels = locate_pixels(&cursor, &mut out, &dib, file_header.pixel_offset)?;
        insert_profile(&cursor, &mut out, &dib)?;

        if let Some(end) = pixels.map(|p| p.end()) {
            let len = data.len() as u64;
            let trailing = Span::between(end, len);
            if !trailing.is_empty() && !out.is_occupied(trailing) {
                out.insert(FileComponent::raw(
                    "Trailing Data",
                    trailing,
                    &data[trailing.range()],
                ))?;
            }
        }

        if file_header.file_size as u64 != data.len() as u64 {
            out.anomaly(Anomaly::inconsistent(
                2,
                format!(
                    "file header declares {} bytes but the file has {}",
                    file_header.file_size,
                    data.len()
                ),
            ));
        }

        Ok(out.finish(Document::Bmp(BmpImage {
            file_header,
            dib,
            palette,
            pixels,
        })))
    }
}

fn decode_file_header(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<BmpFileHeader> {
    let mut node = ComponentBuilder::at("File Header", cursor);
    node.field_with(cursor, "Signature", |c| c.expect_bytes(BMP_MAGIC), |_| "BM".to_string())?;
    let file_size = node.field(cursor, "File Size", |c| c.read_u32_le())?;
    node.hex_field(cursor, "Reserved 1", |c| c.read_u16_le())?;
    node.hex_field(cursor, "Reserved 2", |c| c.read_u16_le())?;
    let pixel_offset = node.hex_field(cursor, "Pixel Data Offset", |c| c.read_u32_le())?;
    node.set_value(format!("{} bytes", file_size));
    out.insert(node.finish(cursor)?)?;
    Ok(BmpFileHeader {
        file_size,
        pixel_offset,
    })
}

fn decode_dib_header(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<DibHeader> {
    let mut node = ComponentBuilder::at("DIB Header", cursor);
    let size_offset = cursor.position();
    let size = node.field_with(cursor, "Header Size", |c| c.read_u32_le(), |s| {
        format!("{} ({})", s, header_name(*s))
    })?;
    if size != CORE_HEADER_SIZE && size < INFO_HEADER_SIZE {
        return Err(Error::malformed(
            size_offset,
            format!("DIB header size {} is neither 12 nor at least 40", size),
        ));
    }
    let mut h = cursor.sub_cursor(size as usize - 4)?;
    let mut dib = DibHeader {
        size,
        ..DibHeader::default()
    };

    if size == CORE_HEADER_SIZE {
        dib.width = node.field(&mut h, "Width", |c| c.read_u16_le())? as i32;
        dib.height = node.field(&mut h, "Height", |c| c.read_u16_le())? as i32;
    } else {
        dib.width = node.field(&mut h, "Width", |c| c.read_i32_le())?;
        dib.height = node.field(&mut h, "Height", |c| c.read_i32_le())?;
    }
    let planes_offset = h.position();
    dib.planes = node.field(&mut h, "Planes", |c| c.read_u16_le())?;
    dib.bit_count = node.field(&mut h, "Bits Per Pixel", |c| c.read_u16_le())?;
    if dib.planes != 1 {
        node.anomaly(Anomaly::inconsistent(
            planes_offset,
            format!("colour planes is {}; only 1 is defined", dib.planes),
        ));
    }

    if size >= INFO_HEADER_SIZE {
        dib.compression = node.field_with(&mut h, "Compression", |c| c.read_u32_le(), |v| {
            format!("{} ({})", v, compression_name(*v))
        })?;
        dib.image_size = node.field(&mut h, "Image Size", |c| c.read_u32_le())?;
        dib.x_pixels_per_meter = node.field(&mut h, "Horizontal Resolution", |c| c.read_i32_le())?;
        dib.y_pixels_per_meter = node.field(&mut h, "Vertical Resolution", |c| c.read_i32_le())?;
        dib.colors_used = node.field(&mut h, "Colors Used", |c| c.read_u32_le())?;
        dib.colors_important = node.field(&mut h, "Important Colors", |c| c.read_u32_le())?;
    }
    if size >= 52 && size != 64 {
        dib.masks = Some(read_masks(&mut node, &mut h, size >= 56)?);
    }
    if size >= 108 {
        node.field_with(&mut h, "Color Space Type", |c| c.read_u32_le(), |v| {
            let tag = v.to_be_bytes();
            if tag.iter().all(u8::is_ascii_graphic) {
                String::from_utf8_lossy(&tag).into_owned()
            } else {
                format!("{:#x}", v)
            }
        })?;
        node.bytes(&mut h, "Endpoints", 36)?;
        node.bytes(&mut h, "Gamma", 12)?;
    }
    if size >= 124 {
        node.field(&mut h, "Intent", |c| c.read_u32_le())?;
        let offset = node.hex_field(&mut h, "Profile Data Offset", |c| c.read_u32_le())?;
        let profile_size = node.field(&mut h, "Profile Size", |c| c.read_u32_le())?;
        node.hex_field(&mut h, "Reserved", |c| c.read_u32_le())?;
        if profile_size > 0 {
            dib.profile = Some((offset, profile_size));
        }
    }
    let rest = h.remaining();
    if rest > 0 {
        node.bytes(&mut h, "Extra Header Data", rest)?;
    }

    node.set_value(format!(
        "{} {}x{} {} bpp",
        header_name(size),
        dib.width,
        dib.height,
        dib.bit_count
    ));
    out.insert(node.finish(cursor)?)?;
    Ok(dib)
}

fn read_masks(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>, alpha: bool) -> Result<BitMasks> {
    let red = node.hex_field(c, "Red Mask", |c| c.read_u32_le())?;
    let green = node.hex_field(c, "Green Mask", |c| c.read_u32_le())?;
    let blue = node.hex_field(c, "Blue Mask", |c| c.read_u32_le())?;
    let alpha = if alpha {
        Some(node.hex_field(c, "Alpha Mask", |c| c.read_u32_le())?)
    } else {
        None
    };
    Ok(BitMasks {
        red,
        green,
        blue,
        alpha,
    })
}

/// Reads the colour table, clipped to the pixel array if the two would overlap
fn decode_color_table(
    cursor: &mut ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    dib: &DibHeader,
    pixel_offset: u32,
) -> Result<Vec<[u8; 3]>> {
    let declared = match (dib.colors_used, dib.bit_count) {
        (0, bits @ 1..=8) => 1u64 << bits,
        (n, _) => n as u64,
    };
    if declared == 0 {
        return Ok(Vec::new());
    }
    let entry_size: u64 = if dib.is_core() { 3 } else { 4 };
    let start = cursor.position();
    let limit = match pixel_offset as u64 {
        p if p > start => p.min(cursor.end_offset()),
        _ => cursor.end_offset(),
    };
    let room = (limit - start) / entry_size;
    let count = declared.min(room);
    if count < declared {
        out.anomaly(Anomaly::inconsistent(
            start,
            format!("colour table declares {} entries but only {} fit", declared, count),
        ));
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut node = ComponentBuilder::at("Color Table", cursor);
    let mut palette = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let bgr = node.field_with(
            cursor,
            "Color",
            |c| {
                let bgr = c.read_array::<3>()?;
                if entry_size == 4 {
                    c.skip(1)?;
                }
                Ok(bgr)
            },
            |[b, g, r]| format!("#{:02X}{:02X}{:02X}", r, g, b),
        )?;
        palette.push(bgr);
    }
    node.set_value(format!("{} colors", count));
    out.insert(node.finish(cursor)?)?;
    Ok(palette)
}

/// Inserts the pixel array at the declared offset
fn locate_pixels(
    cursor: &ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    dib: &DibHeader,
    pixel_offset: u32,
) -> Result<Option<Span>> {
    let start = pixel_offset as u64;
    let len = cursor.end_offset();
    if start < cursor.position() {
        out.anomaly(Anomaly::inconsistent(
            10,
            format!(
                "pixel data offset {:#x} lies inside the headers, which end at {:#x}",
                start,
                cursor.position()
            ),
        ));
        return Ok(None);
    }
    if start >= len {
        out.anomaly(Anomaly::inconsistent(
            10,
            format!("pixel data offset {:#x} is past the end of the file", start),
        ));
        return Ok(None);
    }

    let uncompressed = matches!(dib.compression, BI_RGB | BI_BITFIELDS | BI_ALPHABITFIELDS);
    let computed = dib.row_size() * dib.height.unsigned_abs() as u64;
    if uncompressed && dib.image_size != 0 && dib.image_size as u64 != computed {
        out.anomaly(Anomaly::inconsistent(
            start,
            format!(
                "image size is declared as {} but {} rows of {} bytes need {}",
                dib.image_size,
                dib.height.unsigned_abs(),
                dib.row_size(),
                computed
            ),
        ));
    }
    let expected = match (uncompressed, dib.image_size) {
        (true, _) => computed,
        (false, 0) => len - start,
        (false, size) => size as u64,
    };
    if expected == 0 {
        return Ok(None);
    }

    let available = len - start;
    if expected > available {
        out.anomaly(Anomaly::inconsistent(
            start,
            format!(
                "pixel array needs {} bytes but only {} remain",
                expected, available
            ),
        ));
    }
    let span = Span::new(start, expected.min(available));
    let bytes = cursor.window(span.start, span.end())?.rest();
    out.insert(FileComponent::raw("Pixel Array", span, bytes))?;
    Ok(Some(span))
}

/// Inserts the V5 embedded colour profile, which is addressed from the DIB header
fn insert_profile(cursor: &ByteCursor<'_>, out: &mut FileFormatBuilder, dib: &DibHeader) -> Result<()> {
    let Some((offset, size)) = dib.profile else {
        return Ok(());
    };
    let span = Span::new(FILE_HEADER_SIZE as u64 + offset as u64, size as u64);
    match cursor.window(span.start, span.end()) {
        Ok(window) if !out.is_occupied(span) => {
            out.insert(FileComponent::raw("Embedded Profile", span, window.rest()))
        }
        _ => {
            out.anomaly(Anomaly::inconsistent(
                span.start,
                format!("embedded profile {} lies outside the file or overlaps other data", span),
            ));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnomalyKind;
    use pretty_assertions::assert_eq;

    /// File header, 40-byte info header, `between` bytes, then `pixels` bytes
    fn info_bmp(
        width: i32,
        height: i32,
        bit_count: u16,
        compression: u32,
        colors_used: u32,
        between: &[u8],
        pixels: usize,
    ) -> Vec<u8> {
        let offset = 14 + 40 + between.len();
        let mut out = b"BM".to_vec();
        out.extend_from_slice(&((offset + pixels) as u32).to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&bit_count.to_le_bytes());
        out.extend_from_slice(&compression.to_le_bytes());
        out.extend_from_slice(&(pixels as u32).to_le_bytes());
        out.extend_from_slice(&2835i32.to_le_bytes());
        out.extend_from_slice(&2835i32.to_le_bytes());
        out.extend_from_slice(&colors_used.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(between);
        out.extend(std::iter::repeat(0xAB).take(pixels));
        out
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        BmpDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    fn labels(doc: &FileFormat) -> Vec<&str> {
        doc.components().filter_map(|c| c.label()).collect()
    }

    #[test]
    fn test_24bit_image() {
        let doc = decode(info_bmp(2, 2, 24, 0, 0, &[], 16)).unwrap();
        doc.validate().unwrap();
        let bmp = doc.document().as_bmp().unwrap();

        assert_eq!(labels(&doc), vec!["File Header", "DIB Header", "Pixel Array"]);
        assert_eq!(bmp.dimensions(), (2, 2));
        assert!(!bmp.is_top_down());
        assert_eq!(bmp.dib.row_size(), 8);
        assert_eq!(bmp.pixels, Some(Span::new(54, 16)));
        assert!(doc.anomalies().is_empty(), "{:?}", doc.anomalies());
        assert_eq!(
            doc.top_level_at(14).unwrap().value(),
            Some("BITMAPINFOHEADER 2x2 24 bpp")
        );
    }

    #[test]
    fn test_palette_image() {
        let palette = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0x00, 0x00];
        let doc = decode(info_bmp(2, 1, 8, 0, 2, &palette, 4)).unwrap();
        let bmp = doc.document().as_bmp().unwrap();

        assert_eq!(labels(&doc), vec!["File Header", "DIB Header", "Color Table", "Pixel Array"]);
        assert_eq!(bmp.palette, vec![[0x00, 0x00, 0xFF], [0x00, 0xFF, 0x00]]);
        let table = doc.top_level_at(54).unwrap();
        let colors: Vec<&str> = table.children().iter().filter_map(|c| c.value()).collect();
        assert_eq!(colors, vec!["#FF0000", "#00FF00"]);
        assert_eq!(bmp.pixels, Some(Span::new(62, 4)));
    }

    #[test]
    fn test_core_header() {
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&30u32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&26u32.to_le_bytes());
        data.extend_from_slice(&12u32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&[0x10, 0x20, 0x30, 0x00]);

        let doc = decode(data).unwrap();
        let bmp = doc.document().as_bmp().unwrap();
        assert!(bmp.dib.is_core());
        assert_eq!(bmp.dimensions(), (1, 1));
        assert_eq!(bmp.pixels, Some(Span::new(26, 4)));
        assert!(doc.anomalies().is_empty(), "{:?}", doc.anomalies());
    }

    #[test]
    fn test_bitfield_masks() {
        let mut masks = Vec::new();
        for m in [0x00FF_0000u32, 0x0000_FF00, 0x0000_00FF] {
            masks.extend_from_slice(&m.to_le_bytes());
        }
        let doc = decode(info_bmp(1, 1, 32, 3, 0, &masks, 4)).unwrap();
        let bmp = doc.document().as_bmp().unwrap();

        assert_eq!(labels(&doc), vec!["File Header", "DIB Header", "Bit Masks", "Pixel Array"]);
        assert_eq!(
            bmp.dib.masks,
            Some(BitMasks {
                red: 0x00FF_0000,
                green: 0x0000_FF00,
                blue: 0x0000_00FF,
                alpha: None,
            })
        );
    }

    #[test]
    fn test_top_down() {
        let doc = decode(info_bmp(2, -2, 24, 0, 0, &[], 16)).unwrap();
        let bmp = doc.document().as_bmp().unwrap();
        assert!(bmp.is_top_down());
        assert_eq!(bmp.dimensions(), (2, 2));
    }

    #[test]
    fn test_truncated_pixel_array() {
        let mut data = info_bmp(2, 2, 24, 0, 0, &[], 16);
        data.truncate(data.len() - 4);
        let doc = decode(data).unwrap();
        let bmp = doc.document().as_bmp().unwrap();

        assert_eq!(bmp.pixels, Some(Span::new(54, 12)));
        let messages: Vec<&str> = doc.file_anomalies().iter().map(|a| a.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "pixel array needs 16 bytes but only 12 remain",
                "file header declares 70 bytes but the file has 66"
            ]
        );
    }

    #[test]
    fn test_pixel_offset_inside_headers() {
        let mut data = info_bmp(1, 1, 24, 0, 0, &[], 4);
        data[10..14].copy_from_slice(&20u32.to_le_bytes());
        let doc = decode(data).unwrap();
        let bmp = doc.document().as_bmp().unwrap();

        assert_eq!(bmp.pixels, None);
        assert_eq!(doc.file_anomalies().len(), 1);
        assert_eq!(doc.file_anomalies()[0].kind, AnomalyKind::StructuralInconsistency);
        assert_eq!(doc.file_anomalies()[0].offset, 10);
    }

    #[test]
    fn test_bad_signature() {
        let err = decode(b"BX\x00\x00".to_vec()).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_unsupported_header_size() {
        let mut data = info_bmp(1, 1, 24, 0, 0, &[], 4);
        data[14..18].copy_from_slice(&20u32.to_le_bytes());
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 14, .. }));
    }
}
