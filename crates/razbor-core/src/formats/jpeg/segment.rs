//! Payload decoders for individual marker segments.

use crate::component::ComponentBuilder;
use crate::cursor::{trim_whitespace, ByteCursor, Endian};
use crate::error::{Error, Result};

use super::JpegSegment;

/// `JFIF\0`
pub const JFIF_ID: &[u8] = b"JFIF\0";
/// `JFXX\0`
pub const JFXX_ID: &[u8] = b"JFXX\0";
/// `Exif\0\0`
pub const EXIF_ID: &[u8] = b"Exif\0\0";
/// XMP namespace identifier
pub const XMP_ID: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
/// `Adobe`
pub const ADOBE_ID: &[u8] = b"Adobe";

/// APP0 JFIF header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JfifHeader {
    /// Major version
    pub version_major: u8,
    /// Minor version
    pub version_minor: u8,
    /// 0: aspect ratio only, 1: dots per inch, 2: dots per cm
    pub density_units: u8,
    /// Horizontal pixel density
    pub x_density: u16,
    /// Vertical pixel density
    pub y_density: u16,
    /// Thumbnail width in pixels
    pub thumbnail_width: u8,
    /// Thumbnail height in pixels
    pub thumbnail_height: u8,
}

/// APP0 JFIF extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JfxxExtension {
    /// 0x10 JPEG, 0x11 palette, 0x13 RGB thumbnail
    pub extension_code: u8,
}

/// One IFD0 entry from an Exif TIFF structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Tag id
    pub tag: u16,
    /// TIFF field type
    pub field_type: u16,
    /// Number of values
    pub count: u32,
    /// Inline value or offset into the TIFF structure
    pub value_offset: u32,
    /// Rendered value, when it could be resolved
    pub value: Option<String>,
}

/// APP1 Exif data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifData {
    /// Byte order declared by the TIFF header
    pub endian: Endian,
    /// Entries of the first image file directory
    pub ifd0: Vec<IfdEntry>,
}

impl ExifData {
    /// The entry with the given tag
    pub fn get(&self, tag: u16) -> Option<&IfdEntry> {
        self.ifd0.iter().find(|e| e.tag == tag)
    }
}

/// APP14 Adobe segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdobeHeader {
    /// DCT encoder version
    pub version: u16,
    /// APP14 flags 0
    pub flags0: u16,
    /// APP14 flags 1
    pub flags1: u16,
    /// 0: none (RGB or CMYK), 1: YCbCr, 2: YCCK
    pub transform: u8,
}

/// One DQT table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationTable {
    /// Element precision in bits, 8 or 16
    pub precision: u8,
    /// Destination identifier
    pub destination: u8,
    /// 64 values in zig-zag order
    pub values: Vec<u16>,
}

/// One DHT table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    /// 0: DC or lossless, 1: AC
    pub class: u8,
    /// Destination identifier
    pub destination: u8,
    /// Number of codes of each length 1..=16
    pub code_counts: [u8; 16],
    /// Symbols in code order
    pub symbols: Vec<u8>,
}

/// One DAC conditioning entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithmeticConditioning {
    /// 0: DC or lossless, 1: AC
    pub class: u8,
    /// Destination identifier
    pub destination: u8,
    /// Conditioning value
    pub value: u8,
}

/// One component of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComponent {
    /// Component identifier
    pub id: u8,
    /// Horizontal sampling factor
    pub horizontal_sampling: u8,
    /// Vertical sampling factor
    pub vertical_sampling: u8,
    /// Quantization table destination
    pub quantization_table: u8,
}

/// SOFn frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// The SOFn marker, identifying the coding process
    pub marker: u8,
    /// Sample precision in bits
    pub precision: u8,
    /// Number of lines
    pub height: u16,
    /// Samples per line
    pub width: u16,
    /// Image components
    pub components: Vec<FrameComponent>,
}

/// One component selector of a scan header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanComponent {
    /// Component selector
    pub id: u8,
    /// DC entropy table destination
    pub dc_table: u8,
    /// AC entropy table destination
    pub ac_table: u8,
}

/// SOS scan header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeader {
    /// Components in the scan
    pub components: Vec<ScanComponent>,
    /// Start of spectral selection
    pub spectral_start: u8,
    /// End of spectral selection
    pub spectral_end: u8,
    /// Successive approximation bit position high
    pub approximation_high: u8,
    /// Successive approximation bit position low
    pub approximation_low: u8,
}

/// Error for an APPn payload whose identifier has no decoder
pub(crate) fn unknown_identifier(cursor: &ByteCursor<'_>, marker: u8) -> Error {
    let rest = cursor.rest();
    let id = match memchr::memchr(0, rest) {
        Some(nul) if nul <= 32 => &rest[..nul],
        _ => &rest[..rest.len().min(8)],
    };
    Error::SignatureMismatch {
        offset: cursor.position(),
        expected: format!("a known APP{} identifier", marker - 0xE0),
        found: format!("{:?}", String::from_utf8_lossy(id)),
    }
}

fn identifier(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>, id: &'static [u8]) -> Result<()> {
    node.field_with(c, "Identifier", |c| c.expect_bytes(id), |b| {
        String::from_utf8_lossy(trim_whitespace(b)).into_owned()
    })?;
    Ok(())
}

/// APP0: JFIF header or JFXX extension
pub(crate) fn decode_app0(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    if c.starts_with(JFIF_ID) {
        node.set_label("JFIF Header");
        identifier(node, c, JFIF_ID)?;
        let version_major = node.field(c, "Major Version", |c| c.read_u8())?;
        let version_minor = node.field(c, "Minor Version", |c| c.read_u8())?;
        let density_units = node.field_with(c, "Density Units", |c| c.read_u8(), |u| {
            match u {
                0 => "aspect ratio",
                1 => "dots per inch",
                2 => "dots per cm",
                _ => "unknown",
            }
            .to_string()
        })?;
        let x_density = node.field(c, "X Density", |c| c.read_u16_be())?;
        let y_density = node.field(c, "Y Density", |c| c.read_u16_be())?;
        let thumbnail_width = node.field(c, "Thumbnail Width", |c| c.read_u8())?;
        let thumbnail_height = node.field(c, "Thumbnail Height", |c| c.read_u8())?;
        let thumbnail = 3 * thumbnail_width as usize * thumbnail_height as usize;
        if thumbnail > 0 {
            node.bytes(c, "Thumbnail", thumbnail)?;
        }
        node.set_value(format!("version {}.{:02}", version_major, version_minor));
        return Ok(JpegSegment::Jfif(JfifHeader {
            version_major,
            version_minor,
            density_units,
            x_density,
            y_density,
            thumbnail_width,
            thumbnail_height,
        }));
    }

    if c.starts_with(JFXX_ID) {
        node.set_label("JFXX Extension");
        identifier(node, c, JFXX_ID)?;
        let extension_code = node.field_with(c, "Extension Code", |c| c.read_u8(), |code| {
            match code {
                0x10 => "JPEG thumbnail",
                0x11 => "palette thumbnail",
                0x13 => "RGB thumbnail",
                _ => "unknown",
            }
            .to_string()
        })?;
        let thumbnail = c.remaining();
        if thumbnail > 0 {
            node.bytes(c, "Thumbnail", thumbnail)?;
        }
        return Ok(JpegSegment::Jfxx(JfxxExtension { extension_code }));
    }

    Err(unknown_identifier(c, 0xE0))
}

/// APP1: Exif or XMP
pub(crate) fn decode_app1(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    if c.starts_with(EXIF_ID) {
        node.set_label("Exif");
        identifier(node, c, EXIF_ID)?;
        return decode_tiff(node, c).map(JpegSegment::Exif);
    }

    if c.starts_with(XMP_ID) {
        node.set_label("XMP");
        identifier(node, c, XMP_ID)?;
        let len = c.remaining();
        let packet = node.bytes(c, "XMP Packet", len)?;
        return Ok(JpegSegment::Xmp(String::from_utf8_lossy(packet).into_owned()));
    }

    Err(unknown_identifier(c, 0xE1))
}

/// TIFF header and IFD0 of an Exif payload
fn decode_tiff(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<ExifData> {
    let tiff = *c;
    let tiff_base = c.position();

    let mut header = ComponentBuilder::at("TIFF Header", c);
    let endian = header.field_with(
        c,
        "Byte Order",
        |c| {
            let order = c.peek_bytes(2)?;
            let endian = match order {
                b"II" => Endian::Little,
                b"MM" => Endian::Big,
                _ => return Err(Error::signature_mismatch(c.position(), b"II", order)),
            };
            c.skip(2)?;
            Ok(endian)
        },
        |e| e.as_str().to_string(),
    )?;
    header.field(c, "Magic", |c| {
        let offset = c.position();
        let magic = c.read_u16(endian)?;
        if magic != 42 {
            return Err(Error::malformed(offset, format!("TIFF magic is {} instead of 42", magic)));
        }
        Ok(magic)
    })?;
    let ifd_offset = header.hex_field(c, "IFD0 Offset", |c| c.read_u32(endian))?;
    node.push(header.finish(c)?)?;

    let ifd_start = tiff_base + ifd_offset as u64;
    if ifd_start < c.position() {
        return Err(Error::inconsistent(
            tiff_base,
            format!("IFD0 offset {:#x} points into the TIFF header", ifd_offset),
        ));
    }
    c.skip((ifd_start - c.position()) as usize)?;

    let mut ifd = ComponentBuilder::at("IFD0", c);
    let count = ifd.field(c, "Entry Count", |c| c.read_u16(endian))?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut entry = ComponentBuilder::at("Entry", c);
        let tag = entry.field_with(c, "Tag", |c| c.read_u16(endian), |t| {
            format!("{:#06x} ({})", t, tag_name(*t))
        })?;
        let field_type = entry.field_with(c, "Type", |c| c.read_u16(endian), |t| {
            type_name(*t).to_string()
        })?;
        let count = entry.field(c, "Count", |c| c.read_u32(endian))?;
        let raw = entry.field_with(c, "Value", |c| c.read_array::<4>(), |b| {
            crate::error::hex_bytes(b)
        })?;
        let value_offset = match endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        };
        let value = render_value(field_type, count, raw, endian, &tiff, tiff_base);
        entry.set_value(format!(
            "{} = {}",
            tag_name(tag),
            value.as_deref().unwrap_or("<unresolved>")
        ));
        ifd.push(entry.finish(c)?)?;
        entries.push(IfdEntry {
            tag,
            field_type,
            count,
            value_offset,
            value,
        });
    }
    ifd.hex_field(c, "Next IFD Offset", |c| c.read_u32(endian))?;
    ifd.set_value(format!("{} entries", count));
    node.push(ifd.finish(c)?)?;

    Ok(ExifData {
        endian,
        ifd0: entries,
    })
}

fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

fn type_name(field_type: u16) -> &'static str {
    match field_type {
        1 => "BYTE",
        2 => "ASCII",
        3 => "SHORT",
        4 => "LONG",
        5 => "RATIONAL",
        6 => "SBYTE",
        7 => "UNDEFINED",
        8 => "SSHORT",
        9 => "SLONG",
        10 => "SRATIONAL",
        11 => "FLOAT",
        12 => "DOUBLE",
        _ => "unknown",
    }
}

fn tag_name(tag: u16) -> &'static str {
    match tag {
        0x010E => "ImageDescription",
        0x010F => "Make",
        0x0110 => "Model",
        0x0112 => "Orientation",
        0x011A => "XResolution",
        0x011B => "YResolution",
        0x0128 => "ResolutionUnit",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x013B => "Artist",
        0x0213 => "YCbCrPositioning",
        0x8298 => "Copyright",
        0x8769 => "ExifIFDPointer",
        0x8825 => "GPSInfoIFDPointer",
        _ => "unknown",
    }
}

/// Renders an IFD value, following its offset into the TIFF structure when needed
fn render_value(
    field_type: u16,
    count: u32,
    raw: [u8; 4],
    endian: Endian,
    tiff: &ByteCursor<'_>,
    tiff_base: u64,
) -> Option<String> {
    let total = type_size(field_type)?.checked_mul(count as usize)?;
    let bytes: &[u8] = if total <= 4 {
        &raw[..total]
    } else {
        let offset = match endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        } as u64;
        let start = tiff_base + offset;
        tiff.window(start, start + total as u64).ok()?.rest()
    };

    let mut c = ByteCursor::new(bytes);
    match (field_type, count) {
        (2, _) => Some(String::from_utf8_lossy(trim_whitespace(bytes)).into_owned()),
        (3, 1) => c.read_u16(endian).ok().map(|v| v.to_string()),
        (4, 1) => c.read_u32(endian).ok().map(|v| v.to_string()),
        (5, 1) => {
            let numerator = c.read_u32(endian).ok()?;
            let denominator = c.read_u32(endian).ok()?;
            Some(format!("{}/{}", numerator, denominator))
        }
        _ => Some(format!("{} values", count)),
    }
}

/// APP14 Adobe
pub(crate) fn decode_app14(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    if !c.starts_with(ADOBE_ID) {
        return Err(unknown_identifier(c, 0xEE));
    }
    node.set_label("Adobe");
    identifier(node, c, ADOBE_ID)?;
    let version = node.field(c, "Version", |c| c.read_u16_be())?;
    let flags0 = node.hex_field(c, "Flags 0", |c| c.read_u16_be())?;
    let flags1 = node.hex_field(c, "Flags 1", |c| c.read_u16_be())?;
    let transform = node.field_with(c, "Color Transform", |c| c.read_u8(), |t| {
        match t {
            0 => "none",
            1 => "YCbCr",
            2 => "YCCK",
            _ => "unknown",
        }
        .to_string()
    })?;
    Ok(JpegSegment::Adobe(AdobeHeader {
        version,
        flags0,
        flags1,
        transform,
    }))
}

/// DQT: one or more quantization tables
pub(crate) fn decode_dqt(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let mut tables = Vec::new();
    while !c.is_eof() {
        let mut table = ComponentBuilder::at("Quantization Table", c);
        let pq_tq = table.field_with(c, "Precision And Destination", |c| c.read_u8(), |v| {
            format!("{}-bit, table {}", if v >> 4 == 0 { 8 } else { 16 }, v & 0x0F)
        })?;
        let precision = pq_tq >> 4;
        if precision > 1 {
            return Err(Error::malformed(
                table.start(),
                format!("quantization table precision {} is neither 0 nor 1", precision),
            ));
        }
        let values = table.field_with(
            c,
            "Values",
            |c| {
                (0..64)
                    .map(|_| match precision {
                        0 => c.read_u8().map(u16::from),
                        _ => c.read_u16_be(),
                    })
                    .collect::<Result<Vec<u16>>>()
            },
            |v| preview_values(v),
        )?;
        table.set_value(format!("table {}", pq_tq & 0x0F));
        node.push(table.finish(c)?)?;
        tables.push(QuantizationTable {
            precision: if precision == 0 { 8 } else { 16 },
            destination: pq_tq & 0x0F,
            values,
        });
    }
    Ok(JpegSegment::Dqt(tables))
}

fn preview_values(values: &[u16]) -> String {
    let head: Vec<String> = values.iter().take(8).map(u16::to_string).collect();
    if values.len() > 8 {
        format!("{} ...", head.join(" "))
    } else {
        head.join(" ")
    }
}

/// DHT: one or more Huffman tables
pub(crate) fn decode_dht(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let mut tables = Vec::new();
    while !c.is_eof() {
        let mut table = ComponentBuilder::at("Huffman Table", c);
        let tc_th = table.field_with(c, "Class And Destination", |c| c.read_u8(), |v| {
            format!("{} table {}", if v >> 4 == 0 { "DC" } else { "AC" }, v & 0x0F)
        })?;
        let class = tc_th >> 4;
        if class > 1 {
            return Err(Error::malformed(
                table.start(),
                format!("Huffman table class {} is neither 0 nor 1", class),
            ));
        }
        let code_counts = table.field_with(c, "Code Counts", |c| c.read_array::<16>(), |counts| {
            counts.iter().map(u8::to_string).collect::<Vec<_>>().join(" ")
        })?;
        let total: usize = code_counts.iter().map(|&n| n as usize).sum();
        let symbols = table.bytes(c, "Symbols", total)?.to_vec();
        table.set_value(format!(
            "{} table {}, {} symbols",
            if class == 0 { "DC" } else { "AC" },
            tc_th & 0x0F,
            total
        ));
        node.push(table.finish(c)?)?;
        tables.push(HuffmanTable {
            class,
            destination: tc_th & 0x0F,
            code_counts,
            symbols,
        });
    }
    Ok(JpegSegment::Dht(tables))
}

/// DAC: arithmetic coding conditioning entries
pub(crate) fn decode_dac(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let mut entries = Vec::new();
    while !c.is_eof() {
        let mut entry = ComponentBuilder::at("Conditioning", c);
        let tc_tb = entry.hex_field(c, "Class And Destination", |c| c.read_u8())?;
        let value = entry.field(c, "Value", |c| c.read_u8())?;
        node.push(entry.finish(c)?)?;
        entries.push(ArithmeticConditioning {
            class: tc_tb >> 4,
            destination: tc_tb & 0x0F,
            value,
        });
    }
    Ok(JpegSegment::Dac(entries))
}

/// SOFn: frame header
pub(crate) fn decode_sof(
    marker: u8,
    node: &mut ComponentBuilder,
    c: &mut ByteCursor<'_>,
) -> Result<JpegSegment> {
    let precision = node.field(c, "Sample Precision", |c| c.read_u8())?;
    let height = node.field(c, "Lines", |c| c.read_u16_be())?;
    let width = node.field(c, "Samples Per Line", |c| c.read_u16_be())?;
    let count = node.field(c, "Component Count", |c| c.read_u8())?;

    let mut components = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut component = ComponentBuilder::at("Component", c);
        let id = component.field(c, "Identifier", |c| c.read_u8())?;
        let sampling = component.field_with(c, "Sampling Factors", |c| c.read_u8(), |s| {
            format!("{}x{}", s >> 4, s & 0x0F)
        })?;
        let quantization_table = component.field(c, "Quantization Table", |c| c.read_u8())?;
        component.set_value(format!("id {}", id));
        node.push(component.finish(c)?)?;
        components.push(FrameComponent {
            id,
            horizontal_sampling: sampling >> 4,
            vertical_sampling: sampling & 0x0F,
            quantization_table,
        });
    }

    node.set_value(format!("{}x{}, {} components", width, height, count));
    Ok(JpegSegment::Sof(FrameHeader {
        marker,
        precision,
        height,
        width,
        components,
    }))
}

/// SOS: scan header
pub(crate) fn decode_sos(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let count = node.field(c, "Component Count", |c| c.read_u8())?;
    let mut components = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut component = ComponentBuilder::at("Component", c);
        let id = component.field(c, "Selector", |c| c.read_u8())?;
        let tables = component.field_with(c, "Entropy Tables", |c| c.read_u8(), |t| {
            format!("DC {} / AC {}", t >> 4, t & 0x0F)
        })?;
        node.push(component.finish(c)?)?;
        components.push(ScanComponent {
            id,
            dc_table: tables >> 4,
            ac_table: tables & 0x0F,
        });
    }
    let spectral_start = node.field(c, "Spectral Selection Start", |c| c.read_u8())?;
    let spectral_end = node.field(c, "Spectral Selection End", |c| c.read_u8())?;
    let approximation = node.hex_field(c, "Successive Approximation", |c| c.read_u8())?;
    Ok(JpegSegment::Sos(ScanHeader {
        components,
        spectral_start,
        spectral_end,
        approximation_high: approximation >> 4,
        approximation_low: approximation & 0x0F,
    }))
}

/// DRI: restart interval
pub(crate) fn decode_dri(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    node.field(c, "Restart Interval", |c| c.read_u16_be())
        .map(JpegSegment::Dri)
}

/// DNL: number of lines
pub(crate) fn decode_dnl(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    node.field(c, "Number Of Lines", |c| c.read_u16_be())
        .map(JpegSegment::Dnl)
}

/// COM: free text
pub(crate) fn decode_com(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let text = node.field_with(
        c,
        "Text",
        |c| {
            let n = c.remaining();
            c.read_ascii(n)
        },
        |s| format!("{:?}", s),
    )?;
    Ok(JpegSegment::Com(text))
}
