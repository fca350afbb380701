//! JPEG marker stream decoding.
//!
//! A JPEG file is a sequence of `FF xx` markers. A handful of markers stand
//! alone (SOI, EOI, TEM, RST0-RST7); every other marker is followed by a
//! big-endian length that counts itself, then `length - 2` payload bytes.
//! Any number of `FF` fill bytes may precede a marker.
//!
//! Each payload is sliced into its own cursor before it is decoded, so a
//! malformed APPn block or table is kept as raw bytes with an anomaly while
//! the marker stream carries on at the next segment. After an SOS header the
//! entropy-coded scan data runs until the next `FF` that is neither a stuffed
//! `FF 00` nor a restart marker.

mod icc;
mod photoshop;
mod segment;

pub use icc::{IccChunk, IccHeader, IccTag, ICC_HEADER_LEN, ICC_ID};
pub use photoshop::{PhotoshopResource, PHOTOSHOP_ID, RESOURCE_SIGNATURE};
pub use segment::{
    AdobeHeader, ArithmeticConditioning, ExifData, FrameComponent, FrameHeader, HuffmanTable,
    IfdEntry, JfifHeader, JfxxExtension, QuantizationTable, ScanComponent, ScanHeader, ADOBE_ID,
    EXIF_ID, JFIF_ID, JFXX_ID, XMP_ID,
};

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, AnomalyKind, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::{debug, trace};

/// Start of image
pub const SOI: [u8; 2] = [0xFF, 0xD8];

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_TEM: u8 = 0x01;

/// Decoded payload of one marker segment
#[derive(Debug, Clone, PartialEq)]
pub enum JpegSegment {
    /// Start of image
    Soi,
    /// End of image
    Eoi,
    /// Temporary private use marker
    Tem,
    /// Restart marker with its modulo-8 index
    Restart(u8),
    /// APP0 JFIF header
    Jfif(JfifHeader),
    /// APP0 JFIF extension
    Jfxx(JfxxExtension),
    /// APP1 Exif
    Exif(ExifData),
    /// APP1 XMP packet
    Xmp(String),
    /// APP2 ICC profile chunk
    Icc(IccChunk),
    /// APP13 Photoshop image resources
    Photoshop(Vec<PhotoshopResource>),
    /// APP14 Adobe
    Adobe(AdobeHeader),
    /// Quantization tables
    Dqt(Vec<QuantizationTable>),
    /// Huffman tables
    Dht(Vec<HuffmanTable>),
    /// Arithmetic coding conditioning
    Dac(Vec<ArithmeticConditioning>),
    /// Frame header of any SOFn
    Sof(FrameHeader),
    /// Scan header
    Sos(ScanHeader),
    /// Restart interval
    Dri(u16),
    /// Number of lines
    Dnl(u16),
    /// Comment text
    Com(String),
    /// A length-bearing marker with no payload decoder
    Reserved,
    /// A payload that failed to decode and was kept as raw bytes
    Unparsed,
}

/// One marker together with its decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct JpegMarkerSegment {
    /// Absolute offset of the marker, fill bytes included
    pub offset: u64,
    /// Marker code, the byte after `FF`
    pub marker: u8,
    /// Declared segment length, for markers that carry one
    pub length: Option<u16>,
    /// Decoded payload
    pub segment: JpegSegment,
}

/// All segments of a JPEG file in stream order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JpegImage {
    /// Segments, including restart markers inside scans
    pub segments: Vec<JpegMarkerSegment>,
    /// Spans of entropy-coded scan data
    pub entropy_coded: Vec<Span>,
}

impl JpegImage {
    /// The first frame header
    pub fn frame(&self) -> Option<&FrameHeader> {
        self.segments.iter().find_map(|s| match &s.segment {
            JpegSegment::Sof(frame) => Some(frame),
            _ => None,
        })
    }

    /// Width and height from the first frame header
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.frame().map(|f| (f.width, f.height))
    }

    /// Marker codes in stream order
    pub fn markers(&self) -> impl Iterator<Item = u8> + '_ {
        self.segments.iter().map(|s| s.marker)
    }
}

/// Short mnemonic of a marker code, such as `SOI` or `APP13`
pub fn marker_name(marker: u8) -> String {
    match marker {
        0x01 => "TEM".to_string(),
        0xC4 => "DHT".to_string(),
        0xC8 => "JPG".to_string(),
        0xCC => "DAC".to_string(),
        0xC0..=0xCF => format!("SOF{}", marker - 0xC0),
        0xD0..=0xD7 => format!("RST{}", marker - 0xD0),
        0xD8 => "SOI".to_string(),
        0xD9 => "EOI".to_string(),
        0xDA => "SOS".to_string(),
        0xDB => "DQT".to_string(),
        0xDC => "DNL".to_string(),
        0xDD => "DRI".to_string(),
        0xDE => "DHP".to_string(),
        0xDF => "EXP".to_string(),
        0xE0..=0xEF => format!("APP{}", marker - 0xE0),
        0xF0..=0xFD => format!("JPG{}", marker - 0xF0),
        0xFE => "COM".to_string(),
        _ => "RES".to_string(),
    }
}

fn segment_label(marker: u8) -> &'static str {
    match marker {
        0x01 => "Temporary Marker",
        0xC4 => "Define Huffman Table",
        0xCC => "Define Arithmetic Coding Conditioning",
        0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => "Start Of Frame",
        0xD0..=0xD7 => "Restart Marker",
        0xD8 => "Start Of Image",
        0xD9 => "End Of Image",
        0xDA => "Start Of Scan",
        0xDB => "Define Quantization Table",
        0xDC => "Define Number Of Lines",
        0xDD => "Define Restart Interval",
        0xE0..=0xEF => "Application Segment",
        0xFE => "Comment",
        _ => "Reserved Segment",
    }
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, MARKER_SOI | MARKER_EOI | MARKER_TEM | 0xD0..=0xD7)
}

/// Decoder for JPEG images
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegDecoder;

impl Decoder for JpegDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Jpeg
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let mut cursor = ByteCursor::new(&data);
        let mut image = JpegImage::default();

        let magic = &data[..data.len().min(2)];
        if magic != SOI {
            return Err(Error::signature_mismatch(0, &SOI, magic));
        }

        let mut ended = false;
        while !cursor.is_eof() {
            let offset = cursor.position();
            let rest = cursor.rest();
            let fill = rest.iter().take_while(|&&b| b == 0xFF).count();
            let at_marker = fill > 0 && rest.get(fill).map_or(false, |&b| b != 0x00);

            if !at_marker {
                let len = unrecognized_len(rest);
                let (bytes, span) = cursor.spanned(|c| c.read_bytes(len))?;
                let anomaly = Anomaly::new(
                    offset,
                    AnomalyKind::SignatureMismatch,
                    format!("{} bytes at {:#x} are not a marker segment", len, offset),
                );
                out.insert(FileComponent::raw("Unrecognized Data", span, bytes).with_anomaly(anomaly))?;
                continue;
            }

            let segment = decode_segment(&mut cursor, &mut out)?;
            trace!("{} at {:#x}", marker_name(segment.marker), offset);
            let marker = segment.marker;
            image.segments.push(segment);

            if marker == MARKER_SOS {
                scan_entropy_coded(&mut cursor, &mut out, &mut image)?;
            } else if marker == MARKER_EOI {
                ended = true;
                break;
            }
        }

        if ended && !cursor.is_eof() {
            let offset = cursor.position();
            let len = cursor.remaining();
            let (bytes, span) = cursor.spanned(|c| c.read_bytes(len))?;
            let anomaly = Anomaly::inconsistent(
                offset,
                format!("{} bytes follow the end of image marker", len),
            );
            out.insert(FileComponent::raw("Trailing Data", span, bytes).with_anomaly(anomaly))?;
        }
        if !ended {
            out.anomaly(Anomaly::new(
                data.len() as u64,
                AnomalyKind::MissingTerminator,
                "no end of image marker before the end of data",
            ));
        }

        debug!(
            "JPEG with {} segments and {} scans",
            image.segments.len(),
            image.entropy_coded.len()
        );
        Ok(out.finish(Document::Jpeg(image)))
    }
}

/// Length of a run of bytes that do not start a marker
///
/// The run covers any leading `FF` bytes (and the `00` that disqualifies
/// them) and stops before the next `FF`.
fn unrecognized_len(rest: &[u8]) -> usize {
    let ff = rest.iter().take_while(|&&b| b == 0xFF).count();
    let skip = (ff + usize::from(ff > 0)).min(rest.len());
    skip + memchr::memchr(0xFF, &rest[skip..]).unwrap_or(rest.len() - skip)
}

fn decode_segment(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<JpegMarkerSegment> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Segment", cursor);
    let marker = node.field_with(
        cursor,
        "Marker",
        |c| {
            while c.peek_u8()? == 0xFF {
                c.skip(1)?;
            }
            c.read_u8()
        },
        |m| format!("FF{:02X} ({})", m, marker_name(*m)),
    )?;
    node.set_label(segment_label(marker));
    node.set_value(marker_name(marker));

    if is_standalone(marker) {
        out.insert(node.finish(cursor)?)?;
        let segment = match marker {
            MARKER_SOI => JpegSegment::Soi,
            MARKER_EOI => JpegSegment::Eoi,
            MARKER_TEM => JpegSegment::Tem,
            rst => JpegSegment::Restart(rst - 0xD0),
        };
        return Ok(JpegMarkerSegment {
            offset,
            marker,
            length: None,
            segment,
        });
    }

    let length_offset = cursor.position();
    let length = node.field(cursor, "Length", |c| c.read_u16_be())?;
    if length < 2 {
        return Err(Error::malformed(
            length_offset,
            format!("{} segment length {} is shorter than the length field", marker_name(marker), length),
        ));
    }
    let payload = cursor.sub_cursor(length as usize - 2)?;
    let segment = node
        .nested("Payload", payload, |n, c| {
            let segment = decode_payload(marker, n, c)?;
            let left = c.remaining();
            if left > 0 {
                n.bytes(c, "Unreferenced Data", left)?;
            }
            Ok(segment)
        })?
        .unwrap_or(JpegSegment::Unparsed);

    out.insert(node.finish(cursor)?)?;
    Ok(JpegMarkerSegment {
        offset,
        marker,
        length: Some(length),
        segment,
    })
}

fn decode_payload(marker: u8, node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    match marker {
        0xE0 => segment::decode_app0(node, c),
        0xE1 => segment::decode_app1(node, c),
        0xE2 => icc::decode_app2(node, c),
        0xED => photoshop::decode_app13(node, c),
        0xEE => segment::decode_app14(node, c),
        0xE3..=0xEF => Err(segment::unknown_identifier(c, marker)),
        0xC4 => segment::decode_dht(node, c),
        0xCC => segment::decode_dac(node, c),
        0xC8 => reserved(node, c),
        0xC0..=0xCF => segment::decode_sof(marker, node, c),
        0xDA => segment::decode_sos(node, c),
        0xDB => segment::decode_dqt(node, c),
        0xDC => segment::decode_dnl(node, c),
        0xDD => segment::decode_dri(node, c),
        0xFE => segment::decode_com(node, c),
        _ => reserved(node, c),
    }
}

fn reserved(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    let len = c.remaining();
    node.bytes(c, "Data", len)?;
    Ok(JpegSegment::Reserved)
}

/// Consumes the scan data that follows an SOS header
fn scan_entropy_coded(
    cursor: &mut ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    image: &mut JpegImage,
) -> Result<()> {
    let start = cursor.position();
    let data = cursor.rest();
    let mut node = ComponentBuilder::new("Entropy-Coded Data", start);
    let mut restarts = 0usize;

    let mut i = 0;
    let end = loop {
        let Some(found) = memchr::memchr(0xFF, &data[i..]) else {
            break data.len();
        };
        let at = i + found;
        match data.get(at + 1) {
            None => break data.len(),
            Some(0x00) => i = at + 2,
            Some(&m @ 0xD0..=0xD7) => {
                let offset = start + at as u64;
                node.push(FileComponent::leaf("Restart Marker", Span::new(offset, 2)).with_value(marker_name(m)))?;
                image.segments.push(JpegMarkerSegment {
                    offset,
                    marker: m,
                    length: None,
                    segment: JpegSegment::Restart(m - 0xD0),
                });
                restarts += 1;
                i = at + 2;
            }
            Some(_) => break at,
        }
    };

    if end == 0 {
        return Ok(());
    }
    cursor.skip(end)?;
    node.set_value(format!("{} bytes, {} restart markers", end, restarts));
    let component = node.finish(cursor)?;
    image.entropy_coded.push(component.span());
    out.insert(component)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Endian;
    use pretty_assertions::assert_eq;

    fn seg(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&(payload.len() as u16 + 2).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn jfif(thumb: (u8, u8)) -> Vec<u8> {
        let mut p = b"JFIF\0".to_vec();
        p.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, thumb.0, thumb.1]);
        p
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        JpegDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    fn image(doc: &FileFormat) -> &JpegImage {
        doc.document().as_jpeg().unwrap()
    }

    fn minimal_image() -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend(seg(0xE0, &jfif((0, 0))));
        let mut dqt = vec![0x00];
        dqt.extend(1..=64u8);
        data.extend(seg(0xDB, &dqt));
        data.extend(seg(0xC0, &[8, 0x00, 0x10, 0x00, 0x20, 1, 1, 0x11, 0]));
        let mut dht = vec![0x00, 1];
        dht.extend([0u8; 15]);
        dht.push(0x05);
        data.extend(seg(0xC4, &dht));
        data.extend(seg(0xDA, &[1, 1, 0x00, 0, 63, 0]));
        data.extend([0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        data.extend([0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_minimal_image() {
        let doc = decode(minimal_image()).unwrap();
        let img = image(&doc);

        let markers: Vec<u8> = img.markers().collect();
        assert_eq!(markers, vec![0xD8, 0xE0, 0xDB, 0xC0, 0xC4, 0xDA, 0xD0, 0xD9]);
        assert_eq!(img.dimensions(), Some((32, 16)));
        assert_eq!(img.entropy_coded, vec![Span::new(134, 7)]);
        assert!(doc.anomalies().is_empty());
        doc.validate().unwrap();

        let spans: Vec<Span> = doc.components().map(|c| c.span()).collect();
        assert_eq!(
            spans,
            vec![
                Span::new(0, 2),
                Span::new(2, 18),
                Span::new(20, 69),
                Span::new(89, 13),
                Span::new(102, 22),
                Span::new(124, 10),
                Span::new(134, 7),
                Span::new(141, 2),
            ]
        );

        let app0 = doc.top_level_at(2).unwrap();
        assert_eq!(app0.label(), Some("Application Segment"));
        assert_eq!(app0.value(), Some("APP0"));
        let header = app0.child("JFIF Header").unwrap();
        assert_eq!(header.span(), Span::new(6, 14));
        assert_eq!(header.value(), Some("version 1.01"));

        let scan = doc.top_level_at(134).unwrap();
        let rst = scan.child("Restart Marker").unwrap();
        assert_eq!(rst.span(), Span::new(138, 2));
        assert_eq!(rst.value(), Some("RST0"));

        match &img.segments[4].segment {
            JpegSegment::Dht(tables) => assert_eq!(tables[0].symbols, vec![0x05]),
            other => panic!("expected DHT, got {:?}", other),
        }
        match &img.segments[2].segment {
            JpegSegment::Dqt(tables) => {
                assert_eq!(tables[0].precision, 8);
                assert_eq!(tables[0].values[63], 64);
            }
            other => panic!("expected DQT, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_soi() {
        let err = decode(vec![0xFF, 0xD9]).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
        let err = decode(vec![0xFF]).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_unknown_application_segment_is_kept_raw() {
        let mut data = SOI.to_vec();
        data.extend(seg(0xE5, b"Foo\0bar"));
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let img = image(&doc);

        assert_eq!(img.segments[1].segment, JpegSegment::Unparsed);
        assert_eq!(img.segments[2].segment, JpegSegment::Eoi);
        let payload = doc.top_level_at(2).unwrap().child("Payload").unwrap();
        assert_eq!(payload.span(), Span::new(6, 7));
        assert_eq!(payload.anomalies()[0].kind, AnomalyKind::SignatureMismatch);
        assert!(payload.anomalies()[0].message.contains("APP5"));
        assert_eq!(doc.anomalies().len(), 1);
    }

    #[test]
    fn test_truncated_segment() {
        let mut data = SOI.to_vec();
        data.extend([0xFF, 0xE0, 0x00, 0x10, b'J', b'F']);
        let err = decode(data).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedEndOfData {
                offset: 6,
                needed: 14,
                available: 2
            }
        ));
    }

    #[test]
    fn test_length_shorter_than_field() {
        let mut data = SOI.to_vec();
        data.extend([0xFF, 0xFE, 0x00, 0x01, 0xFF, 0xD9]);
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 4, .. }));
    }

    #[test]
    fn test_trailing_data() {
        let mut data = SOI.to_vec();
        data.extend([0xFF, 0xD9]);
        data.extend(b"junk");
        let doc = decode(data).unwrap();
        let trailing = doc.top_level_at(4).unwrap();
        assert_eq!(trailing.label(), Some("Trailing Data"));
        assert_eq!(trailing.span(), Span::new(4, 4));
        assert_eq!(
            trailing.anomalies()[0].kind,
            AnomalyKind::StructuralInconsistency
        );
    }

    #[test]
    fn test_fill_bytes_belong_to_marker() {
        let mut data = SOI.to_vec();
        data.extend([0xFF, 0xFF, 0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let eoi = doc.top_level_at(2).unwrap();
        assert_eq!(eoi.label(), Some("End Of Image"));
        assert_eq!(eoi.span(), Span::new(2, 4));
        assert_eq!(eoi.child("Marker").unwrap().value(), Some("FFD9 (EOI)"));
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_garbage_between_segments() {
        let mut data = SOI.to_vec();
        data.extend(b"xyz");
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let junk = doc.top_level_at(2).unwrap();
        assert_eq!(junk.label(), Some("Unrecognized Data"));
        assert_eq!(junk.span(), Span::new(2, 3));
        assert_eq!(image(&doc).segments.len(), 2);
    }

    #[test]
    fn test_missing_eoi() {
        let mut data = SOI.to_vec();
        data.extend(seg(0xFE, b"hello"));
        let doc = decode(data).unwrap();
        let img = image(&doc);
        assert_eq!(img.segments[1].segment, JpegSegment::Com("hello".to_string()));
        assert_eq!(doc.file_anomalies().len(), 1);
        assert_eq!(doc.file_anomalies()[0].kind, AnomalyKind::MissingTerminator);
    }

    fn exif_payload(endian: Endian) -> Vec<u8> {
        let u16b = |v: u16| match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        let u32b = |v: u32| match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        let mut p = b"Exif\0\0".to_vec();
        p.extend_from_slice(match endian {
            Endian::Little => b"II",
            Endian::Big => b"MM",
        });
        p.extend_from_slice(&u16b(42));
        p.extend_from_slice(&u32b(8));
        p.extend_from_slice(&u16b(2));
        // Make, ASCII, 6 values stored at offset 38
        p.extend_from_slice(&u16b(0x010F));
        p.extend_from_slice(&u16b(2));
        p.extend_from_slice(&u32b(6));
        p.extend_from_slice(&u32b(38));
        // Orientation, SHORT, inline
        p.extend_from_slice(&u16b(0x0112));
        p.extend_from_slice(&u16b(3));
        p.extend_from_slice(&u32b(1));
        p.extend_from_slice(&u16b(6));
        p.extend_from_slice(&[0, 0]);
        p.extend_from_slice(&u32b(0));
        p.extend_from_slice(b"Canon\0");
        p
    }

    #[test]
    fn test_exif_in_both_byte_orders() {
        for endian in [Endian::Little, Endian::Big] {
            let mut data = SOI.to_vec();
            data.extend(seg(0xE1, &exif_payload(endian)));
            data.extend([0xFF, 0xD9]);
            let doc = decode(data).unwrap();
            let exif = match &image(&doc).segments[1].segment {
                JpegSegment::Exif(exif) => exif.clone(),
                other => panic!("expected Exif, got {:?}", other),
            };
            assert_eq!(exif.endian, endian);
            assert_eq!(exif.ifd0.len(), 2);
            assert_eq!(exif.get(0x010F).unwrap().value.as_deref(), Some("Canon"));
            assert_eq!(exif.get(0x0112).unwrap().value.as_deref(), Some("6"));
            assert!(doc.anomalies().is_empty());

            let payload = doc.top_level_at(2).unwrap().child("Exif").unwrap();
            assert!(payload.child("TIFF Header").is_some());
            assert_eq!(payload.child("IFD0").unwrap().value(), Some("2 entries"));
        }
    }

    fn icc_payload(file_signature: &[u8; 4]) -> Vec<u8> {
        let mut profile = Vec::new();
        profile.extend_from_slice(&160u32.to_be_bytes());
        profile.extend_from_slice(b"lcms");
        profile.extend_from_slice(&[4, 0x20, 0, 0]);
        profile.extend_from_slice(b"mntr");
        profile.extend_from_slice(b"RGB ");
        profile.extend_from_slice(b"XYZ ");
        for part in [2024u16, 1, 2, 3, 4, 5] {
            profile.extend_from_slice(&part.to_be_bytes());
        }
        profile.extend_from_slice(file_signature);
        profile.extend_from_slice(b"APPL");
        profile.extend_from_slice(&0u32.to_be_bytes());
        profile.extend_from_slice(b"none");
        profile.extend_from_slice(&0u32.to_be_bytes());
        profile.extend_from_slice(&0u64.to_be_bytes());
        profile.extend_from_slice(&0u32.to_be_bytes());
        for v in [63190i32, 65536, 54061] {
            profile.extend_from_slice(&v.to_be_bytes());
        }
        profile.extend_from_slice(b"lcms");
        profile.extend_from_slice(&[0u8; 44]);
        assert_eq!(profile.len(), 128);
        profile.extend_from_slice(&1u32.to_be_bytes());
        profile.extend_from_slice(b"desc");
        profile.extend_from_slice(&144u32.to_be_bytes());
        profile.extend_from_slice(&16u32.to_be_bytes());
        profile.extend_from_slice(&[0u8; 16]);

        let mut p = ICC_ID.to_vec();
        p.extend_from_slice(&[1, 1]);
        p.extend(profile);
        p
    }

    #[test]
    fn test_icc_profile() {
        let mut data = SOI.to_vec();
        data.extend(seg(0xE2, &icc_payload(b"acsp")));
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let chunk = match &image(&doc).segments[1].segment {
            JpegSegment::Icc(chunk) => chunk.clone(),
            other => panic!("expected ICC, got {:?}", other),
        };
        let header = chunk.header.unwrap();
        assert_eq!(header.size, 160);
        assert_eq!(header.version, (4, 2, 0));
        assert_eq!(header.device_class, "mntr");
        assert_eq!(header.color_space, "RGB");
        assert_eq!(header.created, "2024-01-02 03:04:05");
        assert_eq!(chunk.tags.len(), 1);
        assert_eq!(chunk.tags[0].signature, "desc");
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_icc_bad_file_signature_is_contained() {
        let mut data = SOI.to_vec();
        data.extend(seg(0xE2, &icc_payload(b"xxxx")));
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let chunk = match &image(&doc).segments[1].segment {
            JpegSegment::Icc(chunk) => chunk.clone(),
            other => panic!("expected ICC, got {:?}", other),
        };
        assert_eq!(chunk.header, None);

        let chunk_node = doc.top_level_at(2).unwrap().child("ICC Profile Chunk").unwrap();
        let profile = chunk_node.child("ICC Profile").unwrap();
        assert_eq!(profile.anomalies()[0].kind, AnomalyKind::SignatureMismatch);
        assert_eq!(image(&doc).segments[2].segment, JpegSegment::Eoi);
    }

    #[test]
    fn test_photoshop_resources() {
        let mut p = PHOTOSHOP_ID.to_vec();
        p.extend_from_slice(b"8BIM");
        p.extend_from_slice(&0x0404u16.to_be_bytes());
        p.extend_from_slice(&[0, 0]);
        p.extend_from_slice(&3u32.to_be_bytes());
        p.extend_from_slice(&[1, 2, 3, 0]);
        p.extend_from_slice(b"8BIM");
        p.extend_from_slice(&0x040Cu16.to_be_bytes());
        p.extend_from_slice(&[1, b'T']);
        p.extend_from_slice(&2u32.to_be_bytes());
        p.extend_from_slice(&[9, 9]);

        let mut data = SOI.to_vec();
        data.extend(seg(0xED, &p));
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let resources = match &image(&doc).segments[1].segment {
            JpegSegment::Photoshop(resources) => resources.clone(),
            other => panic!("expected Photoshop, got {:?}", other),
        };
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].id, 0x0404);
        assert_eq!(resources[0].name, "");
        // SOI, marker, length, identifier, signature, id, name, pad, size
        assert_eq!(resources[0].data, Span::new(2 + 4 + 14 + 4 + 2 + 1 + 1 + 4, 3));
        assert_eq!(resources[1].name, "T");
        assert_eq!(resources[1].data.length, 2);
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_thumbnail_overflow_is_contained() {
        let mut data = SOI.to_vec();
        data.extend(seg(0xE0, &jfif((2, 2))));
        data.extend([0xFF, 0xD9]);
        let doc = decode(data).unwrap();
        let img = image(&doc);
        assert_eq!(img.segments[1].segment, JpegSegment::Unparsed);
        assert_eq!(img.segments[2].segment, JpegSegment::Eoi);
        let payload = doc.top_level_at(2).unwrap().child("Payload").unwrap();
        assert_eq!(payload.anomalies()[0].kind, AnomalyKind::Unparsed);
    }

    #[test]
    fn test_marker_names() {
        assert_eq!(marker_name(0xC2), "SOF2");
        assert_eq!(marker_name(0xED), "APP13");
        assert_eq!(marker_name(0xD3), "RST3");
        assert_eq!(marker_name(0xC4), "DHT");
    }
}
