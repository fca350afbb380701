//! Dalvik executable (DEX) decoding.
//!
//! A DEX file opens with a fixed 0x70-byte little-endian header that holds
//! the size and offset of every id table. The tables and the map list are
//! located through those offsets rather than read in sequence, so each is
//! decoded from its own window over the buffer and inserted at its declared
//! position. String data items are reached through the string id table.
//!
//! The Adler-32 checksum is shown but not verified.

use crate::component::{ComponentBuilder, Span};
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, AnomalyKind, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::formats::mutf8;
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::{debug, trace};

/// `dex\n`
pub const DEX_MAGIC: &[u8] = b"dex\n";

/// Size of the fixed header
pub const HEADER_SIZE: u32 = 0x70;

/// Endian tag of a little-endian file
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;

/// Endian tag of a byte-swapped file
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x7856_3412;

/// Value of an index field that refers to nothing
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

/// The fixed file header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DexHeader {
    /// Three-digit format version, such as `035`
    pub version: String,
    /// Adler-32 of everything after this field
    pub checksum: u32,
    /// SHA-1 of everything after this field
    pub signature: [u8; 20],
    /// Declared size of the whole file
    pub file_size: u32,
    /// Declared size of this header
    pub header_size: u32,
    /// Byte order tag
    pub endian_tag: u32,
    /// Size of the link section
    pub link_size: u32,
    /// Offset of the link section
    pub link_off: u32,
    /// Offset of the map list
    pub map_off: u32,
    /// Number of string ids
    pub string_ids_size: u32,
    /// Offset of the string id table
    pub string_ids_off: u32,
    /// Number of type ids
    pub type_ids_size: u32,
    /// Offset of the type id table
    pub type_ids_off: u32,
    /// Number of prototype ids
    pub proto_ids_size: u32,
    /// Offset of the prototype id table
    pub proto_ids_off: u32,
    /// Number of field ids
    pub field_ids_size: u32,
    /// Offset of the field id table
    pub field_ids_off: u32,
    /// Number of method ids
    pub method_ids_size: u32,
    /// Offset of the method id table
    pub method_ids_off: u32,
    /// Number of class definitions
    pub class_defs_size: u32,
    /// Offset of the class definition table
    pub class_defs_off: u32,
    /// Size of the data section
    pub data_size: u32,
    /// Offset of the data section
    pub data_off: u32,
}

/// One `proto_id_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexProtoId {
    /// String index of the short-form descriptor
    pub shorty_idx: u32,
    /// Type index of the return type
    pub return_type_idx: u32,
    /// Offset of the parameter type list, or 0
    pub parameters_off: u32,
}

/// One `field_id_item` or `method_id_item`
///
/// Both share a layout; for methods `type_or_proto_idx` indexes the
/// prototype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexMemberId {
    /// Type index of the defining class
    pub class_idx: u16,
    /// Type index (fields) or prototype index (methods)
    pub type_or_proto_idx: u16,
    /// String index of the name
    pub name_idx: u32,
}

/// One `class_def_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexClassDef {
    /// Type index of the class
    pub class_idx: u32,
    /// Access flags
    pub access_flags: u32,
    /// Type index of the superclass, or [`NO_INDEX`]
    pub superclass_idx: u32,
    /// Offset of the interface list, or 0
    pub interfaces_off: u32,
    /// String index of the source file name, or [`NO_INDEX`]
    pub source_file_idx: u32,
    /// Offset of the annotations directory, or 0
    pub annotations_off: u32,
    /// Offset of the class data, or 0
    pub class_data_off: u32,
    /// Offset of the static field initial values, or 0
    pub static_values_off: u32,
}

/// One `map_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexMapItem {
    /// Item type code
    pub item_type: u16,
    /// Number of items of this type
    pub size: u32,
    /// Offset of the first item
    pub offset: u32,
}

/// Decoded DEX header, id tables, strings and map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DexFile {
    /// The fixed header
    pub header: DexHeader,
    /// Decoded string data, indexed by string id
    pub strings: Vec<String>,
    /// Descriptor string index of each type id
    pub type_ids: Vec<u32>,
    /// Prototype ids
    pub proto_ids: Vec<DexProtoId>,
    /// Field ids
    pub field_ids: Vec<DexMemberId>,
    /// Method ids
    pub method_ids: Vec<DexMemberId>,
    /// Class definitions
    pub class_defs: Vec<DexClassDef>,
    /// Map list entries
    pub map: Vec<DexMapItem>,
}

impl DexFile {
    /// The string with the given index
    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    /// The descriptor of the given type id
    pub fn type_descriptor(&self, idx: u32) -> Option<&str> {
        let string_idx = *self.type_ids.get(idx as usize)?;
        self.string(string_idx)
    }

    /// Descriptors of all defined classes
    pub fn class_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.class_defs
            .iter()
            .filter_map(|c| self.type_descriptor(c.class_idx))
    }
}

/// Name of a map item type code
pub fn map_item_name(item_type: u16) -> &'static str {
    match item_type {
        0x0000 => "header_item",
        0x0001 => "string_id_item",
        0x0002 => "type_id_item",
        0x0003 => "proto_id_item",
        0x0004 => "field_id_item",
        0x0005 => "method_id_item",
        0x0006 => "class_def_item",
        0x0007 => "call_site_id_item",
        0x0008 => "method_handle_item",
        0x1000 => "map_list",
        0x1001 => "type_list",
        0x1002 => "annotation_set_ref_list",
        0x1003 => "annotation_set_item",
        0x2000 => "class_data_item",
        0x2001 => "code_item",
        0x2002 => "string_data_item",
        0x2003 => "debug_info_item",
        0x2004 => "annotation_item",
        0x2005 => "encoded_array_item",
        0x2006 => "annotations_directory_item",
        0xF000 => "hiddenapi_class_data_item",
        _ => "unknown",
    }
}

/// Position and shape of one fixed-size table
struct Table {
    label: &'static str,
    item: &'static str,
    offset: u32,
    count: u32,
    item_size: u64,
}

/// Decoder for DEX files
#[derive(Debug, Clone, Copy, Default)]
pub struct DexDecoder;

impl Decoder for DexDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Dex
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let whole = ByteCursor::new(&data);
        let mut cursor = whole;

        let magic = &data[..data.len().min(DEX_MAGIC.len())];
        if magic != DEX_MAGIC {
            return Err(Error::signature_mismatch(0, DEX_MAGIC, magic));
        }

        let header = decode_header(&mut cursor, &mut out)?;
        check_header(&header, data.len(), &mut out);
        debug!(
            "DEX {} with {} strings, {} classes",
            header.version, header.string_ids_size, header.class_defs_size
        );

        let mut dex = DexFile::default();

        let string_offsets = table(
            &whole,
            &mut out,
            Table {
                label: "String IDs",
                item: "String ID",
                offset: header.string_ids_off,
                count: header.string_ids_size,
                item_size: 4,
            },
            |node, c| node.hex_field(c, "String Data Offset", |c| c.read_u32_le()),
        )?;
        dex.strings = string_offsets
            .iter()
            .map(|&offset| decode_string_data(&whole, &mut out, offset))
            .collect::<Result<_>>()?;

        let strings = &dex.strings;
        let name = |idx: u32| strings.get(idx as usize).map_or("<invalid>", String::as_str);

        dex.type_ids = table(
            &whole,
            &mut out,
            Table {
                label: "Type IDs",
                item: "Type ID",
                offset: header.type_ids_off,
                count: header.type_ids_size,
                item_size: 4,
            },
            |node, c| {
                let idx = node.field(c, "Descriptor Index", |c| c.read_u32_le())?;
                node.set_value(name(idx));
                Ok(idx)
            },
        )?;

        let types = &dex.type_ids;
        let type_name = |idx: u32| types.get(idx as usize).map_or("<invalid>", |&s| name(s));

        dex.proto_ids = table(
            &whole,
            &mut out,
            Table {
                label: "Proto IDs",
                item: "Proto ID",
                offset: header.proto_ids_off,
                count: header.proto_ids_size,
                item_size: 12,
            },
            |node, c| {
                let shorty_idx = node.field(c, "Shorty Index", |c| c.read_u32_le())?;
                let return_type_idx = node.field(c, "Return Type Index", |c| c.read_u32_le())?;
                let parameters_off = node.hex_field(c, "Parameters Offset", |c| c.read_u32_le())?;
                node.set_value(name(shorty_idx));
                Ok(DexProtoId {
                    shorty_idx,
                    return_type_idx,
                    parameters_off,
                })
            },
        )?;

        dex.field_ids = table(
            &whole,
            &mut out,
            Table {
                label: "Field IDs",
                item: "Field ID",
                offset: header.field_ids_off,
                count: header.field_ids_size,
                item_size: 8,
            },
            |node, c| {
                let id = read_member(node, c, "Type Index")?;
                node.set_value(format!(
                    "{}->{}:{}",
                    type_name(id.class_idx as u32),
                    name(id.name_idx),
                    type_name(id.type_or_proto_idx as u32)
                ));
                Ok(id)
            },
        )?;

        dex.method_ids = table(
            &whole,
            &mut out,
            Table {
                label: "Method IDs",
                item: "Method ID",
                offset: header.method_ids_off,
                count: header.method_ids_size,
                item_size: 8,
            },
            |node, c| {
                let id = read_member(node, c, "Proto Index")?;
                node.set_value(format!("{}->{}", type_name(id.class_idx as u32), name(id.name_idx)));
                Ok(id)
            },
        )?;

        dex.class_defs = table(
            &whole,
            &mut out,
            Table {
                label: "Class Defs",
                item: "Class Def",
                offset: header.class_defs_off,
                count: header.class_defs_size,
                item_size: 32,
            },
            |node, c| {
                let class_idx = node.field(c, "Class Index", |c| c.read_u32_le())?;
                let access_flags = node.hex_field(c, "Access Flags", |c| c.read_u32_le())?;
                let superclass_idx = node.field(c, "Superclass Index", |c| c.read_u32_le())?;
                let interfaces_off = node.hex_field(c, "Interfaces Offset", |c| c.read_u32_le())?;
                let source_file_idx = node.field(c, "Source File Index", |c| c.read_u32_le())?;
                let annotations_off = node.hex_field(c, "Annotations Offset", |c| c.read_u32_le())?;
                let class_data_off = node.hex_field(c, "Class Data Offset", |c| c.read_u32_le())?;
                let static_values_off = node.hex_field(c, "Static Values Offset", |c| c.read_u32_le())?;
                node.set_value(type_name(class_idx));
                Ok(DexClassDef {
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces_off,
                    source_file_idx,
                    annotations_off,
                    class_data_off,
                    static_values_off,
                })
            },
        )?;

        dex.map = decode_map(&whole, &mut out, header.map_off)?;
        dex.header = header;
        Ok(out.finish(Document::Dex(dex)))
    }
}

fn decode_header(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<DexHeader> {
    let mut node = ComponentBuilder::at("DEX Header", cursor);

    let version = node.field_with(
        cursor,
        "Magic",
        |c| {
            c.expect_bytes(DEX_MAGIC)?;
            let offset = c.position();
            let tail = c.read_array::<4>()?;
            if !tail[..3].iter().all(u8::is_ascii_digit) || tail[3] != 0 {
                return Err(Error::signature_mismatch(offset, b"000\0", &tail));
            }
            Ok(String::from_utf8_lossy(&tail[..3]).into_owned())
        },
        |v| format!("dex\\n{}\\0", v),
    )?;
    let checksum = node.hex_field(cursor, "Checksum", |c| c.read_u32_le())?;
    let signature = node.field_with(cursor, "Signature", |c| c.read_array::<20>(), |s| {
        s.iter().map(|b| format!("{:02x}", b)).collect()
    })?;

    let file_size = node.field(cursor, "File Size", |c| c.read_u32_le())?;
    let header_size = node.field(cursor, "Header Size", |c| c.read_u32_le())?;
    let endian_tag = node.hex_field(cursor, "Endian Tag", |c| c.read_u32_le())?;
    let (link_size, link_off) = size_and_offset(&mut node, cursor, "Link")?;
    let map_off = node.hex_field(cursor, "Map Offset", |c| c.read_u32_le())?;
    let (string_ids_size, string_ids_off) = size_and_offset(&mut node, cursor, "String IDs")?;
    let (type_ids_size, type_ids_off) = size_and_offset(&mut node, cursor, "Type IDs")?;
    let (proto_ids_size, proto_ids_off) = size_and_offset(&mut node, cursor, "Proto IDs")?;
    let (field_ids_size, field_ids_off) = size_and_offset(&mut node, cursor, "Field IDs")?;
    let (method_ids_size, method_ids_off) = size_and_offset(&mut node, cursor, "Method IDs")?;
    let (class_defs_size, class_defs_off) = size_and_offset(&mut node, cursor, "Class Defs")?;
    let (data_size, data_off) = size_and_offset(&mut node, cursor, "Data")?;

    node.set_value(format!("version {}", version));
    out.insert(node.finish(cursor)?)?;

    Ok(DexHeader {
        version,
        checksum,
        signature,
        file_size,
        header_size,
        endian_tag,
        link_size,
        link_off,
        map_off,
        string_ids_size,
        string_ids_off,
        type_ids_size,
        type_ids_off,
        proto_ids_size,
        proto_ids_off,
        field_ids_size,
        field_ids_off,
        method_ids_size,
        method_ids_off,
        class_defs_size,
        class_defs_off,
        data_size,
        data_off,
    })
}

fn size_and_offset(node: &mut ComponentBuilder, cursor: &mut ByteCursor<'_>, label: &str) -> Result<(u32, u32)> {
    let size = node.field(cursor, &format!("{} Size", label), |c| c.read_u32_le())?;
    let offset = node.hex_field(cursor, &format!("{} Offset", label), |c| c.read_u32_le())?;
    Ok((size, offset))
}

fn check_header(header: &DexHeader, len: usize, out: &mut FileFormatBuilder) {
    if header.file_size as usize != len {
        out.anomaly(Anomaly::inconsistent(
            32,
            format!(
                "header declares a file size of {} bytes but the file has {}",
                header.file_size, len
            ),
        ));
    }
    if header.header_size != HEADER_SIZE {
        out.anomaly(Anomaly::inconsistent(
            36,
            format!("header size is {:#x} instead of {:#x}", header.header_size, HEADER_SIZE),
        ));
    }
    match header.endian_tag {
        ENDIAN_CONSTANT => {}
        REVERSE_ENDIAN_CONSTANT => out.anomaly(Anomaly::new(
            40,
            AnomalyKind::SignatureMismatch,
            "byte-swapped endian tag; fields were still read little-endian",
        )),
        tag => out.anomaly(Anomaly::new(
            40,
            AnomalyKind::SignatureMismatch,
            format!("unknown endian tag {:#010x}", tag),
        )),
    }
}

/// Decodes a fixed-size table through a window at its declared offset
///
/// A table that runs past the end of the file or overlaps an earlier
/// section is skipped with an anomaly.
fn table<T>(
    whole: &ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    table: Table,
    mut read: impl FnMut(&mut ComponentBuilder, &mut ByteCursor<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    if table.count == 0 {
        return Ok(Vec::new());
    }
    let span = Span::new(table.offset as u64, table.count as u64 * table.item_size);
    if span.end() > whole.end_offset() {
        out.anomaly(Anomaly::inconsistent(
            span.start,
            format!(
                "{} table of {} entries at {:#x} runs past the end of the file",
                table.label, table.count, span.start
            ),
        ));
        return Ok(Vec::new());
    }
    if out.is_occupied(span) {
        out.anomaly(Anomaly::inconsistent(
            span.start,
            format!("{} table {} overlaps another section", table.label, span),
        ));
        return Ok(Vec::new());
    }

    let mut c = whole.window(span.start, span.end())?;
    let mut node = ComponentBuilder::at(table.label, &c);
    let mut items = Vec::with_capacity(table.count as usize);
    for _ in 0..table.count {
        let mut item = ComponentBuilder::at(table.item, &c);
        items.push(read(&mut item, &mut c)?);
        node.push(item.finish(&c)?)?;
    }
    node.set_value(format!("{} entries", table.count));
    out.insert(node.finish(&c)?)?;
    Ok(items)
}

fn read_member(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>, second: &str) -> Result<DexMemberId> {
    let class_idx = node.field(c, "Class Index", |c| c.read_u16_le())?;
    let type_or_proto_idx = node.field(c, second, |c| c.read_u16_le())?;
    let name_idx = node.field(c, "Name Index", |c| c.read_u32_le())?;
    Ok(DexMemberId {
        class_idx,
        type_or_proto_idx,
        name_idx,
    })
}

/// Decodes one `string_data_item`
///
/// A malformed or misplaced item is reported and yields an empty string so
/// that string indices stay aligned.
fn decode_string_data(whole: &ByteCursor<'_>, out: &mut FileFormatBuilder, offset: u32) -> Result<String> {
    let start = offset as u64;
    let decoded = whole.fork_at(start).and_then(|mut c| {
        let mut node = ComponentBuilder::at("String Data", &c);
        let utf16_len = node.field(&mut c, "UTF-16 Length", |c| c.read_uleb128())?;
        let value = node.field_with(
            &mut c,
            "Data",
            |c| c.read_cstr().map(mutf8::decode),
            |s| format!("{:?}", s),
        )?;
        if value.encode_utf16().count() as u64 != utf16_len {
            node.anomaly(Anomaly::inconsistent(
                start,
                format!(
                    "string declares {} UTF-16 units but decodes to {}",
                    utf16_len,
                    value.encode_utf16().count()
                ),
            ));
        }
        node.set_value(format!("{:?}", value));
        Ok((value, node.finish(&c)?))
    });

    match decoded {
        Ok((value, component)) => {
            if out.is_occupied(component.span()) {
                out.anomaly(Anomaly::inconsistent(
                    start,
                    format!("string data {} overlaps another section", component.span()),
                ));
            } else {
                trace!("String data at {:#x}: {:?}", start, value);
                out.insert(component)?;
            }
            Ok(value)
        }
        Err(e) if e.is_recoverable() || matches!(e, Error::UnexpectedEndOfData { .. }) => {
            out.anomaly(Anomaly::from_error(&e, start));
            Ok(String::new())
        }
        Err(e) => Err(e),
    }
}

fn decode_map(whole: &ByteCursor<'_>, out: &mut FileFormatBuilder, map_off: u32) -> Result<Vec<DexMapItem>> {
    if map_off == 0 {
        return Ok(Vec::new());
    }
    let start = map_off as u64;
    let count = match whole.fork_at(start).and_then(|mut c| c.read_u32_le()) {
        Ok(count) => count,
        Err(_) => {
            out.anomaly(Anomaly::inconsistent(
                start,
                format!("map list offset {:#x} lies outside the file", start),
            ));
            return Ok(Vec::new());
        }
    };
    let span = Span::new(start, 4 + count as u64 * 12);
    if span.end() > whole.end_offset() || out.is_occupied(span) {
        out.anomaly(Anomaly::inconsistent(
            start,
            format!("map list of {} items {} does not fit in the file", count, span),
        ));
        return Ok(Vec::new());
    }

    let mut c = whole.window(span.start, span.end())?;
    let mut node = ComponentBuilder::at("Map List", &c);
    node.field(&mut c, "Size", |c| c.read_u32_le())?;
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut item = ComponentBuilder::at("Map Item", &c);
        let item_type = item.field_with(&mut c, "Type", |c| c.read_u16_le(), |t| {
            format!("{:#06x} ({})", t, map_item_name(*t))
        })?;
        item.bytes(&mut c, "Unused", 2)?;
        let size = item.field(&mut c, "Size", |c| c.read_u32_le())?;
        let offset = item.hex_field(&mut c, "Offset", |c| c.read_u32_le())?;
        item.set_value(map_item_name(item_type));
        node.push(item.finish(&c)?)?;
        items.push(DexMapItem {
            item_type,
            size,
            offset,
        });
    }
    node.set_value(format!("{} items", count));
    out.insert(node.finish(&c)?)?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Builds a DEX with two strings, one type, one class and a map list
    fn sample() -> Vec<u8> {
        // layout: header 0x00..0x70, string ids 0x70..0x78, type ids
        // 0x78..0x7C, class defs 0x7C..0x9C, strings 0x9C.., map after
        let string_ids = 0x70u32;
        let type_ids = 0x78u32;
        let class_defs = 0x7Cu32;
        let strings_at = 0x9Cu32;
        let s0 = b"\x05LFoo;\0".to_vec();
        let s1 = b"\x08Foo.java\0".to_vec();
        let map_at = strings_at + (s0.len() + s1.len()) as u32;
        let map_at = (map_at + 3) & !3;
        let file_size = map_at + 4 + 2 * 12;

        let mut d = Vec::new();
        d.extend_from_slice(b"dex\n035\0");
        d.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        d.extend_from_slice(&[0xAB; 20]);
        for v in [file_size, HEADER_SIZE, ENDIAN_CONSTANT, 0, 0, map_at] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        for (size, off) in [
            (2, string_ids),
            (1, type_ids),
            (0, 0),
            (0, 0),
            (0, 0),
            (1, class_defs),
            (file_size - strings_at, strings_at),
        ] {
            d.extend_from_slice(&(size as u32).to_le_bytes());
            d.extend_from_slice(&off.to_le_bytes());
        }
        assert_eq!(d.len(), 0x70);

        d.extend_from_slice(&strings_at.to_le_bytes());
        d.extend_from_slice(&(strings_at + s0.len() as u32).to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        for v in [0u32, 1, NO_INDEX, 0, 1, 0, 0, 0] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        d.extend_from_slice(&s0);
        d.extend_from_slice(&s1);
        d.resize(map_at as usize, 0);
        d.extend_from_slice(&2u32.to_le_bytes());
        for (t, size, off) in [(0x0000u16, 1u32, 0u32), (0x1000, 1, map_at)] {
            d.extend_from_slice(&t.to_le_bytes());
            d.extend_from_slice(&0u16.to_le_bytes());
            d.extend_from_slice(&size.to_le_bytes());
            d.extend_from_slice(&off.to_le_bytes());
        }
        assert_eq!(d.len(), file_size as usize);
        d
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        DexDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    #[test]
    fn test_sample_dex() {
        let doc = decode(sample()).unwrap();
        doc.validate().unwrap();
        let dex = doc.document().as_dex().unwrap();

        assert_eq!(dex.header.version, "035");
        assert_eq!(dex.header.checksum, 0xDEADBEEF);
        assert_eq!(dex.strings, vec!["LFoo;".to_string(), "Foo.java".to_string()]);
        assert_eq!(dex.type_descriptor(0), Some("LFoo;"));
        assert_eq!(dex.class_names().collect::<Vec<_>>(), vec!["LFoo;"]);
        assert_eq!(dex.class_defs[0].superclass_idx, NO_INDEX);
        assert_eq!(dex.map.len(), 2);
        assert_eq!(dex.map[1].item_type, 0x1000);
        assert!(doc.anomalies().is_empty());

        let labels: Vec<&str> = doc.components().filter_map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec!["DEX Header", "String IDs", "Type IDs", "Class Defs", "String Data", "String Data", "Map List"]
        );
        let header = doc.top_level_at(0).unwrap();
        assert_eq!(header.span(), Span::new(0, 0x70));
        assert_eq!(header.child("Magic").unwrap().value(), Some("dex\\n035\\0"));
        assert_eq!(doc.top_level_at(0x78).unwrap().children()[0].value(), Some("LFoo;"));
        assert_eq!(doc.top_level_at(0x9C).unwrap().value(), Some("\"LFoo;\""));
    }

    #[test]
    fn test_bad_magic() {
        let err = decode(b"dey\n035\0".to_vec()).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_bad_version_digits() {
        let mut data = sample();
        data[4] = b'x';
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 4, .. }));
    }

    #[test]
    fn test_truncated_header() {
        let err = decode(sample()[..0x40].to_vec()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfData { .. }));
    }

    #[test]
    fn test_file_size_and_endian_anomalies() {
        let mut data = sample();
        data[32..36].copy_from_slice(&1u32.to_le_bytes());
        data[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        let doc = decode(data).unwrap();
        let kinds: Vec<AnomalyKind> = doc.file_anomalies().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AnomalyKind::StructuralInconsistency, AnomalyKind::SignatureMismatch]
        );
    }

    #[test]
    fn test_table_past_end_is_skipped() {
        let mut data = sample();
        // class_defs_off far beyond the file
        data[100..104].copy_from_slice(&0x10_0000u32.to_le_bytes());
        let doc = decode(data).unwrap();
        let dex = doc.document().as_dex().unwrap();
        assert!(dex.class_defs.is_empty());
        assert_eq!(dex.strings.len(), 2);
        assert!(doc.file_anomalies()[0].message.contains("Class Defs"));
    }

    #[test]
    fn test_overlapping_table_is_skipped() {
        let mut data = sample();
        // type ids pointed into the header
        data[68..72].copy_from_slice(&0x10u32.to_le_bytes());
        let doc = decode(data).unwrap();
        let dex = doc.document().as_dex().unwrap();
        assert!(dex.type_ids.is_empty());
        assert_eq!(dex.class_names().count(), 0);
        assert!(doc.file_anomalies()[0].message.contains("Type IDs"));
    }

    #[test]
    fn test_unterminated_string_is_contained() {
        let mut data = sample();
        // point string 1 at the map list's tail, which has no NUL after the last byte
        let len = data.len() as u32;
        data[0x74..0x78].copy_from_slice(&(len - 1).to_le_bytes());
        let last = data.len() - 1;
        data[last] = 0x7F;
        let doc = decode(data).unwrap();
        let dex = doc.document().as_dex().unwrap();
        assert_eq!(dex.strings[1], "");
        assert!(doc
            .file_anomalies()
            .iter()
            .any(|a| a.kind == AnomalyKind::MissingTerminator));
    }
}
