//! ZIP archive decoding.
//!
//! The archive is read front to back as a sequence of signed records:
//!
//! ```text
//! [local file header][file data][data descriptor?] ...   per entry
//! [central directory file header] ...                    per entry
//! [zip64 end of central directory record?][zip64 locator?]
//! [end of central directory record]
//! ```
//!
//! Every record has a fixed little-endian part followed by variable-length
//! tails whose sizes are declared in the fixed part. The tails are read in
//! declaration order and each becomes a child component. Extra fields are
//! decoded from their own sub-cursor, so a malformed extra block is kept as
//! raw bytes without disturbing the entry around it.

mod dostime;

pub use dostime::{MsDosDate, MsDosTime};

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, AnomalyKind, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::{debug, trace};

/// `PK\x03\x04`
pub const LOCAL_FILE_HEADER_SIGNATURE: [u8; 4] = *b"PK\x03\x04";
/// `PK\x01\x02`
pub const CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
/// `PK\x05\x06`
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
/// `PK\x07\x08`
pub const DATA_DESCRIPTOR_SIGNATURE: [u8; 4] = *b"PK\x07\x08";
/// `PK\x06\x06`
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = *b"PK\x06\x06";
/// `PK\x06\x07`
pub const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = *b"PK\x06\x07";
/// `PK\x05\x05`
pub const DIGITAL_SIGNATURE_SIGNATURE: [u8; 4] = *b"PK\x05\x05";

/// General purpose flag: sizes and CRC follow the data in a descriptor
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Extra field id of the ZIP64 extended information block
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Marker value meaning "see the ZIP64 record"
const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
const ZIP64_MARKER_16: u16 = 0xFFFF;

/// One TLV record from an extra field block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipExtraField {
    /// Header id identifying the record type
    pub header_id: u16,
    /// Record payload
    pub data: Vec<u8>,
}

/// Data descriptor following the file data of a streamed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipDataDescriptor {
    /// Absolute offset of the descriptor
    pub offset: u64,
    /// True if the optional `PK\x07\x08` signature is present
    pub has_signature: bool,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Size of the stored data
    pub compressed_size: u32,
    /// Size after decompression
    pub uncompressed_size: u32,
}

/// A local file header together with the span of its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipLocalFileHeader {
    /// Absolute offset of the header
    pub offset: u64,
    /// Minimum version needed to extract
    pub version_needed: u16,
    /// General purpose bit flag
    pub flags: u16,
    /// Compression method id
    pub compression_method: u16,
    /// Last modification time
    pub last_modified_time: MsDosTime,
    /// Last modification date
    pub last_modified_date: MsDosDate,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Declared size of the stored data
    pub compressed_size: u32,
    /// Declared size after decompression
    pub uncompressed_size: u32,
    /// Entry name
    pub file_name: String,
    /// Extra field records
    pub extra_fields: Vec<ZipExtraField>,
    /// Where the entry's data actually lies
    pub data: Span,
    /// Trailing data descriptor, for streamed entries
    pub data_descriptor: Option<ZipDataDescriptor>,
}

/// One entry of the central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipCentralDirectoryEntry {
    /// Absolute offset of the entry
    pub offset: u64,
    /// Host system and specification version of the creator
    pub version_made_by: u16,
    /// Minimum version needed to extract
    pub version_needed: u16,
    /// General purpose bit flag
    pub flags: u16,
    /// Compression method id
    pub compression_method: u16,
    /// Last modification time
    pub last_modified_time: MsDosTime,
    /// Last modification date
    pub last_modified_date: MsDosDate,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Size of the stored data
    pub compressed_size: u32,
    /// Size after decompression
    pub uncompressed_size: u32,
    /// Disk on which the entry starts
    pub disk_number_start: u16,
    /// Internal file attributes
    pub internal_attributes: u16,
    /// External (host-specific) file attributes
    pub external_attributes: u32,
    /// Offset of the matching local file header
    pub local_header_offset: u32,
    /// Entry name
    pub file_name: String,
    /// Extra field records
    pub extra_fields: Vec<ZipExtraField>,
    /// Entry comment
    pub file_comment: String,
}

/// The end of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEndOfCentralDirectoryRecord {
    /// Absolute offset of the record
    pub offset: u64,
    /// Number of this disk
    pub disk_number: u16,
    /// Disk on which the central directory starts
    pub central_directory_disk: u16,
    /// Central directory entries on this disk
    pub entry_number_on_disk: u16,
    /// Total number of central directory entries
    pub entry_total_number: u16,
    /// Size of the central directory in bytes
    pub central_directory_size: u32,
    /// Offset of the central directory
    pub central_directory_offset: u32,
    /// Archive comment
    pub comment: String,
}

/// The ZIP64 end of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryRecord {
    /// Absolute offset of the record
    pub offset: u64,
    /// Size of the remaining record
    pub record_size: u64,
    /// Host system and specification version of the creator
    pub version_made_by: u16,
    /// Minimum version needed to extract
    pub version_needed: u16,
    /// Number of this disk
    pub disk_number: u32,
    /// Disk on which the central directory starts
    pub central_directory_disk: u32,
    /// Central directory entries on this disk
    pub entry_number_on_disk: u64,
    /// Total number of central directory entries
    pub entry_total_number: u64,
    /// Size of the central directory in bytes
    pub central_directory_size: u64,
    /// Offset of the central directory
    pub central_directory_offset: u64,
}

/// The ZIP64 end of central directory locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64Locator {
    /// Absolute offset of the locator
    pub offset: u64,
    /// Disk holding the ZIP64 end of central directory record
    pub record_disk: u32,
    /// Offset of the ZIP64 end of central directory record
    pub record_offset: u64,
    /// Total number of disks
    pub total_disks: u32,
}

/// Decoded archive records in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZipArchive {
    /// Local file headers
    pub local_headers: Vec<ZipLocalFileHeader>,
    /// Central directory entries
    pub central_directory: Vec<ZipCentralDirectoryEntry>,
    /// ZIP64 end of central directory record
    pub zip64_end_of_central_directory: Option<Zip64EndOfCentralDirectoryRecord>,
    /// ZIP64 locator
    pub zip64_locator: Option<Zip64Locator>,
    /// End of central directory record
    pub end_of_central_directory: Option<ZipEndOfCentralDirectoryRecord>,
}

impl ZipArchive {
    /// Names of all entries in central directory order
    pub fn entry_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.central_directory.iter().map(|e| e.file_name.as_str())
    }
}

/// Decoder for ZIP archives
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipDecoder;

impl Decoder for ZipDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Zip
    }

    fn decode(&self, data: Bytes, options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let mut cursor = ByteCursor::new(&data);
        let mut archive = ZipArchive::default();

        let magic = cursor.peek_bytes(4)?;
        if magic != LOCAL_FILE_HEADER_SIGNATURE && magic != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(Error::signature_mismatch(0, &LOCAL_FILE_HEADER_SIGNATURE, magic));
        }

        while !cursor.is_eof() {
            let offset = cursor.position();
            let signature = cursor.peek_bytes(4).ok().and_then(|s| <[u8; 4]>::try_from(s).ok());

            match signature {
                Some(LOCAL_FILE_HEADER_SIGNATURE) => {
                    let entry = decode_local_entry(&mut cursor, &mut out, options)?;
                    debug!("Local file header '{}' at {:#x}", entry.file_name, offset);
                    archive.local_headers.push(entry);
                }
                Some(CENTRAL_DIRECTORY_SIGNATURE) => {
                    let (entry, component) = decode_central_directory_entry(&mut cursor)?;
                    debug!("Central directory entry '{}' at {:#x}", entry.file_name, offset);
                    out.insert(component)?;
                    archive.central_directory.push(entry);
                }
                Some(ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE) => {
                    let (record, component) = decode_zip64_end_of_central_directory(&mut cursor)?;
                    out.insert(component)?;
                    archive.zip64_end_of_central_directory = Some(record);
                }
                Some(ZIP64_LOCATOR_SIGNATURE) => {
                    let (locator, component) = decode_zip64_locator(&mut cursor)?;
                    out.insert(component)?;
                    archive.zip64_locator = Some(locator);
                }
                Some(DIGITAL_SIGNATURE_SIGNATURE) => {
                    out.insert(decode_digital_signature(&mut cursor)?)?;
                }
                Some(END_OF_CENTRAL_DIRECTORY_SIGNATURE) => {
                    let (record, component) = decode_end_of_central_directory(&mut cursor)?;
                    debug!(
                        "End of central directory at {:#x}: {} entries",
                        offset, record.entry_total_number
                    );
                    out.insert(component)?;
                    archive.end_of_central_directory = Some(record);
                }
                _ => {
                    let rest = cursor.rest();
                    let span = Span::new(offset, rest.len() as u64);
                    let found = &rest[..rest.len().min(4)];
                    let anomaly = Anomaly::new(
                        offset,
                        AnomalyKind::SignatureMismatch,
                        format!(
                            "no ZIP record signature at {:#x} (found {})",
                            offset,
                            crate::error::hex_bytes(found)
                        ),
                    );
                    out.insert(FileComponent::raw("Unrecognized Data", span, rest).with_anomaly(anomaly))?;
                    break;
                }
            }
        }

        cross_check(&archive, &mut out);
        Ok(out.finish(Document::Zip(archive)))
    }
}

/// Records archive-wide disagreements between the central directory and the rest
fn cross_check(archive: &ZipArchive, out: &mut FileFormatBuilder) {
    let Some(eocd) = &archive.end_of_central_directory else {
        out.anomaly(Anomaly::inconsistent(
            out.data().len() as u64,
            "end of central directory record not found",
        ));
        return;
    };

    let declared = match (&archive.zip64_end_of_central_directory, eocd.entry_total_number) {
        (Some(zip64), ZIP64_MARKER_16) => zip64.entry_total_number,
        _ => eocd.entry_total_number as u64,
    };
    if declared != archive.central_directory.len() as u64 {
        out.anomaly(Anomaly::inconsistent(
            eocd.offset,
            format!(
                "end of central directory declares {} entries but {} were found",
                declared,
                archive.central_directory.len()
            ),
        ));
    }

    for entry in &archive.central_directory {
        if entry.local_header_offset == ZIP64_MARKER_32 {
            continue;
        }
        let target = entry.local_header_offset as u64;
        if !archive.local_headers.iter().any(|h| h.offset == target) {
            out.anomaly(Anomaly::inconsistent(
                entry.offset,
                format!(
                    "central directory entry '{}' points to {:#x}, where no local file header was decoded",
                    entry.file_name, target
                ),
            ));
        }
    }
}

/// Fields shared by local and central headers, in their common order
struct CommonFields {
    version_needed: u16,
    flags: u16,
    compression_method: u16,
    last_modified_time: MsDosTime,
    last_modified_date: MsDosDate,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

fn read_common_fields(node: &mut ComponentBuilder, cursor: &mut ByteCursor<'_>) -> Result<CommonFields> {
    let version_needed = node.field_with(
        cursor,
        "Version Needed To Extract",
        |c| c.read_u16_le(),
        |v| format_version(*v),
    )?;
    let flags = node.hex_field(cursor, "General Purpose Bit Flag", |c| c.read_u16_le())?;
    let compression_method = node.field_with(
        cursor,
        "Compression Method",
        |c| c.read_u16_le(),
        |m| format!("{} ({})", m, compression_name(*m)),
    )?;
    let last_modified_time = node.field(cursor, "Last Modified Time", |c| {
        c.read_u16_le().map(MsDosTime::from_bits)
    })?;
    let last_modified_date = node.field(cursor, "Last Modified Date", |c| {
        c.read_u16_le().map(MsDosDate::from_bits)
    })?;
    let crc32 = node.field_with(cursor, "CRC-32", |c| c.read_u32_le(), |v| format!("{:#010x}", v))?;
    let compressed_size = node.field(cursor, "Compressed Size", |c| c.read_u32_le())?;
    let uncompressed_size = node.field(cursor, "Uncompressed Size", |c| c.read_u32_le())?;

    Ok(CommonFields {
        version_needed,
        flags,
        compression_method,
        last_modified_time,
        last_modified_date,
        crc32,
        compressed_size,
        uncompressed_size,
    })
}

/// Decodes a local file header, its data and its optional data descriptor
fn decode_local_entry(
    cursor: &mut ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    options: &DecodeOptions,
) -> Result<ZipLocalFileHeader> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Local File Header", cursor);
    node.field_with(cursor, "Signature", |c| c.expect_bytes(&LOCAL_FILE_HEADER_SIGNATURE), |s| {
        crate::error::hex_bytes(s)
    })?;
    let common = read_common_fields(&mut node, cursor)?;
    let name_len = node.field(cursor, "File Name Length", |c| c.read_u16_le())?;
    let extra_len = node.field(cursor, "Extra Field Length", |c| c.read_u16_le())?;
    let file_name = read_name(&mut node, cursor, "File Name", name_len as usize)?;
    let extra_fields = read_extra_fields(&mut node, cursor, extra_len as usize)?;
    node.set_value(file_name.clone());
    out.insert(node.finish(cursor)?)?;
    trace!("Local header '{}' ends at {:#x}", file_name, cursor.position());

    let streamed = common.flags & FLAG_DATA_DESCRIPTOR != 0;
    let declared = match zip64_sizes(&extra_fields, common.uncompressed_size, common.compressed_size) {
        (_, Some(size)) => size,
        _ => common.compressed_size as u64,
    };
    let data_start = cursor.position();
    let mut anomalies = Vec::new();

    let mut length = if streamed && declared == 0 {
        match locate_descriptor(cursor) {
            Some(length) => length,
            None => {
                let next = [LOCAL_FILE_HEADER_SIGNATURE, CENTRAL_DIRECTORY_SIGNATURE]
                    .iter()
                    .filter_map(|s| cursor.find(s))
                    .min()
                    .unwrap_or_else(|| cursor.end_offset());
                anomalies.push(Anomaly::inconsistent(
                    data_start,
                    format!("data descriptor of '{}' not found; data assumed to run to {:#x}", file_name, next),
                ));
                next - data_start
            }
        }
    } else {
        declared
    };

    let remaining = cursor.remaining() as u64;
    if length > remaining {
        anomalies.push(Anomaly::inconsistent(
            data_start,
            format!(
                "'{}' declares {} bytes of data but only {} remain",
                file_name, length, remaining
            ),
        ));
        length = remaining;
    }

    let (data, data_span) = cursor.spanned(|c| c.read_bytes(length as usize))?;

    let data_descriptor = if streamed {
        decode_data_descriptor(cursor, out)?
    } else {
        None
    };

    let expected_crc = data_descriptor.as_ref().map_or(common.crc32, |d| d.crc32);
    if options.verify_checksums && common.compression_method == 0 {
        let actual = crc32fast::hash(data);
        if actual != expected_crc {
            anomalies.push(Anomaly::inconsistent(
                data_start,
                format!(
                    "CRC-32 of '{}' is {:#010x}, header declares {:#010x}",
                    file_name, actual, expected_crc
                ),
            ));
        }
    }

    if !data_span.is_empty() {
        let mut component = FileComponent::raw("File Data", data_span, data);
        for anomaly in anomalies {
            component = component.with_anomaly(anomaly);
        }
        out.insert(component)?;
    } else {
        for anomaly in anomalies {
            out.anomaly(anomaly);
        }
    }

    Ok(ZipLocalFileHeader {
        offset,
        version_needed: common.version_needed,
        flags: common.flags,
        compression_method: common.compression_method,
        last_modified_time: common.last_modified_time,
        last_modified_date: common.last_modified_date,
        crc32: common.crc32,
        compressed_size: common.compressed_size,
        uncompressed_size: common.uncompressed_size,
        file_name,
        extra_fields,
        data: data_span,
        data_descriptor,
    })
}

/// Finds the data length of a streamed entry by locating its signed descriptor
///
/// A candidate signature only counts if the compressed size stored in the
/// descriptor equals its distance from the start of the data.
fn locate_descriptor(cursor: &ByteCursor<'_>) -> Option<u64> {
    let start = cursor.position();
    let mut search = *cursor;
    while let Some(pos) = search.find(&DATA_DESCRIPTOR_SIGNATURE) {
        let length = pos - start;
        if let Ok(mut lookahead) = search.fork_at(pos + 8) {
            if lookahead.read_u32_le().ok().map(u64::from) == Some(length) {
                return Some(length);
            }
        }
        search = search.fork_at(pos + 1).ok()?;
    }
    None
}

fn decode_data_descriptor(
    cursor: &mut ByteCursor<'_>,
    out: &mut FileFormatBuilder,
) -> Result<Option<ZipDataDescriptor>> {
    let has_signature = cursor.starts_with(&DATA_DESCRIPTOR_SIGNATURE);
    let next_is_record = cursor.starts_with(&LOCAL_FILE_HEADER_SIGNATURE)
        || cursor.starts_with(&CENTRAL_DIRECTORY_SIGNATURE);
    if !has_signature && (next_is_record || cursor.remaining() < 12) {
        return Ok(None);
    }

    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Data Descriptor", cursor);
    if has_signature {
        node.field_with(cursor, "Signature", |c| c.expect_bytes(&DATA_DESCRIPTOR_SIGNATURE), |s| {
            crate::error::hex_bytes(s)
        })?;
    }
    let crc32 = node.field_with(cursor, "CRC-32", |c| c.read_u32_le(), |v| format!("{:#010x}", v))?;
    let compressed_size = node.field(cursor, "Compressed Size", |c| c.read_u32_le())?;
    let uncompressed_size = node.field(cursor, "Uncompressed Size", |c| c.read_u32_le())?;
    out.insert(node.finish(cursor)?)?;

    Ok(Some(ZipDataDescriptor {
        offset,
        has_signature,
        crc32,
        compressed_size,
        uncompressed_size,
    }))
}

fn decode_central_directory_entry(
    cursor: &mut ByteCursor<'_>,
) -> Result<(ZipCentralDirectoryEntry, FileComponent)> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Central Directory File Header", cursor);
    node.field_with(cursor, "Signature", |c| c.expect_bytes(&CENTRAL_DIRECTORY_SIGNATURE), |s| {
        crate::error::hex_bytes(s)
    })?;
    let version_made_by = node.field_with(
        cursor,
        "Version Made By",
        |c| c.read_u16_le(),
        |v| format!("{} / {}", host_name((*v >> 8) as u8), format_version(*v)),
    )?;
    let common = read_common_fields(&mut node, cursor)?;
    let name_len = node.field(cursor, "File Name Length", |c| c.read_u16_le())?;
    let extra_len = node.field(cursor, "Extra Field Length", |c| c.read_u16_le())?;
    let comment_len = node.field(cursor, "File Comment Length", |c| c.read_u16_le())?;
    let disk_number_start = node.field(cursor, "Disk Number Start", |c| c.read_u16_le())?;
    let internal_attributes =
        node.hex_field(cursor, "Internal File Attributes", |c| c.read_u16_le())?;
    let external_attributes =
        node.hex_field(cursor, "External File Attributes", |c| c.read_u32_le())?;
    let local_header_offset =
        node.hex_field(cursor, "Relative Offset Of Local Header", |c| c.read_u32_le())?;
    let file_name = read_name(&mut node, cursor, "File Name", name_len as usize)?;
    let extra_fields = read_extra_fields(&mut node, cursor, extra_len as usize)?;
    let file_comment = read_name(&mut node, cursor, "File Comment", comment_len as usize)?;
    node.set_value(file_name.clone());

    let entry = ZipCentralDirectoryEntry {
        offset,
        version_made_by,
        version_needed: common.version_needed,
        flags: common.flags,
        compression_method: common.compression_method,
        last_modified_time: common.last_modified_time,
        last_modified_date: common.last_modified_date,
        crc32: common.crc32,
        compressed_size: common.compressed_size,
        uncompressed_size: common.uncompressed_size,
        disk_number_start,
        internal_attributes,
        external_attributes,
        local_header_offset,
        file_name,
        extra_fields,
        file_comment,
    };
    Ok((entry, node.finish(cursor)?))
}

fn decode_end_of_central_directory(
    cursor: &mut ByteCursor<'_>,
) -> Result<(ZipEndOfCentralDirectoryRecord, FileComponent)> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("End Of Central Directory Record", cursor);
    node.field_with(
        cursor,
        "Signature",
        |c| c.expect_bytes(&END_OF_CENTRAL_DIRECTORY_SIGNATURE),
        |s| crate::error::hex_bytes(s),
    )?;
    let disk_number = node.field(cursor, "Number Of This Disk", |c| c.read_u16_le())?;
    let central_directory_disk =
        node.field(cursor, "Disk Where Central Directory Starts", |c| c.read_u16_le())?;
    let entry_number_on_disk = node.field(cursor, "Entry Number On This Disk", |c| c.read_u16_le())?;
    let entry_total_number = node.field(cursor, "Entry Total Number", |c| c.read_u16_le())?;
    let central_directory_size = node.field(cursor, "Central Directory Size", |c| c.read_u32_le())?;
    let central_directory_offset =
        node.hex_field(cursor, "Central Directory Offset", |c| c.read_u32_le())?;
    let comment_len = node.field(cursor, "Comment Length", |c| c.read_u16_le())?;
    let comment = read_name(&mut node, cursor, "Comment", comment_len as usize)?;

    let record = ZipEndOfCentralDirectoryRecord {
        offset,
        disk_number,
        central_directory_disk,
        entry_number_on_disk,
        entry_total_number,
        central_directory_size,
        central_directory_offset,
        comment,
    };
    Ok((record, node.finish(cursor)?))
}

fn decode_zip64_end_of_central_directory(
    cursor: &mut ByteCursor<'_>,
) -> Result<(Zip64EndOfCentralDirectoryRecord, FileComponent)> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Zip64 End Of Central Directory Record", cursor);
    node.field_with(
        cursor,
        "Signature",
        |c| c.expect_bytes(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE),
        |s| crate::error::hex_bytes(s),
    )?;
    let record_size = node.field(cursor, "Record Size", |c| c.read_u64_le())?;
    let body_start = cursor.position();
    let version_made_by = node.field_with(
        cursor,
        "Version Made By",
        |c| c.read_u16_le(),
        |v| format!("{} / {}", host_name((*v >> 8) as u8), format_version(*v)),
    )?;
    let version_needed = node.field_with(
        cursor,
        "Version Needed To Extract",
        |c| c.read_u16_le(),
        |v| format_version(*v),
    )?;
    let disk_number = node.field(cursor, "Number Of This Disk", |c| c.read_u32_le())?;
    let central_directory_disk =
        node.field(cursor, "Disk Where Central Directory Starts", |c| c.read_u32_le())?;
    let entry_number_on_disk = node.field(cursor, "Entry Number On This Disk", |c| c.read_u64_le())?;
    let entry_total_number = node.field(cursor, "Entry Total Number", |c| c.read_u64_le())?;
    let central_directory_size = node.field(cursor, "Central Directory Size", |c| c.read_u64_le())?;
    let central_directory_offset =
        node.hex_field(cursor, "Central Directory Offset", |c| c.read_u64_le())?;

    let consumed = cursor.position() - body_start;
    if record_size > consumed {
        let declared = record_size - consumed;
        let extensible = declared.min(cursor.remaining() as u64) as usize;
        if (extensible as u64) < declared {
            node.anomaly(Anomaly::inconsistent(
                body_start,
                format!(
                    "zip64 record declares {} bytes but only {} remain",
                    record_size,
                    consumed + extensible as u64
                ),
            ));
        }
        node.bytes(cursor, "Extensible Data Sector", extensible)?;
    } else if record_size < consumed {
        node.anomaly(Anomaly::inconsistent(
            body_start,
            format!(
                "zip64 record declares {} bytes but its fixed fields take {}",
                record_size, consumed
            ),
        ));
    }

    let record = Zip64EndOfCentralDirectoryRecord {
        offset,
        record_size,
        version_made_by,
        version_needed,
        disk_number,
        central_directory_disk,
        entry_number_on_disk,
        entry_total_number,
        central_directory_size,
        central_directory_offset,
    };
    Ok((record, node.finish(cursor)?))
}

fn decode_zip64_locator(cursor: &mut ByteCursor<'_>) -> Result<(Zip64Locator, FileComponent)> {
    let offset = cursor.position();
    let mut node = ComponentBuilder::at("Zip64 End Of Central Directory Locator", cursor);
    node.field_with(cursor, "Signature", |c| c.expect_bytes(&ZIP64_LOCATOR_SIGNATURE), |s| {
        crate::error::hex_bytes(s)
    })?;
    let record_disk = node.field(cursor, "Disk With Zip64 Record", |c| c.read_u32_le())?;
    let record_offset = node.hex_field(cursor, "Zip64 Record Offset", |c| c.read_u64_le())?;
    let total_disks = node.field(cursor, "Total Number Of Disks", |c| c.read_u32_le())?;

    let locator = Zip64Locator {
        offset,
        record_disk,
        record_offset,
        total_disks,
    };
    Ok((locator, node.finish(cursor)?))
}

fn decode_digital_signature(cursor: &mut ByteCursor<'_>) -> Result<FileComponent> {
    let mut node = ComponentBuilder::at("Digital Signature", cursor);
    node.field_with(cursor, "Signature", |c| c.expect_bytes(&DIGITAL_SIGNATURE_SIGNATURE), |s| {
        crate::error::hex_bytes(s)
    })?;
    let size = node.field(cursor, "Size Of Data", |c| c.read_u16_le())?;
    node.bytes(cursor, "Signature Data", size as usize)?;
    node.finish(cursor)
}

/// Reads a declared-length name or comment
fn read_name(
    node: &mut ComponentBuilder,
    cursor: &mut ByteCursor<'_>,
    label: &str,
    len: usize,
) -> Result<String> {
    node.text(cursor, label, len)
}

/// Reads an extra field block through its own sub-cursor
fn read_extra_fields(
    node: &mut ComponentBuilder,
    cursor: &mut ByteCursor<'_>,
    len: usize,
) -> Result<Vec<ZipExtraField>> {
    let block = cursor.sub_cursor(len)?;
    let fields = node.nested("Extra Field", block, |block_node, c| {
        let mut fields = Vec::new();
        while !c.is_eof() {
            let mut record = ComponentBuilder::at("Extra Field Record", c);
            let header_id = record.field_with(
                c,
                "Header ID",
                |c| c.read_u16_le(),
                |id| format!("{:#06x} ({})", id, extra_field_name(*id)),
            )?;
            let size = record.field(c, "Data Size", |c| c.read_u16_le())?;
            let data = record.bytes(c, "Data", size as usize)?;
            record.set_value(extra_field_name(header_id));
            block_node.push(record.finish(c)?)?;
            fields.push(ZipExtraField {
                header_id,
                data: data.to_vec(),
            });
        }
        Ok(fields)
    })?;
    Ok(fields.unwrap_or_default())
}

/// Real sizes from a ZIP64 extended information record, when the header holds markers
fn zip64_sizes(extras: &[ZipExtraField], uncompressed: u32, compressed: u32) -> (Option<u64>, Option<u64>) {
    let Some(extra) = extras.iter().find(|e| e.header_id == ZIP64_EXTRA_ID) else {
        return (None, None);
    };
    let mut c = ByteCursor::new(&extra.data);
    let uncompressed = if uncompressed == ZIP64_MARKER_32 {
        c.read_u64_le().ok()
    } else {
        None
    };
    let compressed = if compressed == ZIP64_MARKER_32 {
        c.read_u64_le().ok()
    } else {
        None
    };
    (uncompressed, compressed)
}

fn format_version(v: u16) -> String {
    let spec = v & 0xFF;
    format!("{}.{}", spec / 10, spec % 10)
}

fn host_name(host: u8) -> String {
    match host {
        0 => "MS-DOS".to_string(),
        1 => "Amiga".to_string(),
        3 => "Unix".to_string(),
        7 => "Macintosh".to_string(),
        10 => "Windows NTFS".to_string(),
        14 => "VFAT".to_string(),
        19 => "OS X".to_string(),
        other => format!("host {}", other),
    }
}

fn compression_name(method: u16) -> &'static str {
    match method {
        0 => "stored",
        1 => "shrunk",
        6 => "imploded",
        8 => "deflated",
        9 => "deflate64",
        12 => "bzip2",
        14 => "lzma",
        93 => "zstd",
        95 => "xz",
        98 => "ppmd",
        99 => "aes",
        _ => "unknown",
    }
}

fn extra_field_name(id: u16) -> &'static str {
    match id {
        0x0001 => "zip64 extended information",
        0x000A => "ntfs",
        0x5455 => "extended timestamp",
        0x5855 => "info-zip unix (old)",
        0x7075 => "unicode path",
        0x7875 => "info-zip unix",
        0x9901 => "aes encryption",
        0xCAFE => "jar marker",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn local_header(name: &[u8], extra: &[u8], data: &[u8], crc: u32, flags: u16, declared: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE);
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&((12u16 << 11) | (30 << 5) | 5).to_le_bytes());
        out.extend_from_slice(&((44u16 << 9) | (3 << 5) | 15).to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&declared.to_le_bytes());
        out.extend_from_slice(&declared.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(extra);
        out.extend_from_slice(data);
        out
    }

    fn central_header(name: &[u8], size: u32, crc: u32, local_offset: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE);
        out.extend_from_slice(&0x031Eu16.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&((12u16 << 11) | (30 << 5) | 5).to_le_bytes());
        out.extend_from_slice(&((44u16 << 9) | (3 << 5) | 15).to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&local_offset.to_le_bytes());
        out.extend_from_slice(name);
        out
    }

    fn end_of_central_directory(entries: u16, cd_size: u32, cd_offset: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    fn stored_zip(name: &[u8], content: &[u8]) -> Vec<u8> {
        let crc = crc32fast::hash(content);
        let mut zip = local_header(name, &[], content, crc, 0, content.len() as u32);
        let cd_offset = zip.len() as u32;
        let central = central_header(name, content.len() as u32, crc, 0);
        zip.extend_from_slice(&central);
        zip.extend_from_slice(&end_of_central_directory(1, central.len() as u32, cd_offset));
        zip
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        ZipDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    #[test]
    fn test_single_stored_entry() {
        let doc = decode(stored_zip(b"a.txt", b"hello")).unwrap();
        doc.validate().unwrap();

        let top: Vec<(&str, Span)> = doc
            .components()
            .map(|c| (c.label().unwrap(), c.span()))
            .collect();
        assert_eq!(
            top,
            vec![
                ("Local File Header", Span::new(0, 35)),
                ("File Data", Span::new(35, 5)),
                ("Central Directory File Header", Span::new(40, 51)),
                ("End Of Central Directory Record", Span::new(91, 22)),
            ]
        );

        let header = doc.top_level_at(0).unwrap();
        assert_eq!(header.child("File Name").unwrap().span(), Span::new(30, 5));
        assert_eq!(header.child("Last Modified Date").unwrap().value(), Some("2024-03-15"));
        assert_eq!(header.child("Last Modified Time").unwrap().value(), Some("12:30:10"));

        let eocd = doc.top_level_at(91).unwrap();
        assert_eq!(eocd.child("Entry Total Number").unwrap().value(), Some("1"));

        let zip = doc.document().as_zip().unwrap();
        assert_eq!(zip.end_of_central_directory.as_ref().unwrap().entry_total_number, 1);
        assert_eq!(zip.local_headers[0].file_name, "a.txt");
        assert_eq!(zip.central_directory[0].file_name, zip.local_headers[0].file_name);
        assert_eq!(zip.central_directory[0].crc32, zip.local_headers[0].crc32);
        assert_eq!(zip.central_directory[0].version_made_by >> 8, 3);
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_corrupted_signature() {
        let mut bytes = stored_zip(b"a.txt", b"hello");
        bytes[3] = 0x05;
        let err = decode(bytes).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = stored_zip(b"a.txt", b"hello");
        let err = decode(bytes[..20].to_vec()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfData { .. }));
    }

    #[test]
    fn test_crc_mismatch_is_anomaly() {
        let content = b"hello";
        let mut zip = local_header(b"a.txt", &[], content, 0xDEAD_BEEF, 0, 5);
        let central = central_header(b"a.txt", 5, 0xDEAD_BEEF, 0);
        let cd_offset = zip.len() as u32;
        zip.extend_from_slice(&central);
        zip.extend_from_slice(&end_of_central_directory(1, central.len() as u32, cd_offset));

        let doc = decode(zip.clone()).unwrap();
        let data = doc.top_level_at(35).unwrap();
        assert_eq!(data.anomalies().len(), 1);
        assert_eq!(data.anomalies()[0].kind, AnomalyKind::StructuralInconsistency);

        let quiet = ZipDecoder
            .decode(Bytes::from(zip), &DecodeOptions::new().verify_checksums(false))
            .unwrap();
        assert!(quiet.anomalies().is_empty());
    }

    #[test]
    fn test_declared_size_exceeds_buffer() {
        let bytes = local_header(b"a.txt", &[], b"abc", crc32fast::hash(b"abc"), 0, 100);
        let doc = decode(bytes).unwrap();
        let data = doc.top_level_at(35).unwrap();
        assert_eq!(data.span(), Span::new(35, 3));
        let messages: Vec<String> = doc.anomalies().iter().map(|a| a.message.clone()).collect();
        assert!(messages.iter().any(|m| m.contains("declares 100 bytes")));
        assert!(messages.iter().any(|m| m.contains("end of central directory")));
    }

    #[test]
    fn test_extra_field_records() {
        let extra = [0x55, 0x54, 0x05, 0x00, 0x01, 0x10, 0x20, 0x30, 0x40];
        let mut zip = local_header(b"a", &extra, b"x", crc32fast::hash(b"x"), 0, 1);
        zip.extend_from_slice(&end_of_central_directory(0, 0, zip.len() as u32));

        let doc = decode(zip).unwrap();
        let header = doc.top_level_at(0).unwrap();
        let block = header.child("Extra Field").unwrap();
        assert_eq!(block.span(), Span::new(31, 9));
        assert_eq!(block.children().len(), 1);
        assert_eq!(block.children()[0].value(), Some("extended timestamp"));
        let zip = doc.document().as_zip().unwrap();
        assert_eq!(zip.local_headers[0].extra_fields[0].header_id, 0x5455);
    }

    #[test]
    fn test_malformed_extra_field_is_contained() {
        // record claims 16 bytes of data but the block only holds 2
        let extra = [0x55, 0x54, 0x10, 0x00, 0x01, 0x02];
        let mut zip = local_header(b"a", &extra, b"x", crc32fast::hash(b"x"), 0, 1);
        zip.extend_from_slice(&end_of_central_directory(0, 0, zip.len() as u32));

        let doc = decode(zip).unwrap();
        let header = doc.top_level_at(0).unwrap();
        let block = header.child("Extra Field").unwrap();
        assert!(block.children().is_empty());
        assert_eq!(block.anomalies()[0].kind, AnomalyKind::Unparsed);
        assert_eq!(doc.top_level_at(37).unwrap().label(), Some("File Data"));
    }

    #[test]
    fn test_streamed_entry_with_descriptor() {
        let content = b"streamed!";
        let crc = crc32fast::hash(content);
        let mut zip = local_header(b"s", &[], content, 0, FLAG_DATA_DESCRIPTOR, 0);
        zip.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE);
        zip.extend_from_slice(&crc.to_le_bytes());
        zip.extend_from_slice(&(content.len() as u32).to_le_bytes());
        zip.extend_from_slice(&(content.len() as u32).to_le_bytes());
        zip.extend_from_slice(&end_of_central_directory(0, 0, zip.len() as u32));

        let doc = decode(zip).unwrap();
        let zip = doc.document().as_zip().unwrap();
        let entry = &zip.local_headers[0];
        assert_eq!(entry.data, Span::new(31, 9));
        let descriptor = entry.data_descriptor.as_ref().unwrap();
        assert!(descriptor.has_signature);
        assert_eq!(descriptor.crc32, crc);
        assert_eq!(doc.top_level_at(40).unwrap().label(), Some("Data Descriptor"));
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_entry_count_mismatch() {
        let mut zip = stored_zip(b"a.txt", b"hello");
        let len = zip.len();
        // patch Entry Total Number in the EOCD
        zip[len - 12..len - 10].copy_from_slice(&2u16.to_le_bytes());
        let doc = decode(zip).unwrap();
        assert_eq!(doc.file_anomalies().len(), 1);
        assert!(doc.file_anomalies()[0].message.contains("declares 2 entries"));
    }

    #[test]
    fn test_empty_archive() {
        let doc = decode(end_of_central_directory(0, 0, 0)).unwrap();
        assert_eq!(doc.component_count(), 1);
        assert!(doc.anomalies().is_empty());
    }

    #[test]
    fn test_trailing_garbage() {
        let mut zip = stored_zip(b"a.txt", b"hello");
        zip.extend_from_slice(b"garbage");
        let doc = decode(zip).unwrap();
        let last = doc.components().last().unwrap();
        assert_eq!(last.label(), Some("Unrecognized Data"));
        assert_eq!(last.length(), 7);
        assert_eq!(last.anomalies()[0].kind, AnomalyKind::SignatureMismatch);
    }

    fn zip64_record(record_size: u64) -> Vec<u8> {
        let mut out = ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_vec();
        out.extend_from_slice(&record_size.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&1u64.to_le_bytes());
        out.extend_from_slice(&1u64.to_le_bytes());
        out.extend_from_slice(&46u64.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out
    }

    #[test]
    fn test_zip64_record_size_disagreement() {
        let exact = zip64_record(44);
        let mut cursor = ByteCursor::new(&exact);
        let (record, component) = decode_zip64_end_of_central_directory(&mut cursor).unwrap();
        assert_eq!(record.entry_total_number, 1);
        assert!(component.anomalies().is_empty());

        let undersized = zip64_record(40);
        let mut cursor = ByteCursor::new(&undersized);
        let (_, component) = decode_zip64_end_of_central_directory(&mut cursor).unwrap();
        assert_eq!(component.length(), 56);
        assert_eq!(component.anomalies().len(), 1);
        assert_eq!(component.anomalies()[0].kind, AnomalyKind::StructuralInconsistency);
        assert_eq!(component.anomalies()[0].offset, 12);
        assert!(component.anomalies()[0].message.contains("declares 40 bytes"));

        let mut oversized = zip64_record(50);
        oversized.extend_from_slice(b"abc");
        let mut cursor = ByteCursor::new(&oversized);
        let (_, component) = decode_zip64_end_of_central_directory(&mut cursor).unwrap();
        assert_eq!(component.length(), 59);
        assert_eq!(component.anomalies().len(), 1);
        assert!(component.anomalies()[0].message.contains("only 47 remain"));
    }
}
