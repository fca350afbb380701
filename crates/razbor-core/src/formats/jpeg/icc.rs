//! ICC profiles embedded in APP2 segments.
//!
//! Large profiles are split across several APP2 chunks. Only the first chunk
//! carries the 128-byte profile header and the tag table; later chunks are
//! kept as raw profile data. All ICC fields are big-endian.

use crate::component::ComponentBuilder;
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, Error, Result};

use super::segment::unknown_identifier;
use super::JpegSegment;

/// `ICC_PROFILE\0`
pub const ICC_ID: &[u8] = b"ICC_PROFILE\0";

/// Size of the fixed profile header
pub const ICC_HEADER_LEN: usize = 128;

/// Fixed ICC profile header
#[derive(Debug, Clone, PartialEq)]
pub struct IccHeader {
    /// Declared size of the whole profile
    pub size: u32,
    /// Preferred CMM type
    pub cmm_type: String,
    /// Profile version as major, minor, bug-fix
    pub version: (u8, u8, u8),
    /// Device class, such as `mntr` or `prtr`
    pub device_class: String,
    /// Data colour space, such as `RGB `
    pub color_space: String,
    /// Profile connection space
    pub connection_space: String,
    /// Creation date and time
    pub created: String,
    /// Primary platform
    pub platform: String,
    /// Rendering intent
    pub rendering_intent: u32,
    /// PCS illuminant as XYZ
    pub illuminant: [f64; 3],
    /// Profile creator
    pub creator: String,
}

/// One tag table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccTag {
    /// Tag signature
    pub signature: String,
    /// Offset of the tag data from the profile start
    pub offset: u32,
    /// Size of the tag data
    pub size: u32,
}

/// One APP2 ICC chunk
#[derive(Debug, Clone, PartialEq)]
pub struct IccChunk {
    /// 1-based chunk sequence number
    pub sequence: u8,
    /// Total number of chunks
    pub count: u8,
    /// Header, present in the first chunk when it decodes
    pub header: Option<IccHeader>,
    /// Tag table of the first chunk
    pub tags: Vec<IccTag>,
}

fn signature(c: &mut ByteCursor<'_>) -> Result<String> {
    let raw = c.read_bytes(4)?;
    Ok(String::from_utf8_lossy(raw)
        .trim_end_matches(|ch| ch == ' ' || ch == '\0')
        .to_string())
}

/// APP2 payload
pub(crate) fn decode_app2(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    if !c.starts_with(ICC_ID) {
        return Err(unknown_identifier(c, 0xE2));
    }
    node.set_label("ICC Profile Chunk");
    node.field_with(c, "Identifier", |c| c.expect_bytes(ICC_ID), |_| "ICC_PROFILE".to_string())?;
    let sequence = node.field(c, "Chunk Sequence Number", |c| c.read_u8())?;
    let count = node.field(c, "Chunk Count", |c| c.read_u8())?;
    node.set_value(format!("chunk {} of {}", sequence, count));

    let remaining = c.remaining();
    let mut chunk = IccChunk {
        sequence,
        count,
        header: None,
        tags: Vec::new(),
    };

    if sequence == 1 && remaining >= ICC_HEADER_LEN {
        let profile = c.sub_cursor(remaining)?;
        if let Some((header, tags)) = node.nested("ICC Profile", profile, decode_profile)? {
            chunk.header = Some(header);
            chunk.tags = tags;
        }
    } else if remaining > 0 {
        node.bytes(c, "Profile Data", remaining)?;
    }

    Ok(JpegSegment::Icc(chunk))
}

fn decode_profile(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<(IccHeader, Vec<IccTag>)> {
    let profile_start = c.position();
    let mut h = ComponentBuilder::at("Profile Header", c);

    let size = h.field(c, "Profile Size", |c| c.read_u32_be())?;
    let cmm_type = h.field(c, "Preferred CMM Type", signature)?;
    let version = h.field_with(
        c,
        "Profile Version",
        |c| {
            let v = c.read_array::<4>()?;
            Ok((v[0], v[1] >> 4, v[1] & 0x0F))
        },
        |(major, minor, fix)| format!("{}.{}.{}", major, minor, fix),
    )?;
    let device_class = h.field(c, "Device Class", signature)?;
    let color_space = h.field(c, "Color Space", signature)?;
    let connection_space = h.field(c, "Profile Connection Space", signature)?;
    let created = h.field(c, "Creation Date", |c| {
        let mut parts = [0u16; 6];
        for part in parts.iter_mut() {
            *part = c.read_u16_be()?;
        }
        Ok(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]
        ))
    })?;
    h.field_with(c, "Profile File Signature", |c| c.expect_bytes(b"acsp"), |_| "acsp".to_string())?;
    let platform = h.field(c, "Primary Platform", signature)?;
    h.hex_field(c, "Profile Flags", |c| c.read_u32_be())?;
    h.field(c, "Device Manufacturer", signature)?;
    h.hex_field(c, "Device Model", |c| c.read_u32_be())?;
    h.hex_field(c, "Device Attributes", |c| c.read_u64_be())?;
    let rendering_intent = h.field_with(c, "Rendering Intent", |c| c.read_u32_be(), |i| {
        match i {
            0 => "perceptual",
            1 => "media-relative colorimetric",
            2 => "saturation",
            3 => "ICC-absolute colorimetric",
            _ => "unknown",
        }
        .to_string()
    })?;
    let illuminant = h.field_with(
        c,
        "Illuminant",
        |c| {
            let mut xyz = [0f64; 3];
            for v in xyz.iter_mut() {
                *v = c.read_i32_be()? as f64 / 65536.0;
            }
            Ok(xyz)
        },
        |[x, y, z]| format!("X={:.4} Y={:.4} Z={:.4}", x, y, z),
    )?;
    let creator = h.field(c, "Profile Creator", signature)?;
    h.bytes(c, "Profile ID", 16)?;
    h.bytes(c, "Reserved", 28)?;
    h.set_value(format!("{} {} v{}.{}", device_class, color_space, version.0, version.1));
    node.push(h.finish(c)?)?;

    let mut table = ComponentBuilder::at("Tag Table", c);
    let tag_count = table.field(c, "Tag Count", |c| c.read_u32_be())?;
    if tag_count as u64 * 12 > c.remaining() as u64 {
        return Err(Error::inconsistent(
            table.start(),
            format!(
                "tag table declares {} tags but only {} bytes remain in the chunk",
                tag_count,
                c.remaining()
            ),
        ));
    }

    let mut tags = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let mut entry = ComponentBuilder::at("Tag", c);
        let sig = entry.field(c, "Signature", signature)?;
        let offset = entry.hex_field(c, "Offset", |c| c.read_u32_be())?;
        let tag_size = entry.field(c, "Size", |c| c.read_u32_be())?;
        if offset as u64 + tag_size as u64 > size as u64 {
            entry.anomaly(Anomaly::inconsistent(
                profile_start + offset as u64,
                format!("tag '{}' extends past the declared profile size of {} bytes", sig, size),
            ));
        }
        entry.set_value(sig.clone());
        table.push(entry.finish(c)?)?;
        tags.push(IccTag {
            signature: sig,
            offset,
            size: tag_size,
        });
    }
    node.push(table.finish(c)?)?;

    let header = IccHeader {
        size,
        cmm_type,
        version,
        device_class,
        color_space,
        connection_space,
        created,
        platform,
        rendering_intent,
        illuminant,
        creator,
    };
    Ok((header, tags))
}
