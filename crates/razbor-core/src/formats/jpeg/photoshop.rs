//! Photoshop image resource blocks carried in APP13.

use crate::component::{ComponentBuilder, Span};
use crate::cursor::ByteCursor;
use crate::error::Result;

use super::segment::unknown_identifier;
use super::JpegSegment;

/// `Photoshop 3.0\0`
pub const PHOTOSHOP_ID: &[u8] = b"Photoshop 3.0\0";

/// `8BIM`
pub const RESOURCE_SIGNATURE: &[u8] = b"8BIM";

/// One image resource block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoshopResource {
    /// Resource id
    pub id: u16,
    /// Pascal-string name, usually empty
    pub name: String,
    /// Absolute span of the resource data
    pub data: Span,
}

fn resource_name(id: u16) -> &'static str {
    match id {
        0x03E9 => "Print Info",
        0x03ED => "Resolution Info",
        0x03F3 => "Print Flags",
        0x0404 => "IPTC-NAA Record",
        0x0406 => "JPEG Quality",
        0x040C => "Thumbnail",
        0x040F => "ICC Profile",
        0x0421 => "Version Info",
        0x0422 => "Exif Data 1",
        0x0424 => "XMP Metadata",
        0x0425 => "Caption Digest",
        0x07D0..=0x0BB6 => "Path Information",
        0x0BB7 => "Clipping Path Name",
        _ => "unknown",
    }
}

/// APP13 payload
pub(crate) fn decode_app13(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<JpegSegment> {
    if !c.starts_with(PHOTOSHOP_ID) {
        return Err(unknown_identifier(c, 0xED));
    }
    node.set_label("Photoshop");
    node.field_with(c, "Identifier", |c| c.expect_bytes(PHOTOSHOP_ID), |_| {
        "Photoshop 3.0".to_string()
    })?;

    let mut resources = Vec::new();
    while !c.is_eof() {
        let mut block = ComponentBuilder::at("Image Resource Block", c);
        block.field_with(c, "Signature", |c| c.expect_bytes(RESOURCE_SIGNATURE), |_| {
            "8BIM".to_string()
        })?;
        let id = block.field_with(c, "Resource ID", |c| c.read_u16_be(), |id| {
            format!("{:#06x} ({})", id, resource_name(*id))
        })?;
        let name_len = block.field(c, "Name Length", |c| c.read_u8())?;
        let name = block.text(c, "Name", name_len as usize)?;
        // length byte plus name is padded to an even size
        if name_len % 2 == 0 {
            block.bytes(c, "Padding", 1)?;
        }
        let size = block.field(c, "Data Size", |c| c.read_u32_be())?;
        let data = Span::new(c.position(), size as u64);
        block.bytes(c, "Data", size as usize)?;
        if size % 2 == 1 && !c.is_eof() {
            block.bytes(c, "Padding", 1)?;
        }

        block.set_value(resource_name(id));
        node.push(block.finish(c)?)?;
        resources.push(PhotoshopResource { id, name, data });
    }

    node.set_value(format!("{} resources", resources.len()));
    Ok(JpegSegment::Photoshop(resources))
}
