//! Fallback decoder for unrecognized files.

use crate::component::{FileComponent, Span};
use crate::error::Result;
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;

/// Produces a single opaque component spanning the whole file
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Raw
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let span = Span::new(0, data.len() as u64);
        out.insert(FileComponent::raw("Raw Binary", span, &data))?;
        Ok(out.finish(Document::Raw))
    }
}
