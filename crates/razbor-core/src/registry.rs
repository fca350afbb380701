//! Maps file extensions and magic bytes to decoders.
//!
//! Resolution is a pure lookup into a static table; nothing is loaded at
//! runtime. Unknown extensions resolve to the raw decoder, and
//! [`decode`] falls back to magic-byte sniffing in that case so that
//! extension-less files (ELF binaries, mostly) still get a real decoder.
//!
//! ## Extensibility
//!
//! The [`Decoder`] trait is the seam between the registry and each format:
//!
//! ```no_run
//! use bytes::Bytes;
//! use razbor_core::{DecodeOptions, Decoder, FileFormat, FormatKind, Result};
//!
//! struct Passthrough;
//!
//! impl Decoder for Passthrough {
//!     fn kind(&self) -> FormatKind {
//!         FormatKind::Raw
//!     }
//!
//!     fn decode(&self, data: Bytes, options: &DecodeOptions) -> Result<FileFormat> {
//!         razbor_core::formats::raw::RawDecoder.decode(data, options)
//!     }
//! }
//! ```

use crate::error::{Error, Result};
use crate::format::{FileFormat, FormatKind};
use crate::formats::bmp::BmpDecoder;
use crate::formats::class::ClassDecoder;
use crate::formats::dex::DexDecoder;
use crate::formats::elf::ElfDecoder;
use crate::formats::jpeg::JpegDecoder;
use crate::formats::pdf::PdfDecoder;
use crate::formats::raw::RawDecoder;
use crate::formats::zip::ZipDecoder;
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

/// Configuration shared by all decoders
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Largest input accepted, in bytes
    pub max_file_size: u64,
    /// Deepest nesting of PDF arrays and dictionaries
    pub max_nesting_depth: usize,
    /// Verify CRC-32 of stored ZIP entries
    pub verify_checksums: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024 * 1024, // 256 MiB
            max_nesting_depth: 64,
            verify_checksums: true,
        }
    }
}

impl DecodeOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum input size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the maximum nesting depth
    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Enables or disables checksum verification
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// A pure function from file bytes to a decoded document
pub trait Decoder: Send + Sync {
    /// The format this decoder produces
    fn kind(&self) -> FormatKind;

    /// Decodes a whole file
    fn decode(&self, data: Bytes, options: &DecodeOptions) -> Result<FileFormat>;
}

/// Extension table; keys are lower-case and carry no leading dot
const EXTENSIONS: &[(&str, FormatKind)] = &[
    ("zip", FormatKind::Zip),
    ("jar", FormatKind::Zip),
    ("war", FormatKind::Zip),
    ("apk", FormatKind::Zip),
    ("aar", FormatKind::Zip),
    ("docx", FormatKind::Zip),
    ("xlsx", FormatKind::Zip),
    ("pptx", FormatKind::Zip),
    ("odt", FormatKind::Zip),
    ("epub", FormatKind::Zip),
    ("pdf", FormatKind::Pdf),
    ("jpg", FormatKind::Jpeg),
    ("jpeg", FormatKind::Jpeg),
    ("jpe", FormatKind::Jpeg),
    ("jfif", FormatKind::Jpeg),
    ("bmp", FormatKind::Bmp),
    ("dib", FormatKind::Bmp),
    ("dex", FormatKind::Dex),
    ("elf", FormatKind::Elf),
    ("so", FormatKind::Elf),
    ("o", FormatKind::Elf),
    ("ko", FormatKind::Elf),
    ("axf", FormatKind::Elf),
    ("class", FormatKind::Class),
];

/// Magic bytes at offset 0, checked in order
const MAGIC: &[(&[u8], FormatKind)] = &[
    (b"PK\x03\x04", FormatKind::Zip),
    (b"PK\x05\x06", FormatKind::Zip),
    (b"%PDF-", FormatKind::Pdf),
    (b"\xFF\xD8", FormatKind::Jpeg),
    (b"dex\n", FormatKind::Dex),
    (b"\x7FELF", FormatKind::Elf),
    (b"\xCA\xFE\xBA\xBE", FormatKind::Class),
    (b"BM", FormatKind::Bmp),
];

impl FormatKind {
    /// The decoder for this format
    pub fn decoder(&self) -> &'static dyn Decoder {
        match self {
            FormatKind::Zip => &ZipDecoder,
            FormatKind::Pdf => &PdfDecoder,
            FormatKind::Jpeg => &JpegDecoder,
            FormatKind::Bmp => &BmpDecoder,
            FormatKind::Dex => &DexDecoder,
            FormatKind::Elf => &ElfDecoder,
            FormatKind::Class => &ClassDecoder,
            FormatKind::Raw => &RawDecoder,
        }
    }

    /// Extensions registered for this format
    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        EXTENSIONS
            .iter()
            .filter(move |(_, kind)| kind == self)
            .map(|(ext, _)| *ext)
    }
}

/// Looks up the format registered for an extension
///
/// The extension is matched case-insensitively, with or without a leading
/// dot. Unknown extensions map to [`FormatKind::Raw`].
pub fn resolve_kind(extension: &str) -> FormatKind {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(key, _)| *key == ext)
        .map_or(FormatKind::Raw, |(_, kind)| *kind)
}

/// Looks up the decoder registered for an extension
pub fn resolve(extension: &str) -> &'static dyn Decoder {
    resolve_kind(extension).decoder()
}

/// Identifies a format from the leading bytes of a file
pub fn detect(data: &[u8]) -> Option<FormatKind> {
    MAGIC
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, kind)| *kind)
}

/// Decodes a buffer, choosing the decoder by extension and then by magic bytes
pub fn decode(
    data: impl Into<Bytes>,
    extension: &str,
    options: &DecodeOptions,
) -> Result<FileFormat> {
    let data = data.into();
    if data.len() as u64 > options.max_file_size {
        return Err(Error::FileTooLarge {
            size: data.len() as u64,
            limit: options.max_file_size,
        });
    }

    let kind = match resolve_kind(extension) {
        FormatKind::Raw => match detect(&data) {
            Some(sniffed) => {
                debug!("Extension '{}' is unknown; magic bytes suggest {}", extension, sniffed);
                // A sniffed decoder that fails leaves the file to the raw decoder
                match decode_as(sniffed, data.clone(), options) {
                    Ok(document) => return Ok(document),
                    Err(e) => {
                        debug!("Decoding as {} failed ({}); falling back to raw", sniffed, e);
                        FormatKind::Raw
                    }
                }
            }
            None => FormatKind::Raw,
        },
        kind => kind,
    };
    debug!(
        "Decoding {} bytes as {} (extension '{}')",
        data.len(),
        kind,
        extension
    );
    decode_as(kind, data, options)
}

/// Decodes a buffer with an explicitly chosen format
pub fn decode_as(kind: FormatKind, data: impl Into<Bytes>, options: &DecodeOptions) -> Result<FileFormat> {
    let data = data.into();
    if data.len() as u64 > options.max_file_size {
        return Err(Error::FileTooLarge {
            size: data.len() as u64,
            limit: options.max_file_size,
        });
    }
    let document = kind.decoder().decode(data, options)?;
    document.validate()?;
    Ok(document)
}

/// Reads and decodes a file
///
/// This is a convenience function that reads the file and picks the
/// decoder from its extension.
pub fn decode_file(path: impl AsRef<Path>, options: &DecodeOptions) -> Result<FileFormat> {
    let path = path.as_ref();
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.len() > options.max_file_size {
            return Err(Error::FileTooLarge {
                size: metadata.len(),
                limit: options.max_file_size,
            });
        }
    }
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    decode(data, extension, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_normalizes_extension() {
        assert_eq!(resolve_kind("ZIP"), FormatKind::Zip);
        assert_eq!(resolve_kind(".Pdf"), FormatKind::Pdf);
        assert_eq!(resolve_kind("jpeg"), FormatKind::Jpeg);
        assert_eq!(resolve_kind("class"), FormatKind::Class);
        assert_eq!(resolve_kind("txt"), FormatKind::Raw);
        assert_eq!(resolve_kind(""), FormatKind::Raw);
        assert_eq!(resolve("apk").kind(), FormatKind::Zip);
    }

    #[test]
    fn test_every_kind_has_a_decoder() {
        for kind in FormatKind::ALL {
            assert_eq!(kind.decoder().kind(), kind);
        }
        assert!(FormatKind::Zip.extensions().any(|e| e == "jar"));
    }

    #[test]
    fn test_detect_magic() {
        assert_eq!(detect(b"%PDF-1.7\n"), Some(FormatKind::Pdf));
        assert_eq!(detect(b"\x7FELF\x02\x01"), Some(FormatKind::Elf));
        assert_eq!(detect(b"dex\n035\0"), Some(FormatKind::Dex));
        assert_eq!(detect(b"hello"), None);
    }

    #[test]
    fn test_unknown_extension_is_raw() {
        let doc = decode(b"just some bytes".to_vec(), "txt", &DecodeOptions::new()).unwrap();
        assert_eq!(doc.kind(), FormatKind::Raw);
        assert_eq!(doc.component_count(), 1);
        let raw = doc.components().next().unwrap();
        assert_eq!(raw.length(), 15);
    }

    #[test]
    fn test_unknown_extension_with_weak_magic_falls_back_to_raw() {
        let text = b"BMW is a car".to_vec();
        let doc = decode(text.clone(), "txt", &DecodeOptions::new()).unwrap();
        assert_eq!(doc.kind(), FormatKind::Raw);
        assert_eq!(doc.component_count(), 1);
        assert_eq!(doc.components().next().unwrap().length(), text.len() as u64);

        let doc = decode(b"\x7FELF".to_vec(), "", &DecodeOptions::new()).unwrap();
        assert_eq!(doc.kind(), FormatKind::Raw);

        // SOI followed by an APP0 marker whose length is cut short
        let doc = decode(b"\xFF\xD8\xFF\xE0\x00".to_vec(), "dat", &DecodeOptions::new()).unwrap();
        assert_eq!(doc.kind(), FormatKind::Raw);
        assert_eq!(doc.component_count(), 1);
    }

    #[test]
    fn test_known_extension_still_reports_errors() {
        let err = decode(b"BMW is a car".to_vec(), "bmp", &DecodeOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfData { .. }));
    }

    #[test]
    fn test_size_limit() {
        let options = DecodeOptions::new().max_file_size(4);
        let err = decode(vec![0u8; 5], "bin", &options).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { size: 5, limit: 4 }));
    }

    #[test]
    fn test_decode_file_missing() {
        let err = decode_file("/nonexistent/file.zip", &DecodeOptions::new()).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_decode_file_uses_extension() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"\x00\x01\x02").unwrap();
        let doc = decode_file(file.path(), &DecodeOptions::new()).unwrap();
        assert_eq!(doc.kind(), FormatKind::Raw);
        assert_eq!(doc.data().len(), 3);
    }
}
