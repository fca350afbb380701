//! The decoded document root.
//!
//! A [`FileFormat`] owns the original buffer, the format-specific typed
//! [`Document`] and the top-level components keyed by start offset. It is
//! only ever produced by [`FileFormatBuilder::finish`], after every
//! top-level component has passed the tree checks, so callers never observe
//! a partial or overlapping tree.

use crate::component::{FileComponent, Span, Walk};
use crate::error::{Anomaly, Error, Result};
use crate::formats::bmp::BmpImage;
use crate::formats::class::ClassFile;
use crate::formats::dex::DexFile;
use crate::formats::elf::ElfFile;
use crate::formats::jpeg::JpegImage;
use crate::formats::pdf::PdfDocument;
use crate::formats::zip::ZipArchive;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// The closed set of supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatKind {
    /// ZIP archives (and ZIP-based containers such as JAR or APK)
    Zip,
    /// PDF documents
    Pdf,
    /// JPEG images
    Jpeg,
    /// Windows bitmaps
    Bmp,
    /// Dalvik executables
    Dex,
    /// ELF objects and executables
    Elf,
    /// Java class files
    Class,
    /// Anything unrecognized
    Raw,
}

impl FormatKind {
    /// Every format kind, in registry order
    pub const ALL: [FormatKind; 8] = [
        FormatKind::Zip,
        FormatKind::Pdf,
        FormatKind::Jpeg,
        FormatKind::Bmp,
        FormatKind::Dex,
        FormatKind::Elf,
        FormatKind::Class,
        FormatKind::Raw,
    ];

    /// Short lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            FormatKind::Zip => "zip",
            FormatKind::Pdf => "pdf",
            FormatKind::Jpeg => "jpeg",
            FormatKind::Bmp => "bmp",
            FormatKind::Dex => "dex",
            FormatKind::Elf => "elf",
            FormatKind::Class => "class",
            FormatKind::Raw => "raw",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Format-specific typed content of a decoded file
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Document {
    /// Unrecognized bytes; the tree holds a single raw component
    Raw,
    /// ZIP archive records
    Zip(ZipArchive),
    /// PDF body, cross-reference tables and trailers
    Pdf(PdfDocument),
    /// JPEG marker segments
    Jpeg(JpegImage),
    /// Bitmap headers
    Bmp(BmpImage),
    /// DEX header, strings and map
    Dex(DexFile),
    /// ELF header, program and section headers
    Elf(ElfFile),
    /// Class file constant pool and members
    Class(ClassFile),
}

impl Document {
    /// The format this document belongs to
    pub fn kind(&self) -> FormatKind {
        match self {
            Document::Raw => FormatKind::Raw,
            Document::Zip(_) => FormatKind::Zip,
            Document::Pdf(_) => FormatKind::Pdf,
            Document::Jpeg(_) => FormatKind::Jpeg,
            Document::Bmp(_) => FormatKind::Bmp,
            Document::Dex(_) => FormatKind::Dex,
            Document::Elf(_) => FormatKind::Elf,
            Document::Class(_) => FormatKind::Class,
        }
    }

    /// The ZIP archive, if this is one
    pub fn as_zip(&self) -> Option<&ZipArchive> {
        match self {
            Document::Zip(zip) => Some(zip),
            _ => None,
        }
    }

    /// The PDF document, if this is one
    pub fn as_pdf(&self) -> Option<&PdfDocument> {
        match self {
            Document::Pdf(pdf) => Some(pdf),
            _ => None,
        }
    }

    /// The JPEG image, if this is one
    pub fn as_jpeg(&self) -> Option<&JpegImage> {
        match self {
            Document::Jpeg(jpeg) => Some(jpeg),
            _ => None,
        }
    }

    /// The bitmap, if this is one
    pub fn as_bmp(&self) -> Option<&BmpImage> {
        match self {
            Document::Bmp(bmp) => Some(bmp),
            _ => None,
        }
    }

    /// The DEX file, if this is one
    pub fn as_dex(&self) -> Option<&DexFile> {
        match self {
            Document::Dex(dex) => Some(dex),
            _ => None,
        }
    }

    /// The ELF file, if this is one
    pub fn as_elf(&self) -> Option<&ElfFile> {
        match self {
            Document::Elf(elf) => Some(elf),
            _ => None,
        }
    }

    /// The class file, if this is one
    pub fn as_class(&self) -> Option<&ClassFile> {
        match self {
            Document::Class(class) => Some(class),
            _ => None,
        }
    }
}

/// A fully decoded file: buffer, typed document and component tree
#[derive(Debug, Clone)]
pub struct FileFormat {
    data: Bytes,
    components: BTreeMap<u64, FileComponent>,
    document: Document,
    anomalies: Vec<Anomaly>,
}

impl FileFormat {
    /// The format of the decoded document
    pub fn kind(&self) -> FormatKind {
        self.document.kind()
    }

    /// The original buffer
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The typed document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Top-level components in byte order
    pub fn components(&self) -> impl Iterator<Item = &FileComponent> + '_ {
        self.components.values()
    }

    /// Number of top-level components
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// The top-level component starting exactly at `offset`
    pub fn top_level_at(&self, offset: u64) -> Option<&FileComponent> {
        self.components.get(&offset)
    }

    /// The deepest component covering `offset`
    pub fn component_at(&self, offset: u64) -> Option<&FileComponent> {
        let (_, top) = self.components.range(..=offset).next_back()?;
        top.deepest_at(offset)
    }

    /// Depth-first walk over the whole tree
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(self.components.values())
    }

    /// Zero-copy view of the bytes a component covers
    pub fn bytes_of(&self, component: &FileComponent) -> Bytes {
        self.data.slice(component.span().range())
    }

    /// Anomalies that belong to the file as a whole
    pub fn file_anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Every anomaly: file-level first, then per component in walk order
    pub fn anomalies(&self) -> Vec<&Anomaly> {
        self.anomalies
            .iter()
            .chain(self.walk().flat_map(|(_, c)| c.anomalies()))
            .collect()
    }

    /// Re-checks ordering, bounds and nesting of the whole tree
    pub fn validate(&self) -> Result<()> {
        let mut previous_end = 0;
        for component in self.components.values() {
            if component.start() < previous_end {
                return Err(Error::component_tree(format!(
                    "top-level component at {:#x} overlaps its predecessor",
                    component.start()
                )));
            }
            if component.end() > self.data.len() as u64 {
                return Err(Error::component_tree(format!(
                    "top-level component {} exceeds the {} byte buffer",
                    component.span(),
                    self.data.len()
                )));
            }
            component.validate()?;
            previous_end = component.end();
        }
        Ok(())
    }
}

/// Collects top-level components while a decoder runs
#[derive(Debug)]
pub struct FileFormatBuilder {
    data: Bytes,
    components: BTreeMap<u64, FileComponent>,
    anomalies: Vec<Anomaly>,
}

impl FileFormatBuilder {
    /// Starts a document over the given buffer
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            components: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }

    /// The buffer being decoded
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// True if some top-level component already covers a byte of `span`
    pub fn is_occupied(&self, span: Span) -> bool {
        let before = self
            .components
            .range(..=span.start)
            .next_back()
            .map(|(_, c)| c.span());
        let after = self
            .components
            .range(span.start..)
            .next()
            .map(|(_, c)| c.span());
        before.into_iter().chain(after).any(|s| {
            s.overlaps(&span) || (s.start == span.start && (s.is_empty() || span.is_empty()))
        })
    }

    /// Adds a top-level component after checking it against the buffer and its neighbours
    pub fn insert(&mut self, component: FileComponent) -> Result<()> {
        component.validate()?;
        let span = component.span();
        if span.end() > self.data.len() as u64 {
            return Err(Error::component_tree(format!(
                "component '{}' {} exceeds the {} byte buffer",
                component.label().unwrap_or("<unlabeled>"),
                span,
                self.data.len()
            )));
        }
        if self.is_occupied(span) {
            return Err(Error::component_tree(format!(
                "component '{}' {} overlaps an existing component",
                component.label().unwrap_or("<unlabeled>"),
                span
            )));
        }
        self.components.insert(span.start, component);
        Ok(())
    }

    /// Records an anomaly that no single component owns
    pub fn anomaly(&mut self, anomaly: Anomaly) {
        warn!("{}", anomaly);
        self.anomalies.push(anomaly);
    }

    /// Number of top-level components so far
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True if no component has been inserted
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Seals the document
    pub fn finish(self, document: Document) -> FileFormat {
        FileFormat {
            data: self.data,
            components: self.components,
            document,
            anomalies: self.anomalies,
        }
    }
}
