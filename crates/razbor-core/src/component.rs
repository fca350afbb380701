//! The component tree: byte-range-addressed decoded units.
//!
//! Every decoded unit, from a whole header down to a single field, is a
//! [`FileComponent`] recording the [`Span`] it occupies in the source buffer.
//! Components are assembled through [`ComponentBuilder`], which takes every
//! child span from the cursor that produced it and refuses children that
//! overlap a sibling or start before their parent. Gaps between children are
//! legal; overlaps are decoder bugs and surface as [`Error::ComponentTree`].

use crate::cursor::ByteCursor;
use crate::error::{Anomaly, Error, Result};
use std::fmt;
use std::ops::Range;
use tracing::warn;

/// Number of bytes shown in a raw value preview
const PREVIEW_BYTES: usize = 16;

/// A byte range `[start, start + length)` in the source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Span {
    /// Absolute offset of the first byte
    pub start: u64,
    /// Number of bytes covered
    pub length: u64,
}

impl Span {
    /// Creates a span from a start offset and a length
    pub const fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Creates a span from start and end offsets; an inverted range is empty
    pub fn between(start: u64, end: u64) -> Self {
        Self::new(start, end.saturating_sub(start))
    }

    /// Offset just past the last byte
    pub const fn end(&self) -> u64 {
        self.start + self.length
    }

    /// True if the span covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True if `other` lies entirely within this span
    pub fn contains(&self, other: &Span) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    /// True if `offset` is one of the covered bytes
    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    /// True if both spans cover at least one common byte
    pub fn overlaps(&self, other: &Span) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.end()
            && other.start < self.end()
    }

    /// The span as a `usize` range for slicing
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end() as usize
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}..{:#x})", self.start, self.end())
    }
}

/// One decoded unit of a file
///
/// Components are immutable once built. Children are ordered by offset and
/// never overlap each other or leave the parent's span.
#[derive(Debug, Clone, PartialEq)]
pub struct FileComponent {
    span: Span,
    label: Option<String>,
    value: Option<String>,
    children: Vec<FileComponent>,
    anomalies: Vec<Anomaly>,
}

impl FileComponent {
    /// Creates a labelled component with no children
    pub fn leaf(label: impl Into<String>, span: Span) -> Self {
        Self {
            span,
            label: Some(label.into()),
            value: None,
            children: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Creates a component with no label and no children
    pub fn unlabeled(span: Span) -> Self {
        Self {
            span,
            label: None,
            value: None,
            children: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Creates a leaf whose value previews the raw bytes it covers
    pub fn raw(label: impl Into<String>, span: Span, bytes: &[u8]) -> Self {
        Self::leaf(label, span).with_value(preview_bytes(bytes))
    }

    /// Sets the display value
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attaches an anomaly
    pub fn with_anomaly(mut self, anomaly: Anomaly) -> Self {
        warn!("{}", anomaly);
        self.anomalies.push(anomaly);
        self
    }

    /// The byte range this component covers
    pub fn span(&self) -> Span {
        self.span
    }

    /// Absolute offset of the first byte
    pub fn start(&self) -> u64 {
        self.span.start
    }

    /// Number of bytes covered
    pub fn length(&self) -> u64 {
        self.span.length
    }

    /// Offset just past the last byte
    pub fn end(&self) -> u64 {
        self.span.end()
    }

    /// Human readable label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Decoded value rendered for display, if any
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Children in byte order
    pub fn children(&self) -> &[FileComponent] {
        &self.children
    }

    /// Anomalies found while decoding this component
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// First child with the given label
    pub fn child(&self, label: &str) -> Option<&FileComponent> {
        self.children.iter().find(|c| c.label() == Some(label))
    }

    /// Depth-first iterator over this component and its descendants
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(std::iter::once(self))
    }

    /// The deepest descendant (or self) covering `offset`
    pub fn deepest_at(&self, offset: u64) -> Option<&FileComponent> {
        if !self.span.contains_offset(offset) {
            return None;
        }
        self.children
            .iter()
            .find_map(|c| c.deepest_at(offset))
            .or(Some(self))
    }

    /// Checks the tree invariant for this component and all descendants
    pub fn validate(&self) -> Result<()> {
        let mut previous_end = self.span.start;
        for child in &self.children {
            if !self.span.contains(&child.span) {
                return Err(Error::component_tree(format!(
                    "child '{}' {} escapes parent '{}' {}",
                    child.display_label(),
                    child.span,
                    self.display_label(),
                    self.span
                )));
            }
            if child.span.start < previous_end {
                return Err(Error::component_tree(format!(
                    "child '{}' {} overlaps its preceding sibling in '{}'",
                    child.display_label(),
                    child.span,
                    self.display_label()
                )));
            }
            previous_end = child.span.end();
            child.validate()?;
        }
        Ok(())
    }

    fn display_label(&self) -> &str {
        self.label().unwrap_or("<unlabeled>")
    }
}

/// Depth-first walk yielding `(depth, component)` pairs
#[derive(Debug)]
pub struct Walk<'c> {
    stack: Vec<(usize, &'c FileComponent)>,
}

impl<'c> Walk<'c> {
    pub(crate) fn new<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = &'c FileComponent>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self {
            stack: roots.into_iter().rev().map(|c| (0, c)).collect(),
        }
    }
}

impl<'c> Iterator for Walk<'c> {
    type Item = (usize, &'c FileComponent);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, node))
    }
}

/// Incrementally assembles a [`FileComponent`]
///
/// The component starts where the builder was opened and ends where the
/// cursor stands when [`ComponentBuilder::finish`] is called.
#[derive(Debug)]
pub struct ComponentBuilder {
    label: Option<String>,
    start: u64,
    value: Option<String>,
    children: Vec<FileComponent>,
    anomalies: Vec<Anomaly>,
}

impl ComponentBuilder {
    /// Opens a component starting at an absolute offset
    pub fn new(label: impl Into<String>, start: u64) -> Self {
        Self {
            label: Some(label.into()),
            start,
            value: None,
            children: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Opens a component at the cursor's current position
    pub fn at(label: impl Into<String>, cursor: &ByteCursor<'_>) -> Self {
        Self::new(label, cursor.position())
    }

    /// Start offset of the component under construction
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Replaces the label
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Sets the display value
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    /// Records an anomaly on the component under construction
    pub fn anomaly(&mut self, anomaly: Anomaly) {
        warn!("{}", anomaly);
        self.anomalies.push(anomaly);
    }

    /// Offset where the next child may begin
    pub fn next_free(&self) -> u64 {
        self.children.last().map_or(self.start, FileComponent::end)
    }

    /// Appends a child, which must start at or after the previous child's end
    pub fn push(&mut self, child: FileComponent) -> Result<()> {
        let next_free = self.next_free();
        if child.start() < next_free {
            return Err(Error::component_tree(format!(
                "child '{}' {} starts before offset {:#x} in '{}'",
                child.display_label(),
                child.span,
                next_free,
                self.label.as_deref().unwrap_or("<unlabeled>")
            )));
        }
        self.children.push(child);
        Ok(())
    }

    /// Reads one field and records it as a child rendered with `Display`
    pub fn field<'a, T: fmt::Display>(
        &mut self,
        cursor: &mut ByteCursor<'a>,
        label: &str,
        read: impl FnOnce(&mut ByteCursor<'a>) -> Result<T>,
    ) -> Result<T> {
        self.field_with(cursor, label, read, |v| v.to_string())
    }

    /// Reads one integer field and records it rendered in hexadecimal
    pub fn hex_field<'a, T: fmt::LowerHex>(
        &mut self,
        cursor: &mut ByteCursor<'a>,
        label: &str,
        read: impl FnOnce(&mut ByteCursor<'a>) -> Result<T>,
    ) -> Result<T> {
        self.field_with(cursor, label, read, |v| format!("{:#x}", v))
    }

    /// Reads one field and records it with a custom rendering
    pub fn field_with<'a, T>(
        &mut self,
        cursor: &mut ByteCursor<'a>,
        label: &str,
        read: impl FnOnce(&mut ByteCursor<'a>) -> Result<T>,
        show: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        let (value, span) = cursor.spanned(read)?;
        self.push(FileComponent::leaf(label, span).with_value(show(&value)))?;
        Ok(value)
    }

    /// Reads `len` raw bytes as a child
    pub fn bytes<'a>(
        &mut self,
        cursor: &mut ByteCursor<'a>,
        label: &str,
        len: usize,
    ) -> Result<&'a [u8]> {
        let (bytes, span) = cursor.spanned(|c| c.read_bytes(len))?;
        self.push(FileComponent::raw(label, span, bytes))?;
        Ok(bytes)
    }

    /// Reads `len` bytes of text as a child
    pub fn text(&mut self, cursor: &mut ByteCursor<'_>, label: &str, len: usize) -> Result<String> {
        self.field_with(cursor, label, |c| c.read_ascii(len), |s| format!("{:?}", s))
    }

    /// Decodes a nested structure through its own cursor
    ///
    /// `sub` must be an independent cursor over exactly the nested bytes. On
    /// success the nested component spans the whole of `sub`. If `decode`
    /// fails with an error that the bounded cursor can contain, the bytes are
    /// kept as a raw child carrying the error as an anomaly and `None` is
    /// returned; the parent stream is unaffected either way.
    pub fn nested<'a, T>(
        &mut self,
        label: &str,
        sub: ByteCursor<'a>,
        decode: impl FnOnce(&mut ComponentBuilder, &mut ByteCursor<'a>) -> Result<T>,
    ) -> Result<Option<T>> {
        let span = Span::new(sub.position(), sub.remaining() as u64);
        let bytes = sub.rest();
        let mut inner = sub;
        let mut node = ComponentBuilder::new(label, span.start);

        match decode(&mut node, &mut inner) {
            Ok(value) => {
                self.push(node.finish_at(span.end())?)?;
                Ok(Some(value))
            }
            Err(e) if e.is_recoverable() || matches!(e, Error::UnexpectedEndOfData { .. }) => {
                let raw = FileComponent::raw(label, span, bytes)
                    .with_anomaly(Anomaly::from_error(&e, span.start));
                self.push(raw)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the component at the cursor's position
    pub fn finish(self, cursor: &ByteCursor<'_>) -> Result<FileComponent> {
        self.finish_at(cursor.position())
    }

    /// Closes the component at an explicit end offset
    pub fn finish_at(self, end: u64) -> Result<FileComponent> {
        let next_free = self.next_free();
        if end < next_free {
            return Err(Error::component_tree(format!(
                "'{}' ends at {:#x} before its last child ends at {:#x}",
                self.label.as_deref().unwrap_or("<unlabeled>"),
                end,
                next_free
            )));
        }
        Ok(FileComponent {
            span: Span::between(self.start, end),
            label: self.label,
            value: self.value,
            children: self.children,
            anomalies: self.anomalies,
        })
    }
}

/// Renders up to 16 bytes as hex, noting the total length when truncated
pub fn preview_bytes(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_BYTES)];
    let mut out = crate::error::hex_bytes(shown);
    if bytes.len() > PREVIEW_BYTES {
        out.push_str(&format!(" ... ({} bytes)", bytes.len()));
    }
    out
}
