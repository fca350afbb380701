//! The PDF object model.

use crate::component::Span;
use std::fmt;

/// A name object such as `/Type`, stored without its leading slash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PdfName(pub String);

impl PdfName {
    /// The name without its leading slash
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PdfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// A reference to an indirect object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub number: u32,
    /// Generation number
    pub generation: u16,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// Dictionary entries in file order; duplicate keys are kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfDictionary {
    /// Key/value pairs
    pub entries: Vec<(PdfName, PdfObject)>,
}

impl PdfDictionary {
    /// The first value stored under `key` (given without the slash)
    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_str() == key)
            .map(|(_, value)| value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A stream: its dictionary and where the raw body lies
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    /// Stream dictionary
    pub dictionary: PdfDictionary,
    /// Absolute span of the body between `stream` and `endstream`
    pub data: Span,
}

/// Any PDF object value
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    /// `null`
    Null,
    /// `true` or `false`
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal string with escapes resolved
    String(Vec<u8>),
    /// Hexadecimal string, decoded
    HexString(Vec<u8>),
    /// Name
    Name(PdfName),
    /// Array
    Array(Vec<PdfObject>),
    /// Dictionary
    Dictionary(PdfDictionary),
    /// Stream
    Stream(PdfStream),
    /// Indirect reference
    Reference(ObjectRef),
}

impl PdfObject {
    /// Kind name used as a component label
    pub fn type_name(&self) -> &'static str {
        match self {
            PdfObject::Null => "Null",
            PdfObject::Boolean(_) => "Boolean",
            PdfObject::Integer(_) => "Integer",
            PdfObject::Real(_) => "Real",
            PdfObject::String(_) => "String",
            PdfObject::HexString(_) => "Hex String",
            PdfObject::Name(_) => "Name",
            PdfObject::Array(_) => "Array",
            PdfObject::Dictionary(_) => "Dictionary",
            PdfObject::Stream(_) => "Stream",
            PdfObject::Reference(_) => "Reference",
        }
    }

    /// The integer value, if this is an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The name, if this is a name
    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    /// The dictionary, if this is a dictionary or a stream
    pub fn as_dictionary(&self) -> Option<&PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dictionary),
            _ => None,
        }
    }

    /// The reference, if this is one
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            PdfObject::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for PdfObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfObject::Null => f.write_str("null"),
            PdfObject::Boolean(b) => write!(f, "{}", b),
            PdfObject::Integer(i) => write!(f, "{}", i),
            PdfObject::Real(r) => write!(f, "{}", r),
            PdfObject::String(s) => write!(f, "({})", String::from_utf8_lossy(s)),
            PdfObject::HexString(s) => {
                f.write_str("<")?;
                for b in s {
                    write!(f, "{:02X}", b)?;
                }
                f.write_str(">")
            }
            PdfObject::Name(n) => write!(f, "{}", n),
            PdfObject::Array(items) => write!(f, "[{} items]", items.len()),
            PdfObject::Dictionary(d) => write!(f, "<<{} entries>>", d.len()),
            PdfObject::Stream(s) => write!(f, "stream ({} bytes)", s.data.length),
            PdfObject::Reference(r) => write!(f, "{}", r),
        }
    }
}

/// An `N G obj ... endobj` unit
#[derive(Debug, Clone, PartialEq)]
pub struct PdfIndirectObject {
    /// Absolute offset of the object number
    pub offset: u64,
    /// Object number
    pub number: u32,
    /// Generation number
    pub generation: u16,
    /// The object's value
    pub object: PdfObject,
}

impl PdfIndirectObject {
    /// The reference that addresses this object
    pub fn reference(&self) -> ObjectRef {
        ObjectRef {
            number: self.number,
            generation: self.generation,
        }
    }
}

/// One 20-byte cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfXrefEntry {
    /// Object number this entry describes
    pub number: u32,
    /// Byte offset for in-use entries, next free object for free ones
    pub offset: u64,
    /// Generation number
    pub generation: u16,
    /// `n` (true) or `f` (false)
    pub in_use: bool,
}

/// A run of consecutive entries after an `first count` header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfXrefSubsection {
    /// Number of the first object
    pub first: u32,
    /// Declared entry count
    pub count: u32,
    /// Entries actually decoded
    pub entries: Vec<PdfXrefEntry>,
}

/// An `xref` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfCrossReferenceTable {
    /// Absolute offset of the `xref` keyword
    pub offset: u64,
    /// Subsections in file order
    pub subsections: Vec<PdfXrefSubsection>,
}

impl PdfCrossReferenceTable {
    /// All entries across subsections
    pub fn entries(&self) -> impl Iterator<Item = &PdfXrefEntry> + '_ {
        self.subsections.iter().flat_map(|s| s.entries.iter())
    }
}

/// A `trailer` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfTrailer {
    /// Absolute offset of the `trailer` keyword
    pub offset: u64,
    /// The trailer dictionary, if it could be decoded
    pub dictionary: Option<PdfDictionary>,
}

/// Decoded PDF body in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfDocument {
    /// Version from the `%PDF-` header
    pub version: String,
    /// Indirect objects
    pub objects: Vec<PdfIndirectObject>,
    /// Cross-reference tables
    pub xref_tables: Vec<PdfCrossReferenceTable>,
    /// Trailers
    pub trailers: Vec<PdfTrailer>,
    /// Values of every `startxref` section
    pub startxref: Vec<u64>,
}

impl PdfDocument {
    /// The last decoded object with the given reference
    ///
    /// Incremental updates append newer revisions, so the last one wins.
    pub fn resolve(&self, reference: ObjectRef) -> Option<&PdfIndirectObject> {
        self.objects
            .iter()
            .rev()
            .find(|o| o.reference() == reference)
    }

    /// The document catalog, following the last trailer's `/Root`
    pub fn catalog(&self) -> Option<&PdfDictionary> {
        let root = self
            .trailers
            .iter()
            .rev()
            .filter_map(|t| t.dictionary.as_ref())
            .find_map(|d| d.get("Root"))?
            .as_reference()?;
        self.resolve(root)?.object.as_dictionary()
    }
}
