//! Java class file decoding.
//!
//! Class files are strictly sequential and big-endian. Everything after the
//! constant pool refers back into it by 1-based index, so the pool is decoded
//! first and member names, descriptors and attribute names are resolved
//! through it. Attribute bodies are kept as raw bytes.

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::ByteCursor;
use crate::error::{Anomaly, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::formats::mutf8;
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::{debug, trace};

/// `CA FE BA BE`
pub const CLASS_MAGIC: &[u8] = b"\xCA\xFE\xBA\xBE";

const CLASS_FLAGS: &[(u16, &str)] = &[
    (0x0001, "public"),
    (0x0010, "final"),
    (0x0020, "super"),
    (0x0200, "interface"),
    (0x0400, "abstract"),
    (0x1000, "synthetic"),
    (0x2000, "annotation"),
    (0x4000, "enum"),
    (0x8000, "module"),
];

const FIELD_FLAGS: &[(u16, &str)] = &[
    (0x0001, "public"),
    (0x0002, "private"),
    (0x0004, "protected"),
    (0x0008, "static"),
    (0x0010, "final"),
    (0x0040, "volatile"),
    (0x0080, "transient"),
    (0x1000, "synthetic"),
    (0x4000, "enum"),
];

const METHOD_FLAGS: &[(u16, &str)] = &[
    (0x0001, "public"),
    (0x0002, "private"),
    (0x0004, "protected"),
    (0x0008, "static"),
    (0x0010, "final"),
    (0x0020, "synchronized"),
    (0x0040, "bridge"),
    (0x0080, "varargs"),
    (0x0100, "native"),
    (0x0400, "abstract"),
    (0x0800, "strict"),
    (0x1000, "synthetic"),
];

/// One constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0, and the slot after every `Long` and `Double`
    Unusable,
    /// Modified UTF-8 text
    Utf8(String),
    /// 32-bit integer
    Integer(i32),
    /// 32-bit float
    Float(f32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Class or interface, named by a `Utf8` entry
    Class {
        /// Index of the binary name
        name_index: u16,
    },
    /// String literal
    String {
        /// Index of the text
        string_index: u16,
    },
    /// Field reference
    FieldRef {
        /// Index of the owning class
        class_index: u16,
        /// Index of the name and type
        name_and_type_index: u16,
    },
    /// Class method reference
    MethodRef {
        /// Index of the owning class
        class_index: u16,
        /// Index of the name and type
        name_and_type_index: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Index of the owning interface
        class_index: u16,
        /// Index of the name and type
        name_and_type_index: u16,
    },
    /// Member name with its descriptor
    NameAndType {
        /// Index of the name
        name_index: u16,
        /// Index of the descriptor
        descriptor_index: u16,
    },
    /// Method handle
    MethodHandle {
        /// Bytecode behaviour, 1 to 9
        reference_kind: u8,
        /// Index of the referenced member
        reference_index: u16,
    },
    /// Method type
    MethodType {
        /// Index of the method descriptor
        descriptor_index: u16,
    },
    /// Dynamically computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method_attr_index: u16,
        /// Index of the name and type
        name_and_type_index: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method_attr_index: u16,
        /// Index of the name and type
        name_and_type_index: u16,
    },
    /// Module name
    Module {
        /// Index of the name
        name_index: u16,
    },
    /// Package name
    Package {
        /// Index of the name
        name_index: u16,
    },
}

impl Constant {
    /// Tag name as written in class file documentation
    pub fn tag_name(&self) -> &'static str {
        match self {
            Constant::Unusable => "Unusable",
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
        }
    }

    /// True for entries that occupy two pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

fn tag_name(tag: u8) -> &'static str {
    match tag {
        1 => "Utf8",
        3 => "Integer",
        4 => "Float",
        5 => "Long",
        6 => "Double",
        7 => "Class",
        8 => "String",
        9 => "Fieldref",
        10 => "Methodref",
        11 => "InterfaceMethodref",
        12 => "NameAndType",
        15 => "MethodHandle",
        16 => "MethodType",
        17 => "Dynamic",
        18 => "InvokeDynamic",
        19 => "Module",
        20 => "Package",
        _ => "unknown",
    }
}

fn reference_kind_name(kind: u8) -> &'static str {
    match kind {
        1 => "getField",
        2 => "getStatic",
        3 => "putField",
        4 => "putStatic",
        5 => "invokeVirtual",
        6 => "invokeStatic",
        7 => "invokeSpecial",
        8 => "newInvokeSpecial",
        9 => "invokeInterface",
        _ => "unknown",
    }
}

/// The constant pool, indexed from 1
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// The declared `constant_pool_count`, one more than the last index
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The entry at `index`, or `None` for slot 0 and out-of-range indexes
    pub fn get(&self, index: u16) -> Option<&Constant> {
        match index {
            0 => None,
            i => self.entries.get(i as usize),
        }
    }

    /// Every usable entry with its index
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    /// The text of a `Utf8` entry
    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// The binary name of a `Class` entry
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => None,
        }
    }

    fn utf8_or_index(&self, index: u16) -> String {
        self.utf8(index)
            .map_or_else(|| format!("#{}", index), str::to_string)
    }

    fn class_or_index(&self, index: u16) -> String {
        self.class_name(index)
            .map_or_else(|| format!("#{}", index), str::to_string)
    }

    fn name_and_type(&self, index: u16) -> String {
        match self.get(index) {
            Some(Constant::NameAndType {
                name_index,
                descriptor_index,
            }) => format!(
                "{}:{}",
                self.utf8_or_index(*name_index),
                self.utf8_or_index(*descriptor_index)
            ),
            _ => format!("#{}", index),
        }
    }

    /// Human readable rendering of the entry at `index`
    pub fn describe(&self, index: u16) -> String {
        let Some(constant) = self.get(index) else {
            return format!("#{}", index);
        };
        match constant {
            Constant::Unusable => "(second slot)".to_string(),
            Constant::Utf8(s) => format!("{:?}", s),
            Constant::Integer(v) => v.to_string(),
            Constant::Float(v) => v.to_string(),
            Constant::Long(v) => v.to_string(),
            Constant::Double(v) => v.to_string(),
            Constant::Class { name_index } => self.utf8_or_index(*name_index),
            Constant::String { string_index } => match self.utf8(*string_index) {
                Some(s) => format!("{:?}", s),
                None => format!("#{}", string_index),
            },
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => format!(
                "{}.{}",
                self.class_or_index(*class_index),
                self.name_and_type(*name_and_type_index)
            ),
            Constant::NameAndType { .. } => self.name_and_type(index),
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => format!("{} #{}", reference_kind_name(*reference_kind), reference_index),
            Constant::MethodType { descriptor_index } => self.utf8_or_index(*descriptor_index),
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => format!(
                "bootstrap #{} {}",
                bootstrap_method_attr_index,
                self.name_and_type(*name_and_type_index)
            ),
            Constant::Module { name_index } | Constant::Package { name_index } => {
                self.utf8_or_index(*name_index)
            }
        }
    }

    /// Describes the first reference of the entry at `index` that points nowhere
    fn dangling_reference(&self, index: u16) -> Option<String> {
        let refs: Vec<u16> = match self.get(index)? {
            Constant::Class { name_index }
            | Constant::Module { name_index }
            | Constant::Package { name_index } => vec![*name_index],
            Constant::String { string_index } => vec![*string_index],
            Constant::MethodType { descriptor_index } => vec![*descriptor_index],
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => vec![*class_index, *name_and_type_index],
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => vec![*name_index, *descriptor_index],
            Constant::MethodHandle { reference_index, .. } => vec![*reference_index],
            Constant::Dynamic {
                name_and_type_index,
                ..
            }
            | Constant::InvokeDynamic {
                name_and_type_index,
                ..
            } => vec![*name_and_type_index],
            _ => Vec::new(),
        };
        refs.into_iter()
            .find(|r| matches!(self.get(*r), None | Some(Constant::Unusable)))
            .map(|r| format!("constant #{} refers to unusable index #{}", index, r))
    }
}

/// A named attribute with its raw body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassAttribute {
    /// Resolved attribute name, or `#index` if it does not resolve
    pub name: String,
    /// Absolute span of the attribute body
    pub data: Span,
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMember {
    /// Access flags
    pub access_flags: u16,
    /// Resolved member name
    pub name: String,
    /// Resolved descriptor
    pub descriptor: String,
    /// Member attributes
    pub attributes: Vec<ClassAttribute>,
}

/// A decoded class file
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: u16,
    /// Binary name of this class
    pub this_class: String,
    /// Binary name of the superclass; `None` only for `java/lang/Object`
    pub super_class: Option<String>,
    /// Binary names of the direct superinterfaces
    pub interfaces: Vec<String>,
    /// Declared fields
    pub fields: Vec<ClassMember>,
    /// Declared methods
    pub methods: Vec<ClassMember>,
    /// Class attributes
    pub attributes: Vec<ClassAttribute>,
}

impl ClassFile {
    /// Java release that introduced the major version, such as `8` or `1.4`
    pub fn java_version(&self) -> Option<String> {
        java_version(self.major_version)
    }
}

fn java_version(major: u16) -> Option<String> {
    match major {
        45..=48 => Some(format!("1.{}", major - 44)),
        49..=100 => Some((major - 44).to_string()),
        _ => None,
    }
}

fn flag_names(flags: u16, table: &[(u16, &str)]) -> String {
    let names: Vec<&str> = table
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        format!("{:#06x}", flags)
    } else {
        format!("{:#06x} ({})", flags, names.join(" "))
    }
}

/// Decoder for Java class files
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassDecoder;

impl Decoder for ClassDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Class
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let mut cursor = ByteCursor::new(&data);

        let magic = &data[..data.len().min(CLASS_MAGIC.len())];
        if magic != CLASS_MAGIC {
            return Err(Error::signature_mismatch(0, CLASS_MAGIC, magic));
        }

        let mut header = ComponentBuilder::at("Class Header", &cursor);
        header.field_with(&mut cursor, "Magic", |c| c.expect_bytes(CLASS_MAGIC), |_| {
            "0xcafebabe".to_string()
        })?;
        let minor_version = header.field(&mut cursor, "Minor Version", |c| c.read_u16_be())?;
        let major_version = header.field_with(&mut cursor, "Major Version", |c| c.read_u16_be(), |v| {
            match java_version(*v) {
                Some(java) => format!("{} (Java {})", v, java),
                None => v.to_string(),
            }
        })?;
        header.set_value(format!("{}.{}", major_version, minor_version));
        out.insert(header.finish(&cursor)?)?;

        let constant_pool = decode_constant_pool(&mut cursor, &mut out)?;
        debug!(
            "Class file {}.{} with {} constant pool slots",
            major_version,
            minor_version,
            constant_pool.count()
        );

        let mut info = ComponentBuilder::at("Class Info", &cursor);
        let access_flags = info.field_with(&mut cursor, "Access Flags", |c| c.read_u16_be(), |f| {
            flag_names(*f, CLASS_FLAGS)
        })?;
        let this_class = class_reference(&mut info, &mut cursor, &constant_pool, "This Class")?
            .unwrap_or_default();
        let super_class = class_reference(&mut info, &mut cursor, &constant_pool, "Super Class")?;
        info.set_value(this_class.clone());
        out.insert(info.finish(&cursor)?)?;

        let mut node = ComponentBuilder::at("Interfaces", &cursor);
        let count = node.field(&mut cursor, "Count", |c| c.read_u16_be())?;
        let mut interfaces = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(name) = class_reference(&mut node, &mut cursor, &constant_pool, "Interface")? {
                interfaces.push(name);
            }
        }
        node.set_value(format!("{} interfaces", count));
        out.insert(node.finish(&cursor)?)?;

        let fields = decode_members(&mut cursor, &mut out, &constant_pool, "Fields", "Field", FIELD_FLAGS)?;
        let methods = decode_members(&mut cursor, &mut out, &constant_pool, "Methods", "Method", METHOD_FLAGS)?;

        let mut node = ComponentBuilder::at("Attributes", &cursor);
        let attributes = decode_attributes(&mut node, &mut cursor, &constant_pool)?;
        node.set_value(format!("{} attributes", attributes.len()));
        out.insert(node.finish(&cursor)?)?;

        if !cursor.is_eof() {
            let span = Span::new(cursor.position(), cursor.remaining() as u64);
            out.insert(
                FileComponent::raw("Trailing Data", span, cursor.rest()).with_anomaly(
                    Anomaly::inconsistent(span.start, format!("{} bytes after the last attribute", span.length)),
                ),
            )?;
        }

        Ok(out.finish(Document::Class(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })))
    }
}

fn decode_constant_pool(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<ConstantPool> {
    let mut node = ComponentBuilder::at("Constant Pool", cursor);
    let count = node.field(cursor, "Count", |c| c.read_u16_be())?;
    if count == 0 {
        node.anomaly(Anomaly::inconsistent(
            node.start(),
            "constant_pool_count is 0; the smallest valid count is 1",
        ));
    }

    let mut entries = vec![Constant::Unusable];
    let mut components = Vec::new();
    while entries.len() < count as usize {
        let index = entries.len() as u16;
        let mut entry = ComponentBuilder::at("Constant", cursor);
        let constant = read_constant(&mut entry, cursor)?;
        let wide = constant.is_wide();
        trace!("Constant #{} {}", index, constant.tag_name());
        entries.push(constant);
        if wide {
            if entries.len() == count as usize {
                entry.anomaly(Anomaly::inconsistent(
                    entry.start(),
                    format!("wide constant #{} occupies the slot past the end of the pool", index),
                ));
            }
            entries.push(Constant::Unusable);
        }
        components.push((index, entry.finish(cursor)?));
    }
    entries.truncate((count as usize).max(1));

    let pool = ConstantPool { entries };
    for (index, component) in components {
        let mut component = component.with_value(format!(
            "[{}] {} {}",
            index,
            pool.get(index).map_or("", Constant::tag_name),
            pool.describe(index)
        ));
        if let Some(problem) = pool.dangling_reference(index) {
            let start = component.start();
            component = component.with_anomaly(Anomaly::inconsistent(start, problem));
        }
        node.push(component)?;
    }

    node.set_value(format!("{} entries", pool.iter().count()));
    out.insert(node.finish(cursor)?)?;
    Ok(pool)
}

fn index_field(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>, label: &str) -> Result<u16> {
    node.field_with(c, label, |c| c.read_u16_be(), |i| format!("#{}", i))
}

fn read_constant(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>) -> Result<Constant> {
    let tag_offset = c.position();
    let tag = node.field_with(c, "Tag", |c| c.read_u8(), |t| format!("{} ({})", t, tag_name(*t)))?;
    let constant = match tag {
        1 => {
            let len = node.field(c, "Length", |c| c.read_u16_be())?;
            let raw = node.field_with(c, "Text", |c| c.read_bytes(len as usize), |b| {
                format!("{:?}", mutf8::decode(b))
            })?;
            Constant::Utf8(mutf8::decode(raw))
        }
        3 => Constant::Integer(node.field(c, "Value", |c| c.read_i32_be())?),
        4 => Constant::Float(node.field(c, "Value", |c| c.read_u32_be().map(f32::from_bits))?),
        5 => Constant::Long(node.field(c, "Value", |c| c.read_i64_be())?),
        6 => Constant::Double(node.field(c, "Value", |c| c.read_u64_be().map(f64::from_bits))?),
        7 => Constant::Class {
            name_index: index_field(node, c, "Name Index")?,
        },
        8 => Constant::String {
            string_index: index_field(node, c, "String Index")?,
        },
        9..=11 => {
            let class_index = index_field(node, c, "Class Index")?;
            let name_and_type_index = index_field(node, c, "Name and Type Index")?;
            match tag {
                9 => Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                },
                10 => Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                },
                _ => Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                },
            }
        }
        12 => Constant::NameAndType {
            name_index: index_field(node, c, "Name Index")?,
            descriptor_index: index_field(node, c, "Descriptor Index")?,
        },
        15 => Constant::MethodHandle {
            reference_kind: node.field_with(c, "Reference Kind", |c| c.read_u8(), |k| {
                format!("{} ({})", k, reference_kind_name(*k))
            })?,
            reference_index: index_field(node, c, "Reference Index")?,
        },
        16 => Constant::MethodType {
            descriptor_index: index_field(node, c, "Descriptor Index")?,
        },
        17 | 18 => {
            let bootstrap_method_attr_index = node.field(c, "Bootstrap Method Index", |c| c.read_u16_be())?;
            let name_and_type_index = index_field(node, c, "Name and Type Index")?;
            if tag == 17 {
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            } else {
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            }
        }
        19 => Constant::Module {
            name_index: index_field(node, c, "Name Index")?,
        },
        20 => Constant::Package {
            name_index: index_field(node, c, "Name Index")?,
        },
        other => {
            return Err(Error::malformed(
                tag_offset,
                format!("unknown constant pool tag {}", other),
            ))
        }
    };
    Ok(constant)
}

/// Reads a `Class` index; 0 yields `None`, an unresolvable index an anomaly
fn class_reference(
    node: &mut ComponentBuilder,
    c: &mut ByteCursor<'_>,
    pool: &ConstantPool,
    label: &str,
) -> Result<Option<String>> {
    let offset = c.position();
    let index = node.field_with(c, label, |c| c.read_u16_be(), |i| {
        pool.class_name(*i)
            .map_or_else(|| format!("#{}", i), str::to_string)
    })?;
    if index == 0 {
        return Ok(None);
    }
    if pool.class_name(index).is_none() {
        node.anomaly(Anomaly::inconsistent(
            offset,
            format!("{} #{} is not a Class constant", label, index),
        ));
    }
    Ok(Some(pool.class_or_index(index)))
}

/// Reads a `Utf8` index, recording an anomaly if it does not resolve
fn utf8_reference(
    node: &mut ComponentBuilder,
    c: &mut ByteCursor<'_>,
    pool: &ConstantPool,
    label: &str,
) -> Result<String> {
    let offset = c.position();
    let index = node.field_with(c, label, |c| c.read_u16_be(), |i| pool.utf8_or_index(*i))?;
    if pool.utf8(index).is_none() {
        node.anomaly(Anomaly::inconsistent(
            offset,
            format!("{} #{} is not a Utf8 constant", label, index),
        ));
    }
    Ok(pool.utf8_or_index(index))
}

fn decode_members(
    cursor: &mut ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    pool: &ConstantPool,
    label: &str,
    item: &str,
    flags: &[(u16, &str)],
) -> Result<Vec<ClassMember>> {
    let mut node = ComponentBuilder::at(label, cursor);
    let count = node.field(cursor, "Count", |c| c.read_u16_be())?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut member = ComponentBuilder::at(item, cursor);
        let access_flags = member.field_with(cursor, "Access Flags", |c| c.read_u16_be(), |f| {
            flag_names(*f, flags)
        })?;
        let name = utf8_reference(&mut member, cursor, pool, "Name")?;
        let descriptor = utf8_reference(&mut member, cursor, pool, "Descriptor")?;
        let attributes = decode_attributes(&mut member, cursor, pool)?;
        member.set_value(format!("{} {}", name, descriptor));
        node.push(member.finish(cursor)?)?;
        members.push(ClassMember {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    node.set_value(format!("{} {}", count, label.to_lowercase()));
    out.insert(node.finish(cursor)?)?;
    Ok(members)
}

fn decode_attributes(
    node: &mut ComponentBuilder,
    cursor: &mut ByteCursor<'_>,
    pool: &ConstantPool,
) -> Result<Vec<ClassAttribute>> {
    let count = node.field(cursor, "Attributes Count", |c| c.read_u16_be())?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut attr = ComponentBuilder::at("Attribute", cursor);
        let name = utf8_reference(&mut attr, cursor, pool, "Name")?;
        let length = attr.field(cursor, "Length", |c| c.read_u32_be())?;
        let data = Span::new(cursor.position(), length as u64);
        if length > 0 {
            attr.bytes(cursor, "Info", length as usize)?;
        }
        attr.set_value(name.clone());
        node.push(attr.finish(cursor)?)?;
        attributes.push(ClassAttribute { name, data });
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnomalyKind;
    use pretty_assertions::assert_eq;

    fn utf8(out: &mut Vec<u8>, text: &str) {
        out.push(1);
        out.extend_from_slice(&(text.len() as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
    }

    fn u16s(out: &mut Vec<u8>, values: &[u16]) {
        for v in values {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// `public class Hello { public static void main(String[]) }`
    fn sample() -> Vec<u8> {
        let mut out = CLASS_MAGIC.to_vec();
        u16s(&mut out, &[0, 52, 14]);
        out.push(7);
        u16s(&mut out, &[2]); // #1
        utf8(&mut out, "Hello"); // #2
        out.push(7);
        u16s(&mut out, &[4]); // #3
        utf8(&mut out, "java/lang/Object"); // #4
        utf8(&mut out, "main"); // #5
        utf8(&mut out, "([Ljava/lang/String;)V"); // #6
        utf8(&mut out, "Code"); // #7
        out.push(5);
        out.extend_from_slice(&1i64.to_be_bytes()); // #8 and #9
        utf8(&mut out, "SourceFile"); // #10
        utf8(&mut out, "Hello.java"); // #11
        out.push(10);
        u16s(&mut out, &[3, 13]); // #12
        out.push(12);
        u16s(&mut out, &[5, 6]); // #13

        // access, this, super, interfaces, fields
        u16s(&mut out, &[0x0021, 1, 3, 0, 0]);
        // one method with a 3-byte Code attribute
        u16s(&mut out, &[1, 0x0009, 5, 6, 1, 7]);
        out.extend_from_slice(&3u32.to_be_bytes());
        out.extend_from_slice(&[0xB1, 0x00, 0x00]);
        // SourceFile
        u16s(&mut out, &[1, 10]);
        out.extend_from_slice(&2u32.to_be_bytes());
        u16s(&mut out, &[11]);
        out
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        ClassDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    #[test]
    fn test_sample_class() {
        let doc = decode(sample()).unwrap();
        doc.validate().unwrap();
        let class = doc.document().as_class().unwrap();

        assert_eq!(class.major_version, 52);
        assert_eq!(class.java_version().as_deref(), Some("8"));
        assert_eq!(class.this_class, "Hello");
        assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
        assert_eq!(class.constant_pool.count(), 14);
        assert_eq!(class.constant_pool.get(8), Some(&Constant::Long(1)));
        assert_eq!(class.constant_pool.get(9), Some(&Constant::Unusable));
        assert_eq!(class.constant_pool.iter().count(), 12);
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].name, "main");
        assert_eq!(class.methods[0].descriptor, "([Ljava/lang/String;)V");
        assert_eq!(class.methods[0].attributes[0].name, "Code");
        assert_eq!(class.methods[0].attributes[0].data.length, 3);
        assert_eq!(class.attributes[0].name, "SourceFile");
        assert!(doc.anomalies().is_empty(), "{:?}", doc.anomalies());

        let labels: Vec<&str> = doc.components().filter_map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec![
                "Class Header",
                "Constant Pool",
                "Class Info",
                "Interfaces",
                "Fields",
                "Methods",
                "Attributes"
            ]
        );

        let pool = doc.top_level_at(8).unwrap();
        let values: Vec<&str> = pool.children().iter().filter_map(|c| c.value()).collect();
        assert_eq!(values[0], "14");
        assert_eq!(values[1], "[1] Class Hello");
        assert!(values.contains(&"[12] Methodref java/lang/Object.main:([Ljava/lang/String;)V"));
        assert!(values.contains(&"[8] Long 1"));
    }

    #[test]
    fn test_describe_method_flags() {
        assert_eq!(flag_names(0x0009, METHOD_FLAGS), "0x0009 (public static)");
        assert_eq!(flag_names(0, CLASS_FLAGS), "0x0000");
        assert_eq!(java_version(48).as_deref(), Some("1.4"));
        assert_eq!(java_version(65).as_deref(), Some("21"));
    }

    #[test]
    fn test_bad_magic() {
        let err = decode(b"\xCA\xFE\xBA\xBF\x00\x00".to_vec()).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_unknown_tag() {
        let mut data = sample();
        // tag of constant #1
        data[10] = 2;
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 10, .. }));
    }

    #[test]
    fn test_dangling_reference() {
        let mut data = sample();
        // constant #1 names index 9, the second slot of the Long
        data[11..13].copy_from_slice(&9u16.to_be_bytes());
        let doc = decode(data).unwrap();
        let anomalies = doc.anomalies();
        assert!(anomalies
            .iter()
            .any(|a| a.message == "constant #1 refers to unusable index #9"));
        // This Class now resolves to nothing usable
        assert!(anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::StructuralInconsistency));
        let class = doc.document().as_class().unwrap();
        assert_eq!(class.this_class, "#1");
    }

    #[test]
    fn test_truncated_attribute() {
        let mut data = sample();
        data.truncate(data.len() - 1);
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfData { needed: 2, available: 1, .. }));
    }

    #[test]
    fn test_trailing_data() {
        let mut data = sample();
        data.extend_from_slice(b"junk");
        let doc = decode(data).unwrap();
        let last = doc.components().last().unwrap();
        assert_eq!(last.label(), Some("Trailing Data"));
        assert_eq!(last.length(), 4);
        assert_eq!(last.anomalies().len(), 1);
    }
}
