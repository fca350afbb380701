//! ELF object and executable decoding.
//!
//! The 16-byte identification block fixes the word width (`EI_CLASS`) and
//! byte order (`EI_DATA`) for everything after it. The program and section
//! header tables are located through the file header, and each section's
//! contents become a top-level component named through the section header
//! string table. Segments are not inserted as components because they
//! overlap the sections they load.

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::{ByteCursor, Endian};
use crate::error::{Anomaly, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use tracing::{debug, trace};

/// `\x7FELF`
pub const ELF_MAGIC: &[u8] = b"\x7FELF";

/// Section type of a section that occupies no file space
pub const SHT_NOBITS: u32 = 8;

/// Word width selected by `EI_CLASS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit objects
    Elf32,
    /// 64-bit objects
    Elf64,
}

/// Width and byte order shared by every multi-byte field after `e_ident`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    class: ElfClass,
    endian: Endian,
}

impl Layout {
    fn half(&self, c: &mut ByteCursor<'_>) -> Result<u16> {
        c.read_u16(self.endian)
    }

    fn word(&self, c: &mut ByteCursor<'_>) -> Result<u32> {
        c.read_u32(self.endian)
    }

    /// An address, offset or size: 4 bytes in ELF32, 8 in ELF64
    fn addr(&self, c: &mut ByteCursor<'_>) -> Result<u64> {
        match self.class {
            ElfClass::Elf32 => c.read_u32(self.endian).map(u64::from),
            ElfClass::Elf64 => c.read_u64(self.endian),
        }
    }

    fn program_header_size(&self) -> u16 {
        match self.class {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    fn section_header_size(&self) -> u16 {
        match self.class {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }
}

/// The ELF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    /// Word width
    pub class: ElfClass,
    /// Byte order
    pub endian: Endian,
    /// OS/ABI identification
    pub os_abi: u8,
    /// ABI version
    pub abi_version: u8,
    /// Object file type
    pub file_type: u16,
    /// Target architecture
    pub machine: u16,
    /// Object file version
    pub version: u32,
    /// Entry point address
    pub entry: u64,
    /// Program header table offset
    pub phoff: u64,
    /// Section header table offset
    pub shoff: u64,
    /// Processor-specific flags
    pub flags: u32,
    /// Size of this header
    pub ehsize: u16,
    /// Size of one program header
    pub phentsize: u16,
    /// Number of program headers
    pub phnum: u16,
    /// Size of one section header
    pub shentsize: u16,
    /// Number of section headers
    pub shnum: u16,
    /// Index of the section name string table
    pub shstrndx: u16,
}

/// One program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub flags: u32,
    /// File offset of the segment
    pub offset: u64,
    /// Virtual address
    pub vaddr: u64,
    /// Physical address
    pub paddr: u64,
    /// Bytes in the file image
    pub filesz: u64,
    /// Bytes in memory
    pub memsz: u64,
    /// Alignment
    pub align: u64,
}

/// One section header with its resolved name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSection {
    /// Name from the section header string table
    pub name: String,
    /// Offset of the name in the string table
    pub name_offset: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub flags: u64,
    /// Virtual address
    pub addr: u64,
    /// File offset of the contents
    pub offset: u64,
    /// Size of the contents
    pub size: u64,
    /// Section header table index link
    pub link: u32,
    /// Extra information
    pub info: u32,
    /// Alignment
    pub addralign: u64,
    /// Size of one entry, for table sections
    pub entsize: u64,
}

impl ElfSection {
    /// The bytes this section occupies in the file, if any
    pub fn file_span(&self) -> Option<Span> {
        (self.sh_type != 0 && self.sh_type != SHT_NOBITS && self.size > 0)
            .then(|| Span::new(self.offset, self.size))
    }
}

/// Decoded ELF header and tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfFile {
    /// The file header
    pub header: ElfHeader,
    /// Program headers
    pub program_headers: Vec<ElfProgramHeader>,
    /// Section headers
    pub sections: Vec<ElfSection>,
}

impl ElfFile {
    /// The first section with the given name
    pub fn section(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// True for 64-bit objects
    pub fn is_64(&self) -> bool {
        self.header.class == ElfClass::Elf64
    }
}

fn file_type_name(t: u16) -> &'static str {
    match t {
        0 => "none",
        1 => "relocatable",
        2 => "executable",
        3 => "shared object",
        4 => "core",
        _ => "unknown",
    }
}

fn machine_name(m: u16) -> &'static str {
    match m {
        0x03 => "x86",
        0x08 => "MIPS",
        0x14 => "PowerPC",
        0x15 => "PowerPC64",
        0x28 => "ARM",
        0x2A => "SuperH",
        0x32 => "IA-64",
        0x3E => "x86-64",
        0xB7 => "AArch64",
        0xF3 => "RISC-V",
        0xF7 => "BPF",
        0x102 => "LoongArch",
        _ => "unknown",
    }
}

fn segment_type_name(t: u32) -> &'static str {
    match t {
        0 => "PT_NULL",
        1 => "PT_LOAD",
        2 => "PT_DYNAMIC",
        3 => "PT_INTERP",
        4 => "PT_NOTE",
        5 => "PT_SHLIB",
        6 => "PT_PHDR",
        7 => "PT_TLS",
        0x6474_E550 => "PT_GNU_EH_FRAME",
        0x6474_E551 => "PT_GNU_STACK",
        0x6474_E552 => "PT_GNU_RELRO",
        0x6474_E553 => "PT_GNU_PROPERTY",
        _ => "unknown",
    }
}

fn section_type_name(t: u32) -> &'static str {
    match t {
        0 => "SHT_NULL",
        1 => "SHT_PROGBITS",
        2 => "SHT_SYMTAB",
        3 => "SHT_STRTAB",
        4 => "SHT_RELA",
        5 => "SHT_HASH",
        6 => "SHT_DYNAMIC",
        7 => "SHT_NOTE",
        8 => "SHT_NOBITS",
        9 => "SHT_REL",
        11 => "SHT_DYNSYM",
        14 => "SHT_INIT_ARRAY",
        15 => "SHT_FINI_ARRAY",
        0x6FFF_FFF6 => "SHT_GNU_HASH",
        0x6FFF_FFFE => "SHT_GNU_VERNEED",
        0x6FFF_FFFF => "SHT_GNU_VERSYM",
        _ => "unknown",
    }
}

/// Decoder for ELF files
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfDecoder;

impl Decoder for ElfDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Elf
    }

    fn decode(&self, data: Bytes, _options: &DecodeOptions) -> Result<FileFormat> {
        let mut out = FileFormatBuilder::new(data.clone());
        let whole = ByteCursor::new(&data);
        let mut cursor = whole;

        let magic = &data[..data.len().min(ELF_MAGIC.len())];
        if magic != ELF_MAGIC {
            return Err(Error::signature_mismatch(0, ELF_MAGIC, magic));
        }

        let (header, layout) = decode_header(&mut cursor, &mut out)?;
        debug!(
            "ELF {:?} {} {} with {} segments, {} sections",
            header.class,
            header.endian.as_str(),
            machine_name(header.machine),
            header.phnum,
            header.shnum
        );

        let program_headers = decode_program_headers(&whole, &mut out, &header, layout)?;
        let sections = decode_section_headers(&whole, &mut out, &header, layout)?;
        insert_section_contents(&whole, &mut out, &sections)?;

        Ok(out.finish(Document::Elf(ElfFile {
            header,
            program_headers,
            sections,
        })))
    }
}

fn decode_header(cursor: &mut ByteCursor<'_>, out: &mut FileFormatBuilder) -> Result<(ElfHeader, Layout)> {
    let mut node = ComponentBuilder::at("ELF Header", cursor);

    let mut ident = ComponentBuilder::at("Identification", cursor);
    ident.field_with(cursor, "Magic", |c| c.expect_bytes(ELF_MAGIC), |_| "\\x7FELF".to_string())?;
    let class = ident.field_with(
        cursor,
        "Class",
        |c| {
            let offset = c.position();
            match c.read_u8()? {
                1 => Ok(ElfClass::Elf32),
                2 => Ok(ElfClass::Elf64),
                other => Err(Error::malformed(offset, format!("EI_CLASS {} is neither 1 nor 2", other))),
            }
        },
        |c| format!("{:?}", c),
    )?;
    let endian = ident.field_with(
        cursor,
        "Data",
        |c| {
            let offset = c.position();
            match c.read_u8()? {
                1 => Ok(Endian::Little),
                2 => Ok(Endian::Big),
                other => Err(Error::malformed(offset, format!("EI_DATA {} is neither 1 nor 2", other))),
            }
        },
        |e| e.as_str().to_string(),
    )?;
    ident.field(cursor, "Version", |c| c.read_u8())?;
    let os_abi = ident.field(cursor, "OS ABI", |c| c.read_u8())?;
    let abi_version = ident.field(cursor, "ABI Version", |c| c.read_u8())?;
    ident.bytes(cursor, "Padding", 7)?;
    node.push(ident.finish(cursor)?)?;

    let layout = Layout { class, endian };
    let file_type = node.field_with(cursor, "Type", |c| layout.half(c), |t| {
        format!("{} ({})", t, file_type_name(*t))
    })?;
    let machine = node.field_with(cursor, "Machine", |c| layout.half(c), |m| {
        format!("{:#x} ({})", m, machine_name(*m))
    })?;
    let version = node.field(cursor, "Version", |c| layout.word(c))?;
    let entry = node.hex_field(cursor, "Entry Point", |c| layout.addr(c))?;
    let phoff = node.hex_field(cursor, "Program Header Offset", |c| layout.addr(c))?;
    let shoff = node.hex_field(cursor, "Section Header Offset", |c| layout.addr(c))?;
    let flags = node.hex_field(cursor, "Flags", |c| layout.word(c))?;
    let ehsize = node.field(cursor, "Header Size", |c| layout.half(c))?;
    let phentsize = node.field(cursor, "Program Header Entry Size", |c| layout.half(c))?;
    let phnum = node.field(cursor, "Program Header Count", |c| layout.half(c))?;
    let shentsize = node.field(cursor, "Section Header Entry Size", |c| layout.half(c))?;
    let shnum = node.field(cursor, "Section Header Count", |c| layout.half(c))?;
    let shstrndx = node.field(cursor, "Section Name Table Index", |c| layout.half(c))?;

    if ehsize as u64 != cursor.position() {
        node.anomaly(Anomaly::inconsistent(
            0,
            format!("e_ehsize is {} but the header is {} bytes", ehsize, cursor.position()),
        ));
    }
    node.set_value(format!(
        "{:?} {} {}",
        class,
        file_type_name(file_type),
        machine_name(machine)
    ));
    out.insert(node.finish(cursor)?)?;

    Ok((
        ElfHeader {
            class,
            endian,
            os_abi,
            abi_version,
            file_type,
            machine,
            version,
            entry,
            phoff,
            shoff,
            flags,
            ehsize,
            phentsize,
            phnum,
            shentsize,
            shnum,
            shstrndx,
        },
        layout,
    ))
}

/// Window over a header table, or `None` with an anomaly when it cannot be read
fn table_window<'a>(
    whole: &ByteCursor<'a>,
    out: &mut FileFormatBuilder,
    label: &str,
    offset: u64,
    count: u16,
    entry_size: u16,
    minimum: u16,
) -> Option<ByteCursor<'a>> {
    if count == 0 {
        return None;
    }
    if entry_size < minimum {
        out.anomaly(Anomaly::inconsistent(
            offset,
            format!("{} entry size {} is below the minimum of {}", label, entry_size, minimum),
        ));
        return None;
    }
    let span = Span::new(offset, count as u64 * entry_size as u64);
    let window = match whole.window(span.start, span.end()) {
        Ok(window) if !out.is_occupied(span) => window,
        _ => {
            out.anomaly(Anomaly::inconsistent(
                offset,
                format!("{} {} lies outside the file or overlaps another table", label, span),
            ));
            return None;
        }
    };
    Some(window)
}

fn decode_program_headers(
    whole: &ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    header: &ElfHeader,
    layout: Layout,
) -> Result<Vec<ElfProgramHeader>> {
    let Some(mut c) = table_window(
        whole,
        out,
        "Program Header Table",
        header.phoff,
        header.phnum,
        header.phentsize,
        layout.program_header_size(),
    ) else {
        return Ok(Vec::new());
    };

    let mut table = ComponentBuilder::at("Program Header Table", &c);
    let mut headers = Vec::with_capacity(header.phnum as usize);
    for _ in 0..header.phnum {
        let start = c.position();
        let mut node = ComponentBuilder::at("Program Header", &c);
        let p_type = node.field_with(&mut c, "Type", |c| layout.word(c), |t| {
            format!("{:#x} ({})", t, segment_type_name(*t))
        })?;
        let mut flags = 0;
        if layout.class == ElfClass::Elf64 {
            flags = node.hex_field(&mut c, "Flags", |c| layout.word(c))?;
        }
        let offset = node.hex_field(&mut c, "Offset", |c| layout.addr(c))?;
        let vaddr = node.hex_field(&mut c, "Virtual Address", |c| layout.addr(c))?;
        let paddr = node.hex_field(&mut c, "Physical Address", |c| layout.addr(c))?;
        let filesz = node.hex_field(&mut c, "File Size", |c| layout.addr(c))?;
        let memsz = node.hex_field(&mut c, "Memory Size", |c| layout.addr(c))?;
        if layout.class == ElfClass::Elf32 {
            flags = node.hex_field(&mut c, "Flags", |c| layout.word(c))?;
        }
        let align = node.hex_field(&mut c, "Alignment", |c| layout.addr(c))?;
        skip_entry_tail(&mut node, &mut c, start, header.phentsize)?;

        if offset.saturating_add(filesz) > whole.end_offset() {
            node.anomaly(Anomaly::inconsistent(
                start,
                format!(
                    "segment at {:#x} with {:#x} file bytes extends past the end of the file",
                    offset, filesz
                ),
            ));
        }
        node.set_value(segment_type_name(p_type));
        table.push(node.finish(&c)?)?;
        headers.push(ElfProgramHeader {
            p_type,
            flags,
            offset,
            vaddr,
            paddr,
            filesz,
            memsz,
            align,
        });
    }
    table.set_value(format!("{} entries", header.phnum));
    out.insert(table.finish(&c)?)?;
    Ok(headers)
}

/// Consumes bytes of an entry beyond the fields this decoder knows
fn skip_entry_tail(node: &mut ComponentBuilder, c: &mut ByteCursor<'_>, start: u64, entry_size: u16) -> Result<()> {
    let used = c.position() - start;
    if (entry_size as u64) > used {
        node.bytes(c, "Padding", (entry_size as u64 - used) as usize)?;
    }
    Ok(())
}

/// Raw fields of one section header, before its name is resolved
fn read_section_header(
    node: &mut ComponentBuilder,
    c: &mut ByteCursor<'_>,
    layout: Layout,
) -> Result<ElfSection> {
    let name_offset = node.hex_field(c, "Name Offset", |c| layout.word(c))?;
    let sh_type = node.field_with(c, "Type", |c| layout.word(c), |t| {
        format!("{:#x} ({})", t, section_type_name(*t))
    })?;
    let flags = node.hex_field(c, "Flags", |c| layout.addr(c))?;
    let addr = node.hex_field(c, "Address", |c| layout.addr(c))?;
    let offset = node.hex_field(c, "Offset", |c| layout.addr(c))?;
    let size = node.hex_field(c, "Size", |c| layout.addr(c))?;
    let link = node.field(c, "Link", |c| layout.word(c))?;
    let info = node.field(c, "Info", |c| layout.word(c))?;
    let addralign = node.field(c, "Alignment", |c| layout.addr(c))?;
    let entsize = node.field(c, "Entry Size", |c| layout.addr(c))?;
    Ok(ElfSection {
        name: String::new(),
        name_offset,
        sh_type,
        flags,
        addr,
        offset,
        size,
        link,
        info,
        addralign,
        entsize,
    })
}

/// The section header string table, located before the full table is decoded
fn section_names<'a>(whole: &ByteCursor<'a>, header: &ElfHeader, layout: Layout) -> Option<ByteCursor<'a>> {
    if header.shstrndx == 0 || header.shstrndx >= header.shnum {
        return None;
    }
    let at = header.shoff + header.shstrndx as u64 * header.shentsize as u64;
    let mut lookahead = whole.fork_at(at).ok()?;
    let mut scratch = ComponentBuilder::at("", &lookahead);
    let strtab = read_section_header(&mut scratch, &mut lookahead, layout).ok()?;
    whole
        .window(strtab.offset, strtab.offset.checked_add(strtab.size)?)
        .ok()
}

fn resolve_name(names: Option<&ByteCursor<'_>>, offset: u32) -> Option<String> {
    let names = names?;
    let mut c = names.fork_at(names.base() + offset as u64).ok()?;
    c.read_cstr()
        .ok()
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

fn decode_section_headers(
    whole: &ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    header: &ElfHeader,
    layout: Layout,
) -> Result<Vec<ElfSection>> {
    let Some(mut c) = table_window(
        whole,
        out,
        "Section Header Table",
        header.shoff,
        header.shnum,
        header.shentsize,
        layout.section_header_size(),
    ) else {
        return Ok(Vec::new());
    };
    let names = section_names(whole, header, layout);
    if names.is_none() && header.shstrndx != 0 {
        out.anomaly(Anomaly::inconsistent(
            header.shoff,
            format!("section name table index {} cannot be resolved", header.shstrndx),
        ));
    }

    let mut table = ComponentBuilder::at("Section Header Table", &c);
    let mut sections = Vec::with_capacity(header.shnum as usize);
    for index in 0..header.shnum {
        let start = c.position();
        let mut node = ComponentBuilder::at("Section Header", &c);
        let mut section = read_section_header(&mut node, &mut c, layout)?;
        skip_entry_tail(&mut node, &mut c, start, header.shentsize)?;
        section.name = match resolve_name(names.as_ref(), section.name_offset) {
            Some(name) => name,
            None if names.is_some() => {
                node.anomaly(Anomaly::inconsistent(
                    start,
                    format!(
                        "name offset {:#x} of section {} lies outside the name table",
                        section.name_offset, index
                    ),
                ));
                String::new()
            }
            None => String::new(),
        };
        trace!("Section {} '{}' at {:#x}", index, section.name, section.offset);
        node.set_value(if section.name.is_empty() {
            format!("[{}]", index)
        } else {
            format!("[{}] {}", index, section.name)
        });
        table.push(node.finish(&c)?)?;
        sections.push(section);
    }
    table.set_value(format!("{} entries", header.shnum));
    out.insert(table.finish(&c)?)?;
    Ok(sections)
}

/// Inserts a raw component for every section that occupies file bytes
fn insert_section_contents(
    whole: &ByteCursor<'_>,
    out: &mut FileFormatBuilder,
    sections: &[ElfSection],
) -> Result<()> {
    for section in sections {
        let Some(span) = section.file_span() else {
            continue;
        };
        let label = if section.name.is_empty() {
            "Section".to_string()
        } else {
            format!("Section {}", section.name)
        };
        let bytes = match whole.window(span.start, span.end()) {
            Ok(window) => window.rest(),
            Err(_) => {
                out.anomaly(Anomaly::inconsistent(
                    span.start,
                    format!("{} {} extends past the end of the file", label, span),
                ));
                continue;
            }
        };
        if out.is_occupied(span) {
            out.anomaly(Anomaly::inconsistent(
                span.start,
                format!("{} {} overlaps another component", label, span),
            ));
            continue;
        }
        out.insert(FileComponent::raw(label, span, bytes))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnomalyKind;
    use pretty_assertions::assert_eq;

    /// Writes integers in a chosen width and byte order
    struct Writer {
        out: Vec<u8>,
        endian: Endian,
        wide: bool,
    }

    impl Writer {
        fn u8(&mut self, v: u8) {
            self.out.push(v);
        }
        fn u16(&mut self, v: u16) {
            match self.endian {
                Endian::Little => self.out.extend_from_slice(&v.to_le_bytes()),
                Endian::Big => self.out.extend_from_slice(&v.to_be_bytes()),
            }
        }
        fn u32(&mut self, v: u32) {
            match self.endian {
                Endian::Little => self.out.extend_from_slice(&v.to_le_bytes()),
                Endian::Big => self.out.extend_from_slice(&v.to_be_bytes()),
            }
        }
        fn addr(&mut self, v: u64) {
            match (self.wide, self.endian) {
                (true, Endian::Little) => self.out.extend_from_slice(&v.to_le_bytes()),
                (true, Endian::Big) => self.out.extend_from_slice(&v.to_be_bytes()),
                (false, _) => self.u32(v as u32),
            }
        }
        fn section(&mut self, name: u32, sh_type: u32, offset: u64, size: u64) {
            self.u32(name);
            self.u32(sh_type);
            self.addr(0);
            self.addr(0);
            self.addr(offset);
            self.addr(size);
            self.u32(0);
            self.u32(0);
            self.addr(1);
            self.addr(0);
        }
    }

    /// Header, one PT_LOAD, `.text` and `.shstrtab`, then the section table
    fn sample(wide: bool, endian: Endian) -> Vec<u8> {
        let mut w = Writer {
            out: Vec::new(),
            endian,
            wide,
        };
        let (ehsize, phsize, shsize) = if wide { (64u16, 56u16, 64u16) } else { (52, 32, 40) };
        let text_at = (ehsize + phsize) as u64;
        let text = [0x90u8; 4];
        let strtab = b"\0.text\0.shstrtab\0";
        let strtab_at = text_at + text.len() as u64;
        let shoff = strtab_at + strtab.len() as u64;

        w.out.extend_from_slice(ELF_MAGIC);
        w.u8(if wide { 2 } else { 1 });
        w.u8(if endian == Endian::Little { 1 } else { 2 });
        w.u8(1);
        w.u8(0);
        w.u8(0);
        w.out.extend_from_slice(&[0; 7]);
        w.u16(2);
        w.u16(if wide { 0x3E } else { 0x28 });
        w.u32(1);
        w.addr(0x1000);
        w.addr(ehsize as u64);
        w.addr(shoff);
        w.u32(0);
        w.u16(ehsize);
        w.u16(phsize);
        w.u16(1);
        w.u16(shsize);
        w.u16(3);
        w.u16(2);
        assert_eq!(w.out.len(), ehsize as usize);

        w.u32(1);
        if wide {
            w.u32(5);
        }
        w.addr(0);
        w.addr(0x1000);
        w.addr(0x1000);
        w.addr(shoff);
        w.addr(shoff);
        if !wide {
            w.u32(5);
        }
        w.addr(0x1000);
        assert_eq!(w.out.len() as u64, text_at);

        w.out.extend_from_slice(&text);
        w.out.extend_from_slice(strtab);
        w.section(0, 0, 0, 0);
        w.section(1, 1, text_at, text.len() as u64);
        w.section(7, 3, strtab_at, strtab.len() as u64);
        w.out
    }

    fn decode(bytes: Vec<u8>) -> Result<FileFormat> {
        ElfDecoder.decode(Bytes::from(bytes), &DecodeOptions::new())
    }

    #[test]
    fn test_all_widths_and_byte_orders() {
        for (wide, endian) in [
            (false, Endian::Little),
            (false, Endian::Big),
            (true, Endian::Little),
            (true, Endian::Big),
        ] {
            let doc = decode(sample(wide, endian)).unwrap();
            doc.validate().unwrap();
            let elf = doc.document().as_elf().unwrap();

            assert_eq!(elf.is_64(), wide);
            assert_eq!(elf.header.endian, endian);
            assert_eq!(elf.header.entry, 0x1000);
            assert_eq!(elf.program_headers.len(), 1);
            assert_eq!(elf.program_headers[0].flags, 5);
            let names: Vec<&str> = elf.sections.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["", ".text", ".shstrtab"]);
            assert!(doc.anomalies().is_empty(), "{:?}", doc.anomalies());

            let labels: Vec<&str> = doc.components().filter_map(|c| c.label()).collect();
            assert_eq!(
                labels,
                vec![
                    "ELF Header",
                    "Program Header Table",
                    "Section .text",
                    "Section .shstrtab",
                    "Section Header Table"
                ]
            );
            let text = elf.section(".text").unwrap();
            let component = doc.top_level_at(text.offset).unwrap();
            assert_eq!(component.value(), Some("90 90 90 90"));
        }
    }

    #[test]
    fn test_bad_magic() {
        let err = decode(b"\x7FELG\x01\x01".to_vec()).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
    }

    #[test]
    fn test_bad_class() {
        let mut data = sample(false, Endian::Little);
        data[4] = 3;
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 4, .. }));
    }

    #[test]
    fn test_section_past_end_is_reported() {
        let mut data = sample(true, Endian::Little);
        let len = data.len();
        // size field of the .text section header (entry 1, field at +32)
        let at = len - 2 * 64 + 32;
        data[at..at + 8].copy_from_slice(&0x10_0000u64.to_le_bytes());
        let doc = decode(data).unwrap();
        let anomalies = doc.file_anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::StructuralInconsistency);
        assert!(anomalies[0].message.contains("Section .text"));
    }

    #[test]
    fn test_section_table_outside_file() {
        let mut data = sample(false, Endian::Little);
        // e_shoff at 32
        data[32..36].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        let doc = decode(data).unwrap();
        let elf = doc.document().as_elf().unwrap();
        assert!(elf.sections.is_empty());
        assert!(doc.file_anomalies()[0].message.contains("Section Header Table"));
    }
}
