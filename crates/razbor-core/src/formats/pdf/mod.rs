//! PDF document decoding.
//!
//! The body is scanned one line at a time and each line is dispatched on
//! its content:
//!
//! | Line                 | Section                                  |
//! |----------------------|------------------------------------------|
//! | `%%EOF`              | end-of-file marker                       |
//! | `%...`               | comment                                  |
//! | `N G obj ...`        | indirect object, parsed token by token   |
//! | `xref`               | cross-reference table                    |
//! | `trailer ...`        | trailer dictionary, up to `startxref`    |
//! | `startxref`          | offset of the last cross-reference table |
//! | anything else        | inert placeholder                        |
//!
//! An indirect object that fails to parse is replaced by an "Unparsed
//! Object" placeholder running to the next `endobj`, and scanning resumes
//! after it.
//!
//! Stream bodies end at the `endstream` keyword. A direct `/Length` whose
//! end is followed by `endstream` is trusted; otherwise the first
//! `endstream` before the next `endobj` wins and a disagreeing `/Length` is
//! recorded as an anomaly. When `endstream` is absent and a direct `/Length` fits in the
//! buffer, the body is taken from `/Length` and the missing terminator is
//! recorded instead.

mod lexer;
mod object;

pub use object::{
    ObjectRef, PdfCrossReferenceTable, PdfDictionary, PdfDocument, PdfIndirectObject, PdfName,
    PdfObject, PdfStream, PdfTrailer, PdfXrefEntry, PdfXrefSubsection,
};

use crate::component::{ComponentBuilder, FileComponent, Span};
use crate::cursor::{trim_whitespace, ByteCursor, Line};
use crate::error::{Anomaly, AnomalyKind, Error, Result};
use crate::format::{Document, FileFormat, FileFormatBuilder, FormatKind};
use crate::registry::{DecodeOptions, Decoder};
use bytes::Bytes;
use lexer::{at_keyword, expect_keyword, read_integer, skip_whitespace, ObjectParser};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Every PDF starts with this
pub const PDF_HEADER: &[u8] = b"%PDF-";

/// Size of one cross-reference entry, including its two-byte end of line
const XREF_ENTRY_LEN: usize = 20;

/// Decoder for PDF documents
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfDecoder;

impl Decoder for PdfDecoder {
    fn kind(&self) -> FormatKind {
        FormatKind::Pdf
    }

    fn decode(&self, data: Bytes, options: &DecodeOptions) -> Result<FileFormat> {
        let mut cursor = ByteCursor::new(&data);
        if !cursor.starts_with(PDF_HEADER) {
            let found = &data[..data.len().min(PDF_HEADER.len())];
            return Err(Error::signature_mismatch(0, PDF_HEADER, found));
        }

        let mut scanner = Scanner {
            out: FileFormatBuilder::new(data.clone()),
            pdf: PdfDocument::default(),
            parser: ObjectParser::new(options.max_nesting_depth),
        };

        let header = cursor.read_line()?;
        scanner.pdf.version = String::from_utf8_lossy(trim_whitespace(&header.content[PDF_HEADER.len()..]))
            .into_owned();
        debug!("PDF version {}", scanner.pdf.version);
        scanner.out.insert(
            FileComponent::leaf("Header", header.span()).with_value(scanner.pdf.version.clone()),
        )?;

        while !cursor.is_eof() {
            let line = cursor.read_line()?;
            let trimmed = line.trimmed();

            if trimmed == b"%%EOF" {
                scanner
                    .out
                    .insert(FileComponent::leaf("End Of File Marker", line.span()).with_value("%%EOF"))?;
            } else if trimmed.starts_with(b"%") {
                scanner.out.insert(
                    FileComponent::leaf("Comment", line.span())
                        .with_value(String::from_utf8_lossy(trimmed).into_owned()),
                )?;
            } else if is_object_header(trimmed) {
                cursor.unread_line(&line)?;
                scanner.indirect_object(&mut cursor)?;
            } else if trimmed == b"xref" {
                scanner.xref(&mut cursor, &line)?;
            } else if trimmed.starts_with(b"trailer") {
                scanner.trailer(&mut cursor, &line)?;
            } else if trimmed == b"startxref" {
                scanner.startxref(&mut cursor, &line)?;
            } else {
                trace!("Unrecognized line at {:#x}", line.start);
                scanner.out.insert(FileComponent::leaf("Empty Line", line.span()))?;
            }
        }

        scanner.cross_check();
        Ok(scanner.out.finish(Document::Pdf(scanner.pdf)))
    }
}

/// Offset of an `endstream` keyword at `position`, past any whitespace
fn endstream_at(cursor: &ByteCursor<'_>, position: u64) -> Option<u64> {
    let after = cursor.window(position, cursor.end_offset()).ok()?;
    let blanks = after.rest().iter().take_while(|b| lexer::is_whitespace(**b)).count();
    after.rest()[blanks..].starts_with(b"endstream").then_some(position + blanks as u64)
}

/// True for lines starting with `N G obj`
fn is_object_header(line: &[u8]) -> bool {
    let mut cursor = ByteCursor::new(line);
    let number = read_integer(&mut cursor);
    let _ = skip_whitespace(&mut cursor);
    let generation = read_integer(&mut cursor);
    let _ = skip_whitespace(&mut cursor);
    matches!((number, generation), (Ok(n), Ok(g)) if n >= 0 && g >= 0) && at_keyword(&cursor, "obj")
}

/// `first count` header of a cross-reference subsection
fn subsection_header(line: &[u8]) -> Option<(u32, u32)> {
    let mut parts = line.split(|b| b.is_ascii_whitespace()).filter(|p| !p.is_empty());
    let first = std::str::from_utf8(parts.next()?).ok()?.parse().ok()?;
    let count = std::str::from_utf8(parts.next()?).ok()?.parse().ok()?;
    parts.next().is_none().then_some((first, count))
}

/// Absolute offset of the first non-blank byte of a line
fn keyword_offset(line: &Line<'_>) -> u64 {
    let lead = line
        .content
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(0);
    line.start + lead as u64
}

/// Consumes blanks and one end of line if nothing else remains on the line
fn skip_line_remainder(cursor: &mut ByteCursor<'_>) -> Result<()> {
    let rest = cursor.rest();
    let blanks = rest.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
    let after = &rest[blanks..];
    let eol = if after.starts_with(b"\r\n") {
        2
    } else if after.starts_with(b"\n") || after.starts_with(b"\r") {
        1
    } else if after.is_empty() {
        0
    } else {
        return Ok(());
    };
    cursor.skip(blanks + eol)
}

struct Scanner {
    out: FileFormatBuilder,
    pdf: PdfDocument,
    parser: ObjectParser,
}

impl Scanner {
    /// Decodes one indirect object, containing recoverable failures
    fn indirect_object(&mut self, cursor: &mut ByteCursor<'_>) -> Result<()> {
        let start = cursor.position();
        let mut lookahead = *cursor;

        match self.parse_indirect_object(&mut lookahead) {
            Ok((object, component)) => {
                debug!(
                    "Object {} {} at {:#x}: {}",
                    object.number, object.generation, object.offset, object.object
                );
                self.out.insert(component)?;
                self.pdf.objects.push(object);
                *cursor = lookahead;
            }
            Err(e) if e.is_recoverable() || matches!(e, Error::UnexpectedEndOfData { .. }) => {
                let end = match cursor.find(b"endobj") {
                    Some(pos) => pos + b"endobj".len() as u64,
                    None => cursor.read_line()?.end(),
                };
                cursor.rewind_to(start)?;
                let bytes = cursor.read_bytes((end - start) as usize)?;
                let placeholder = FileComponent::raw("Unparsed Object", Span::between(start, end), bytes)
                    .with_anomaly(Anomaly::from_error(&e, start));
                self.out.insert(placeholder)?;
            }
            Err(e) => return Err(e),
        }

        skip_line_remainder(cursor)
    }

    fn parse_indirect_object(
        &self,
        cursor: &mut ByteCursor<'_>,
    ) -> Result<(PdfIndirectObject, FileComponent)> {
        skip_whitespace(cursor)?;
        let offset = cursor.position();
        let mut node = ComponentBuilder::at("Indirect Object", cursor);

        let number = node.field(cursor, "Object Number", read_integer)?;
        skip_whitespace(cursor)?;
        let generation = node.field(cursor, "Generation Number", read_integer)?;
        skip_whitespace(cursor)?;
        node.field_with(cursor, "Keyword", |c| expect_keyword(c, "obj"), |_| "obj".to_string())?;

        let number = u32::try_from(number)
            .map_err(|_| Error::malformed(offset, format!("object number {} out of range", number)))?;
        let generation = u16::try_from(generation)
            .map_err(|_| Error::malformed(offset, format!("generation {} out of range", generation)))?;

        let (value, component) = self.parser.parse(cursor)?;
        skip_whitespace(cursor)?;

        let object = match value {
            PdfObject::Dictionary(dictionary) if at_keyword(cursor, "stream") => {
                let (stream, component) = self.stream(cursor, dictionary, component)?;
                node.push(component)?;
                PdfObject::Stream(stream)
            }
            value => {
                node.push(component)?;
                value
            }
        };

        skip_whitespace(cursor)?;
        if at_keyword(cursor, "endobj") {
            node.field_with(cursor, "Keyword", |c| expect_keyword(c, "endobj"), |_| {
                "endobj".to_string()
            })?;
        } else {
            node.anomaly(Anomaly::new(
                cursor.position(),
                AnomalyKind::MissingTerminator,
                format!("object {} {} has no endobj", number, generation),
            ));
        }

        node.set_value(format!("{} {} obj", number, generation));
        let component = node.finish(cursor)?;
        let object = PdfIndirectObject {
            offset,
            number,
            generation,
            object,
        };
        Ok((object, component))
    }

    /// Reads `stream ... endstream` after a stream dictionary
    fn stream(
        &self,
        cursor: &mut ByteCursor<'_>,
        dictionary: PdfDictionary,
        dictionary_component: FileComponent,
    ) -> Result<(PdfStream, FileComponent)> {
        let mut node = ComponentBuilder::new("Stream", dictionary_component.start());
        node.push(dictionary_component)?;
        node.field_with(cursor, "Keyword", |c| expect_keyword(c, "stream"), |_| {
            "stream".to_string()
        })?;
        if cursor.starts_with(b"\r\n") {
            cursor.skip(2)?;
        } else if cursor.starts_with(b"\n") || cursor.starts_with(b"\r") {
            cursor.skip(1)?;
        }

        let body_start = cursor.position();
        let declared = dictionary.get("Length").and_then(PdfObject::as_integer);

        let length_end = declared
            .and_then(|length| u64::try_from(length).ok())
            .and_then(|length| body_start.checked_add(length))
            .filter(|&end| end <= cursor.end_offset());
        let at_length = length_end.and_then(|end| endstream_at(cursor, end));
        let terminator = at_length.or_else(|| {
            let keyword = cursor.find(b"endstream")?;
            // An endstream beyond the next endobj belongs to a later object
            let object_end = cursor
                .window(length_end.unwrap_or(body_start), cursor.end_offset())
                .ok()?
                .find(b"endobj");
            match object_end {
                Some(end) if end < keyword => None,
                _ => Some(keyword),
            }
        });
        let data = match terminator {
            Some(keyword) => {
                let raw = cursor.window(body_start, keyword)?.rest();
                let body = match (at_length, declared) {
                    (Some(_), Some(length)) => &raw[..length as usize],
                    _ => raw
                        .strip_suffix(b"\r\n")
                        .or_else(|| raw.strip_suffix(b"\n"))
                        .or_else(|| raw.strip_suffix(b"\r"))
                        .unwrap_or(raw),
                };
                let length = body.len() as u64;

                if let Some(declared) = declared {
                    if declared != length as i64 && declared != raw.len() as i64 {
                        node.anomaly(Anomaly::inconsistent(
                            body_start,
                            format!(
                                "stream /Length is {} but endstream leaves {} bytes",
                                declared, length
                            ),
                        ));
                    }
                }

                let (_, data) = cursor.spanned(|c| c.read_bytes(body.len()))?;
                if !data.is_empty() {
                    node.push(FileComponent::raw("Stream Data", data, body))?;
                }
                cursor.skip((keyword - cursor.position()) as usize)?;
                node.field_with(cursor, "Keyword", |c| expect_keyword(c, "endstream"), |_| {
                    "endstream".to_string()
                })?;
                data
            }
            None => match declared {
                Some(length) if length >= 0 && length as u64 <= cursor.remaining() as u64 => {
                    let (body, data) = cursor.spanned(|c| c.read_bytes(length as usize))?;
                    if !data.is_empty() {
                        node.push(FileComponent::raw("Stream Data", data, body))?;
                    }
                    node.anomaly(Anomaly::new(
                        body_start,
                        AnomalyKind::MissingTerminator,
                        "endstream not found; stream ends at its /Length",
                    ));
                    data
                }
                _ => return Err(Error::missing_terminator(body_start, "endstream")),
            },
        };

        let stream = PdfStream { dictionary, data };
        node.set_value(format!("stream ({} bytes)", data.length));
        Ok((stream, node.finish(cursor)?))
    }

    /// Decodes an `xref` section whose keyword line was just read
    fn xref(&mut self, cursor: &mut ByteCursor<'_>, keyword: &Line<'_>) -> Result<()> {
        let offset = keyword_offset(keyword);
        let mut node = ComponentBuilder::new("Cross-Reference Table", keyword.start);
        node.push(FileComponent::leaf("Keyword", keyword.span()).with_value("xref"))?;
        let mut table = PdfCrossReferenceTable {
            offset,
            subsections: Vec::new(),
        };

        while !cursor.is_eof() {
            let header = cursor.read_line()?;
            let Some((first, count)) = subsection_header(header.trimmed()) else {
                cursor.unread_line(&header)?;
                break;
            };

            let mut sub = ComponentBuilder::new("Subsection", header.start);
            sub.set_value(format!("{} {}", first, count));
            sub.push(
                FileComponent::leaf("Subsection Header", header.span())
                    .with_value(format!("{} {}", first, count)),
            )?;
            let mut subsection = PdfXrefSubsection {
                first,
                count,
                entries: Vec::new(),
            };

            for i in 0..count {
                let number = first.saturating_add(i);
                let entry_start = cursor.position();
                let entry = if cursor.remaining() < XREF_ENTRY_LEN {
                    None
                } else {
                    let (raw, span) = cursor.spanned(|c| c.read_bytes(XREF_ENTRY_LEN))?;
                    match parse_xref_entry(raw, number, span.start) {
                        Ok(entry) => Some((entry, span)),
                        Err(e) => {
                            trace!("{}", e);
                            None
                        }
                    }
                };
                // A short subsection leaves whatever follows it to the main loop
                let Some((entry, span)) = entry else {
                    cursor.rewind_to(entry_start)?;
                    sub.anomaly(Anomaly::inconsistent(
                        entry_start,
                        format!("subsection declares {} entries but only {} are present", count, i),
                    ));
                    break;
                };
                sub.push(FileComponent::leaf("Entry", span).with_value(format!(
                    "{}: {:010} {:05} {}",
                    number,
                    entry.offset,
                    entry.generation,
                    if entry.in_use { 'n' } else { 'f' }
                )))?;
                subsection.entries.push(entry);
            }

            node.push(sub.finish(cursor)?)?;
            table.subsections.push(subsection);
        }

        debug!(
            "Cross-reference table at {:#x}: {} entries",
            offset,
            table.entries().count()
        );
        self.out.insert(node.finish(cursor)?)?;
        self.pdf.xref_tables.push(table);
        Ok(())
    }

    /// Decodes a trailer; the body runs until a line equal to `startxref`,
    /// which is pushed back for the main loop
    fn trailer(&mut self, cursor: &mut ByteCursor<'_>, line: &Line<'_>) -> Result<()> {
        let keyword = line.start
            + memchr::memmem::find(line.content, b"trailer").unwrap_or(0) as u64;
        let body_start = keyword + b"trailer".len() as u64;

        let mut node = ComponentBuilder::new("Trailer", line.start);
        node.push(FileComponent::leaf("Keyword", Span::new(keyword, 7)).with_value("trailer"))?;

        let mut terminated = false;
        while !cursor.is_eof() {
            let next = cursor.read_line()?;
            if next.trimmed() == b"startxref" {
                cursor.unread_line(&next)?;
                terminated = true;
                break;
            }
        }
        let body_end = cursor.position();
        if !terminated {
            node.anomaly(Anomaly::new(
                body_end,
                AnomalyKind::MissingTerminator,
                "trailer is not followed by startxref",
            ));
        }

        let mut body = cursor.window(body_start, body_end)?;
        skip_whitespace(&mut body)?;
        let dictionary = if body.is_eof() {
            node.anomaly(Anomaly::inconsistent(body_start, "trailer has no dictionary"));
            None
        } else {
            let dict_start = body.position();
            match self.parser.parse(&mut body) {
                Ok((PdfObject::Dictionary(dictionary), component)) => {
                    node.push(component)?;
                    Some(dictionary)
                }
                Ok((other, component)) => {
                    node.push(component.with_anomaly(Anomaly::inconsistent(
                        dict_start,
                        format!("trailer holds {} instead of a dictionary", other.type_name()),
                    )))?;
                    None
                }
                Err(e) if e.is_recoverable() || matches!(e, Error::UnexpectedEndOfData { .. }) => {
                    let rest = cursor.window(dict_start, body_end)?.rest();
                    let raw = trim_whitespace(rest);
                    node.push(
                        FileComponent::raw("Trailer Dictionary", Span::new(dict_start, raw.len() as u64), raw)
                            .with_anomaly(Anomaly::from_error(&e, dict_start)),
                    )?;
                    None
                }
                Err(e) => return Err(e),
            }
        };

        debug!("Trailer at {:#x}", keyword);
        self.out.insert(node.finish_at(body_end)?)?;
        self.pdf.trailers.push(PdfTrailer {
            offset: keyword,
            dictionary,
        });
        Ok(())
    }

    fn startxref(&mut self, cursor: &mut ByteCursor<'_>, keyword: &Line<'_>) -> Result<()> {
        let mut node = ComponentBuilder::new("Startxref", keyword.start);
        node.push(FileComponent::leaf("Keyword", keyword.span()).with_value("startxref"))?;

        if !cursor.is_eof() {
            let line = cursor.read_line()?;
            let offset = std::str::from_utf8(line.trimmed())
                .ok()
                .and_then(|s| s.parse::<u64>().ok());
            match offset {
                Some(offset) => {
                    node.push(FileComponent::leaf("Offset", line.span()).with_value(offset.to_string()))?;
                    node.set_value(offset.to_string());
                    self.pdf.startxref.push(offset);
                }
                None => {
                    cursor.unread_line(&line)?;
                    node.anomaly(Anomaly::inconsistent(line.start, "startxref is not followed by an offset"));
                }
            }
        }

        self.out.insert(node.finish(cursor)?)?;
        Ok(())
    }

    /// Compares offsets recorded in the file against what was decoded
    fn cross_check(&mut self) {
        let mut by_number: HashMap<u32, Vec<(u16, u64)>> = HashMap::new();
        for object in &self.pdf.objects {
            by_number
                .entry(object.number)
                .or_default()
                .push((object.generation, object.offset));
        }

        let mut findings = Vec::new();

        for &startxref in &self.pdf.startxref {
            let hits_table = self.pdf.xref_tables.iter().any(|t| t.offset == startxref);
            let hits_object = self.pdf.objects.iter().any(|o| o.offset == startxref);
            if !hits_table && !hits_object {
                findings.push(Anomaly::inconsistent(
                    startxref,
                    format!("startxref points to {:#x}, where no cross-reference section starts", startxref),
                ));
            }
        }

        for table in &self.pdf.xref_tables {
            for entry in table.entries().filter(|e| e.in_use) {
                let matches = by_number.get(&entry.number).map_or(false, |objects| {
                    objects
                        .iter()
                        .any(|&(g, offset)| g == entry.generation && offset == entry.offset)
                });
                if !matches {
                    findings.push(Anomaly::inconsistent(
                        table.offset,
                        format!(
                            "xref entry for object {} {} points to {:#x}, where that object does not start",
                            entry.number, entry.generation, entry.offset
                        ),
                    ));
                }
            }
        }

        for object in &self.pdf.objects {
            let PdfObject::Stream(stream) = &object.object else {
                continue;
            };
            let Some(length_ref) = stream.dictionary.get("Length").and_then(PdfObject::as_reference) else {
                continue;
            };
            let declared = self
                .pdf
                .resolve(length_ref)
                .and_then(|o| o.object.as_integer());
            match declared {
                Some(declared) if declared == stream.data.length as i64 => {}
                Some(declared) => findings.push(Anomaly::inconsistent(
                    stream.data.start,
                    format!(
                        "stream of object {} has indirect /Length {} but {} bytes",
                        object.number, declared, stream.data.length
                    ),
                )),
                None => trace!("Unresolved /Length {} of object {}", length_ref, object.number),
            }
        }

        for anomaly in findings {
            self.out.anomaly(anomaly);
        }
    }
}

/// Parses `oooooooooo ggggg n\r\n`
fn parse_xref_entry(raw: &[u8], number: u32, offset: u64) -> Result<PdfXrefEntry> {
    let malformed = || {
        Error::malformed(
            offset,
            format!("invalid cross-reference entry '{}'", String::from_utf8_lossy(raw).trim_end()),
        )
    };
    let digits = |bytes: &[u8]| -> Option<u64> {
        if !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(bytes).ok()?.parse().ok()
    };

    if raw.len() != XREF_ENTRY_LEN || raw[10] != b' ' || raw[16] != b' ' {
        return Err(malformed());
    }
    let entry_offset = digits(&raw[..10]).ok_or_else(malformed)?;
    let generation = digits(&raw[11..16])
        .and_then(|g| u16::try_from(g).ok())
        .ok_or_else(malformed)?;
    let in_use = match raw[17] {
        b'n' => true,
        b'f' => false,
        _ => return Err(malformed()),
    };
    if !raw[18..].iter().all(|b| matches!(b, b' ' | b'\r' | b'\n')) {
        return Err(malformed());
    }

    Ok(PdfXrefEntry {
        number,
        offset: entry_offset,
        generation,
        in_use,
    })
}
