//! Token-level parsing of PDF object values.
//!
//! Every parsed value comes back together with a component covering exactly
//! the bytes of its token (or, for arrays and dictionaries, the brackets and
//! everything between them). Whitespace and comments between tokens belong
//! to no component.

use super::object::{ObjectRef, PdfDictionary, PdfName, PdfObject};
use crate::component::{ComponentBuilder, FileComponent};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};

/// PDF whitespace: NUL, tab, LF, FF, CR and space
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

pub(crate) fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Skips whitespace and `%` comments
pub(crate) fn skip_whitespace(cursor: &mut ByteCursor<'_>) -> Result<()> {
    loop {
        match cursor.peek_u8() {
            Ok(b) if is_whitespace(b) => cursor.skip(1)?,
            Ok(b'%') => {
                let rest = cursor.rest();
                let n = memchr::memchr2(b'\r', b'\n', rest).unwrap_or(rest.len());
                cursor.skip(n)?;
            }
            _ => return Ok(()),
        }
    }
}

/// Reads a run of regular characters, possibly empty
pub(crate) fn read_token<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8]> {
    let rest = cursor.rest();
    let n = rest.iter().position(|b| !is_regular(*b)).unwrap_or(rest.len());
    cursor.read_bytes(n)
}

/// Consumes `keyword` as a whole token
pub(crate) fn expect_keyword(cursor: &mut ByteCursor<'_>, keyword: &str) -> Result<()> {
    let start = cursor.position();
    let mut lookahead = *cursor;
    let token = read_token(&mut lookahead)?;
    if token != keyword.as_bytes() {
        return Err(Error::malformed(
            start,
            format!(
                "expected '{}', found '{}'",
                keyword,
                String::from_utf8_lossy(token)
            ),
        ));
    }
    *cursor = lookahead;
    Ok(())
}

/// True if the next token is `keyword`
pub(crate) fn at_keyword(cursor: &ByteCursor<'_>, keyword: &str) -> bool {
    let mut lookahead = *cursor;
    read_token(&mut lookahead).map_or(false, |t| t == keyword.as_bytes())
}

/// Reads an integer token
pub(crate) fn read_integer(cursor: &mut ByteCursor<'_>) -> Result<i64> {
    let start = cursor.position();
    let token = read_token(cursor)?;
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            Error::malformed(
                start,
                format!("expected an integer, found '{}'", String::from_utf8_lossy(token)),
            )
        })
}

fn is_unsigned(token: &[u8]) -> bool {
    !token.is_empty() && token.iter().all(u8::is_ascii_digit)
}

fn read_name(cursor: &mut ByteCursor<'_>) -> Result<PdfName> {
    cursor.expect_bytes(b"/")?;
    let token = read_token(cursor)?;
    let mut out = Vec::with_capacity(token.len());
    let mut i = 0;
    while i < token.len() {
        let escaped = match (token[i], token.get(i + 1), token.get(i + 2)) {
            (b'#', Some(&hi), Some(&lo)) => hex_value(hi).zip(hex_value(lo)),
            _ => None,
        };
        match escaped {
            Some((hi, lo)) => {
                out.push(hi << 4 | lo);
                i += 3;
            }
            None => {
                out.push(token[i]);
                i += 1;
            }
        }
    }
    Ok(PdfName(String::from_utf8_lossy(&out).into_owned()))
}

fn read_hex_string(cursor: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
    let start = cursor.position();
    cursor.expect_bytes(b"<")?;
    let mut out = Vec::new();
    let mut pending: Option<u8> = None;
    loop {
        if cursor.is_eof() {
            return Err(Error::missing_terminator(start, ">"));
        }
        let offset = cursor.position();
        let b = cursor.read_u8()?;
        if b == b'>' {
            break;
        }
        if is_whitespace(b) {
            continue;
        }
        let nibble = hex_value(b).ok_or_else(|| {
            Error::malformed(offset, format!("invalid hex digit {:#04x} in hex string", b))
        })?;
        match pending.take() {
            Some(hi) => out.push(hi << 4 | nibble),
            None => pending = Some(nibble),
        }
    }
    // an odd digit count implies a trailing 0
    if let Some(hi) = pending {
        out.push(hi << 4);
    }
    Ok(out)
}

fn read_literal_string(cursor: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
    let start = cursor.position();
    cursor.expect_bytes(b"(")?;
    let mut out = Vec::new();
    let mut depth = 1usize;
    loop {
        if cursor.is_eof() {
            return Err(Error::missing_terminator(start, ")"));
        }
        match cursor.read_u8()? {
            b'(' => {
                depth += 1;
                out.push(b'(');
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                out.push(b')');
            }
            b'\\' => {
                if cursor.is_eof() {
                    return Err(Error::missing_terminator(start, ")"));
                }
                match cursor.read_u8()? {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'\r' => {
                        if cursor.starts_with(b"\n") {
                            cursor.skip(1)?;
                        }
                    }
                    b'\n' => {}
                    d @ b'0'..=b'7' => {
                        let mut value = (d - b'0') as u16;
                        for _ in 0..2 {
                            match cursor.peek_u8() {
                                Ok(d @ b'0'..=b'7') => {
                                    cursor.skip(1)?;
                                    value = value * 8 + (d - b'0') as u16;
                                }
                                _ => break,
                            }
                        }
                        out.push(value as u8);
                    }
                    // covers \( \) \\ and unknown escapes, whose backslash is dropped
                    other => out.push(other),
                }
            }
            b'\r' => {
                if cursor.starts_with(b"\n") {
                    cursor.skip(1)?;
                }
                out.push(b'\n');
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Reads a number, or an `N G R` reference when an unsigned integer is
/// followed by another unsigned integer and `R`
fn read_number_or_reference(cursor: &mut ByteCursor<'_>) -> Result<PdfObject> {
    let start = cursor.position();
    let token = read_token(cursor)?;

    if is_unsigned(token) {
        let mut lookahead = *cursor;
        skip_whitespace(&mut lookahead)?;
        let generation = read_token(&mut lookahead)?;
        if is_unsigned(generation) {
            skip_whitespace(&mut lookahead)?;
            if lookahead.starts_with(b"R") {
                lookahead.skip(1)?;
                let ends = lookahead.peek_u8().map_or(true, |b| !is_regular(b));
                let number = std::str::from_utf8(token).ok().and_then(|s| s.parse().ok());
                let generation = std::str::from_utf8(generation)
                    .ok()
                    .and_then(|s| s.parse().ok());
                if let (true, Some(number), Some(generation)) = (ends, number, generation) {
                    *cursor = lookahead;
                    return Ok(PdfObject::Reference(ObjectRef { number, generation }));
                }
            }
        }
    }

    let text = std::str::from_utf8(token).unwrap_or_default();
    let parsed = if text.contains('.') {
        text.parse().ok().map(PdfObject::Real)
    } else {
        text.parse().ok().map(PdfObject::Integer)
    };
    parsed.ok_or_else(|| {
        Error::malformed(
            start,
            format!("invalid number '{}'", String::from_utf8_lossy(token)),
        )
    })
}

fn read_keyword_object(cursor: &mut ByteCursor<'_>) -> Result<PdfObject> {
    let start = cursor.position();
    let token = read_token(cursor)?;
    match token {
        b"true" => Ok(PdfObject::Boolean(true)),
        b"false" => Ok(PdfObject::Boolean(false)),
        b"null" => Ok(PdfObject::Null),
        [] => Err(Error::malformed(
            start,
            format!("unexpected byte {:#04x} where an object was expected", cursor.peek_u8()?),
        )),
        other => Err(Error::malformed(
            start,
            format!("unexpected keyword '{}'", String::from_utf8_lossy(other)),
        )),
    }
}

/// Recursive-descent parser for object values
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectParser {
    max_depth: usize,
}

impl ObjectParser {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Parses one value after any leading whitespace
    pub(crate) fn parse(&self, cursor: &mut ByteCursor<'_>) -> Result<(PdfObject, FileComponent)> {
        self.parse_at(cursor, 0)
    }

    fn parse_at(&self, cursor: &mut ByteCursor<'_>, depth: usize) -> Result<(PdfObject, FileComponent)> {
        skip_whitespace(cursor)?;
        let (object, span) = match cursor.peek_u8()? {
            b'<' if cursor.starts_with(b"<<") => return self.parse_dictionary(cursor, depth),
            b'[' => return self.parse_array(cursor, depth),
            b'/' => cursor.spanned(|c| read_name(c).map(PdfObject::Name))?,
            b'<' => cursor.spanned(|c| read_hex_string(c).map(PdfObject::HexString))?,
            b'(' => cursor.spanned(|c| read_literal_string(c).map(PdfObject::String))?,
            b'+' | b'-' | b'.' | b'0'..=b'9' => cursor.spanned(read_number_or_reference)?,
            _ => cursor.spanned(read_keyword_object)?,
        };
        let component = FileComponent::leaf(object.type_name(), span).with_value(object.to_string());
        Ok((object, component))
    }

    fn check_depth(&self, cursor: &ByteCursor<'_>, depth: usize) -> Result<()> {
        if depth >= self.max_depth {
            return Err(Error::NestingTooDeep {
                offset: cursor.position(),
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn parse_array(&self, cursor: &mut ByteCursor<'_>, depth: usize) -> Result<(PdfObject, FileComponent)> {
        self.check_depth(cursor, depth)?;
        let start = cursor.position();
        let mut node = ComponentBuilder::at("Array", cursor);
        cursor.expect_bytes(b"[")?;

        let mut items = Vec::new();
        loop {
            skip_whitespace(cursor)?;
            if cursor.is_eof() {
                return Err(Error::missing_terminator(start, "]"));
            }
            if cursor.starts_with(b"]") {
                cursor.skip(1)?;
                break;
            }
            let (item, component) = self.parse_at(cursor, depth + 1)?;
            node.push(component)?;
            items.push(item);
        }

        let object = PdfObject::Array(items);
        node.set_value(object.to_string());
        Ok((object, node.finish(cursor)?))
    }

    fn parse_dictionary(
        &self,
        cursor: &mut ByteCursor<'_>,
        depth: usize,
    ) -> Result<(PdfObject, FileComponent)> {
        self.check_depth(cursor, depth)?;
        let start = cursor.position();
        let mut node = ComponentBuilder::at("Dictionary", cursor);
        cursor.expect_bytes(b"<<")?;

        let mut dictionary = PdfDictionary::default();
        loop {
            skip_whitespace(cursor)?;
            if cursor.is_eof() {
                return Err(Error::missing_terminator(start, ">>"));
            }
            if cursor.starts_with(b">>") {
                cursor.skip(2)?;
                break;
            }
            if !cursor.starts_with(b"/") {
                return Err(Error::malformed(
                    cursor.position(),
                    "dictionary key is not a name",
                ));
            }

            let mut entry = ComponentBuilder::at("Entry", cursor);
            let key = entry.field(cursor, "Key", read_name)?;
            let (value, component) = self.parse_at(cursor, depth + 1)?;
            entry.push(component)?;
            entry.set_value(format!("{} {}", key, value));
            node.push(entry.finish(cursor)?)?;
            dictionary.entries.push((key, value));
        }

        let object = PdfObject::Dictionary(dictionary);
        node.set_value(object.to_string());
        Ok((object, node.finish(cursor)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Span;
    use pretty_assertions::assert_eq;

    fn parse(src: &[u8]) -> Result<(PdfObject, FileComponent)> {
        ObjectParser::new(64).parse(&mut ByteCursor::new(src))
    }

    fn value(src: &[u8]) -> PdfObject {
        parse(src).unwrap().0
    }

    fn name(s: &str) -> PdfObject {
        PdfObject::Name(PdfName(s.into()))
    }

    #[test]
    fn test_names() {
        assert_eq!(value(b"/Type"), name("Type"));
        assert_eq!(value(b"/A#20B"), name("A B"));
        assert_eq!(value(b"/Odd#2"), name("Odd#2"));
        assert_eq!(value(b"/"), name(""));

        let (_, component) = parse(b"  /Name(").unwrap();
        assert_eq!(component.span(), Span::new(2, 5));
    }

    #[test]
    fn test_hex_strings() {
        assert_eq!(value(b"<901FA3>"), PdfObject::HexString(vec![0x90, 0x1F, 0xA3]));
        assert_eq!(value(b"<901FA>"), PdfObject::HexString(vec![0x90, 0x1F, 0xA0]));
        assert_eq!(value(b"<90 1f\nA>"), PdfObject::HexString(vec![0x90, 0x1F, 0xA0]));
        assert_eq!(value(b"<>"), PdfObject::HexString(vec![]));
        assert!(matches!(parse(b"<12G4>"), Err(Error::Malformed { offset: 3, .. })));
        assert!(matches!(parse(b"<1234"), Err(Error::MissingTerminator { offset: 0, .. })));
    }

    #[test]
    fn test_literal_strings() {
        assert_eq!(value(b"(hello)"), PdfObject::String(b"hello".to_vec()));
        assert_eq!(value(b"(a (nested) b)"), PdfObject::String(b"a (nested) b".to_vec()));
        assert_eq!(value(br"(\(\)\\\n\101)"), PdfObject::String(b"()\\\nA".to_vec()));
        assert_eq!(value(b"(line\\\ncontinued)"), PdfObject::String(b"linecontinued".to_vec()));
        assert_eq!(value(b"(a\r\nb)"), PdfObject::String(b"a\nb".to_vec()));
        assert!(matches!(parse(b"(open"), Err(Error::MissingTerminator { .. })));
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(value(b"42"), PdfObject::Integer(42));
        assert_eq!(value(b"-17"), PdfObject::Integer(-17));
        assert_eq!(value(b"+3"), PdfObject::Integer(3));
        assert_eq!(value(b"3.5"), PdfObject::Real(3.5));
        assert_eq!(value(b"-.25"), PdfObject::Real(-0.25));
        assert_eq!(value(b"true"), PdfObject::Boolean(true));
        assert_eq!(value(b"false"), PdfObject::Boolean(false));
        assert_eq!(value(b"null"), PdfObject::Null);
        assert!(matches!(parse(b"1.2.3"), Err(Error::Malformed { .. })));
        assert!(matches!(parse(b"endobj"), Err(Error::Malformed { .. })));
        assert!(matches!(parse(b")"), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_reference_lookahead() {
        let r = |number, generation| PdfObject::Reference(ObjectRef { number, generation });
        assert_eq!(value(b"12 0 R"), r(12, 0));
        assert_eq!(
            value(b"[1 2 3 0 R 4]"),
            PdfObject::Array(vec![
                PdfObject::Integer(1),
                PdfObject::Integer(2),
                r(3, 0),
                PdfObject::Integer(4),
            ])
        );
        // "RG" is an operator, not a reference
        let mut cursor = ByteCursor::new(b"1 0 RG");
        let (object, component) = ObjectParser::new(8).parse(&mut cursor).unwrap();
        assert_eq!(object, PdfObject::Integer(1));
        assert_eq!(component.span(), Span::new(0, 1));
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_dictionary_components() {
        let src = b"<< /Type /Page /Kids [3 0 R] /Count 1 >>";
        let (object, component) = parse(src).unwrap();
        let dict = object.as_dictionary().unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get("Type"), Some(&name("Page")));
        assert_eq!(dict.get("Count"), Some(&PdfObject::Integer(1)));

        assert_eq!(component.span(), Span::new(0, src.len() as u64));
        assert_eq!(component.children().len(), 3);
        let kids = &component.children()[1];
        assert_eq!(kids.value(), Some("/Kids [1 items]"));
        assert_eq!(kids.children()[0].span(), Span::new(15, 5));
        assert_eq!(kids.children()[1].label(), Some("Array"));
        component.validate().unwrap();
    }

    #[test]
    fn test_dictionary_without_spaces() {
        let dict = value(b"<</A/B/C<</D 1>>>>");
        let dict = dict.as_dictionary().unwrap();
        assert_eq!(dict.get("A"), Some(&name("B")));
        assert!(dict.get("C").unwrap().as_dictionary().is_some());
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            value(b"[1 % comment ]\n 2]"),
            PdfObject::Array(vec![PdfObject::Integer(1), PdfObject::Integer(2)])
        );
    }

    #[test]
    fn test_nesting_limit() {
        let parser = ObjectParser::new(2);
        assert!(parser.parse(&mut ByteCursor::new(b"[[1]]")).is_ok());
        let err = parser.parse(&mut ByteCursor::new(b"[[[1]]]")).unwrap_err();
        assert!(matches!(err, Error::NestingTooDeep { offset: 2, limit: 2 }));
    }

    #[test]
    fn test_dictionary_errors() {
        assert!(matches!(parse(b"<< 1 2 >>"), Err(Error::Malformed { offset: 3, .. })));
        assert!(matches!(parse(b"<< /A 1"), Err(Error::MissingTerminator { offset: 0, .. })));
    }
}
