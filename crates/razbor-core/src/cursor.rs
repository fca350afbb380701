//! Position-tracked reading over an immutable byte buffer.
//!
//! [`ByteCursor`] is the single primitive every decoder uses to consume
//! bytes. Each read either returns its value and advances by exactly the
//! number of bytes consumed, or fails and leaves the position untouched.
//!
//! Positions are absolute: a cursor created over a sub-slice with
//! [`ByteCursor::sub_cursor`] or [`ByteCursor::window`] reports offsets in the
//! coordinate space of the root buffer, so components decoded by nested
//! decoders tile the original file without any offset translation.

use crate::component::Span;
use crate::error::{Error, Result};

/// Byte order of a multi-byte integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl Endian {
    /// Short name used in component values
    pub fn as_str(&self) -> &'static str {
        match self {
            Endian::Little => "little-endian",
            Endian::Big => "big-endian",
        }
    }
}

/// One line read by [`ByteCursor::read_line`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// Absolute offset of the first content byte
    pub start: u64,
    /// Line content without its terminator
    pub content: &'a [u8],
    /// Byte length of the terminator: 2 for CRLF, 1 for CR or LF, 0 at end of input
    pub terminator_len: usize,
}

impl<'a> Line<'a> {
    /// Total bytes consumed, content plus terminator
    pub fn len(&self) -> usize {
        self.content.len() + self.terminator_len
    }

    /// True if the line consumed no bytes at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute offset just past the terminator
    pub fn end(&self) -> u64 {
        self.start + self.len() as u64
    }

    /// Span of the whole line including the terminator
    pub fn span(&self) -> Span {
        Span::new(self.start, self.len() as u64)
    }

    /// Span of the content only
    pub fn content_span(&self) -> Span {
        Span::new(self.start, self.content.len() as u64)
    }

    /// Span of the terminator only
    pub fn terminator_span(&self) -> Span {
        Span::new(
            self.start + self.content.len() as u64,
            self.terminator_len as u64,
        )
    }

    /// Content with surrounding whitespace removed
    pub fn trimmed(&self) -> &'a [u8] {
        trim_whitespace(self.content)
    }
}

/// Strips leading and trailing ASCII whitespace and NUL bytes
pub fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let is_space = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = bytes.iter().position(|b| !is_space(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_space(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

macro_rules! read_int {
    ($name:ident, $le:ident, $be:ident, $ty:ty, $n:literal) => {
        #[doc = concat!("Reads a `", stringify!($ty), "` in the given byte order.")]
        pub fn $name(&mut self, endian: Endian) -> Result<$ty> {
            let bytes = self.read_array::<$n>()?;
            Ok(match endian {
                Endian::Little => <$ty>::from_le_bytes(bytes),
                Endian::Big => <$ty>::from_be_bytes(bytes),
            })
        }

        #[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
        pub fn $le(&mut self) -> Result<$ty> {
            self.$name(Endian::Little)
        }

        #[doc = concat!("Reads a big-endian `", stringify!($ty), "`.")]
        pub fn $be(&mut self) -> Result<$ty> {
            self.$name(Endian::Big)
        }
    };
}

/// Cursor over a borrowed byte slice with absolute offset tracking
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor at offset 0 of the given bytes
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Creates a cursor whose first byte sits at absolute offset `base`
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    /// Current absolute read position
    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Absolute offset of the first byte of this cursor's window
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Absolute offset just past the last byte of this cursor's window
    pub fn end_offset(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    /// Length of the window this cursor reads from
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the window is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True if every byte has been consumed
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The unread bytes, without advancing
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::unexpected_end(
                self.position(),
                n as u64,
                self.remaining() as u64,
            ));
        }
        Ok(())
    }

    /// Returns the next byte without advancing
    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    /// Returns the next `n` bytes without advancing
    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    /// True if the unread bytes begin with `prefix`
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.rest().starts_with(prefix)
    }

    /// Reads exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Reads a fixed-size byte array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Skips exactly `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Reads `expected.len()` bytes and checks them against a magic value
    ///
    /// On mismatch nothing is consumed and a `SignatureMismatch` at the
    /// current offset is returned.
    pub fn expect_bytes(&mut self, expected: &[u8]) -> Result<&'a [u8]> {
        let found = self.peek_bytes(expected.len())?;
        if found != expected {
            return Err(Error::signature_mismatch(self.position(), expected, found));
        }
        self.pos += expected.len();
        Ok(found)
    }

    /// Reads one unsigned byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads one signed byte
    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|b| b as i8)
    }

    read_int!(read_u16, read_u16_le, read_u16_be, u16, 2);
    read_int!(read_u32, read_u32_le, read_u32_be, u32, 4);
    read_int!(read_u64, read_u64_le, read_u64_be, u64, 8);
    read_int!(read_i16, read_i16_le, read_i16_be, i16, 2);
    read_int!(read_i32, read_i32_le, read_i32_be, i32, 4);
    read_int!(read_i64, read_i64_le, read_i64_be, i64, 8);

    /// Reads `n` bytes as text, replacing invalid UTF-8 sequences
    pub fn read_ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Reads a NUL-terminated byte string, consuming the NUL
    ///
    /// The returned slice excludes the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let rest = self.rest();
        let Some(nul) = memchr::memchr(0, rest) else {
            return Err(Error::missing_terminator(self.position(), "NUL"));
        };
        self.pos += nul + 1;
        Ok(&rest[..nul])
    }

    /// Reads one line terminated by CRLF, LF or CR
    ///
    /// The final line of the buffer may have no terminator, in which case
    /// `terminator_len` is 0. Reading at end of input fails.
    pub fn read_line(&mut self) -> Result<Line<'a>> {
        self.ensure(1)?;
        let start = self.position();
        let rest = self.rest();
        let (content_len, terminator_len) = match memchr::memchr2(b'\r', b'\n', rest) {
            Some(i) if rest[i] == b'\r' && rest.get(i + 1) == Some(&b'\n') => (i, 2),
            Some(i) => (i, 1),
            None => (rest.len(), 0),
        };
        self.pos += content_len + terminator_len;
        Ok(Line {
            start,
            content: &rest[..content_len],
            terminator_len,
        })
    }

    /// Moves the cursor back to an absolute position it has already passed
    ///
    /// The target must lie between the start of this cursor's window and the
    /// current position.
    pub fn rewind_to(&mut self, position: u64) -> Result<()> {
        let current = self.position();
        if position < self.base || position > current {
            return Err(Error::InvalidSeek {
                from: current,
                to: position,
            });
        }
        self.pos = (position - self.base) as usize;
        Ok(())
    }

    /// Pushes back the line that was just read
    ///
    /// Fails unless `line` ends exactly at the current position.
    pub fn unread_line(&mut self, line: &Line<'_>) -> Result<()> {
        if line.end() != self.position() {
            return Err(Error::InvalidSeek {
                from: self.position(),
                to: line.start,
            });
        }
        self.rewind_to(line.start)
    }

    /// Absolute offset of the next occurrence of `needle`, without advancing
    pub fn find(&self, needle: &[u8]) -> Option<u64> {
        memchr::memmem::find(self.rest(), needle).map(|i| self.position() + i as u64)
    }

    /// Reads an unsigned LEB128 value (at most 10 bytes)
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let start = self.position();
        let rest = self.rest();
        let mut result: u64 = 0;
        let mut shift = 0;

        for (i, &byte) in rest.iter().enumerate() {
            if i >= 10 {
                return Err(Error::leb128_decode(start));
            }

            result |= ((byte & 0x7F) as u64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                self.pos += i + 1;
                return Ok(result);
            }
        }

        Err(Error::unexpected_end(
            start,
            rest.len() as u64 + 1,
            rest.len() as u64,
        ))
    }

    /// Reads a signed LEB128 value (at most 10 bytes)
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let start = self.position();
        let rest = self.rest();
        let mut result: i64 = 0;
        let mut shift = 0;

        for (i, &byte) in rest.iter().enumerate() {
            if i >= 10 {
                return Err(Error::leb128_decode(start));
            }

            result |= ((byte & 0x7F) as i64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                self.pos += i + 1;
                return Ok(result);
            }
        }

        Err(Error::unexpected_end(
            start,
            rest.len() as u64 + 1,
            rest.len() as u64,
        ))
    }

    /// Reads a ULEB128 value biased by one, so that `0` encodes `-1`
    pub fn read_uleb128p1(&mut self) -> Result<i64> {
        self.read_uleb128().map(|v| (v as i64).wrapping_sub(1))
    }

    /// Runs `read` and returns its value with the span it consumed
    ///
    /// If `read` fails the position is restored.
    pub fn spanned<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<(T, Span)> {
        let start = self.pos;
        match read(self) {
            Ok(value) => Ok((value, Span::between(self.base + start as u64, self.position()))),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Consumes `len` bytes and returns an independent cursor over them
    ///
    /// Nested structures whose length is known up front are decoded through
    /// such a cursor, so a malformed payload cannot move the parent.
    pub fn sub_cursor(&mut self, len: usize) -> Result<ByteCursor<'a>> {
        let base = self.position();
        let bytes = self.read_bytes(len)?;
        Ok(ByteCursor::with_base(bytes, base))
    }

    /// Returns an independent cursor over `[start, end)` of this window
    pub fn window(&self, start: u64, end: u64) -> Result<ByteCursor<'a>> {
        if start < self.base || start > end {
            return Err(Error::InvalidSeek {
                from: self.position(),
                to: start,
            });
        }
        let limit = self.end_offset();
        if end > limit {
            return Err(Error::unexpected_end(
                start,
                end - start,
                limit.saturating_sub(start),
            ));
        }
        let lo = (start - self.base) as usize;
        let hi = (end - self.base) as usize;
        Ok(ByteCursor::with_base(&self.data[lo..hi], start))
    }

    /// Returns an independent cursor from `offset` to the end of this window
    pub fn fork_at(&self, offset: u64) -> Result<ByteCursor<'a>> {
        if offset > self.end_offset() {
            return Err(Error::unexpected_end(offset, 1, 0));
        }
        self.window(offset, self.end_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endianness() {
        let data = [0x01, 0x00, 0x00, 0x00];
        assert_eq!(ByteCursor::new(&data).read_u32_le().unwrap(), 1);
        assert_eq!(ByteCursor::new(&data).read_u32_be().unwrap(), 16_777_216);
    }

    #[test]
    fn test_signed_reads() {
        let data = [0xFF, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_i8().unwrap(), -1);
        assert_eq!(cursor.read_i64(Endian::Little).unwrap(), -2);
        assert!(cursor.is_eof());
    }

    #[test]
    fn test_failed_read_leaves_position() {
        let data = [1, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        cursor.skip(1).unwrap();
        let err = cursor.read_u32_be().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedEndOfData {
                offset: 1,
                needed: 4,
                available: 2
            }
        ));
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.read_u16_be().unwrap(), 0x0203);
    }

    #[test]
    fn test_read_line_terminators() {
        let data = b"one\r\ntwo\nthree\rfour";
        let mut cursor = ByteCursor::new(data);

        let line = cursor.read_line().unwrap();
        assert_eq!((line.content, line.terminator_len, line.start), (&b"one"[..], 2, 0));
        let line = cursor.read_line().unwrap();
        assert_eq!((line.content, line.terminator_len, line.start), (&b"two"[..], 1, 5));
        let line = cursor.read_line().unwrap();
        assert_eq!((line.content, line.terminator_len), (&b"three"[..], 1));
        let line = cursor.read_line().unwrap();
        assert_eq!((line.content, line.terminator_len), (&b"four"[..], 0));
        assert!(cursor.read_line().is_err());
    }

    #[test]
    fn test_empty_lines() {
        let mut cursor = ByteCursor::new(b"\n\r\n");
        let line = cursor.read_line().unwrap();
        assert!(line.content.is_empty());
        assert_eq!(line.terminator_span(), Span::new(0, 1));
        let line = cursor.read_line().unwrap();
        assert_eq!(line.span(), Span::new(1, 2));
    }

    #[test]
    fn test_unread_line_restores_position() {
        let mut cursor = ByteCursor::new(b"trailer\r\nstartxref\r\n123\r\n");
        cursor.read_line().unwrap();
        let before = cursor.position();
        let line = cursor.read_line().unwrap();
        assert_eq!(line.trimmed(), b"startxref");
        cursor.unread_line(&line).unwrap();
        assert_eq!(cursor.position(), before);
        assert_eq!(cursor.read_line().unwrap(), line);
    }

    #[test]
    fn test_rewind_bounds() {
        let data = [0u8; 8];
        let mut cursor = ByteCursor::with_base(&data, 100);
        cursor.skip(4).unwrap();
        assert!(cursor.rewind_to(105).is_err());
        assert!(cursor.rewind_to(99).is_err());
        cursor.rewind_to(100).unwrap();
        assert_eq!(cursor.position(), 100);
    }

    #[test]
    fn test_unread_stale_line_rejected() {
        let mut cursor = ByteCursor::new(b"a\nb\n");
        let first = cursor.read_line().unwrap();
        cursor.read_line().unwrap();
        assert!(cursor.unread_line(&first).is_err());
    }

    #[test]
    fn test_uleb128() {
        assert_eq!(ByteCursor::new(&[0x08]).read_uleb128().unwrap(), 8);
        assert_eq!(ByteCursor::new(&[0xAC, 0x02]).read_uleb128().unwrap(), 300);

        let max = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut cursor = ByteCursor::new(&max);
        assert_eq!(cursor.read_uleb128().unwrap(), u64::MAX);
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn test_uleb128_errors() {
        let mut cursor = ByteCursor::new(&[0x80, 0x80]);
        assert!(matches!(
            cursor.read_uleb128(),
            Err(Error::UnexpectedEndOfData { offset: 0, .. })
        ));
        assert_eq!(cursor.position(), 0);

        let overlong = [0x80; 11];
        assert!(matches!(
            ByteCursor::new(&overlong).read_uleb128(),
            Err(Error::Leb128Decode { offset: 0 })
        ));
    }

    #[test]
    fn test_sleb128_and_p1() {
        assert_eq!(ByteCursor::new(&[0x7F]).read_sleb128().unwrap(), -1);
        assert_eq!(ByteCursor::new(&[0x80, 0x7F]).read_sleb128().unwrap(), -128);
        assert_eq!(ByteCursor::new(&[0x3F]).read_sleb128().unwrap(), 63);
        assert_eq!(ByteCursor::new(&[0x00]).read_uleb128p1().unwrap(), -1);
        assert_eq!(ByteCursor::new(&[0x05]).read_uleb128p1().unwrap(), 4);
    }

    #[test]
    fn test_sub_cursor_absolute_offsets() {
        let data = [0xAA, 0xBB, 0x00, 0x01, 0x02, 0xCC];
        let mut cursor = ByteCursor::new(&data);
        cursor.skip(2).unwrap();
        let mut sub = cursor.sub_cursor(3).unwrap();
        assert_eq!(cursor.position(), 5);
        assert_eq!(sub.position(), 2);
        assert_eq!(sub.read_u8().unwrap(), 0x00);
        assert_eq!(sub.position(), 3);
        assert!(sub.read_u32_le().is_err());
        assert_eq!(sub.end_offset(), 5);
    }

    #[test]
    fn test_window_and_fork() {
        let data = *b"0123456789";
        let cursor = ByteCursor::new(&data);
        let mut win = cursor.window(3, 6).unwrap();
        assert_eq!(win.read_ascii(3).unwrap(), "345");
        assert!(win.is_eof());
        assert!(cursor.window(8, 12).is_err());
        let mut fork = cursor.fork_at(9).unwrap();
        assert_eq!(fork.read_u8().unwrap(), b'9');
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_expect_bytes() {
        let mut cursor = ByteCursor::new(b"PK\x03\x05");
        let err = cursor.expect_bytes(b"PK\x03\x04").unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { offset: 0, .. }));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_spanned_and_cstr() {
        let mut cursor = ByteCursor::with_base(b"abc\0rest", 10);
        let (s, span) = cursor.spanned(|c| c.read_cstr()).unwrap();
        assert_eq!(s, b"abc");
        assert_eq!(span, Span::new(10, 4));
        assert!(cursor.spanned(|c| c.read_cstr()).is_err());
        assert_eq!(cursor.position(), 14);
        assert_eq!(cursor.find(b"st"), Some(16));
    }

    #[test]
    fn test_trim_whitespace() {
        assert_eq!(trim_whitespace(b"  %%EOF \r"), b"%%EOF");
        assert_eq!(trim_whitespace(b"   "), b"");
    }
}
