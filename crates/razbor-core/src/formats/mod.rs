//! Per-format decoders.
//!
//! Each submodule exposes a unit-struct [`Decoder`](crate::Decoder) plus the
//! typed document it produces. Decoders drive a [`ByteCursor`](crate::ByteCursor)
//! from offset 0, insert top-level components into a
//! [`FileFormatBuilder`](crate::FileFormatBuilder) and contain recoverable
//! failures at the smallest independent record.

pub mod bmp;
pub mod class;
pub mod dex;
pub mod elf;
pub mod jpeg;
pub mod pdf;
pub mod raw;
pub mod zip;

pub(crate) mod mutf8;
