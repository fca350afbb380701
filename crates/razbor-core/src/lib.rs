//! # razbor-core
//!
//! A library for decomposing binary container files into trees of
//! byte-range-addressed components.
//!
//! This crate provides the core functionality for:
//! - Reading multi-endian, length-prefixed and line-oriented binary data
//!   while tracking the exact offset of every decoded field
//! - Building component trees that never overlap or leave the source buffer
//! - Decoding ZIP, PDF, JPEG, BMP, DEX, ELF and Java class files
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`cursor`]: Position-tracked reads over an immutable buffer
//! - [`component`]: Spans, components and the builder that checks them
//! - [`format`]: The decoded document root
//! - [`formats`]: One decoder per container format
//! - [`registry`]: Extension and magic-byte lookup
//! - [`error`]: Error types and non-fatal anomalies
//!
//! ## Example
//!
//! ```no_run
//! use razbor_core::{decode_file, DecodeOptions};
//!
//! let document = decode_file("./archive.zip", &DecodeOptions::default())?;
//! for (depth, component) in document.walk() {
//!     println!(
//!         "{:indent$}{} {}",
//!         "",
//!         component.span(),
//!         component.label().unwrap_or(""),
//!         indent = depth * 2
//!     );
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`Decoder`]: Plug a new format into the registry's dispatch
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod component;
pub mod cursor;
pub mod error;
pub mod format;
pub mod formats;
pub mod registry;

// Re-export primary types for convenience
pub use component::{ComponentBuilder, FileComponent, Span};
pub use cursor::{ByteCursor, Endian, Line};
pub use error::{Anomaly, AnomalyKind, Error, Result};
pub use format::{Document, FileFormat, FileFormatBuilder, FormatKind};
pub use registry::{decode, decode_as, decode_file, detect, resolve, DecodeOptions, Decoder};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
