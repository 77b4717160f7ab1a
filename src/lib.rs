//! `magic_rules` determines the type of a file or byte stream from its contents.
//!
//! # About
//! Types are described by a database of magic rules: a magic number, where
//! to find it, how to read it, and what to say when it is there. A rule that
//! matches can be continued by deeper rules that refine the description,
//! so one entry can report `ELF 64-bit LSB executable, x86-64`.
//!
//! The crate has two halves:
//! - the rule compiler ([`compile`]) turns the text of a magic file into a
//!   [`MagicTable`], reporting bad lines without giving up on the rest;
//! - the checker ([`identify`]) evaluates a table against a buffer. It never
//!   reads outside the buffer; missing bytes read as zero.
//!
//! A table is immutable once compiled and can be shared between threads.
//!
//! # Features
//! - A bundled database for common formats ([`from_u8`], [`from_filepath`]).
//! - Loading of magic files and directories from disk ([`magic::sys`]).
//! - Direct, indirect and parent-relative offsets, masks and arithmetic,
//!   explicit endianness and signedness, and string matching with case
//!   folding and blank compaction.
//! - MIME annotations (`!:mime`) for [`mime_from_u8`] and [`match_u8`].
//!
//! # Feature flags
//! `cli`:        Enable building of the `rmagic` binary
//!
//! # Example
//! ```rust
//! let (table, errors) = magic_rules::compile(
//!     "0 string \\x1f\\x8b gzip compressed data\n\
//!      >2 byte 8 \\b, deflated\n",
//! ).unwrap();
//! assert!(errors.is_empty());
//!
//! let result = magic_rules::identify(&table, &[0x1f, 0x8b, 0x08, 0x00], false);
//! assert_eq!(result.description(), Some("gzip compressed data, deflated"));
//! ```

#[macro_use]
extern crate lazy_static;

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub mod magic;

pub use magic::check::{identify, identify_mime, scan, Fragment, Match, Report};
pub use magic::convert::sign_extend;
pub use magic::ruleset::{
    compile, compile_database, compile_line, CompileError, LineError, ParseError,
};
pub use magic::{
    ArithOp, FieldType, Indirect, MagicRule, MagicTable, MaskOp, MatchValue, NumericType, Offset,
    Relation, StringFlags,
};
pub use mime::Mime;

/// How much of a file is read before identifying it.
pub const HOWMANY: usize = 8192;

/// Reads at most `limit` bytes from the start of a file.
pub fn read_bytes(filepath: &Path, limit: usize) -> Result<Vec<u8>, std::io::Error> {
    let f = File::open(filepath)?;
    let mut b = Vec::<u8>::with_capacity(limit.min(HOWMANY));
    f.take(limit as u64).read_to_end(&mut b)?;
    Ok(b)
}

/// Gets the type of a byte stream using the bundled database.
///
/// # Examples
/// ```rust
/// // The start of a PDF file
/// let input: &[u8] = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n";
///
/// let result = magic_rules::from_u8(input);
/// assert_eq!(result.description(), Some("PDF document, version 1.4"));
/// ```
pub fn from_u8(bytes: &[u8]) -> Match {
    identify(&magic::builtin::BUILTIN, bytes, false)
}

/// Gets the MIME type of a byte stream using the bundled database.
///
/// Returns `None` if nothing matched, or the match carried no MIME type.
///
/// # Examples
/// ```rust
/// let input: &[u8] = b"GIF89a\x10\x00\x10\x00";
///
/// let result = magic_rules::mime_from_u8(input).unwrap();
/// assert_eq!(result.essence_str(), "image/gif");
/// ```
pub fn mime_from_u8(bytes: &[u8]) -> Option<Mime> {
    identify_mime(&magic::builtin::BUILTIN, bytes)
}

/// Checks if the given bytestream matches the given MIME type.
///
/// Returns false for unknown or unparseable MIME types.
///
/// # Examples
/// ```rust
/// let input: &[u8] = b"PK\x03\x04\x14\x00";
///
/// assert_eq!(magic_rules::match_u8("application/zip", input), true);
/// assert_eq!(magic_rules::match_u8("image/gif", input), false);
/// ```
pub fn match_u8(mimetype: &str, bytes: &[u8]) -> bool {
    let wanted: Mime = match mimetype.parse() {
        Ok(m) => m,
        Err(_) => return false,
    };
    match mime_from_u8(bytes) {
        Some(found) => found.essence_str() == wanted.essence_str(),
        None => false,
    }
}

/// Gets the type of a file using the bundled database.
///
/// Only the first [`HOWMANY`] bytes are read. Errors opening or reading the
/// file are returned as-is.
///
/// # Examples
/// ```rust
/// use std::path::Path;
///
/// let result = magic_rules::from_filepath(Path::new("this/file/does/not/exist"));
/// assert!(result.is_err());
/// ```
pub fn from_filepath(filepath: &Path) -> Result<Match, std::io::Error> {
    let b = read_bytes(filepath, HOWMANY)?;
    Ok(from_u8(&b))
}
