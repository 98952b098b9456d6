//! Reads the symbol table and PC-line table of Go binaries.
//!
//! Go executables carry two sections that describe their code:
//!
//! * `.gopclntab` maps program counters to source lines. Binaries built by Go 1.2 and later use a
//!   structured table with a function table and a file table. Older binaries use a stream of
//!   delta opcodes.
//! * `.gosymtab` holds the symbol records of pre-1.3 binaries. In newer binaries it is usually
//!   empty, and the function list comes from `.gopclntab` instead.
//!
//! This crate does not provide any I/O capabilities. The caller locates both sections in the
//! executable (ELF, Mach-O, PE, ...) and passes their contents in:
//!
//! ```ignore
//! let line_table = gosym::LineTable::new(pclntab_bytes, text_start);
//! let table = gosym::Table::new(symtab_bytes, line_table)?;
//! for f in table.funcs.iter() {
//!     println!("{:8x}\t{}", f.entry, f.sym.name);
//! }
//! ```
//!
//! # References
//!
//! * [`debug/gosym`](https://golang.org/src/debug/gosym/)
//! * [Go 1.2 Runtime Symbol Information](https://golang.org/s/go12symtab)

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::single_match)]

pub mod parser;
pub mod pclntab;
pub mod symtab;
pub mod table;

pub use pclntab::{Go12State, LineTable};
pub use symtab::{RawSym, SymtabIter};
pub use table::{Func, FuncIndex, Obj, ObjIndex, Sym, SymType, Table};

use parser::ParserError;

#[cfg(test)]
#[static_init::dynamic]
static INIT_LOGGER: () = {
    let _ = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_test_writer()
        .with_file(true)
        .with_line_number(true)
        .with_max_level(tracing::Level::DEBUG)
        .compact()
        .without_time()
        .try_init();
};

/// An error found while decoding a symbol table or line table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodingError {
    /// A read would have gone past the end of the buffer.
    Truncated,
    /// The symbol table header declares a pointer size other than 4 or 8.
    InvalidPointerSize(u8),
    /// An old-format symbol record has a type byte without its high bit set.
    BadSymbolType(u8),
    /// A path symbol refers to a file name ordinal that has not been defined (yet).
    BadFilenameCode(u16),
}

impl From<ParserError> for DecodingError {
    fn from(_: ParserError) -> Self {
        Self::Truncated
    }
}

impl std::error::Error for DecodingError {}

impl std::fmt::Display for DecodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Truncated => f.write_str("unexpected EOF"),
            Self::InvalidPointerSize(size) => write!(f, "invalid pointer size {size}"),
            Self::BadSymbolType(typ) => write!(f, "bad symbol type 0x{typ:02x}"),
            Self::BadFilenameCode(code) => write!(f, "bad filename code {code}"),
        }
    }
}

#[test]
fn decoding_error_display() {
    assert_eq!(DecodingError::Truncated.to_string(), "unexpected EOF");
    assert_eq!(
        DecodingError::InvalidPointerSize(3).to_string(),
        "invalid pointer size 3"
    );
    assert_eq!(
        DecodingError::from(ParserError::new()),
        DecodingError::Truncated
    );
}
