//! Decodes the PC-line table (`.gopclntab`).
//!
//! There are two encodings of this table.
//!
//! Binaries built by Go 1.2 and later start the table with a header, identified by the magic
//! value [`GO12_MAGIC`]. That format is handled by [`Go12State`], in the `go12` module.
//!
//! Older binaries use a stream of one-byte opcodes, each of which moves the current PC, the
//! current line, or both:
//!
//! opcode    | effect
//! ----------|-------
//! `0`       | the next 4 bytes are a big-endian signed line delta; then advance `pc` by one quantum
//! `1..=64`  | `line += opcode`; then advance `pc` by one quantum
//! `65..=128`| `line -= opcode - 64`; then advance `pc` by one quantum
//! `129..`   | `pc += quantum * (opcode - 128)`, line is unchanged
//!
//! The "line" in the old format is an absolute line number across all the files of an object;
//! the path symbols of the object translate it into a file and a file-relative line
//! (see [`Table::pc_to_line`](crate::Table::pc_to_line)).

mod go12;
#[cfg(test)]
pub(crate) mod tests;

pub use go12::*;

use crate::parser::{ByteOrder, Parser};
use std::cell::OnceCell;
use std::rc::Rc;

/// The PC quantum used by the old line table format.
///
/// This is wrong for ARM, which uses a quantum of 4, but the old table carries no indication of
/// the architecture.
pub const OLD_QUANTUM: u64 = 1;

/// A cursor over a PC-line table.
///
/// For the old table format the cursor is stateful: `pc` and `line` are the decode position
/// within `data`, and [`LineTable::slice`] produces a new cursor positioned further along the same
/// stream. For the Go 1.2 format the whole table is described by the state returned from
/// [`LineTable::go12`], and one `LineTable` is shared by all functions.
pub struct LineTable<'a> {
    /// The remaining bytes of the table.
    pub data: &'a [u8],
    /// The PC at the current decode position.
    pub pc: u64,
    /// The line at the current decode position.
    pub line: i32,

    go12: OnceCell<Option<Go12State<'a>>>,
}

impl<'a> LineTable<'a> {
    /// Creates a cursor over the contents of a `.gopclntab` section. `text_start` is the address
    /// of the start of the text segment, which is the PC at the start of the old-format table.
    pub fn new(data: &'a [u8], text_start: u64) -> Self {
        Self {
            data,
            pc: text_start,
            line: 0,
            go12: OnceCell::new(),
        }
    }

    /// Returns the Go 1.2 table state, if this table uses the Go 1.2 format.
    ///
    /// The header is checked on the first call; the outcome is cached. A malformed header is not
    /// an error, it just means that the table is in the old format.
    pub fn go12(&self) -> Option<&Go12State<'a>> {
        self.go12
            .get_or_init(|| Go12State::parse(self.data))
            .as_ref()
    }

    /// Indicates whether this table uses the Go 1.2 format.
    pub fn is_go12(&self) -> bool {
        self.go12().is_some()
    }

    /// Runs the old-format opcode stream forward from the current position.
    ///
    /// Decoding stops when `pc` passes `target_pc`, when `line` equals `target_line`, or at the end
    /// of the data. Returns the unconsumed bytes and the `pc` and `line` reached.
    pub fn parse(&self, target_pc: u64, target_line: i32) -> (&'a [u8], u64, i32) {
        let mut b = self.data;
        let mut pc = self.pc;
        let mut line = self.line;

        while pc <= target_pc && line != target_line {
            let Some((&code, rest)) = b.split_first() else {
                break;
            };
            b = rest;

            match code {
                0 => {
                    let mut p = Parser::new(b);
                    if let Ok(delta) = p.i32(ByteOrder::Big) {
                        line = line.wrapping_add(delta);
                        b = p.into_rest();
                    } else {
                        b = &b[..0];
                    }
                }
                1..=64 => line = line.wrapping_add(code as i32),
                65..=128 => line = line.wrapping_sub(code as i32 - 64),
                _ => {
                    pc = pc.wrapping_add(OLD_QUANTUM * (code as u64 - 128));
                    continue;
                }
            }
            pc = pc.wrapping_add(OLD_QUANTUM);
        }

        (b, pc, line)
    }

    /// Returns a new cursor, advanced to the first PC after `pc`.
    ///
    /// Functions must be sliced in increasing order of entry address, each from the cursor
    /// returned for the previous one.
    pub fn slice(&self, pc: u64) -> LineTable<'a> {
        let (data, pc, line) = self.parse(pc, -1);
        LineTable {
            data,
            pc,
            line,
            go12: OnceCell::new(),
        }
    }

    /// Returns the line number for the given PC.
    ///
    /// For the old format this is the absolute line ("aline") of the object; for the Go 1.2
    /// format it is the line within the file returned by [`LineTable::pc_to_file`].
    pub fn pc_to_line(&self, pc: u64) -> Option<i32> {
        if let Some(go12) = self.go12() {
            return go12.pc_to_line(pc);
        }
        let (_, _, line) = self.parse(pc, -1);
        Some(line)
    }

    /// Returns the first PC at or below `max_pc` that maps to `line`.
    ///
    /// Only the old format supports this query.
    pub fn line_to_pc(&self, line: i32, max_pc: u64) -> Option<u64> {
        if self.is_go12() {
            return None;
        }
        let (_, pc, line1) = self.parse(max_pc, line);
        if line1 != line {
            return None;
        }
        // The PC was advanced past the opcode that produced the line.
        Some(pc.wrapping_sub(OLD_QUANTUM))
    }

    /// Returns the source file for the given PC. Only the Go 1.2 format records this.
    pub fn pc_to_file(&self, pc: u64) -> Option<Rc<str>> {
        self.go12()?.pc_to_file(pc)
    }
}

impl<'a> std::fmt::Debug for LineTable<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LineTable")
            .field("len", &self.data.len())
            .field("pc", &format_args!("0x{:x}", self.pc))
            .field("line", &self.line)
            .finish()
    }
}
