//! Decodes the Go 1.2 PC-line table.
//!
//! The overall organization of the table is:
//!
//! name         | type                              | usage
//! -------------|-----------------------------------|------
//! `magic`      | `u32`                             | [`GO12_MAGIC`], in the byte order of the target
//! `pad`        | `[u8; 2]`                         | must be zero
//! `quantum`    | `u8`                              | PC quantum: 1, 2 or 4
//! `ptr_size`   | `u8`                              | size of a `uintptr`: 4 or 8
//! `nfunctab`   | `uintptr`                         | number of functions
//! `functab`    | `[(uintptr, uintptr); nfunctab]`  | (entry PC, offset of `_func`) pairs, sorted by PC
//! `end_pc`     | `uintptr`                         | the PC just past the last function
//! `file_off`   | `u32`                             | offset of the file table
//!
//! The file table is a `u32` count `nfiletab`, followed by `nfiletab - 1` string offsets. File
//! numbers used by the pc-file tables index this array directly, so file number 0 is never valid.
//!
//! Each `_func` record starts with:
//!
//! name         | type      |
//! -------------|-----------|
//! `entry`      | `uintptr` |
//! `nameoff`    | `u32`     |
//! `args`       | `u32`     |
//! `frame`      | `u32`     |
//! `pcsp`       | `u32`     |
//! `pcfile`     | `u32`     |
//! `pcln`       | `u32`     |
//!
//! All offsets (strings, `_func` records, pc-value tables) are relative to the start of the
//! whole table.

use super::LineTable;
use crate::DecodingError;
use crate::parser::{ByteOrder, Parser, ParserError};
use crate::table::{Func, ObjIndex, Sym, SymType};
use bstr::ByteSlice;
use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, trace};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// The magic value at the start of a Go 1.2 PC-line table.
pub const GO12_MAGIC: u32 = 0xFFFF_FFFB;

/// The fixed-size header of a Go 1.2 PC-line table.
#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub struct Go12Header {
    /// [`GO12_MAGIC`], in either byte order.
    pub magic: [u8; 4],
    /// Must be zero.
    pub pad: [u8; 2],
    /// The PC quantum.
    pub quantum: u8,
    /// The size of a pointer, in bytes.
    pub ptr_size: u8,
}

/// Position of `nameoff` within a `_func` record, after the `entry` field.
const FUNC_NAMEOFF: usize = 0;
/// Position of `frame` within a `_func` record, after the `entry` field.
const FUNC_FRAME: usize = 2 * 4;
/// Position of `pcfile` within a `_func` record, after the `entry` field.
const FUNC_PCFILE: usize = 4 * 4;
/// Position of `pcln` within a `_func` record, after the `entry` field.
const FUNC_PCLN: usize = 5 * 4;

/// The decoded state of a Go 1.2 PC-line table.
pub struct Go12State<'a> {
    /// The whole table. String, `_func` and pc-value offsets are relative to this.
    pub data: &'a [u8],
    /// The function table, `(2 * nfunctab + 1) * ptr_size` bytes.
    pub functab: &'a [u8],
    /// The file table, `nfiletab * 4` bytes. Entry 0 is the count itself.
    pub filetab: &'a [u8],
    /// The byte order of all multi-byte values in the table.
    pub order: ByteOrder,
    /// The PC quantum.
    pub quantum: u8,
    /// The size of a pointer, in bytes.
    pub ptr_size: u8,
    /// The number of functions in the function table.
    pub nfunctab: usize,
    /// The number of entries in the file table, including the unused entry 0.
    pub nfiletab: u32,

    file_map: OnceCell<BTreeMap<Rc<str>, u32>>,
    strings: RefCell<HashMap<u32, Rc<str>>>,
}

impl<'a> Go12State<'a> {
    /// Checks the header of `data` and locates the function and file tables.
    ///
    /// Returns `None` if `data` is not a Go 1.2 table, or if its tables are out of bounds. This
    /// never fails in any other way.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 16 {
            debug!(len = data.len(), "PC-line table is too short for a Go 1.2 header");
            return None;
        }

        let header: &Go12Header = Parser::new(data).get().ok()?;
        if header.pad != [0, 0]
            || !matches!(header.quantum, 1 | 2 | 4)
            || !matches!(header.ptr_size, 4 | 8)
        {
            debug!(?header, "invalid Go 1.2 aux header");
            return None;
        }

        let order = if u32::from_be_bytes(header.magic) == GO12_MAGIC {
            ByteOrder::Big
        } else if u32::from_le_bytes(header.magic) == GO12_MAGIC {
            ByteOrder::Little
        } else {
            debug!(magic = ?header.magic, "invalid Go 1.2 magic");
            return None;
        };

        match Self::locate_tables(data, order, header.ptr_size) {
            Ok((nfunctab, functab, nfiletab, filetab)) => Some(Self {
                data,
                functab,
                filetab,
                order,
                quantum: header.quantum,
                ptr_size: header.ptr_size,
                nfunctab,
                nfiletab,
                file_map: OnceCell::new(),
                strings: RefCell::new(HashMap::new()),
            }),
            Err(_) => {
                debug!("Go 1.2 function table or file table is out of bounds");
                None
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn locate_tables(
        data: &'a [u8],
        order: ByteOrder,
        ptr_size: u8,
    ) -> Result<(usize, &'a [u8], u32, &'a [u8]), ParserError> {
        let mut p = Parser::at(data, 8)?;
        let nfunctab =
            usize::try_from(p.uintptr(order, ptr_size)?).map_err(|_| ParserError::new())?;
        let functab_size = nfunctab
            .checked_mul(2)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(ptr_size as usize))
            .ok_or_else(ParserError::new)?;
        let functab = p.bytes(functab_size)?;
        let file_off = p.u32(order)?;

        let mut p = Parser::at(data, file_off as usize)?;
        let nfiletab = Parser::new(p.peek_rest()).u32(order)?;
        let filetab_size = (nfiletab as usize)
            .checked_mul(4)
            .ok_or_else(ParserError::new)?;
        let filetab = p.bytes(filetab_size)?;

        Ok((nfunctab, functab, nfiletab, filetab))
    }

    /// Reads the `i`-th pointer-sized word of the function table.
    fn functab_word(&self, i: usize) -> Result<u64, ParserError> {
        Parser::at(self.functab, i * self.ptr_size as usize)?.uintptr(self.order, self.ptr_size)
    }

    /// Reads a `u32` at `offset` bytes past the `entry` field of a `_func` record.
    fn func_field(&self, func: &[u8], offset: usize) -> Result<u32, ParserError> {
        Parser::at(func, self.ptr_size as usize + offset)?.u32(self.order)
    }

    /// Returns the NUL-terminated string at byte offset `off` within the table. A string that is
    /// not terminated runs to the end of the table.
    ///
    /// Strings are decoded once; later calls for the same offset return the same `Rc`.
    pub fn string(&self, off: u32) -> Result<Rc<str>, DecodingError> {
        if let Some(s) = self.strings.borrow().get(&off) {
            return Ok(s.clone());
        }

        let bytes = Parser::at(self.data, off as usize)?.into_rest();
        let bytes = match bytes.find_byte(0) {
            Some(len) => &bytes[..len],
            None => bytes,
        };
        let s: Rc<str> = Rc::from(bytes.to_str_lossy().as_ref());
        self.strings.borrow_mut().insert(off, s.clone());
        Ok(s)
    }

    /// Returns the map from file name to file number, building it on first use.
    pub fn file_map(&self) -> Result<&BTreeMap<Rc<str>, u32>, DecodingError> {
        if let Some(map) = self.file_map.get() {
            return Ok(map);
        }

        let mut map = BTreeMap::new();
        for i in 1..self.nfiletab {
            let off = Parser::at(self.filetab, 4 * i as usize)?.u32(self.order)?;
            map.insert(self.string(off)?, i);
        }
        debug!(num_files = map.len(), "built Go 1.2 file map");

        Ok(self.file_map.get_or_init(|| map))
    }

    /// Adds every file in the table to `files`, mapping each of them to `obj`.
    ///
    /// Go 1.2 binaries do not record which object a file came from, so the caller passes the one
    /// object that stands for the whole program.
    pub fn map_files(
        &self,
        files: &mut BTreeMap<String, ObjIndex>,
        obj: ObjIndex,
    ) -> Result<(), DecodingError> {
        for name in self.file_map()?.keys() {
            files.insert(name.to_string(), obj);
        }
        Ok(())
    }

    /// Builds the list of functions from the function table.
    ///
    /// `line_table` is the table that owns this state; it is shared by every returned `Func`.
    pub fn funcs(&self, line_table: &Rc<LineTable<'a>>) -> Result<Vec<Func<'a>>, DecodingError> {
        let mut funcs = Vec::with_capacity(self.nfunctab);

        for i in 0..self.nfunctab {
            let entry = self.functab_word(2 * i)?;
            let end = self.functab_word(2 * i + 2)?;
            let info_off = self.functab_word(2 * i + 1)?;
            let info = Parser::at(self.data, info_off as usize)?.peek_rest();

            let name = self.string(self.func_field(info, FUNC_NAMEOFF)?)?;
            let frame_size = self.func_field(info, FUNC_FRAME)?;
            trace!(entry, end, %name, "Go 1.2 func");

            funcs.push(Func {
                sym: Sym {
                    value: entry,
                    typ: SymType::TEXT,
                    name: name.to_string(),
                    go_type: 0,
                    func: None,
                },
                entry,
                end,
                params: Vec::new(),
                locals: Vec::new(),
                frame_size: frame_size as u64,
                line_table: Some(line_table.clone()),
                obj: None,
            });
        }

        Ok(funcs)
    }

    /// Finds the `_func` record of the function containing `pc`.
    pub fn find_func(&self, pc: u64) -> Option<&'a [u8]> {
        let first = self.functab_word(0).ok()?;
        let last = self.functab_word(2 * self.nfunctab).ok()?;
        if pc < first || pc >= last {
            return None;
        }

        let mut lo = 0;
        let mut n = self.nfunctab;
        while n > 0 {
            let m = n / 2;
            let i = lo + m;
            let entry = self.functab_word(2 * i).ok()?;
            let next = self.functab_word(2 * i + 2).ok()?;
            if entry <= pc && pc < next {
                let off = self.functab_word(2 * i + 1).ok()?;
                return self.data.get(off as usize..);
            } else if pc < entry {
                n = m;
            } else {
                lo = i + 1;
                n -= m + 1;
            }
        }

        None
    }

    /// Looks up `target` in the pc-value table at offset `off`, for a function starting at
    /// `entry`.
    ///
    /// Each step of the table is a zig-zag encoded value delta followed by a PC delta (in units of
    /// the quantum). A zero value delta ends the table, except on the first step. Returns -1 if
    /// `target` is past the end of the table, and `None` if the table is truncated.
    pub fn pc_value(&self, off: u32, entry: u64, target: u64) -> Option<i32> {
        let mut p = Parser::at(self.data, off as usize).ok()?;
        let mut val: i32 = -1;
        let mut pc = entry;

        loop {
            let first = pc == entry;
            let uvdelta = p.uvarint32().ok()?;
            if uvdelta == 0 && !first {
                return Some(-1);
            }
            let vdelta = (if uvdelta & 1 != 0 {
                !(uvdelta >> 1)
            } else {
                uvdelta >> 1
            }) as i32;
            let pcdelta = p.uvarint32().ok()? as u64 * self.quantum as u64;
            pc = pc.wrapping_add(pcdelta);
            val = val.wrapping_add(vdelta);

            if target < pc {
                return Some(val);
            }
        }
    }

    /// Returns the line number for `pc`.
    pub fn pc_to_line(&self, pc: u64) -> Option<i32> {
        let func = self.find_func(pc)?;
        let entry = Parser::new(func).uintptr(self.order, self.ptr_size).ok()?;
        let pcln = self.func_field(func, FUNC_PCLN).ok()?;
        self.pc_value(pcln, entry, pc).filter(|&line| line >= 0)
    }

    /// Returns the source file name for `pc`.
    pub fn pc_to_file(&self, pc: u64) -> Option<Rc<str>> {
        let func = self.find_func(pc)?;
        let entry = Parser::new(func).uintptr(self.order, self.ptr_size).ok()?;
        let pcfile = self.func_field(func, FUNC_PCFILE).ok()?;
        let fno = self.pc_value(pcfile, entry, pc)?;
        if fno <= 0 {
            return None;
        }
        let off = Parser::at(self.filetab, 4 * fno as usize)
            .ok()?
            .u32(self.order)
            .ok()?;
        self.string(off).ok()
    }
}

impl<'a> std::fmt::Debug for Go12State<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Go12State")
            .field("order", &self.order)
            .field("quantum", &self.quantum)
            .field("ptr_size", &self.ptr_size)
            .field("nfunctab", &self.nfunctab)
            .field("nfiletab", &self.nfiletab)
            .finish()
    }
}
