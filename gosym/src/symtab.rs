//! Reads the records of the symbol table (`.gosymtab`).
//!
//! Three encodings exist, identified by a magic prefix:
//!
//! prefix                 | format | byte order | header size
//! -----------------------|--------|------------|------------
//! `FE FF FF FF 00 00`    | old    | little     | 6
//! `FF FF FF FD 00 00 00` | new    | big        | 8
//! `FD FF FF FF 00 00 00` | new    | little     | 8
//!
//! Byte 7 of a new-format header is the pointer size (4 or 8). Anything without a known prefix is
//! the original big-endian format, with no header at all.
//!
//! An old-format record is:
//!
//! name      | type     | usage
//! ----------|----------|------
//! `value`   | `u32`    | address, or a type-dependent value
//! `type`    | `u8`     | symbol type, with the high bit set
//! `name`    | `strz`   | see below
//! `go_type` | `u32`    | address of the type descriptor
//!
//! A new-format record starts with a byte that holds the symbol type in its low 6 bits (0-25 are
//! `'A'..='Z'`, 26 and up are `'a'..`). Bit 6 selects a pointer-sized `value`, instead of a
//! variable-length one. Bit 7 indicates that a pointer-sized `go_type` follows the value. Then
//! comes the name.
//!
//! For path symbols (`'z'` and `'Z'`) the name is an empty NUL-terminated string followed by a
//! list of big-endian `u16` file name indexes, terminated by a `00 00` pair.


use crate::DecodingError;
use crate::parser::{ByteOrder, Parser, ParserError};
use crate::table::SymType;
use tracing::debug;

/// Magic prefix of the old, little-endian symbol table format.
pub const OLD_LITTLE_ENDIAN_SYMTAB: [u8; 6] = [0xFE, 0xFF, 0xFF, 0xFF, 0x00, 0x00];
/// Magic prefix of the new, big-endian symbol table format.
pub const BIG_ENDIAN_SYMTAB: [u8; 7] = [0xFF, 0xFF, 0xFF, 0xFD, 0x00, 0x00, 0x00];
/// Magic prefix of the new, little-endian symbol table format.
pub const LITTLE_ENDIAN_SYMTAB: [u8; 7] = [0xFD, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00];

/// Identifies the record layout of a symbol table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SymtabFormat {
    /// Fixed 4-byte values, a type byte with its high bit set, and a trailing 4-byte Go type.
    Old,
    /// A packed type/flags byte, variable or pointer-sized values, and an optional Go type.
    New,
}

/// The parameters of a symbol table, determined from its magic prefix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SymtabHeader {
    /// The record layout.
    pub format: SymtabFormat,
    /// The byte order of multi-byte values.
    pub order: ByteOrder,
    /// The size of pointer-sized values. Always 4 for the old format.
    pub ptr_size: u8,
    /// The number of header bytes that precede the first record.
    pub header_len: usize,
}

impl SymtabHeader {
    /// Determines the format of a symbol table from its first bytes.
    ///
    /// An unknown prefix is not an error; it selects the original format.
    pub fn parse(data: &[u8]) -> Result<Self, DecodingError> {
        if data.starts_with(&OLD_LITTLE_ENDIAN_SYMTAB) {
            return Ok(Self {
                format: SymtabFormat::Old,
                order: ByteOrder::Little,
                ptr_size: 4,
                header_len: OLD_LITTLE_ENDIAN_SYMTAB.len(),
            });
        }

        let order = if data.starts_with(&BIG_ENDIAN_SYMTAB) {
            ByteOrder::Big
        } else if data.starts_with(&LITTLE_ENDIAN_SYMTAB) {
            ByteOrder::Little
        } else {
            return Ok(Self {
                format: SymtabFormat::Old,
                order: ByteOrder::Big,
                ptr_size: 4,
                header_len: 0,
            });
        };

        let ptr_size = *data.get(7).ok_or(DecodingError::Truncated)?;
        if ptr_size != 4 && ptr_size != 8 {
            return Err(DecodingError::InvalidPointerSize(ptr_size));
        }

        Ok(Self {
            format: SymtabFormat::New,
            order,
            ptr_size,
            header_len: 8,
        })
    }
}

/// One record of the symbol table, as stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawSym<'a> {
    /// The symbol value. Its meaning depends on `typ`.
    pub value: u64,
    /// The symbol type.
    pub typ: SymType,
    /// The name bytes. For path symbols these are big-endian `u16` file name indexes.
    pub name: &'a [u8],
    /// The address of the Go type descriptor, or 0.
    pub go_type: u64,
}

/// Reads the records of a symbol table, in order.
///
/// This is a single forward pass. After an error is returned, the iterator is exhausted.
pub struct SymtabIter<'a> {
    header: SymtabHeader,
    data: &'a [u8],
}

impl<'a> SymtabIter<'a> {
    /// Checks the header of `data` and starts reading records after it.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodingError> {
        let header = SymtabHeader::parse(data)?;
        debug!(?header, len = data.len(), "reading symbol table");
        Ok(Self {
            header,
            data: &data[header.header_len..],
        })
    }

    /// The remaining unparsed bytes of the table.
    pub fn rest(&self) -> &'a [u8] {
        self.data
    }

    fn next_sym(&mut self) -> Result<RawSym<'a>, DecodingError> {
        let SymtabHeader {
            format,
            order,
            ptr_size,
            ..
        } = self.header;
        let mut p = Parser::new(self.data);

        let value;
        let typ;
        let mut go_type = 0;

        match format {
            SymtabFormat::New => {
                let b = p.u8()?;
                let t = b & 0x3f;
                let wide_value = b & 0x40 != 0;
                let has_go_type = b & 0x80 != 0;
                typ = SymType(if t < 26 { b'A' + t } else { b'a' + (t - 26) });

                value = if wide_value {
                    p.uintptr(order, ptr_size)?
                } else {
                    read_value_varint(&mut p)?
                };

                if has_go_type {
                    go_type = p.uintptr(order, ptr_size)?;
                }
            }

            SymtabFormat::Old => {
                value = p.u32(order)? as u64;
                let t = p.u8()?;
                if t & 0x80 == 0 {
                    return Err(DecodingError::BadSymbolType(t));
                }
                typ = SymType(t & !0x80);
            }
        }

        let name = read_name(&mut p, typ)?;

        if format == SymtabFormat::Old {
            go_type = p.u32(order)? as u64;
        }

        self.data = p.into_rest();

        Ok(RawSym {
            value,
            typ,
            name,
            go_type,
        })
    }
}

impl<'a> Iterator for SymtabIter<'a> {
    type Item = Result<RawSym<'a>, DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Trailing bytes too short to hold a record are ignored.
        if self.data.len() < 4 {
            return None;
        }

        match self.next_sym() {
            Ok(sym) => Some(Ok(sym)),
            Err(e) => {
                debug!(error = %e, rest_len = self.data.len(), "bad symbol record");
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}

/// Reads the variable-length value of a new-format record.
///
/// Each byte with its high bit set is merged as `byte & (0x7f << shift)`, not
/// `(byte & 0x7f) << shift`; tables in the wild were decoded this way, so the
/// combination is kept as is.
fn read_value_varint(p: &mut Parser<'_>) -> Result<u64, ParserError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let b = p.u8()?;
        if b & 0x80 == 0 {
            value |= (b as u64).checked_shl(shift).unwrap_or(0);
            return Ok(value);
        }
        value |= b as u64 & 0x7fu64.checked_shl(shift).unwrap_or(0);
        shift = shift.saturating_add(7);
    }
}

/// Reads the name of a record of type `typ`.
fn read_name<'a>(p: &mut Parser<'a>, typ: SymType) -> Result<&'a [u8], ParserError> {
    if !typ.is_path() {
        let name: &'a [u8] = p.strz()?;
        return Ok(name);
    }

    p.skip_strz()?;
    let bytes = p.peek_rest();
    let mut i = 0;
    loop {
        match bytes.get(i..i + 2) {
            Some([0, 0]) => break,
            Some(_) => i += 2,
            None => return Err(ParserError::new()),
        }
    }

    let name = p.bytes(i)?;
    p.skip(2)?;
    Ok(name)
}
