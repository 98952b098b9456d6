//! Support for parsing byte-oriented data
//!
//! Go binaries are produced for both little-endian and big-endian targets, and the tables in them
//! are written in the byte order of the target. Every multi-byte read on [`Parser`] therefore
//! takes a [`ByteOrder`].


use bstr::BStr;
use std::mem::size_of;
use zerocopy::byteorder::{BE, LE, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// Selects the byte order used to decode multi-byte integers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    /// Least-significant byte first.
    Little,
    /// Most-significant byte first.
    Big,
}

/// A byte-oriented parser, for use in decoding symbol and line table records.
#[derive(Clone)]
pub struct Parser<'a> {
    /// The bytes that have not yet been parsed.
    pub bytes: &'a [u8],
}

impl<'a> Parser<'a> {
    /// Starts a new parser.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Starts a new parser at byte offset `offset` within `bytes`.
    ///
    /// Fails if `offset` is beyond the end of `bytes`. An offset equal to the length is allowed
    /// and produces an empty parser.
    pub fn at(bytes: &'a [u8], offset: usize) -> Result<Self, ParserError> {
        match bytes.get(offset..) {
            Some(rest) => Ok(Self { bytes: rest }),
            None => Err(ParserError::new()),
        }
    }

    /// Gets the rest of the unparsed bytes in the parser. The parser still retains a reference to
    /// the same data.
    pub fn peek_rest(&self) -> &'a [u8] {
        self.bytes
    }

    /// Consumes this `Parser` and returns the unparsed bytes within it.
    pub fn into_rest(self) -> &'a [u8] {
        self.bytes
    }

    /// Indicates whether there are any bytes left to parse.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the number of unparsed bytes in the parser.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Takes the next `n` bytes of input and returns a slice to it. The parser is advanced by `n`.
    #[inline(always)]
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ParserError> {
        if self.bytes.len() < n {
            return Err(ParserError::new());
        }

        let (lo, hi) = self.bytes.split_at(n);
        self.bytes = hi;
        Ok(lo)
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), ParserError> {
        if self.bytes.len() < n {
            return Err(ParserError::new());
        }

        self.bytes = &self.bytes[n..];
        Ok(())
    }

    /// Parses a reference to a structure. The input must contain at least [`size_of::<T>()`] bytes.
    #[inline(always)]
    pub fn get<T: FromBytes + Unaligned + KnownLayout + Immutable>(
        &mut self,
    ) -> Result<&'a T, ParserError> {
        if let Ok((value, rest)) = T::ref_from_prefix(self.bytes) {
            self.bytes = rest;
            Ok(value)
        } else {
            Err(ParserError::new())
        }
    }

    /// Parses a copy of a structure. The input must contain at least [`size_of::<T>()`] bytes.
    #[inline(always)]
    pub fn copy<T: FromBytes + Unaligned>(&mut self) -> Result<T, ParserError> {
        let item = self.bytes(size_of::<T>())?;
        T::read_from_bytes(item).map_err(|_| ParserError::new())
    }

    /// Reads one byte and advances.
    pub fn u8(&mut self) -> Result<u8, ParserError> {
        let b = self.bytes(1)?;
        Ok(b[0])
    }

    /// Reads an `u16` in the given byte order and advances.
    pub fn u16(&mut self, order: ByteOrder) -> Result<u16, ParserError> {
        Ok(match order {
            ByteOrder::Little => self.copy::<U16<LE>>()?.get(),
            ByteOrder::Big => self.copy::<U16<BE>>()?.get(),
        })
    }

    /// Reads an `u32` in the given byte order and advances.
    pub fn u32(&mut self, order: ByteOrder) -> Result<u32, ParserError> {
        Ok(match order {
            ByteOrder::Little => self.copy::<U32<LE>>()?.get(),
            ByteOrder::Big => self.copy::<U32<BE>>()?.get(),
        })
    }

    /// Reads an `i32` in the given byte order and advances.
    pub fn i32(&mut self, order: ByteOrder) -> Result<i32, ParserError> {
        Ok(self.u32(order)? as i32)
    }

    /// Reads an `u64` in the given byte order and advances.
    pub fn u64(&mut self, order: ByteOrder) -> Result<u64, ParserError> {
        Ok(match order {
            ByteOrder::Little => self.copy::<U64<LE>>()?.get(),
            ByteOrder::Big => self.copy::<U64<BE>>()?.get(),
        })
    }

    /// Reads a target pointer-sized unsigned value and advances. `ptr_size` must be 4 or 8.
    pub fn uintptr(&mut self, order: ByteOrder, ptr_size: u8) -> Result<u64, ParserError> {
        match ptr_size {
            4 => Ok(self.u32(order)? as u64),
            8 => self.u64(order),
            _ => Err(ParserError::new()),
        }
    }

    /// Skips over a NUL-terminated string.
    pub fn skip_strz(&mut self) -> Result<(), ParserError> {
        self.strz().map(|_| ())
    }

    /// Reads a NUL-terminated string, without checking that it is UTF-8 encoded.
    pub fn strz(&mut self) -> Result<&'a BStr, ParserError> {
        for i in 0..self.bytes.len() {
            if self.bytes[i] == 0 {
                let str_bytes = &self.bytes[..i];
                self.bytes = &self.bytes[i + 1..];
                return Ok(BStr::new(str_bytes));
            }
        }

        Err(ParserError::new())
    }

    /// Reads an unsigned LEB128 value, as used by the Go 1.2 pc-value tables.
    pub fn uvarint32(&mut self) -> Result<u32, ParserError> {
        let mut value: u32 = 0;
        let mut shift: u32 = 0;
        loop {
            let b = self.u8()?;
            value |= ((b & 0x7f) as u32).checked_shl(shift).unwrap_or(0);
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift = shift.saturating_add(7);
        }
    }
}

/// Zero-sized type for representing parsing errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParserError;

impl ParserError {
    /// Constructor for ParserError, also logs an event. This is useful for setting breakpoints.
    #[cfg_attr(debug_assertions, inline(never))]
    #[cfg_attr(not(debug_assertions), inline(always))]
    pub fn new() -> Self {
        #[cfg(debug_assertions)]
        {
            tracing::debug!("ParserError");
        }
        Self
    }
}

impl Default for ParserError {
    fn default() -> Self {
        Self::new()
    }
}

impl std::error::Error for ParserError {}

impl std::fmt::Display for ParserError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str("Parsing error")
    }
}
