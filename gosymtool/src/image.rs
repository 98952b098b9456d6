//! Finds the Go tables in an ELF executable.

use anyhow::{Context, Result, bail};
use object::{Object, ObjectSection, ObjectSegment, SegmentFlags};
use tracing::{debug, warn};

/// ELF segment flag: executable.
const PF_X: u32 = 1;

/// The raw Go tables of an executable.
pub struct GoSections<'data> {
    /// Contents of `.gopclntab`.
    pub pclntab: &'data [u8],
    /// Contents of `.gosymtab`. Empty if the executable has no such section.
    pub symtab: &'data [u8],
    /// Virtual address of the first executable segment.
    pub text_start: u64,
}

impl<'data> GoSections<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let file = object::File::parse(data).context("failed to parse executable")?;
        if file.format() != object::BinaryFormat::Elf {
            bail!("Only ELF executables are supported (found {:?})", file.format());
        }

        let Some(text_start) = first_exec_segment(&file) else {
            bail!("The executable has no executable segment");
        };
        debug!("text segment starts at 0x{text_start:x}");

        let Some(pclntab) = file.section_by_name(".gopclntab") else {
            bail!("The executable has no .gopclntab section");
        };
        let pclntab = pclntab.data().context("failed to read .gopclntab")?;

        let symtab = match file.section_by_name(".gosymtab") {
            Some(section) => section.data().context("failed to read .gosymtab")?,
            None => {
                warn!("The executable has no .gosymtab section");
                &[]
            }
        };

        Ok(Self {
            pclntab,
            symtab,
            text_start,
        })
    }

    /// Decodes the tables.
    pub fn table(&self) -> Result<gosym::Table<'data>> {
        let line_table = gosym::LineTable::new(self.pclntab, self.text_start);
        let table = gosym::Table::new(self.symtab, line_table)
            .context("failed to decode the Go symbol table")?;
        Ok(table)
    }
}

fn first_exec_segment(file: &object::File<'_>) -> Option<u64> {
    for segment in file.segments() {
        if let SegmentFlags::Elf { p_flags } = segment.flags() {
            if p_flags & PF_X != 0 {
                return Some(segment.address());
            }
        }
    }
    None
}

/// Reads an executable from disk.
pub fn read_file(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {path}"))
}
