use crate::image::{GoSections, read_file};
use anyhow::Result;

#[derive(clap::Parser)]
pub struct ExeOptions {
    /// The ELF executable to read.
    pub exe: String,
}

pub fn funcs_command(options: &ExeOptions) -> Result<()> {
    let data = read_file(&options.exe)?;
    let sections = GoSections::parse(&data)?;
    let table = sections.table()?;

    for func in table.funcs.iter() {
        println!("{:8x}\t{}", func.sym.value, func.sym.name);
    }

    Ok(())
}

pub fn syms_command(options: &ExeOptions) -> Result<()> {
    let data = read_file(&options.exe)?;
    let sections = GoSections::parse(&data)?;
    let table = sections.table()?;

    for sym in table.syms.iter() {
        println!(
            "{:8x} {} {:8x} {}",
            sym.value, sym.typ, sym.go_type, sym.name
        );
    }

    Ok(())
}

pub fn files_command(options: &ExeOptions) -> Result<()> {
    let data = read_file(&options.exe)?;
    let sections = GoSections::parse(&data)?;
    let table = sections.table()?;

    for (file, obj) in table.files.iter() {
        println!("{obj:4} {file}");
    }

    Ok(())
}
