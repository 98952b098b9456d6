use crate::image::{GoSections, read_file};
use anyhow::{Context, Result};

/// Finds the function and source line for an address.
#[derive(clap::Parser)]
pub struct LookupOptions {
    /// The ELF executable to read.
    pub exe: String,

    /// The address to look up, in hex (with a `0x` prefix) or decimal.
    #[arg(value_parser = parse_address)]
    pub addr: u64,
}

pub fn lookup_command(options: &LookupOptions) -> Result<()> {
    let data = read_file(&options.exe)?;
    let sections = GoSections::parse(&data)?;
    let table = sections.table()?;
    let pc = options.addr;

    let Some(func) = table.pc_to_func(pc) else {
        println!("No function found at 0x{pc:x}.");
        return Ok(());
    };

    println!(
        "0x{pc:x}: {} + 0x{:x}",
        func.sym.name,
        pc - func.entry
    );

    match table.pc_to_line(pc) {
        Some((file, line, _)) => println!("{file}:{line}"),
        None => println!("No line information."),
    }

    Ok(())
}

fn parse_address(s: &str) -> Result<u64> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    };
    value.with_context(|| format!("invalid address: {s}"))
}

#[test]
fn parse_addresses() {
    assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
    assert_eq!(parse_address("0XfF").unwrap(), 0xff);
    assert_eq!(parse_address("4096").unwrap(), 4096);
    assert!(parse_address("0x").is_err());
    assert!(parse_address("main.main").is_err());
}
