#![forbid(unused_must_use)]
#![allow(clippy::manual_map)]
#![allow(clippy::single_match)]

use clap::Parser;

mod dump;
mod image;
mod lookup;

#[derive(clap::Parser)]
struct CommandWithFlags {
    /// Reduce logging to just warnings and errors.
    #[arg(long)]
    quiet: bool,

    /// Turn on debug output in all `gosym` and `gosymtool` modules. Noisy!
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Lists the functions of an executable, with their entry addresses.
    Funcs(dump::ExeOptions),
    /// Lists every symbol decoded from the symbol table.
    Syms(dump::ExeOptions),
    /// Lists the source files known to the line table.
    Files(dump::ExeOptions),
    /// Finds the function, file and line for an address.
    Lookup(lookup::LookupOptions),
}

fn main() -> anyhow::Result<()> {
    let command_with_flags = CommandWithFlags::parse();
    configure_tracing(&command_with_flags);

    match command_with_flags.command {
        Command::Funcs(args) => dump::funcs_command(&args)?,
        Command::Syms(args) => dump::syms_command(&args)?,
        Command::Files(args) => dump::files_command(&args)?,
        Command::Lookup(args) => lookup::lookup_command(&args)?,
    }

    Ok(())
}

fn configure_tracing(args: &CommandWithFlags) {
    use tracing_subscriber::filter::LevelFilter;

    let builder = tracing_subscriber::fmt().with_writer(std::io::stderr);

    let max_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    builder.with_max_level(max_level).init();
}
