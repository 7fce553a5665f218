// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::boxed::Box;
use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::panic;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use minidump::system_info::PointerWidth as CpuPointerWidth;
use minidump::{
    Minidump, MinidumpMemory64List, MinidumpMemoryList, MinidumpModuleList, MinidumpSystemInfo,
    Module,
};
use simplelog::{
    ColorChoice, ConfigBuilder, Level, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

use dred::format::{DRED_PAYLOAD_SYMBOL, DRED_VERSIONED_TYPE};
use dred::{locate_and_decode, normalize_module_name, Layout, MemoryImage, PointerWidth};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> LevelFilter {
        match verbosity {
            Verbosity::Off => LevelFilter::Off,
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// Print the D3D12 Device Removed Extended Data (DRED) recorded in a full-memory minidump.
///
/// Minidumps don't carry symbols, so the location of `D3D12DeviceRemovedExtendedData` has to
/// be given with --symbol or --address.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// The RVA of D3D12DeviceRemovedExtendedData in a module, e.g. `d3d12core.dll=0x1d2f40`.
    ///
    /// Can be given more than once, d3d12core is preferred over d3d12.
    #[arg(long = "symbol", value_name = "MODULE=RVA", value_parser = parse_symbol)]
    symbols: Vec<(String, u64)>,

    /// The absolute address of D3D12DeviceRemovedExtendedData in d3d12core.
    #[arg(long, value_name = "ADDR", value_parser = parse_number)]
    address: Option<u64>,

    /// A module whose symbols declare the DRED types. Defaults to every loaded module.
    #[arg(long = "types-in", value_name = "MODULE")]
    types_in: Vec<String>,

    /// Emit a machine-readable JSON report instead of the human-readable one.
    #[arg(long)]
    json: bool,

    /// Where to write the report, defaults to stdout.
    #[arg(long, value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Where to write logs, defaults to stderr.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// How much to log.
    #[arg(long, value_enum, default_value_t = Verbosity::Error)]
    verbose: Verbosity,

    /// The minidump to read.
    minidump: PathBuf,
}

fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_symbol(s: &str) -> Result<(String, u64), String> {
    let (module, rva) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected MODULE=RVA, got '{s}'"))?;
    Ok((module.to_owned(), parse_number(rva)?))
}

pub fn main() {
    if let Err(e) = try_main() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let verbosity = LevelFilter::from(args.verbose);
    if let Some(log_path) = &args.log_file {
        let log_file = File::create(log_path).context("while creating log file")?;
        let _ = WriteLogger::init(
            verbosity,
            ConfigBuilder::new()
                .set_location_level(LevelFilter::Off)
                .set_time_level(LevelFilter::Off)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Off)
                .build(),
            log_file,
        );
    } else {
        let _ = TermLogger::init(
            verbosity,
            ConfigBuilder::new()
                .set_location_level(LevelFilter::Off)
                .set_time_level(LevelFilter::Off)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Off)
                .set_level_color(Level::Trace, None)
                .build(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
    }

    // Set a panic hook to redirect to the logger
    panic::set_hook(Box::new(|panic_info| {
        let (filename, line) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line()))
            .unwrap_or(("<unknown>", 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .unwrap_or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<&str>()
                    .copied()
                    .unwrap_or("<cause unknown>")
            });
        error!(
            "Panic - A panic occurred at {}:{}: {}",
            filename, line, cause
        );
    }));
    Ok(())
}

/// Collect everything the decoder needs to know about the process from `dump` and `args`.
fn memory_image<'a, T>(dump: &'a Minidump<'a, T>, args: &Args) -> anyhow::Result<MemoryImage>
where
    T: Deref<Target = [u8]> + 'a,
{
    let mut image = MemoryImage::new();

    if let Ok(memory_list) = dump.get_stream::<MinidumpMemoryList>() {
        for region in memory_list.by_addr() {
            image = image.add_region(region.base_address, region.bytes);
        }
    }
    if let Ok(memory_list) = dump.get_stream::<MinidumpMemory64List>() {
        for region in memory_list.by_addr() {
            image = image.add_region(region.base_address, region.bytes);
        }
    }
    debug!("{} memory regions", image.regions().count());

    let modules = dump
        .get_stream::<MinidumpModuleList>()
        .context("while reading the module list")?;
    for module in modules.iter() {
        image = image.add_module(&module.code_file());
    }

    for (name, rva) in &args.symbols {
        let wanted = normalize_module_name(name);
        let Some(module) = modules
            .iter()
            .find(|module| normalize_module_name(&module.code_file()) == wanted)
        else {
            bail!("module {name} is not loaded");
        };
        let address = module.base_address().wrapping_add(*rva);
        info!("{DRED_PAYLOAD_SYMBOL} in {name} is at {address:#x}");
        image = image.add_symbol(name, DRED_PAYLOAD_SYMBOL, address);
    }
    if let Some(address) = args.address {
        image = image.add_symbol("d3d12core", DRED_PAYLOAD_SYMBOL, address);
    }

    let pointer_width = match dump.get_stream::<MinidumpSystemInfo>() {
        Ok(system_info) if matches!(system_info.cpu.pointer_width(), CpuPointerWidth::Bits32) => {
            PointerWidth::Bits32
        }
        _ => PointerWidth::Bits64,
    };
    let layout = Layout {
        pointer_width,
        ..Layout::default()
    };
    if args.types_in.is_empty() {
        for module in modules.iter() {
            image = image.declare_type(&module.code_file(), DRED_VERSIONED_TYPE, layout);
        }
    } else {
        for name in &args.types_in {
            image = image.declare_type(name, DRED_VERSIONED_TYPE, layout);
        }
    }

    Ok(image)
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("minidump file path: {}", args.minidump.display());

    let dump = Minidump::read_path(&args.minidump).context("while reading minidump")?;
    let image = memory_image(&dump, &args)?;
    let dred = locate_and_decode(&image).context("while decoding DRED")?;

    let mut stdout;
    let mut output_f;
    let mut output: &mut dyn Write = if let Some(output_path) = &args.output_file {
        output_f = File::create(output_path).context("while creating output file")?;
        &mut output_f
    } else {
        stdout = std::io::stdout();
        &mut stdout
    };

    if args.json {
        dred.print_json(&mut output, true)
            .context("while writing JSON report")?;
        writeln!(output)?;
    } else {
        dred.print(&mut output).context("while writing report")?;
    }
    output.flush()?;
    Ok(())
}
