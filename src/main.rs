//! ChisFlash CLI
//!
//! Lists ports, probes the programmer and dumps cartridge memory.

use anyhow::{bail, Context};
use chisflash_link::cli::{self, ExitCodes, OutputFormat, ProbeReport};
use chisflash_link::core::protocol::flash_id;
use chisflash_link::{
    Backend, ConnectionManager, DeviceHandle, DeviceInfo, DeviceRequest, LinkSettings, PortDescriptor,
    PortFilter, Programmer, SerialportBackend, UsbPortPrompt,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, Level};
use tracing_subscriber::EnvFilter;

/// Which host facility opens the port
#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Operating-system serial port with a reader thread
    Native,
    /// Async byte-stream serial port
    Stream,
}

/// ChisFlash CLI
#[derive(Parser, Debug)]
#[command(
    name = "chisflash",
    version,
    about = "Talk to a USB-serial flash-cartridge programmer",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file (defaults to link.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Port backend
    #[arg(long, value_enum, default_value_t = BackendKind::Native, global = true)]
    backend: BackendKind,

    /// Device filter preset (beggar-socket, stm32, arduino, esp32, any)
    #[arg(long, default_value = "beggar-socket", global = true)]
    filter: PortFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports matching the filter
    ListPorts {
        /// Ignore the filter and list every port
        #[arg(short, long)]
        all: bool,
    },

    /// Reset the programmer and identify the flash chip
    Probe {
        /// Serial port (skips discovery)
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Read GBA ROM
    ReadRom(ReadArgs),

    /// Read GBA save RAM
    ReadRam(ReadArgs),

    /// Print the exit code table
    ExitCodes,
}

#[derive(clap::Args, Debug)]
struct ReadArgs {
    /// Start address (decimal or 0x-prefixed hex)
    #[arg(short, long, value_parser = parse_number, default_value = "0")]
    address: u32,

    /// Number of bytes (decimal or 0x-prefixed hex)
    #[arg(short, long, value_parser = parse_number)]
    size: u32,

    /// Serial port (skips discovery)
    #[arg(short, long)]
    port: Option<String>,

    /// Write the data to this file instead of printing a hex dump
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

#[derive(Debug, Clone, Copy)]
enum Region {
    Rom,
    Ram,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match run(&cli).await {
        Ok(()) => cli::to_exit_code(ExitCodes::SUCCESS),
        Err(e) => {
            error!("{:#}", e);
            if !cli.quiet {
                eprintln!("Error: {:#}", e);
            }
            cli::to_exit_code(ExitCodes::for_error(&e))
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::ExitCodes = cli.command {
        cli::print_exit_codes();
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => LinkSettings::load_from(path)?,
        None => LinkSettings::load()?,
    };
    debug!("Settings: {:?}", settings);

    let backend = match cli.backend {
        BackendKind::Native => Backend::Native(Arc::new(SerialportBackend::new())),
        BackendKind::Stream => Backend::Stream(Arc::new(UsbPortPrompt::new())),
    };
    let manager = ConnectionManager::new(backend, &settings);

    match &cli.command {
        Commands::ListPorts { all } => {
            let filter = if *all { PortFilter::any() } else { cli.filter.clone() };
            let ports = manager.list_ports(&filter).await?;
            println!("{}", cli::format_ports(&ports, cli.format));
            Ok(())
        }
        Commands::Probe { port } => {
            let mut handle = connect(&manager, &cli.filter, port.as_deref()).await?;
            let result = probe(&manager, &handle, cli.format).await;
            manager.disconnect_device(&mut handle).await;
            result
        }
        Commands::ReadRom(args) => read(cli, &manager, &settings, args, Region::Rom).await,
        Commands::ReadRam(args) => read(cli, &manager, &settings, args, Region::Ram).await,
        Commands::ExitCodes => Ok(()),
    }
}

async fn connect(
    manager: &ConnectionManager,
    filter: &PortFilter,
    port: Option<&str>,
) -> anyhow::Result<DeviceHandle> {
    let handle = match port {
        Some(path) => manager
            .connect_with_selected_port(&PortDescriptor::new(path))
            .await
            .with_context(|| format!("opening {}", path))?,
        None => match manager.request_device(filter).await? {
            DeviceRequest::Connected(handle) => handle,
            DeviceRequest::SelectionRequired(candidates) => {
                let paths: Vec<_> = candidates.iter().map(|p| p.path.as_str()).collect();
                bail!(
                    "{} programmers found ({}); pick one with --port",
                    candidates.len(),
                    paths.join(", ")
                );
            }
        },
    };

    let mut handle = handle;
    if let Err(e) = manager.initialize_device(&handle).await {
        manager.disconnect_device(&mut handle).await;
        return Err(e).context("resetting programmer");
    }
    Ok(handle)
}

fn describe(handle: &DeviceHandle) -> String {
    match handle.info() {
        Some(DeviceInfo::NativeSerial { id }) => id,
        Some(DeviceInfo::WebSerial {
            usb_vendor_id,
            usb_product_id,
        }) => format!(
            "usb {:04x}:{:04x}",
            usb_vendor_id.unwrap_or_default(),
            usb_product_id.unwrap_or_default()
        ),
        None => "disconnected".to_string(),
    }
}

async fn probe(manager: &ConnectionManager, handle: &DeviceHandle, format: OutputFormat) -> anyhow::Result<()> {
    let id = Programmer::new(manager.adapter(), handle)
        .rom_get_id()
        .await
        .context("reading flash id")?;

    let report = ProbeReport {
        port: describe(handle),
        flash_id: hex::encode(&id),
        chip: flash_id::lookup(&id).map(str::to_string),
    };
    println!("{}", cli::format_probe(&report, format));
    Ok(())
}

async fn read(
    cli: &Cli,
    manager: &ConnectionManager,
    settings: &LinkSettings,
    args: &ReadArgs,
    region: Region,
) -> anyhow::Result<()> {
    let mut handle = connect(manager, &cli.filter, args.port.as_deref()).await?;
    let result = read_region(manager, &handle, settings, args, region).await;
    manager.disconnect_device(&mut handle).await;
    let data = result?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
            if !cli.quiet {
                eprintln!("Wrote {} bytes to {}", data.len(), path.display());
            }
        }
        None => match cli.format {
            OutputFormat::Text => println!("{}", cli::hex_dump(&data, args.address)),
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "address": args.address,
                    "size": data.len(),
                    "data": hex::encode(&data),
                }))?
            ),
        },
    }
    Ok(())
}

/// Split `size` bytes at `start` into `(address, len)` requests of at most `page` bytes
fn plan_pages(start: u32, size: u32, page: u32) -> anyhow::Result<Vec<(u32, u16)>> {
    if size > 0 && start.checked_add(size - 1).is_none() {
        bail!(
            "{:#x} bytes at {:#010x} run past the end of the address space",
            size,
            start
        );
    }

    let page = page.clamp(1, u32::from(u16::MAX));
    let mut pages = Vec::new();
    let mut offset = 0u32;
    while offset < size {
        let len = page.min(size - offset);
        pages.push((start + offset, u16::try_from(len)?));
        offset += len;
    }
    Ok(pages)
}

async fn read_region(
    manager: &ConnectionManager,
    handle: &DeviceHandle,
    settings: &LinkSettings,
    args: &ReadArgs,
    region: Region,
) -> anyhow::Result<Vec<u8>> {
    let programmer = Programmer::new(manager.adapter(), handle);
    let page = match region {
        Region::Rom => settings.rom_page_size,
        Region::Ram => settings.ram_page_size,
    };

    let mut data = Vec::with_capacity(args.size as usize);
    for (address, len) in plan_pages(args.address, args.size, page)? {
        let bytes = match region {
            Region::Rom => programmer.rom_read(address, len).await,
            Region::Ram => programmer.ram_read(address, len).await,
        }
        .with_context(|| format!("reading {:?} at {:#010x}", region, address))?;
        data.extend_from_slice(&bytes);
        debug!("{}/{} bytes", data.len(), args.size);
    }
    Ok(data)
}
