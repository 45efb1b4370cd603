use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use sbc_hal::util::{BitField, ByteOrder};
use sbc_hal::{
    channel_listener, init_logger, log_info, open_gpio_input, open_i2c, Edge, EdgeEventBridge,
    EpollProvider, HalConfig, SubAddressWidth,
};

#[derive(Parser)]
#[command(name = "sbc-cli")]
#[command(about = "Register and GPIO diagnostics for single-board computers")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EdgeArg {
    Rising,
    Falling,
    Both,
}

impl From<EdgeArg> for Edge {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Rising => Edge::Rising,
            EdgeArg::Falling => Edge::Falling,
            EdgeArg::Both => Edge::Both,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read bytes (or an unsigned integer with --uint) from a register
    Read {
        #[arg(short, long, default_value = "1")]
        bus: u8,
        #[arg(short, long, value_parser = parse_number)]
        address: u16,
        #[arg(short, long, value_parser = parse_number)]
        register: u16,
        #[arg(short, long, default_value = "1")]
        width: u8,
        #[arg(short, long, default_value = "1")]
        length: usize,
        /// Decode the bytes as an unsigned integer (length 1-4)
        #[arg(long)]
        uint: bool,
        #[arg(long, default_value = "big")]
        order: ByteOrder,
    },
    /// Write hex-encoded bytes to a register
    Write {
        #[arg(short, long, default_value = "1")]
        bus: u8,
        #[arg(short, long, value_parser = parse_number)]
        address: u16,
        #[arg(short, long, value_parser = parse_number)]
        register: u16,
        #[arg(short, long, default_value = "1")]
        width: u8,
        /// Payload, e.g. "01ff"
        data: String,
    },
    /// Get or set a bit-field (MSB-relative start, length)
    Bits {
        #[arg(short, long, default_value = "1")]
        bus: u8,
        #[arg(short, long, value_parser = parse_number)]
        address: u16,
        #[arg(short, long, value_parser = parse_number)]
        register: u16,
        #[arg(long)]
        start: u8,
        #[arg(long)]
        length: u8,
        #[arg(long, value_parser = parse_number)]
        set: Option<u16>,
    },
    /// Print edge events of a sysfs GPIO
    Watch {
        gpio: u32,
        #[arg(short, long, value_enum, default_value = "both")]
        edge: EdgeArg,
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Stop after this many seconds without an event
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
}

fn parse_number(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<HalConfig> {
    let config = match path {
        Some(path) => HalConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HalConfig::default(),
    };
    config.install_defaults();
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Read {
            bus,
            address,
            register,
            width,
            length,
            uint,
            order,
        } => {
            let width = SubAddressWidth::try_from(width)?;
            let mut device = open_i2c(&config, bus, address)?;
            if uint {
                let value = device.read_uint(register, width, length, order)?;
                println!("0x{value:0w$X} ({value})", w = length * 2);
            } else {
                let bytes = device.read(register, width, length)?;
                println!("{}", hex::encode(bytes));
            }
            device.close()?;
        }
        Commands::Write {
            bus,
            address,
            register,
            width,
            data,
        } => {
            let width = SubAddressWidth::try_from(width)?;
            let payload = hex::decode(data.trim()).context("payload must be hex")?;
            let mut device = open_i2c(&config, bus, address)?;
            device.write(register, width, &payload)?;
            log_info(&format!("Wrote {} bytes to 0x{register:02X}", payload.len()));
            device.close()?;
        }
        Commands::Bits {
            bus,
            address,
            register,
            start,
            length,
            set,
        } => {
            let field = BitField::new(start, length)?;
            let mut device = open_i2c(&config, bus, address)?;
            match set {
                Some(value) => {
                    let Ok(value) = u8::try_from(value) else {
                        bail!("bit-field value {value} does not fit a byte");
                    };
                    device.write_bits(register, field, value)?;
                    log_info(&format!("Register 0x{register:02X} now 0x{:02X}", device.read_byte(register)?));
                }
                None => {
                    let value = device.read_bits(register, field)?;
                    println!("0b{value:0w$b} ({value})", w = length as usize);
                }
            }
            device.close()?;
        }
        Commands::Watch {
            gpio,
            edge,
            count,
            timeout,
        } => {
            let mut input = open_gpio_input(&config, gpio, edge.into())?;
            println!("gpio{gpio} is {}", if input.value()? { "high" } else { "low" });

            let bridge = EdgeEventBridge::with_config(Arc::new(EpollProvider::new()?), &config);
            let (listener, mut events) = channel_listener();
            input.subscribe_edges(&bridge, listener)?;

            let mut seen = 0;
            while count.map_or(true, |limit| seen < limit) {
                let Some(event) = events.recv_event_timeout(Duration::from_secs(timeout)).await? else {
                    log_info(&format!("No event within {timeout}s"));
                    break;
                };
                let at: DateTime<Local> = event.epoch_time.into();
                println!(
                    "{} {} {}",
                    at.format("%H:%M:%S%.6f"),
                    event.source,
                    if event.value { "high" } else { "low" }
                );
                seen += 1;
            }
            input.close()?;
            bridge.close()?;
        }
    }

    Ok(())
}
