mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use std::path::PathBuf;
use topaz_core::{AddressMap, PixelFormat};
use topaz_hw::{
    CameraError, DeviceSelector, MockSdk, PiGentlSdk, RegisterValue, Registers, Sdk, Topaz,
};

#[derive(Parser)]
#[command(name = "topaz", about = "Topaz evaluation kit diagnostics")]
struct Cli {
    /// Use the simulated camera instead of the vendor library
    #[arg(long, global = true)]
    mock: bool,
    /// Directory holding pigentl-sdk and pigentl.cti (overrides TOPAZ_SDK_DIR)
    #[arg(long, global = true)]
    sdk_dir: Option<PathBuf>,
    /// Number of driver buffers (overrides TOPAZ_BUFFER_COUNT)
    #[arg(long, global = true)]
    buffers: Option<usize>,
    /// Open the camera with this serial number instead of the first one
    #[arg(long, global = true)]
    serial: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print device identity and current settings
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read a register
    ReadReg {
        /// Address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_address)]
        address: u32,
        /// Number of bytes to read
        #[arg(long, default_value_t = 4)]
        size: usize,
        /// Address is a 16-bit sensor register offset
        #[arg(long)]
        sensor: bool,
    },
    /// Write a register
    WriteReg {
        /// Address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_address)]
        address: u32,
        /// Value to write
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Address is a 16-bit sensor register offset
        #[arg(long)]
        sensor: bool,
        /// How to encode the value
        #[arg(long, value_enum, default_value_t = ValueKind::U32)]
        kind: ValueKind,
    },
    /// Acquire frames and print their metadata and statistics
    Grab {
        /// Number of frames
        #[arg(short = 'n', long, default_value_t = 5)]
        count: u32,
        /// Exposure time in milliseconds
        #[arg(long)]
        exposure_ms: Option<f64>,
        /// Pixel format (Mono8, Mono10p, RGB24)
        #[arg(long)]
        format: Option<PixelFormat>,
        /// Per-frame timeout in microseconds (overrides TOPAZ_FRAME_TIMEOUT_US)
        #[arg(long)]
        timeout_us: Option<u64>,
        /// Run a one-shot white balance before grabbing (RGB24 only)
        #[arg(long)]
        white_balance: bool,
        /// Enable 2x2 subsampling
        #[arg(long)]
        subsample: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ValueKind {
    I32,
    U32,
    F32,
    U16,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = &cli.sdk_dir {
        config.sdk_dir = dir.clone();
    }
    if let Some(buffers) = cli.buffers {
        config.buffer_count = buffers;
    }

    let map = match &config.address_map {
        Some(path) => AddressMap::load(path)?,
        None => AddressMap::embedded()?.clone(),
    };

    if cli.mock {
        let sdk = MockSdk::with_address_map(map.clone());
        run(sdk, &cli, &config, map)
    } else {
        let sdk = PiGentlSdk::load(&config.sdk_paths())
            .context("loading the vendor acquisition library (use --mock to run without hardware)")?;
        run(sdk, &cli, &config, map)
    }
}

fn run<S: Sdk>(sdk: S, cli: &Cli, config: &Config, map: AddressMap) -> Result<()> {
    let selector = cli
        .serial
        .clone()
        .map(DeviceSelector::Serial)
        .unwrap_or_default();
    let mut camera = Topaz::with_address_map(sdk, &selector, config.session_config(), map)?;

    match &cli.command {
        Commands::Info { json } => info(&mut camera, *json)?,
        Commands::ReadReg {
            address,
            size,
            sensor,
        } => read_reg(&mut camera, *address, *size, *sensor)?,
        Commands::WriteReg {
            address,
            value,
            sensor,
            kind,
        } => write_reg(&mut camera, *address, value, *sensor, *kind)?,
        Commands::Grab {
            count,
            exposure_ms,
            format,
            timeout_us,
            white_balance,
            subsample,
        } => {
            let opts = GrabOptions {
                count: *count,
                exposure_ms: *exposure_ms,
                format: *format,
                timeout_us: timeout_us.unwrap_or(config.frame_timeout_us),
                white_balance: *white_balance,
                subsample: *subsample,
            };
            grab(&mut camera, &opts)?
        }
    }

    camera.close()?;
    Ok(())
}

fn info<S: Sdk>(camera: &mut Topaz<S>, json: bool) -> Result<()> {
    let summary = camera.device_summary()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Camera info:");
    println!("  Manufacturer      {}", summary.vendor);
    println!("  Device name       {}", summary.model);
    println!("  Serial number     {}", summary.serial);
    println!("  Firmware version  {}", summary.firmware_version);
    println!("  Device version    {}", summary.device_version);
    println!("  Chip id           {:#06x}", summary.chip_id);
    println!("  Image width       {}", summary.width);
    println!("  Image height      {}", summary.height);
    println!("  Pixel format      {}", summary.pixel_format);
    println!("  Line length       {:.2} us", summary.line_period_us);
    println!("  Exposure time     {:.2} ms", summary.exposure_ms);
    println!("  Wait time         {:.2} ms", summary.wait_ms);
    Ok(())
}

fn read_reg<S: Sdk>(camera: &mut Topaz<S>, address: u32, size: usize, sensor: bool) -> Result<()> {
    if sensor {
        let value = camera.read_sensor_reg(address)?;
        println!("RD {:#07x} = {value:#06x}", camera.address_map().sensor.absolute(address));
        return Ok(());
    }

    if size == 0 {
        bail!("--size must be at least 1");
    }
    let bytes = camera.session_mut().read_register(address, size)?;
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    match size {
        2 => println!("RD {address:#07x} = {:#06x}", u16::from_le_bytes([bytes[0], bytes[1]])),
        4 => println!(
            "RD {address:#07x} = {:#010x}",
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        ),
        _ => println!("RD {address:#07x} = [{}]", hex.join(" ")),
    }
    Ok(())
}

fn write_reg<S: Sdk>(
    camera: &mut Topaz<S>,
    address: u32,
    value: &str,
    sensor: bool,
    kind: ValueKind,
) -> Result<()> {
    if sensor {
        let value = parse_int(value)
            .and_then(|v| u16::try_from(v).map_err(|_| format!("{v} does not fit a 16-bit register")))
            .map_err(anyhow::Error::msg)?;
        camera.write_sensor_reg(address, value)?;
        println!("WR {:#07x} = {value:#06x}", camera.address_map().sensor.absolute(address));
        return Ok(());
    }

    let value = parse_value(value, kind).map_err(anyhow::Error::msg)?;
    let accepted = camera.session_mut().write_register(address, value)?;
    println!("WR {address:#07x} = {value:?} ({accepted} bytes)");
    Ok(())
}

struct GrabOptions {
    count: u32,
    exposure_ms: Option<f64>,
    format: Option<PixelFormat>,
    timeout_us: u64,
    white_balance: bool,
    subsample: bool,
}

fn grab<S: Sdk>(camera: &mut Topaz<S>, opts: &GrabOptions) -> Result<()> {
    if let Some(format) = opts.format {
        camera.set_pixel_format(format)?;
    }
    if let Some(ms) = opts.exposure_ms {
        camera.set_exposure_time_ms(ms)?;
    }
    camera.set_vertical_subsampling(opts.subsample)?;

    let format = camera.pixel_format()?;
    let (width, height) = (camera.sensor_width()?, camera.sensor_height()?);
    let exposure_ms = camera.exposure_time_ms()?;
    tracing::info!(format = %format, width, height, exposure_ms, "grabbing");

    camera.start_acquisition()?;

    if opts.white_balance {
        if format.is_color() {
            camera.enable_white_balance(true)?;
            camera.one_shot_white_balance()?;
        } else {
            tracing::warn!(format = %format, "white balance needs RGB24; skipped");
        }
    }

    let mut grabbed = 0;
    let mut missed = 0;
    while grabbed < opts.count {
        let frame = match camera.get_frame(opts.timeout_us) {
            Ok(frame) => frame,
            Err(e @ CameraError::Timeout { .. }) => {
                missed += 1;
                tracing::warn!(error = %e, missed, "frame timeout");
                if missed >= opts.count {
                    stop_after_failure(camera);
                    bail!("{missed} consecutive timeouts; is the camera streaming?");
                }
                continue;
            }
            Err(e) => {
                stop_after_failure(camera);
                return Err(e.into());
            }
        };
        missed = 0;
        grabbed += 1;

        let pixels = if opts.subsample {
            frame.pixels.subsample_columns()
        } else {
            frame.pixels
        };
        let stats = pixels.stats();
        println!(
            "frame {grabbed}/{}: block {} ts {} {}x{}x{}{}",
            opts.count,
            frame.descriptor.block_id,
            frame.descriptor.timestamp,
            pixels.width(),
            pixels.height(),
            pixels.channels(),
            if frame.descriptor.incomplete { " (incomplete)" } else { "" },
        );
        println!(
            "  min={} max={} mean={:.2} std={:.2}",
            stats.min, stats.max, stats.mean, stats.std_dev
        );
    }

    camera.stop_acquisition()?;
    Ok(())
}

/// Stop on an error path; the error that ended the grab is the one reported.
fn stop_after_failure<S: Sdk>(camera: &mut Topaz<S>) {
    if let Err(stop) = camera.stop_acquisition() {
        tracing::warn!(error = %stop, "stop after failed grab failed");
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    let (digits, negative) = match s.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|e| format!("invalid integer {s:?}: {e}"))?;
    Ok(if negative { -value } else { value })
}

fn parse_address(s: &str) -> Result<u32, String> {
    let value = parse_int(s)?;
    u32::try_from(value).map_err(|_| format!("address {s} out of range"))
}

fn parse_value(s: &str, kind: ValueKind) -> Result<RegisterValue, String> {
    let out_of_range = |_| format!("{s} out of range for {}", kind.name());
    Ok(match kind {
        ValueKind::I32 => RegisterValue::I32(i32::try_from(parse_int(s)?).map_err(out_of_range)?),
        ValueKind::U32 => RegisterValue::U32(u32::try_from(parse_int(s)?).map_err(out_of_range)?),
        ValueKind::U16 => RegisterValue::U16(u16::try_from(parse_int(s)?).map_err(out_of_range)?),
        ValueKind::F32 => RegisterValue::F32(s.parse().map_err(|e| format!("invalid float {s:?}: {e}"))?),
    })
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::U16 => "u16",
        }
    }
}
