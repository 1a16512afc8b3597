use std::{fs::File, io::stdout, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use driver_catalog::record::{enrich, DEFAULT_CATROOT};
use driver_catalog::scan::scan_path;
use driver_catalog::{
    default_query, pick_display_matched_hardware_id, pick_raw_matched_hardware_id,
    CatalogLocator, CatalogQuery, DerCatalogQuery, DeviceInfo, HardwareIdSet, MetadataExtractor,
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Cli::parse();

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("catscan=debug,driver_catalog=debug")
    } else {
        EnvFilter::new("catscan=info,driver_catalog=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    debug!("Logging initialized (verbose={})", args.verbose);

    match args.command {
        Commands::Dump(args) => dump(args),
        Commands::Match(args) => match_ids(args),
        Commands::Enrich(args) => enrich_devices(args),
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump the metadata of a catalog file, or of every catalog under a directory, as JSON.
    Dump(DumpArgs),
    /// Pick the raw and display hardware IDs a signed driver matched.
    Match(MatchArgs),
    /// Enrich a JSON list of enumerated devices with their catalog metadata.
    Enrich(EnrichArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// The operating system's crypt32 (Windows only)
    Native,
    /// The built-in DER decoder
    Der,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// The catalog file, or a directory to search for .cat files
    input: PathBuf,

    /// Print the trust list's undecoded extensions instead (single file only)
    #[arg(long)]
    raw: bool,

    /// The catalog backend (defaults to native on Windows, der elsewhere)
    #[arg(long, value_enum, env = "CATSCAN_BACKEND")]
    backend: Option<Backend>,
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// The hardware ID the signed driver was installed for
    #[arg(long, value_name = "ID", default_value = "")]
    signed: String,

    /// The device's hardware IDs, most specific first
    hardware_ids: Vec<String>,
}

#[derive(Args, Debug)]
struct EnrichArgs {
    /// A JSON array of enumerated devices
    devices: PathBuf,

    /// The directory holding installed catalogs
    #[arg(long, value_name = "DIR", env = "CATSCAN_CATROOT", default_value = DEFAULT_CATROOT)]
    catroot: PathBuf,

    /// The catalog backend (defaults to native on Windows, der elsewhere)
    #[arg(long, value_enum, env = "CATSCAN_BACKEND")]
    backend: Option<Backend>,
}

fn load_query(backend: Option<Backend>) -> Result<Box<dyn CatalogQuery>> {
    match backend {
        None => Ok(default_query()),
        Some(Backend::Der) => Ok(Box::new(DerCatalogQuery)),
        #[cfg(windows)]
        Some(Backend::Native) => Ok(Box::new(driver_catalog::crypt32::Crypt32::new())),
        #[cfg(not(windows))]
        Some(Backend::Native) => bail!("the native backend is only available on Windows"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    serde_json::to_writer_pretty(stdout(), value)?;
    println!();
    Ok(())
}

fn dump(args: DumpArgs) -> Result<()> {
    let extractor = MetadataExtractor::new(load_query(args.backend)?);

    if args.raw {
        if !args.input.is_file() {
            bail!("--raw takes a single catalog file: {}", args.input.display());
        }
        let extensions = extractor
            .raw_extensions(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?;
        return print_json(&extensions);
    }

    let report = scan_path(&args.input, &extractor)?;
    print_json(&report.records)
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MatchOutput {
    raw_matched_hardware_id: String,
    display_matched_hardware_id: String,
}

fn match_ids(args: MatchArgs) -> Result<()> {
    let ids = HardwareIdSet::new(args.hardware_ids, Vec::<String>::new());
    let raw = pick_raw_matched_hardware_id(&args.signed, &ids.hardware_ids);
    let display = pick_display_matched_hardware_id(&raw, &ids.hardware_ids);

    print_json(&MatchOutput {
        raw_matched_hardware_id: raw,
        display_matched_hardware_id: display,
    })
}

fn enrich_devices(args: EnrichArgs) -> Result<()> {
    let file = File::open(&args.devices)
        .with_context(|| format!("couldn't open {}", args.devices.display()))?;
    let devices: Vec<DeviceInfo> =
        serde_json::from_reader(file).context("failed to parse device list")?;

    let extractor = MetadataExtractor::new(load_query(args.backend)?);
    let locator = CatalogLocator::new(args.catroot);
    debug!(
        devices = devices.len(),
        catroot = %locator.root().display(),
        "enriching devices"
    );

    let records = devices
        .into_iter()
        .map(|device| enrich(device, &locator, &extractor))
        .collect::<Vec<_>>();

    print_json(&records)
}
