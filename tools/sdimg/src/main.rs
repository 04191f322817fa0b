mod disk;
mod image;
mod logging;

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sdcard::SECTOR_SIZE;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{image::Image, logging::Logger};

#[derive(Debug, Parser)]
#[command(name = "sdimg", about = "Inspect and edit cartridge SD card images")]
struct Cli {
    /// Raw card image (MBR-partitioned or a bare FAT32 volume).
    #[arg(long, global = true, default_value = "card.img")]
    image: PathBuf,
    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show volume geometry and label.
    Info,
    /// List a folder, optionally one page at a time.
    Ls(LsArgs),
    /// Copy a file out of the image.
    Cat(CatArgs),
    /// Copy a host file into the image.
    Put(PutArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Info => "info",
            Commands::Ls(_) => "ls",
            Commands::Cat(_) => "cat",
            Commands::Put(_) => "put",
        }
    }
}

#[derive(Debug, Args)]
struct LsArgs {
    /// Folder path from the root, `/`-separated.
    #[arg(default_value = "")]
    folder: String,
    #[arg(long)]
    page: Option<usize>,
    #[arg(long, default_value_t = sdcart::config::PAGE_SIZE)]
    page_size: u16,
}

#[derive(Debug, Args)]
struct CatArgs {
    path: String,
    /// Write here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PutArgs {
    src: PathBuf,
    /// Destination folder path from the root.
    #[arg(long, default_value = "")]
    folder: String,
    /// Name to store under; defaults to the source file name.
    #[arg(long)]
    name: Option<String>,
}

fn print_json<T: Serialize>(logger: &Logger, value: &T) -> Result<()> {
    logger.line(serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one command and returns its report for the event log.
fn execute(cli: &Cli, logger: &Logger) -> Result<Value> {
    match &cli.command {
        Commands::Info => {
            let info = Image::open(&cli.image, false)?.info()?;
            if cli.json {
                print_json(logger, &info)?;
            } else {
                logger.line(format!("label:        {}", info.label));
                logger.line(format!("partition:    {}", info.partition_start));
                logger.line(format!(
                    "clusters:     {} x {} bytes",
                    info.max_cluster.saturating_sub(1),
                    info.sectors_per_cluster as usize * SECTOR_SIZE
                ));
                logger.line(format!(
                    "fats:         {} x {} sectors",
                    info.fat_count, info.sectors_per_fat
                ));
                logger.line(format!("root cluster: {}", info.root_cluster));
                logger.line(format!("capacity:     {} bytes", info.capacity_bytes));
            }
            Ok(serde_json::to_value(&info)?)
        }
        Commands::Ls(args) => {
            let mut image = Image::open(&cli.image, false)?;
            let listing = image.list(&args.folder, args.page_size, args.page)?;
            if cli.json {
                print_json(logger, &listing)?;
            } else {
                for entry in &listing.entries {
                    if entry.is_dir {
                        logger.line(format!("{:>4}  <DIR>       {}", entry.index, entry.name));
                    } else {
                        logger.line(format!(
                            "{:>4}  {:>10}  {}",
                            entry.index, entry.size, entry.name
                        ));
                    }
                }
                if let Some(page) = listing.page {
                    logger.line(format!("page {page}/{}", listing.pages));
                }
                logger.line(format!(
                    "{} file(s), {} bytes",
                    listing.files, listing.total_bytes
                ));
            }
            Ok(json!({
                "folder": listing.folder,
                "page": listing.page,
                "entries": listing.entries.len(),
            }))
        }
        Commands::Cat(args) => {
            let mut image = Image::open(&cli.image, false)?;
            let data = image.read_file(&args.path)?;
            match &args.out {
                Some(out) => {
                    fs::write(out, &data)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    logger.line(format!("{} bytes -> {}", data.len(), out.display()));
                }
                None => io::stdout().write_all(&data)?,
            }
            Ok(json!({ "path": args.path, "bytes": data.len() }))
        }
        Commands::Put(args) => {
            let data = fs::read(&args.src)
                .with_context(|| format!("failed to read {}", args.src.display()))?;
            let name = match &args.name {
                Some(name) => name.clone(),
                None => args
                    .src
                    .file_name()
                    .and_then(|name| name.to_str())
                    .context("source path has no usable file name")?
                    .to_owned(),
            };
            let mut image = Image::open(&cli.image, true)?;
            let report = image.put_file(&args.folder, &name, &data)?;
            if !report.name.eq_ignore_ascii_case(&name) {
                logger.warn(format!("stored {name} as {}", report.name));
            }
            if cli.json {
                print_json(logger, &report)?;
            } else {
                logger.line(format!(
                    "{} bytes -> {} (cluster {})",
                    report.size, report.name, report.cluster
                ));
            }
            Ok(serde_json::to_value(&report)?)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut logger = Logger::from_env(&cli.image)?;
    let op = cli.command.name();
    match execute(&cli, &logger) {
        Ok(detail) => {
            logger.record(op, true, detail);
            Ok(())
        }
        Err(err) => {
            logger.record(op, false, json!(format!("{err:#}")));
            Err(err)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
