mod apply;
mod buffer;
mod error;
mod ips;
mod patch_format;
mod rom;
mod ups;
mod util;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use crate::apply::{ApplyOutcome, PatchOptions};
use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::patch_format::PatchInfo;

#[derive(Parser)]
#[command(name = "rompatch", about = "Apply IPS and UPS patches to ROM images")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Size of the patch read buffer in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY, global = true,
          value_parser = parse_buffer_size)]
    buffer_size: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch to a ROM
    Apply {
        /// Path to the ROM image
        #[arg(long)]
        rom: PathBuf,
        /// Path to the patch file (defaults to <rom>.ips, then <rom>.ups)
        #[arg(long, short)]
        patch: Option<PathBuf>,
        /// Output path for the patched ROM (defaults to <rom>.patched.<ext>)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Identify a patch file's format
    Detect {
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
    },
    /// Patch every ROM in a directory that has a matching patch next to it
    Batch {
        /// Directory to scan
        #[arg(long)]
        dir: PathBuf,
        /// ROM file extension to look for
        #[arg(long, default_value = "gba")]
        extension: String,
        /// Overwrite each ROM instead of writing <rom>.patched.<ext>
        #[arg(long)]
        in_place: bool,
    },
}

fn parse_buffer_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("{e}"))?;
    if size == 0 {
        return Err("buffer size must be at least 1".to_string());
    }
    Ok(size)
}

fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    match (verbose, quiet) {
        (0, true) => log::LevelFilter::Error,
        (0, false) => log::LevelFilter::Warn,
        (1, _) => log::LevelFilter::Info,
        (2, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// `RUST_LOG` wins when set; otherwise the level comes from `-v`/`-q`.
fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();
}

fn print_outcome(outcome: &ApplyOutcome) {
    match outcome {
        ApplyOutcome::Patched {
            summary,
            output,
            hash,
        } => {
            println!("\n{} patch applied successfully!", summary.format);
            println!("  Records: {}", summary.records);
            println!("  Bytes written: {}", summary.bytes_written);
            println!(
                "  ROM size: 0x{:X} -> 0x{:X}",
                summary.rom_size_before, summary.rom_size_after
            );
            println!("  Output: {}", output.display());
            println!("  BLAKE3: {}", util::hex(hash));
        }
        ApplyOutcome::Skipped => {
            println!("\nPatch is not valid! Skipping...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let options = PatchOptions {
        buffer_capacity: cli.buffer_size,
    };

    match cli.command {
        Commands::Apply { rom, patch, output } => {
            let patch = match patch {
                Some(p) => p,
                None => util::find_sibling_patch(&rom).with_context(|| {
                    format!("No .ips or .ups patch found next to {}", rom.display())
                })?,
            };
            let output = output.unwrap_or_else(|| util::default_output_path(&rom));

            println!("Applying patch...");
            println!("  ROM: {}", rom.display());
            println!("  Patch: {}", patch.display());

            let start = Instant::now();
            let outcome = apply::apply_patch_file(&rom, &patch, &output, options).await?;
            let elapsed = start.elapsed();

            print_outcome(&outcome);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Detect { patch } => {
            let mut file = std::fs::File::open(&patch)
                .with_context(|| format!("Failed to open patch: {}", patch.display()))?;
            let info = match apply::detect_patch(&mut file, &options) {
                Ok(info) => info,
                Err(e) if e.is_invalid_patch() => {
                    bail!("{}: not an IPS or UPS patch", patch.display())
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e))
                        .with_context(|| format!("Failed to read patch: {}", patch.display()))
                }
            };
            println!("{}: {} patch", patch.display(), info.format());
            if let PatchInfo::Ups {
                base_size,
                patched_size,
            } = info
            {
                println!("  Base size:    0x{base_size:X}");
                println!("  Patched size: 0x{patched_size:X}");
            }
        }
        Commands::Batch {
            dir,
            extension,
            in_place,
        } => {
            let entries = util::scan_roms(&dir, &extension)?;
            println!(
                "Found {} ROM(s) with patches in {}",
                entries.len(),
                dir.display()
            );

            let start = Instant::now();
            let (mut patched, mut skipped, mut failed) = (0usize, 0usize, 0usize);

            for entry in &entries {
                let output = if in_place {
                    entry.rom_path.clone()
                } else {
                    util::default_output_path(&entry.rom_path)
                };
                match apply::apply_patch_file(&entry.rom_path, &entry.patch_path, &output, options)
                    .await
                {
                    Ok(ApplyOutcome::Patched { summary, .. }) => {
                        patched += 1;
                        println!(
                            "  patched  {} ({}, {} records)",
                            entry.rom_path.display(),
                            summary.format,
                            summary.records
                        );
                    }
                    Ok(ApplyOutcome::Skipped) => {
                        skipped += 1;
                        println!("  skipped  {} (patch is not valid)", entry.rom_path.display());
                    }
                    Err(e) => {
                        failed += 1;
                        log::error!("{e:#}");
                        println!("  failed   {}", entry.rom_path.display());
                    }
                }
            }

            println!("\nBatch complete!");
            println!("  Patched: {patched}");
            println!("  Skipped: {skipped}");
            println!("  Failed: {failed}");
            println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());

            if failed > 0 {
                bail!("{failed} ROM(s) failed to patch");
            }
        }
    }

    Ok(())
}
