use clap::{Parser, Subcommand};
use chrono::{DateTime, FixedOffset};
use nfcwav::event::{Event, Span};
use nfcwav::recording::{ExtractOptions, Outcome, Recording};
use nfcwav::extract::DEFAULT_BLOCK_SIZE;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nfcwav", about = "Inspect, tag and cut RIFF/WAVE field recordings")]
struct Cli {
    /// Log chunk-level detail
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the chunk layout, format and GUANO metadata as JSON
    Info {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Cut one detection into its own file
    Clip {
        input: PathBuf,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        stop: f64,
        /// RFC 3339 wall-clock time of the detection
        #[arg(long)]
        timestamp: DateTime<FixedOffset>,
        #[arg(long)]
        engine: String,
        #[arg(long)]
        species: String,
        #[command(flatten)]
        clip: ClipArgs,
    },
    /// Cut every detection listed in a JSON array of events
    Clips {
        input: PathBuf,
        #[arg(short, long)]
        events: PathBuf,
        #[command(flatten)]
        clip: ClipArgs,
    },
    /// Write a single channel to a new mono file
    Channel {
        input: PathBuf,
        #[arg(short, long)]
        channel: u16,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        force: bool,
    },
    /// Rewrite the file with edited GUANO metadata
    Tag {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// KEY=VALUE, KEY may be namespaced as NS|KEY
        #[arg(short, long)]
        set: Vec<String>,
        #[arg(short, long)]
        remove: Vec<String>,
    },
    /// Reconstruct the file chunk by chunk without changes
    Rewrite {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct ClipArgs {
    #[arg(short = 'C', long, default_value = "clips")]
    clip_dir: PathBuf,
    /// Target clip length in seconds
    #[arg(short, long, default_value = "5.0")]
    length: f64,
    /// Streaming block size in KiB
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE / 1024)]
    block_size: usize,
    /// Overwrite clips that already exist
    #[arg(short, long)]
    force: bool,
}

impl ClipArgs {
    fn options(&self) -> ExtractOptions {
        ExtractOptions {
            clip_length: self.length,
            force:       self.force,
            block_size:  self.block_size * 1024,
            ..ExtractOptions::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, env.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let mut failed = 0usize;
            for path in &input {
                match Recording::open(path).and_then(|rec| {
                    let json = serde_json::to_string_pretty(&rec.summary()?)?;
                    Ok(json)
                }) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!(file = %path.display(), error = %e, "skipping");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} of {} file(s) could not be parsed", input.len()).into());
            }
        }

        // ── Clip ─────────────────────────────────────────────────────────────
        Commands::Clip { input, start, stop, timestamp, engine, species, clip } => {
            let rec = Recording::open(&input)?;
            let event = Event {
                span: Span::new(start, stop)?,
                timestamp,
                engine,
                species_code: species,
            };
            report(rec.extract_event(&event, &clip.clip_dir, &clip.options())?);
        }

        // ── Clips ────────────────────────────────────────────────────────────
        Commands::Clips { input, events, clip } => {
            let rec = Recording::open(&input)?;
            let events: Vec<Event> = serde_json::from_str(&std::fs::read_to_string(&events)?)?;
            let opts = clip.options();
            info!(file = %input.display(), events = events.len(), "extracting clips");

            #[cfg(feature = "parallel")]
            let results: Vec<_> = {
                use rayon::prelude::*;
                events.par_iter().map(|ev| rec.extract_event(ev, &clip.clip_dir, &opts)).collect()
            };
            #[cfg(not(feature = "parallel"))]
            let results: Vec<_> = events.iter().map(|ev| rec.extract_event(ev, &clip.clip_dir, &opts)).collect();

            let mut failed = 0usize;
            for (ev, result) in events.iter().zip(results) {
                match result {
                    Ok(outcome) => report(outcome),
                    Err(e) => {
                        error!(species = %ev.species_code, start = ev.span.start, error = %e, "clip failed");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} of {} clip(s) failed", events.len()).into());
            }
        }

        // ── Channel ──────────────────────────────────────────────────────────
        Commands::Channel { input, channel, output, force } => {
            let rec = Recording::open(&input)?;
            let opts = ExtractOptions { force, ..ExtractOptions::default() };
            report(rec.extract_channel(channel, &output, &opts)?);
        }

        // ── Tag ──────────────────────────────────────────────────────────────
        Commands::Tag { input, output, set, remove } => {
            let edits = set
                .iter()
                .map(|kv| kv.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{kv}'")))
                .collect::<Result<Vec<_>, _>>()?;
            let rec = Recording::open(&input)?;
            let written = rec.retag(&output, |meta| {
                for key in &remove {
                    meta.remove(key);
                }
                for (key, value) in &edits {
                    meta.set(key, *value);
                }
            })?;
            println!("Tagged → {} ({} bytes)", output.display(), written.bytes_written);
        }

        // ── Rewrite ──────────────────────────────────────────────────────────
        Commands::Rewrite { input, output } => {
            let rec = Recording::open(&input)?;
            let written = rec.rewrite(&output)?;
            println!("Rewrote → {} ({} chunks, {} bytes)",
                     output.display(), written.index.len() - 1, written.bytes_written);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// `RUST_LOG` directives when set and valid, `info` otherwise; `-v` adds
/// `debug` on top.
fn log_filter(verbose: bool, env: Option<&str>) -> EnvFilter {
    let filter = env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    if verbose {
        filter.add_directive(tracing::Level::DEBUG.into())
    } else {
        filter
    }
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Written(r, path) => println!(
            "  wrote    {}  ({} data bytes, {} blocks)",
            path.display(), r.data_bytes, r.blocks
        ),
        Outcome::Skipped(path) => println!("  exists   {}", path.display()),
    }
}
