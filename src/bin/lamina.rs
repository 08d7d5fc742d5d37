use std::path::PathBuf;

use anyhow::{anyhow, Context as _};
use clap::{Args, Parser, Subcommand};

use lamina::{CompositeJob, JobEvent, JobHandle, OutputFormat, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "lamina", version, about = "Batch layered alpha compositor")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite every common key from a source tree into an export folder.
    Run(RunArgs),
    /// Resolve layer key maps and print the common-key set without writing
    /// any images.
    Keys(KeysArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Layer stack config JSON (a top-level array of layer objects).
    #[arg(long)]
    config: PathBuf,

    /// Source root scanned (recursively) for layer images.
    #[arg(long)]
    source: PathBuf,

    /// Export root for composited outputs.
    #[arg(long)]
    out: PathBuf,

    /// Target canvas width in pixels.
    #[arg(long, default_value_t = 4096)]
    width: u32,

    /// Target canvas height in pixels.
    #[arg(long, default_value_t = 2048)]
    height: u32,

    /// Output format: jpg or png.
    #[arg(long, default_value = "jpg")]
    format: OutputFormat,

    /// JPEG quality / PNG compression driver, 0-100.
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// Append this suffix to every output filename stem.
    #[arg(long)]
    suffix: Option<String>,

    /// Mirror the parent source file's subdirectory under the export root.
    #[arg(long)]
    preserve_structure: bool,
}

#[derive(Args, Debug)]
struct KeysArgs {
    /// Layer stack config JSON (a top-level array of layer objects).
    #[arg(long)]
    config: PathBuf,

    /// Source root scanned (recursively) for layer images.
    #[arg(long)]
    source: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Keys(args) => cmd_keys(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let layers = lamina::load_layer_stack(&args.config)?;
    let job = CompositeJob {
        layers,
        target_width: args.width,
        target_height: args.height,
        output_format: args.format,
        quality: args.quality,
        suffix: args.suffix,
        preserve_structure: args.preserve_structure,
    };
    job.validate().context("invalid job configuration")?;

    let (handle, events) = JobHandle::channel();
    let worker = {
        let job = job.clone();
        let source = args.source.clone();
        let out = args.out.clone();
        let handle = handle.clone();
        std::thread::spawn(move || lamina::run(&job, &source, &out, &handle))
    };
    // Drop the local clone so the event stream ends when the worker's does.
    drop(handle);

    for event in events {
        match event {
            JobEvent::Log(line) => println!("{line}"),
            JobEvent::Finished(summary) => match summary.outcome {
                RunOutcome::Completed | RunOutcome::Stopped => println!(
                    "Processed composites for {} key(s): {} written, {} failed.",
                    summary.keys_total, summary.written, summary.failed
                ),
                RunOutcome::NoParentImages => {
                    println!("No images found for the parent layer; nothing to do.")
                }
                RunOutcome::NoCommonKeys => {
                    println!("No composite entries found where all layers are available.")
                }
            },
            JobEvent::Failed(msg) => eprintln!("Job failed: {msg}"),
        }
    }

    let summary = worker
        .join()
        .map_err(|_| anyhow!("composite worker panicked"))??;
    if summary.written > 0 {
        println!("Output saved in: {}", args.out.display());
    }
    Ok(())
}

fn cmd_keys(args: KeysArgs) -> anyhow::Result<()> {
    let layers = lamina::load_layer_stack(&args.config)?;
    // Canvas/output options are irrelevant for resolution; use placeholders.
    let job = CompositeJob {
        layers,
        target_width: 1,
        target_height: 1,
        output_format: OutputFormat::Png,
        quality: 80,
        suffix: None,
        preserve_structure: false,
    };
    job.validate().context("invalid job configuration")?;

    let resolved = lamina::resolve_layers(&job, &args.source)?;
    for (layer, map) in job.layers.iter().zip(&resolved.mains) {
        println!(
            "layer '{}' ({}): {} key(s)",
            layer.name,
            layer.main_mode.as_str(),
            map.len()
        );
        for (key, path) in map {
            println!("  {key} -> {}", path.display());
        }
    }

    let common = lamina::common_keys(&resolved);
    println!("common keys ({}):", common.len());
    for key in &common {
        println!("  {key}");
    }
    Ok(())
}
