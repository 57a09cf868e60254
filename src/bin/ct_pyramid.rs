//! CLI demo harness for `ct_pyramid_core`.
//!
//! Stands in for the out-of-scope Qt shell: takes a directory and a few config knobs,
//! drives `build`/`crop`, and reports progress on the terminal. Not part of the library's
//! public contract (`SPEC_FULL.md` §6).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use ct_pyramid_core::{
    build, crop, BuildStatus, CancelToken, CropRequest, ProgressSink, PyramidConfig,
};

#[derive(Parser)]
#[command(name = "ct-pyramid", about = "CT image-stack thumbnail pyramid builder")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the thumbnail pyramid for a directory of slice images
    Build(BuildArgs),
    /// Crop the already-built minimum-level volume and save the middle Z slice as a PNG
    Crop(CropArgs),
}

#[derive(Parser)]
struct BuildArgs {
    directory: PathBuf,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, default_value_t = 512)]
    min_dim: u32,

    #[arg(long)]
    sample_size: Option<usize>,
}

#[derive(Parser)]
struct CropArgs {
    directory: PathBuf,

    #[arg(long)]
    z0: i64,
    #[arg(long)]
    z1: i64,
    #[arg(long, default_value_t = 0.0)]
    x0: f64,
    #[arg(long, default_value_t = 0.0)]
    y0: f64,
    #[arg(long, default_value_t = 1.0)]
    x1: f64,
    #[arg(long, default_value_t = 1.0)]
    y1: f64,

    #[arg(long, default_value = "crop.png")]
    out: PathBuf,
}

struct IndicatifSink {
    bar: ProgressBar,
}

impl ProgressSink for IndicatifSink {
    fn on_progress(&self, percent: u32, eta_seconds: Option<f64>, _message: &str) {
        self.bar.set_position(percent as u64);
        match eta_seconds {
            Some(eta) => self.bar.set_message(format!("ETA {eta:.0}s")),
            None => self.bar.set_message("estimating..."),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Crop(args) => run_crop(args),
    }
}

fn run_build(args: &BuildArgs) -> Result<()> {
    let config = PyramidConfig {
        worker_count: args.workers,
        min_dim: args.min_dim,
        sample_size_override: args.sample_size,
        ..Default::default()
    };

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}% {msg}")
            .context("invalid progress bar template")?
            .progress_chars("=> "),
    );
    let sink = Arc::new(IndicatifSink { bar: bar.clone() });
    let cancel = CancelToken::new();

    let status = build(&args.directory, &config, sink, cancel)
        .with_context(|| format!("building pyramid for {}", args.directory.display()))?;

    match status {
        BuildStatus::Completed(outcome) => {
            bar.finish_with_message("done");
            println!(
                "pyramid complete: {} level(s), minimum volume {}x{}x{}, elapsed {:.1}s",
                outcome.plan.levels.len(),
                outcome.minimum_volume.depth(),
                outcome.minimum_volume.height(),
                outcome.minimum_volume.width(),
                outcome.elapsed.as_secs_f64(),
            );
            for level in &outcome.plan.levels {
                println!(
                    "  level {}: {}x{} x{} slices (weight {:.4})",
                    level.level_index, level.width, level.height, level.slice_count, level.weight
                );
            }
        }
        BuildStatus::Cancelled => {
            bar.finish_with_message("cancelled");
            println!("build cancelled");
        }
    }
    Ok(())
}

fn run_crop(args: &CropArgs) -> Result<()> {
    let config = PyramidConfig::default();
    let status = build(
        &args.directory,
        &config,
        Arc::new(ct_pyramid_core::NoOpSink),
        CancelToken::new(),
    )
    .context("re-building pyramid to obtain minimum volume")?;

    let BuildStatus::Completed(outcome) = status else {
        anyhow::bail!("build was cancelled");
    };

    let cropped = crop(
        &outcome.minimum_volume,
        CropRequest {
            z_bottom: args.z0,
            z_top: args.z1,
            x0: args.x0,
            y0: args.y0,
            x1: args.x1,
            y1: args.y1,
        },
    )
    .context("invalid crop request")?;

    let (depth, height, width) = cropped.dim();
    let mid_z = depth / 2;
    let mut img = image::GrayImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            img.put_pixel(x as u32, y as u32, image::Luma([cropped[[mid_z, y, x]]]));
        }
    }
    img.save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!(
        "wrote middle Z slice ({}x{}) of cropped volume {:?} to {}",
        width,
        height,
        cropped.dim(),
        args.out.display()
    );
    Ok(())
}
