use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gencam_core::{Camera, Roi};
use gencam_hw::SimCamera;

#[derive(Parser)]
#[command(name = "gencam", about = "Machine-vision camera control CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached capture devices
    List {
        #[arg(long)]
        json: bool,
    },
    /// Capture a single frame to a PNG file
    Capture {
        /// Feature file applied onto the device's node map
        #[arg(short, long)]
        config: PathBuf,
        /// Output image path
        #[arg(short, long)]
        output: PathBuf,
        /// Use the simulated camera instead of real hardware
        #[arg(long)]
        sim: bool,
    },
    /// Set or maximize the capture region, then print it
    Roi {
        /// Feature file applied onto the device's node map
        #[arg(short, long)]
        config: PathBuf,
        /// Grow the region to the full sensor
        #[arg(long, conflicts_with_all = ["width", "height", "offset_x", "offset_y"])]
        max: bool,
        #[arg(long)]
        width: Option<i64>,
        #[arg(long)]
        height: Option<i64>,
        #[arg(long)]
        offset_x: Option<i64>,
        #[arg(long)]
        offset_y: Option<i64>,
        /// Use the simulated camera instead of real hardware
        #[arg(long)]
        sim: bool,
    },
}

fn open(sim: bool, config: &Path) -> Result<Camera> {
    let camera = if sim {
        Camera::with_device(Box::new(SimCamera::new()), config)
    } else {
        Camera::open_first(config)
    };
    camera.context("failed to open camera")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { json } => {
            let devices = gencam_hw::v4l2::enumerate();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no capture devices found");
            } else {
                for dev in devices {
                    println!("{}  {} ({})", dev.id, dev.model, dev.driver);
                }
            }
        }
        Commands::Capture {
            config,
            output,
            sim,
        } => {
            let mut camera = open(sim, &config)?;
            camera.start()?;
            let result = camera.capture_png(&output).context("capture failed");
            camera.stop()?;
            camera.close()?;
            result?;
            println!("wrote {}", output.display());
        }
        Commands::Roi {
            config,
            max,
            width,
            height,
            offset_x,
            offset_y,
            sim,
        } => {
            let mut camera = open(sim, &config)?;
            if max {
                camera.max_roi().context("failed to maximize region")?;
            } else {
                let current = camera.roi()?;
                camera
                    .set_roi(Roi {
                        width: width.unwrap_or(current.width),
                        height: height.unwrap_or(current.height),
                        offset_x: offset_x.unwrap_or(current.offset_x),
                        offset_y: offset_y.unwrap_or(current.offset_y),
                    })
                    .context("failed to set region")?;
            }
            let roi = camera.roi()?;
            println!(
                "{}x{}+{}+{}",
                roi.width, roi.height, roi.offset_x, roi.offset_y
            );
            camera.close()?;
        }
    }

    Ok(())
}
