use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use bmpshot_core::config::CaptureConfig;
use bmpshot_core::driver::{Driver, RunReport};
use bmpshot_platform::screen::FrameCapturer;

/// Process exit status when configuration or backend setup fails
const EXIT_FATAL: u8 = 2;
/// Process exit status when at least one frame failed
const EXIT_FRAME_FAILURES: u8 = 1;
/// Process exit status when every frame was saved
const EXIT_OK: u8 = 0;

#[derive(Parser, Debug)]
#[command(name = "bmpshot")]
#[command(about = "Capture a burst of full-screen screenshots as 24-bit .bmp files")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "BMPSHOT_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Capture rectangle width in pixels
    #[arg(long, env = "BMPSHOT_WIDTH")]
    width: Option<u32>,

    /// Capture rectangle height in pixels
    #[arg(long, env = "BMPSHOT_HEIGHT")]
    height: Option<u32>,

    /// Number of screenshots to take
    #[arg(long, env = "BMPSHOT_FRAMES")]
    frames: Option<u32>,

    /// Number of concurrent capture workers
    #[arg(long, env = "BMPSHOT_WORKERS")]
    workers: Option<usize>,

    /// Directory the .bmp files are written to
    #[arg(long, env = "BMPSHOT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save_config: bool,

    /// Wait for Enter before exiting
    #[arg(long, env = "BMPSHOT_PAUSE")]
    pause: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BMPSHOT_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        "bmpshot v{} starting (os={}, arch={})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );

    let pause = cli.pause;
    let status = match run(cli).await {
        Ok(report) => {
            print_summary(&report);
            ExitCode::from(exit_status(&report))
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    };

    if pause {
        wait_for_enter().await;
    }
    status
}

async fn run(cli: Cli) -> Result<RunReport> {
    let config_path = cli
        .config_path
        .unwrap_or_else(CaptureConfig::default_path);

    let mut config = if config_path.exists() {
        info!("loading config from {}", config_path.display());
        CaptureConfig::load(&config_path)?
    } else {
        CaptureConfig::default()
    };

    // CLI args override config file
    if let Some(width) = cli.width {
        config.width = width;
    }
    if let Some(height) = cli.height {
        config.height = height;
    }
    if let Some(frames) = cli.frames {
        config.frame_count = frames;
    }
    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    config.validate().context("invalid capture configuration")?;

    if cli.save_config {
        config.save(&config_path)?;
        info!("config saved to {}", config_path.display());
    }

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let capturer: Arc<dyn FrameCapturer> = Arc::from(create_frame_capturer()?);
    let driver = Driver::new(config, capturer).context("invalid capture configuration")?;
    Ok(driver.run().await)
}

#[cfg(target_os = "linux")]
fn create_frame_capturer() -> Result<Box<dyn FrameCapturer>> {
    bmpshot_linux::screen::create_frame_capturer()
}

#[cfg(target_os = "windows")]
fn create_frame_capturer() -> Result<Box<dyn FrameCapturer>> {
    bmpshot_windows::screen::create_frame_capturer()
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn create_frame_capturer() -> Result<Box<dyn FrameCapturer>> {
    anyhow::bail!("screen capture is not supported on {}", std::env::consts::OS)
}

fn exit_status(report: &RunReport) -> u8 {
    if report.is_success() {
        EXIT_OK
    } else {
        EXIT_FRAME_FAILURES
    }
}

fn print_summary(report: &RunReport) {
    for failure in &report.failures {
        eprintln!(
            "frame {} failed ({}): {}",
            failure.index, failure.kind, failure.message
        );
    }
    println!(
        "----------------------time of {} screenshots----------------------",
        report.frame_count
    );
    println!("{} milliseconds", report.elapsed.as_millis());
    if !report.is_success() {
        println!(
            "{} of {} frames failed",
            report.failures.len(),
            report.frame_count
        );
    }
}

async fn wait_for_enter() {
    println!("press Enter to exit...");
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        error!("failed to read from stdin: {}", e);
    }
}
