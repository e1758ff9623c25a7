//! relayd - frame relay daemon
//!
//! Drives the pipeline from synthetic `stub://` sources:
//! 1. Loads `RelayConfig` (file named by `FRAME_RELAY_CONFIG` plus env overrides)
//! 2. Starts the sink worker writing JSON lines to stdout or a file
//! 3. Pumps B-frame GOPs through the pipeline until done or Ctrl-C
//! 4. Ends every source and reports leaked frames

use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_relay::{
    spawn_sink, JsonLinesSink, Pipeline, RelayConfig, SyntheticConfig, SyntheticSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay synthetic video frames through the pipeline")]
struct Args {
    /// Synthetic source url; repeat for several sources.
    #[arg(long = "source", env = "FRAME_RELAY_SOURCE", default_value = "stub://cam-1")]
    sources: Vec<String>,

    /// GOPs to generate per source; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 4)]
    gops: u64,

    #[arg(long, default_value_t = 12)]
    gop_size: u32,

    #[arg(long, default_value_t = 2)]
    b_frames: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Pace generation at the configured frame rate.
    #[arg(long)]
    realtime: bool,

    /// Write sink messages here instead of stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = RelayConfig::load()?;

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
            anyhow!("failed to create output file {}: {}", path.display(), e)
        })?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let (sink, worker) = spawn_sink(JsonLinesSink::new(writer), config.sink.queue_length)?;
    let mut pipeline = Pipeline::from_config(&config, sink)?;

    let mut sources = args
        .sources
        .iter()
        .map(|url| {
            SyntheticSource::new(SyntheticConfig {
                url: url.clone(),
                width: args.width,
                height: args.height,
                fps: args.fps,
                gop_size: args.gop_size,
                b_frames: args.b_frames,
                ..SyntheticConfig::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "relayd running: {} sources, output mode {}",
        sources.len(),
        pipeline.mode().name()
    );
    let gop_duration = Duration::from_secs_f64(f64::from(args.gop_size) / f64::from(args.fps));
    let mut pumped = 0u64;
    while running.load(Ordering::SeqCst) && (args.gops == 0 || pumped < args.gops) {
        for source in sources.iter_mut() {
            source.pump_gop(&mut pipeline)?;
        }
        pumped += 1;
        if args.realtime {
            std::thread::sleep(gop_duration);
        }
    }
    if !running.load(Ordering::SeqCst) {
        log::info!("shutdown signal received, stopping sources...");
    }

    for source in &sources {
        let stats = source.stats();
        log::info!(
            "source {}: {} frames in {} gops",
            stats.source_id,
            stats.frames_generated,
            stats.gops
        );
    }
    let report = pipeline.shutdown()?;
    if !report.leaked_frames.is_empty() {
        log::warn!("{} frames were never emitted", report.leaked_frames.len());
    }
    let stats = worker.join()?;
    log::info!(
        "relayd stopped: {} messages ({} frames, {} end-of-stream)",
        stats.messages,
        stats.frames,
        stats.eos
    );
    Ok(())
}
