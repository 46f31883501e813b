use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use frame_pipeline::error::classify;
use frame_pipeline::{
    BufferShape, FramePipelineBuilder, FrameSource, LoggingSink, PipelineConfig, PixelLayout,
    Retryable, SubmitError, TestPatternSource,
};
use tracing_subscriber::EnvFilter;

/// Drive a synthetic test pattern through the frame pipeline and report delivery stats.
#[derive(Parser, Debug)]
#[command(name = "framepipe")]
#[command(about = "🎞️ Push synthetic frames through a bounded, paced delivery pipeline")]
#[command(long_about = "Runs a test-pattern producer against the frame pipeline and prints
pool, queue and pacing statistics. Useful for tuning queue capacity, drop threshold and
target rate before wiring in a real decoder and renderer.")]
struct Args {
    /// JSON config file; flags override its values
    #[arg(short, long, help = "Pipeline config file (JSON)")]
    config: Option<String>,

    /// How long to run (supports seconds, minutes, hours)
    #[arg(short, long, default_value = "5s",
          help = "How long to run: 30s (30 seconds), 2m (2 minutes), 1h (1 hour)")]
    duration: String,

    /// Render rate
    #[arg(short = 'f', long, help = "Target render rate in frames per second")]
    fps: Option<f64>,

    /// Producer rate
    #[arg(long, default_value_t = 30.0,
          help = "Rate at which the producer submits frames (set above --fps to exercise dropping)")]
    producer_fps: f64,

    #[arg(long, help = "Queue capacity in frames")]
    capacity: Option<usize>,

    #[arg(long, help = "Fill ratio in (0, 1] at which submissions start dropping")]
    drop_threshold: Option<f64>,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value = "yuv420p",
          help = "Pixel layout: yuv420p, yuv422p, yuv444p, nv12, nv21, rgb24, bgr24, rgba, bgra")]
    layout: String,

    #[arg(long, help = "Render as fast as frames arrive")]
    no_pacing: bool,

    #[arg(long, help = "Block producers instead of dropping frames when the queue is nearly full")]
    no_drop: bool,

    #[arg(short, long, help = "Log every rendered frame")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;
    let run_for = Duration::from_secs(parse_duration(&args.duration)? as u64);
    let layout: PixelLayout = args.layout.parse().map_err(anyhow::Error::msg)?;
    let shape = BufferShape::new(args.width, args.height, layout);

    if !(args.producer_fps.is_finite() && args.producer_fps > 0.0) {
        anyhow::bail!("Producer rate must be greater than 0");
    }

    tracing::info!(
        %shape,
        bytes = shape.byte_len(),
        run_secs = run_for.as_secs(),
        "Starting frame pipeline"
    );

    let pipeline = Arc::new(
        FramePipelineBuilder::new()
            .config(config.clone())
            .sink(LoggingSink::new("display").with_report_interval(config.target_rate.ceil() as u64))
            .build()?,
    );
    let pool = pipeline.pool().context("pipeline has no buffer pool")?;
    pipeline.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let pipeline = Arc::clone(&pipeline);
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        let interval = Duration::from_secs_f64(1.0 / args.producer_fps);
        let mut source = TestPatternSource::new(shape, args.producer_fps.round().max(1.0) as u32);

        thread::Builder::new()
            .name("framepipe-producer".to_string())
            .spawn(move || {
                let mut exhausted = 0u64;
                let mut rejected = 0u64;
                let mut next = Instant::now();
                while running.load(Ordering::Relaxed) {
                    match source.next_frame(&pool) {
                        Ok(frame) => match pipeline.submit(frame, Some(interval)) {
                            Ok(_) => {}
                            Err(SubmitError::Stopped(frame)) | Err(SubmitError::NotRunning(frame)) => {
                                let _ = pool.release(frame);
                                break;
                            }
                            Err(err) => {
                                rejected += 1;
                                let _ = pool.release(err.into_frame());
                            }
                        },
                        Err(e) => {
                            exhausted += 1;
                            if classify::is_transient(&e) {
                                tracing::debug!(error = %e, "Producer could not allocate a frame");
                            } else {
                                tracing::warn!(error = %e, "Producer could not allocate a frame");
                            }
                            if let Some(delay) = e.retry_delay_ms() {
                                thread::sleep(Duration::from_millis(delay));
                            }
                        }
                    }
                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                (source.frames_produced(), exhausted, rejected)
            })
            .context("failed to spawn producer thread")?
    };

    thread::sleep(run_for);
    running.store(false, Ordering::Relaxed);
    let (produced, exhausted, rejected) = producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    if let Err(e) = pipeline.stop() {
        if !classify::is_fatal(&e) {
            return Err(e.into());
        }
        tracing::error!(error = %e, "Consumer did not shut down cleanly, results are partial");
    }

    let stats = pipeline.stats();
    let pool_stats = pool.stats();
    println!();
    println!("Results:");
    println!("───────────");
    println!("Frames produced:      {}", produced);
    println!("Submitted / queued:   {}", stats.total_submitted);
    println!("Dropped at submit:    {}", stats.total_dropped);
    println!("Rejected (timeout):   {}", rejected);
    println!("Pool exhausted:       {}", exhausted);
    println!("Rendered:             {}", stats.total_rendered);
    println!("Render failures:      {}", stats.render_failures);
    println!("Late ticks:           {}", stats.late_ticks);
    println!(
        "Render rate:          {:.2} fps (target {:.2})",
        stats.current_rate, stats.target_rate
    );
    println!(
        "Pool:                 {} buffers, {} in use, peak {}",
        pool_stats.total, pool_stats.in_use, pool_stats.peak
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Loads the config file, if any, then applies flag overrides.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.target_rate = fps;
    }
    if let Some(capacity) = args.capacity {
        config.queue_capacity = capacity;
    }
    if let Some(threshold) = args.drop_threshold {
        config.drop_threshold = threshold;
    }
    if args.no_pacing {
        config.pacing_enabled = false;
    }
    if args.no_drop {
        config.drop_policy_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

/// Parse duration string like "30s", "2m", "1h" into seconds
fn parse_duration(duration: &str) -> Result<u32> {
    if let Ok(seconds) = duration.parse::<u32>() {
        return Ok(seconds);
    }

    let (num_str, multiplier) = if let Some(n) = duration.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = duration.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = duration.strip_suffix('h') {
        (n, 3600)
    } else {
        return Err(anyhow::anyhow!(
            "Invalid duration unit in '{}'. Use 's' for seconds, 'm' for minutes, 'h' for hours",
            duration
        ));
    };

    let num: u32 = num_str
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid number in duration: {}", num_str))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration too long: {}", duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration("45s").unwrap(), 45);
        assert_eq!(parse_duration("2m").unwrap(), 120);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert!(parse_duration("x").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_odd_input_without_panicking() {
        assert!(parse_duration("5é").is_err());
        assert!(parse_duration("é").is_err());
        assert!(parse_duration("4000000h").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "framepipe",
            "--fps",
            "60",
            "--capacity",
            "4",
            "--no-drop",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.target_rate, 60.0);
        assert_eq!(config.queue_capacity, 4);
        assert!(!config.drop_policy_enabled);
        assert!(config.pacing_enabled);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["framepipe", "--drop-threshold", "1.5"]);
        assert!(build_config(&args).is_err());
    }
}
