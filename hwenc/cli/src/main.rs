use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{Receiver, unbounded};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hwenc_pipeline::sim::{SimulatedCodecFactory, SimulatedCodecOptions, SimulatedGpuContext};
use hwenc_pipeline::{
    BitrateAdjusterKind, CodecStatus, EncodeOutcome, EncodedImage, EncoderConfig,
    EncoderSettings, EncoderStats, FrameType, GpuContext, HardwareVideoEncoder,
};
use hwenc_types::VideoCodecType;

mod source;

use source::FrameSource;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecArg {
    Vp8,
    Vp9,
    H264,
    H265,
    Av1,
}

impl From<CodecArg> for VideoCodecType {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::Vp8 => Self::Vp8,
            CodecArg::Vp9 => Self::Vp9,
            CodecArg::H264 => Self::H264,
            CodecArg::H265 => Self::H265,
            CodecArg::Av1 => Self::Av1,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AdjusterArg {
    Base,
    Framerate,
    Dynamic,
}

impl From<AdjusterArg> for BitrateAdjusterKind {
    fn from(adjuster: AdjusterArg) -> Self {
        match adjuster {
            AdjusterArg::Base => Self::Base,
            AdjusterArg::Framerate => Self::Framerate,
            AdjusterArg::Dynamic => Self::Dynamic,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hwenc")]
#[command(about = "Encode synthetic video through the hardware encoder pipeline")]
struct Args {
    /// Frame width
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height
    #[arg(long, default_value = "480")]
    height: u32,

    /// Start bitrate in kbps
    #[arg(short, long, default_value = "300")]
    bitrate_kbps: u32,

    /// Capture framerate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Number of frames to submit
    #[arg(short = 'n', long, default_value = "300")]
    frames: u64,

    /// Codec, overrides the config file
    #[arg(short, long, value_enum)]
    codec: Option<CodecArg>,

    /// Bitrate adjuster, overrides the config file
    #[arg(long, value_enum)]
    adjuster: Option<AdjusterArg>,

    /// Encoder config as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Submit texture frames through the simulated GPU
    #[arg(long)]
    texture: bool,

    /// Device output size relative to the configured bitrate
    #[arg(long, default_value = "1.0")]
    overshoot: f64,

    /// Request a key frame every N frames
    #[arg(long)]
    key_frame_every: Option<u64>,

    /// Frame index at which the input resolution changes
    #[arg(long, requires = "resize_to")]
    resize_at: Option<u64>,

    /// New input resolution, as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    resize_to: Option<(u32, u32)>,

    /// Frame index at which the target bitrate changes
    #[arg(long, requires = "rate_to_kbps")]
    rate_at: Option<u64>,

    /// New target bitrate in kbps
    #[arg(long)]
    rate_to_kbps: Option<u32>,

    /// Write the encoded stream to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Submit frames as fast as possible instead of at the capture rate
    #[arg(long)]
    fast: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width = width.parse().map_err(|e| format!("invalid width: {e}"))?;
    let height = height.parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((width, height))
}

/**
    Totals of the stream that reached the callback.
*/
#[derive(Debug, Default, Serialize)]
struct StreamTotals {
    frames: u64,
    key_frames: u64,
    bytes: u64,
    last_capture_time_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Report {
    codec_name: String,
    texture_mode: bool,
    release_status: String,
    final_bitrate_bps: Option<u32>,
    elapsed_ms: u128,
    encoder: EncoderStats,
    stream: StreamTotals,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let codec_name = config.codec_name.clone();
    info!(
        "encoding {} frames of {}x{} as {} @ {} kbps",
        args.frames,
        args.width,
        args.height,
        config.codec_type.name(),
        args.bitrate_kbps
    );

    let factory = Arc::new(SimulatedCodecFactory::with_options(SimulatedCodecOptions {
        overshoot: args.overshoot,
        ..SimulatedCodecOptions::default()
    }));
    let gpu = args
        .texture
        .then(|| Arc::new(SimulatedGpuContext::new()) as Arc<dyn GpuContext>);

    let mut encoder = HardwareVideoEncoder::new(factory.clone(), config, gpu)?;

    let (tx, rx) = unbounded();
    let sink = spawn_sink(rx, args.output.as_deref())?;
    encoder.initialize(
        EncoderSettings::new(args.width, args.height, args.bitrate_kbps, args.fps),
        move |image: EncodedImage| {
            // The sink only goes away after the encoder is dropped
            let _ = tx.send(image);
        },
    )?;
    info!("using {}", encoder.implementation_name());

    let started = Instant::now();
    let result = submit_frames(&mut encoder, &args, started);

    let release = encoder.release();
    let release_status = CodecStatus::from_result(&release);
    if let Err(e) = &release {
        warn!("release failed: {e}");
    }
    let stats = encoder.stats();
    drop(encoder);

    let stream = match sink.join() {
        Ok(totals) => totals?,
        Err(_) => bail!("output sink panicked"),
    };
    result?;

    let report = Report {
        codec_name,
        texture_mode: args.texture,
        release_status: format!("{release_status:?}"),
        final_bitrate_bps: factory.last_codec().map(|codec| codec.bitrate_bps()),
        elapsed_ms: started.elapsed().as_millis(),
        encoder: stats,
        stream,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<EncoderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<EncoderConfig>(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => EncoderConfig::default(),
    };
    if let Some(codec) = args.codec {
        config.codec_type = codec.into();
    }
    if let Some(adjuster) = args.adjuster {
        config.bitrate_adjuster = adjuster.into();
    }
    if args.config.is_none() {
        config.codec_name = format!("sim.{}", config.codec_type.name().to_lowercase());
    }
    debug!("encoder config: {config:?}");
    Ok(config)
}

fn submit_frames(encoder: &mut HardwareVideoEncoder, args: &Args, started: Instant) -> Result<()> {
    let mut source = FrameSource::new(args.width, args.height, args.fps, args.texture);
    let frame_interval = Duration::from_secs(1) / args.fps.max(1);

    for index in 0..args.frames {
        if args.resize_at == Some(index) {
            if let Some((width, height)) = args.resize_to {
                info!("resizing input to {width}x{height} at frame {index}");
                source.resize(width, height);
            }
        }
        if args.rate_at == Some(index) {
            if let Some(kbps) = args.rate_to_kbps {
                info!("changing target bitrate to {kbps} kbps at frame {index}");
                encoder.set_rate_allocation(kbps.saturating_mul(1000), args.fps)?;
            }
        }

        let frame = source.next_frame()?;
        let key_frame = index == 0 || args.key_frame_every.is_some_and(|n| n > 0 && index % n == 0);
        let frame_types: &[FrameType] = if key_frame {
            &[FrameType::Key]
        } else {
            &[FrameType::Delta]
        };

        match encoder.encode(&frame, frame_types) {
            Ok(EncodeOutcome::Queued) => {}
            Ok(EncodeOutcome::Dropped(reason)) => debug!("frame {index} dropped: {reason:?}"),
            Err(e) => bail!("encoding frame {index} failed with status {:?}: {e}", e.status()),
        }

        if !args.fast {
            let due = started + frame_interval.mul_f64((index + 1) as f64);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }
    Ok(())
}

/**
    Collect encoded frames off the callback, optionally writing them out.

    Runs until every sender is gone, which happens once the encoder and its
    output thread are dropped.
*/
fn spawn_sink(
    rx: Receiver<EncodedImage>,
    output: Option<&Path>,
) -> Result<thread::JoinHandle<Result<StreamTotals>>> {
    let mut writer = match output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let handle = thread::Builder::new()
        .name("hwenc-sink".to_string())
        .spawn(move || -> Result<StreamTotals> {
            let mut totals = StreamTotals::default();
            for image in rx {
                totals.frames += 1;
                totals.bytes += image.len() as u64;
                if image.is_key_frame() {
                    totals.key_frames += 1;
                }
                totals.last_capture_time_ms = Some(image.capture_time_ms);
                if let Some(writer) = writer.as_mut() {
                    writer.write_all(&image.buffer)?;
                }
            }
            if let Some(writer) = writer.as_mut() {
                writer.flush()?;
            }
            Ok(totals)
        })?;
    Ok(handle)
}
