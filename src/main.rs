use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::LevelFilter;

use motion_blobs::config::*;
use motion_blobs::export::TrackWriter;
use motion_blobs::pipeline::{Pipeline, TickObserver};
use motion_blobs::preview::{PreviewPublisher, RerunRecorder};
use motion_blobs::synthetic::SyntheticSource;
use motion_blobs::video::*;

#[derive(Parser)]
#[clap(about = "Track moving blobs in a video and render them")]
pub struct Args {
    /// Input video
    #[clap(short, long, required_unless_present = "synthetic")]
    pub input: Option<PathBuf>,
    /// Output video
    #[clap(short, long)]
    pub output: PathBuf,
    /// Use generated moving discs instead of an input video
    #[clap(long, conflicts_with = "input")]
    pub synthetic: bool,
    #[clap(long, default_value = "300")]
    pub synthetic_frames: usize,
    #[clap(long, default_value = "6")]
    pub synthetic_blobs: usize,
    /// Write the tracked objects of every frame as JSON lines
    #[clap(long)]
    pub tracks_json: Option<PathBuf>,
    /// Save previews to a rerun recording (.rrd)
    #[clap(long)]
    pub recording: Option<PathBuf>,
    #[clap(short, long)]
    pub verbose: bool,
    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    args.config.validate()?;

    // setup logging
    let level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .with(level)
        .init();

    let mut pipeline = Pipeline::new(&args.config)?;

    // stop after the current frame on Ctrl-C
    let cancel = Arc::new(AtomicBool::new(false));
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        info!("stopping after the current frame");
        c.store(true, Ordering::SeqCst);
    })
    .context("failed to set Ctrl-C handler")?;

    // open source and sink
    let mut video_source;
    let mut synthetic_source;
    let (source, info): (&mut dyn FrameSource, VideoInfo) = match (&args.input, args.synthetic) {
        (_, true) => {
            synthetic_source = SyntheticSource::new(
                640,
                480,
                args.synthetic_frames,
                args.synthetic_blobs,
                args.config.seed,
            );
            let (width, height) = synthetic_source.size();
            let info = VideoInfo {
                width,
                height,
                fps: 30.,
                frame_count: Some(args.synthetic_frames),
            };
            (&mut synthetic_source, info)
        }
        (Some(input), false) => {
            video_source = VideoSource::open(input)?;
            let info = *video_source.info();
            (&mut video_source, info)
        }
        (None, false) => bail!("Provide --input or --synthetic"),
    };
    let mut sink = VideoSink::for_input(
        &args.output,
        args.config.fourcc_chars(),
        &info,
        args.config.output_resolution,
    )?;

    // side outputs
    let mut track_writer = match args.tracks_json.as_ref() {
        Some(path) => Some(TrackWriter::create(path)?),
        None => None,
    };
    let (mut publisher, receiver) = PreviewPublisher::channel(args.config.preview_interval, 2);
    let recorder_thread = match args.recording.as_ref() {
        Some(path) => Some(RerunRecorder::save(path)?.spawn(receiver)),
        None => {
            drop(receiver);
            None
        }
    };

    let mut observers: Vec<&mut dyn TickObserver> = vec![];
    if args.recording.is_some() {
        observers.push(&mut publisher);
    }
    if let Some(writer) = track_writer.as_mut() {
        observers.push(writer);
    }

    let header_span = info_span!("header");
    match info.frame_count {
        Some(frame_count) => {
            header_span.pb_set_style(&ProgressStyle::default_bar());
            header_span.pb_set_length(frame_count as u64);
        }
        None => header_span.pb_set_style(&ProgressStyle::default_spinner()),
    }
    let header_span_enter = header_span.enter();

    let result = pipeline.run(source, &mut sink, &mut observers, &cancel);

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    // the recorder finishes its file even when the run failed
    drop(observers);
    drop(publisher);
    if let Some(handle) = recorder_thread {
        let written = handle.join().unwrap_or(0);
        info!("recorded {} previews", written);
    }
    let summary = result?;

    if summary.cancelled {
        info!("cancelled, output is partial");
    }
    info!(
        "done: {} frames processed, {} objects tracked, written to {}",
        summary.frames,
        summary.objects_created,
        args.output.display()
    );

    Ok(())
}
