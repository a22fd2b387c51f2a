use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use video_merge::{config, MergeConfig, MergeProfile, MergeVideo};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Classic,
    PortraitScreen,
}

/// Lays a video (or the bundled filler) under an audio track and writes one movie.
#[derive(Debug, Parser)]
#[command(name = "video-merge", version)]
struct Args {
    /// JSON config; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Video path or file:// URI
    #[arg(long)]
    video: Option<String>,

    /// Audio path or file:// URI
    #[arg(long)]
    audio: String,

    /// Overrides the profile from the config
    #[arg(long, value_enum)]
    profile: Option<Profile>,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_bus", log::LevelFilter::Debug)
        .filter_module("video_merge", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    let mut merge_config = match &args.config {
        Some(path) => MergeConfig::load(path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            std::process::exit(1);
        }),
        None => config().clone(),
    };
    match args.profile {
        Some(Profile::Classic) => merge_config.profile = MergeProfile::classic(),
        Some(Profile::PortraitScreen) => merge_config.profile = MergeProfile::portrait_screen(),
        None => {}
    }
    if let Err(e) = ffmpeg_bus::init() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }

    let merge = MergeVideo::with_ffmpeg(merge_config);
    let run = merge.merge(args.video.as_deref(), &args.audio);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            merge.cancel();
            run.await
        },
    };

    match result {
        Ok(path) => println!("{}", path.display()),
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e.reason());
            std::process::exit(1);
        }
    }
}
