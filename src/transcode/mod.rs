//! Recompresses the rendered intermediate into the final deliverable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::MergeError,
    media::MediaKind,
    sink::{remove_partial, Handoff},
};

pub mod barrier;
pub mod pump;
pub mod session;

pub use barrier::JoinBarrier;
pub use pump::{pump_track, PumpEvent, SampleInput, SampleOutput, TrackPump};
pub use session::FfmpegTranscodeBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Reading,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSettings {
    pub video_bitrate: usize,
    pub audio_bitrate: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub pump_timeout: Duration,
}

/// One transcode. The pump states are written by the coordinator as the
/// pumps report in.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub settings: TranscodeSettings,
    pub video_pump: PumpState,
    pub audio_pump: PumpState,
}

impl TranscodeJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf, settings: TranscodeSettings) -> Self {
        Self {
            input_path,
            output_path,
            settings,
            video_pump: PumpState::Reading,
            audio_pump: PumpState::Reading,
        }
    }

    fn sync_pumps(&mut self, barrier: &JoinBarrier) {
        self.video_pump = barrier.state(MediaKind::Video);
        self.audio_pump = barrier.state(MediaKind::Audio);
    }
}

/// Stops the reader. Idempotent.
pub trait ReaderHandle: Send {
    fn cancel_reading(&mut self);
}

/// Flushes encoders and closes the container.
pub trait WriterHandle: Send {
    fn finish_writing(&mut self) -> anyhow::Result<()>;
}

/// An opened reader/writer pair. `audio` is `None` when the input has no
/// audio track.
pub struct TranscodeSession<S> {
    pub video: TrackPump<S>,
    pub audio: Option<TrackPump<S>>,
    pub reader: Box<dyn ReaderHandle>,
    pub writer: Box<dyn WriterHandle>,
}

/// Opens reader and writer for a job. Called on a blocking thread.
pub trait TranscodeBackend: Send + Sync + 'static {
    type Sample: Send + 'static;

    fn open(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TranscodeSession<Self::Sample>>;
}

/// `<dir>/mergeVideo-<yyyy-MM-dd HH.mm>.mov`, suffixed `-N` when taken.
pub fn final_output_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = format!("mergeVideo-{}", now.format("%Y-%m-%d %H.%M"));
    let mut path = dir.join(format!("{}.mov", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.mov", stem, n));
        n += 1;
    }
    path
}

pub struct Transcoder<B> {
    backend: Arc<B>,
    output_dir: PathBuf,
    settings: TranscodeSettings,
}

impl<B: TranscodeBackend> Transcoder<B> {
    pub fn new(backend: Arc<B>, output_dir: impl Into<PathBuf>, settings: TranscodeSettings) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
            settings,
        }
    }

    /// Runs both pumps to completion and finalizes the output exactly once.
    pub async fn transcode(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<Handoff, MergeError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            MergeError::TranscodeInit(format!("create {}: {}", self.output_dir.display(), e))
        })?;
        let mut job = TranscodeJob::new(
            input.to_path_buf(),
            final_output_path(&self.output_dir, Local::now()),
            self.settings.clone(),
        );
        log::info!(
            "transcode started: {} -> {}",
            job.input_path.display(),
            job.output_path.display()
        );

        let stage = cancel.child_token();
        let result = self.run(&mut job, &stage).await;
        stage.cancel();
        match result {
            Ok(()) => {
                let size = std::fs::metadata(&job.output_path)
                    .map(|m| m.len())
                    .unwrap_or(0);
                log::info!(
                    "transcode finished: {} ({:.2} MB)",
                    job.output_path.display(),
                    size as f64 / (1024.0 * 1024.0)
                );
                Ok(Handoff {
                    intermediate: job.input_path,
                    output: job.output_path,
                })
            }
            Err(e) => {
                log::debug!(
                    "transcode stopped with video {:?}, audio {:?}",
                    job.video_pump,
                    job.audio_pump
                );
                remove_partial(&job.output_path);
                Err(if cancel.is_cancelled() {
                    MergeError::Cancelled
                } else {
                    e
                })
            }
        }
    }

    async fn run(&self, job: &mut TranscodeJob, stage: &CancellationToken) -> Result<(), MergeError> {
        let backend = self.backend.clone();
        let open_job = job.clone();
        let open_cancel = stage.clone();
        let session = tokio::task::spawn_blocking(move || backend.open(&open_job, &open_cancel))
            .await
            .map_err(|e| MergeError::TranscodeInit(format!("open task: {}", e)))?
            .map_err(|e| MergeError::TranscodeInit(format!("{:#}", e)))?;
        let TranscodeSession {
            video,
            audio,
            mut reader,
            mut writer,
        } = session;

        let deadline = tokio::time::Instant::now() + job.settings.pump_timeout;
        let (tx, mut rx) = mpsc::channel::<PumpEvent>(2);
        let mut barrier = JoinBarrier::new();
        spawn_pump(video, tx.clone(), stage.clone(), deadline.into_std());
        match audio {
            Some(audio) => spawn_pump(audio, tx.clone(), stage.clone(), deadline.into_std()),
            None => {
                log::info!("no audio track in {}", job.input_path.display());
                barrier.record(MediaKind::Audio);
                job.sync_pumps(&barrier);
            }
        }
        drop(tx);

        let outcome = loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = stage.cancelled() => break Err(MergeError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(MergeError::Transcode("pump timed out".to_string()));
                }
            };
            let Some(PumpEvent { kind, result }) = event else {
                break Err(MergeError::Transcode(
                    "pumps stopped without reporting".to_string(),
                ));
            };
            match result {
                Ok(samples) => {
                    log::debug!("{} pump reported {} samples", kind, samples);
                    let fired = barrier.record(kind);
                    job.sync_pumps(&barrier);
                    if fired {
                        break Ok(());
                    }
                }
                Err(e) => {
                    log::error!("{} pump failed: {:#}", kind, e);
                    break Err(MergeError::Transcode(format!("{} pump: {:#}", kind, e)));
                }
            }
        };

        let outcome = match outcome {
            Ok(()) => match tokio::task::spawn_blocking(move || writer.finish_writing()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(MergeError::Transcode(format!("finalize: {:#}", e))),
                Err(e) => Err(MergeError::Transcode(format!("finalize task: {}", e))),
            },
            Err(e) => Err(e),
        };

        // safety net; a finished reader ignores this
        stage.cancel();
        reader.cancel_reading();
        outcome
    }
}

fn spawn_pump<S: Send + 'static>(
    mut pump: TrackPump<S>,
    tx: mpsc::Sender<PumpEvent>,
    cancel: CancellationToken,
    deadline: std::time::Instant,
) {
    tokio::task::spawn_blocking(move || {
        let result = pump_track(&mut pump, &cancel, deadline);
        let _ = tx.blocking_send(PumpEvent {
            kind: pump.kind,
            result,
        });
    });
}

#[cfg(test)]
#[path = "transcode_test.rs"]
mod transcode_test;
