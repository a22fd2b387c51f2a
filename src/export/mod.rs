//! Renders a [`CompositionPlan`] to an intermediate movie file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{composition::CompositionPlan, error::MergeError, sink::remove_partial};

pub mod render;
pub mod warp;

pub use render::FfmpegRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub plan: CompositionPlan,
    pub output_path: PathBuf,
    pub status: ExportStatus,
    pub error_detail: Option<String>,
}

impl ExportJob {
    fn new(plan: CompositionPlan, output_path: PathBuf) -> Self {
        Self {
            plan,
            output_path,
            status: ExportStatus::Pending,
            error_detail: None,
        }
    }

    fn fail(&mut self, detail: String) {
        self.status = ExportStatus::Failed;
        self.error_detail = Some(detail);
    }

    /// The rendered file, or the export error that stopped it.
    pub fn into_output(self) -> Result<PathBuf, MergeError> {
        match self.status {
            ExportStatus::Completed => Ok(self.output_path),
            _ => Err(MergeError::Export(
                self.error_detail
                    .unwrap_or_else(|| format!("export ended in {:?}", self.status)),
            )),
        }
    }
}

/// Draws a plan into a movie file. Runs on a blocking thread.
pub trait Renderer: Send + Sync + 'static {
    fn render(
        &self,
        plan: &CompositionPlan,
        output: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

static INTERMEDIATE_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<dir>/<yyyy-MM-ddTHH:mm:ssZ>-<seq>.mov`; the sequence keeps paths
/// unique within one second.
pub fn intermediate_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    let seq = INTERMEDIATE_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{}-{}.mov", now.format("%Y-%m-%dT%H:%M:%SZ"), seq))
}

pub struct Exporter<R> {
    renderer: Arc<R>,
    temp_dir: PathBuf,
}

impl<R: Renderer> Exporter<R> {
    pub fn new(renderer: Arc<R>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            temp_dir: temp_dir.into(),
        }
    }

    /// Renders `plan` off the async runtime. The returned job is `Completed`
    /// only when the renderer succeeded and the file exists.
    pub async fn export(&self, plan: CompositionPlan, cancel: &CancellationToken) -> ExportJob {
        let path = intermediate_path(&self.temp_dir, Utc::now());
        let mut job = ExportJob::new(plan, path);
        if let Err(e) = std::fs::create_dir_all(&self.temp_dir) {
            job.fail(format!("create {}: {}", self.temp_dir.display(), e));
            return job;
        }

        job.status = ExportStatus::Running;
        log::info!(
            "export started: {} ({:?})",
            job.output_path.display(),
            job.plan.duration()
        );
        let renderer = self.renderer.clone();
        let plan = job.plan.clone();
        let output = job.output_path.clone();
        let cancel = cancel.clone();
        let rendered =
            tokio::task::spawn_blocking(move || renderer.render(&plan, &output, &cancel)).await;

        match rendered {
            Ok(Ok(())) if job.output_path.is_file() => {
                job.status = ExportStatus::Completed;
                log::info!("export finished: {}", job.output_path.display());
            }
            Ok(Ok(())) => job.fail(format!(
                "renderer produced no file at {}",
                job.output_path.display()
            )),
            Ok(Err(e)) => job.fail(format!("{:#}", e)),
            Err(e) => job.fail(format!("render task: {}", e)),
        }
        if job.status == ExportStatus::Failed {
            log::error!(
                "export failed: {}",
                job.error_detail.as_deref().unwrap_or_default()
            );
            // a partial file is useless to later stages
            remove_partial(&job.output_path);
        }
        job
    }
}
