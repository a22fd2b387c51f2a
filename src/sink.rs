use std::path::{Path, PathBuf};

use crate::error::MergeError;

/// Removes intermediate artifacts.
pub trait ArtifactCleaner: Send + Sync + 'static {
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

pub struct FsCleaner;

impl ArtifactCleaner for FsCleaner {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Deletes a half-written stage output if there is one. Failures are logged,
/// not returned; `false` means the file is still there.
pub fn remove_partial(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("failed to remove partial output {}: {}", path.display(), e);
            false
        }
    }
}

/// A finished transcode: the intermediate it consumed and the file it wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub intermediate: PathBuf,
    pub output: PathBuf,
}

/// Deletes the intermediate of a successful handoff (once, best effort) and
/// reduces the outcome to the output path.
pub fn settle<C: ArtifactCleaner + ?Sized>(
    cleaner: &C,
    outcome: Result<Handoff, MergeError>,
) -> Result<PathBuf, MergeError> {
    let handoff = outcome?;
    if let Err(e) = cleaner.remove(&handoff.intermediate) {
        log::warn!(
            "failed to remove intermediate {}: {}",
            handoff.intermediate.display(),
            e
        );
    }
    Ok(handoff.output)
}

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Delivers a request's outcome to exactly one of two callbacks.
///
/// `resolve` consumes the sink, so a second delivery does not compile; a
/// sink dropped unresolved reports [`MergeError::Dropped`].
pub struct ResultSink {
    on_success: Option<Callback<String>>,
    on_error: Option<Callback<String>>,
}

impl ResultSink {
    pub fn new<S, E>(on_success: S, on_error: E) -> Self
    where
        S: FnOnce(String) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        Self {
            on_success: Some(Box::new(on_success)),
            on_error: Some(Box::new(on_error)),
        }
    }

    pub fn resolve(mut self, outcome: Result<PathBuf, MergeError>) {
        self.deliver(outcome);
    }

    fn deliver(&mut self, outcome: Result<PathBuf, MergeError>) {
        let (on_success, on_error) = (self.on_success.take(), self.on_error.take());
        match outcome {
            Ok(path) => {
                log::info!("merge finished: {}", path.display());
                if let Some(callback) = on_success {
                    callback(path.to_string_lossy().into_owned());
                }
            }
            Err(e) => {
                log::error!("merge failed: {}", e);
                if let Some(callback) = on_error {
                    callback(e.reason().to_string());
                }
            }
        }
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        if self.on_success.is_some() || self.on_error.is_some() {
            self.deliver(Err(MergeError::Dropped));
        }
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
