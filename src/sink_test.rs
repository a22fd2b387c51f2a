use std::sync::{Arc, Mutex};

use super::*;
use crate::testing::FakeCleaner;

#[derive(Default, Clone)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn sink(&self) -> ResultSink {
        let ok = self.clone();
        let err = self.clone();
        ResultSink::new(
            move |path| ok.0.lock().unwrap().push(format!("success:{}", path)),
            move |reason| err.0.lock().unwrap().push(format!("error:{}", reason)),
        )
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn handoff() -> Handoff {
    Handoff {
        intermediate: PathBuf::from("/tmp/2024-01-01T00:00:00Z-0.mov"),
        output: PathBuf::from("/out/mergeVideo-2024-01-01 00.00.mov"),
    }
}

#[test]
fn test_success_removes_intermediate_once() {
    let cleaner = FakeCleaner::default();
    let out = settle(&cleaner, Ok(handoff())).unwrap();
    assert_eq!(out, PathBuf::from("/out/mergeVideo-2024-01-01 00.00.mov"));
    assert_eq!(
        cleaner.removed(),
        vec![PathBuf::from("/tmp/2024-01-01T00:00:00Z-0.mov")]
    );
}

#[test]
fn test_cleanup_failure_keeps_success() {
    let cleaner = FakeCleaner::failing();
    let out = settle(&cleaner, Ok(handoff()));
    assert!(out.is_ok());
    assert_eq!(cleaner.removed().len(), 1);
}

#[test]
fn test_failure_skips_cleanup() {
    let cleaner = FakeCleaner::default();
    let out = settle(&cleaner, Err(MergeError::Transcode("mux".into())));
    assert!(out.is_err());
    assert!(cleaner.removed().is_empty());
}

#[test]
fn test_resolve_success() {
    let calls = Calls::default();
    calls.sink().resolve(Ok(PathBuf::from("/out/final.mov")));
    assert_eq!(calls.take(), vec!["success:/out/final.mov"]);
}

#[test]
fn test_resolve_error_uses_reason() {
    let calls = Calls::default();
    calls
        .sink()
        .resolve(Err(MergeError::Export("render crashed".into())));
    assert_eq!(calls.take(), vec!["error:Error in exporter"]);
}

#[test]
fn test_dropped_sink_reports_error() {
    let calls = Calls::default();
    drop(calls.sink());
    assert_eq!(calls.take(), vec!["error:Request dropped"]);
}

#[test]
fn test_remove_partial_deletes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.mov");
    std::fs::write(&path, b"moov").unwrap();
    assert!(remove_partial(&path));
    assert!(!path.exists());
    assert!(remove_partial(&path));
}

#[test]
fn test_remove_partial_reports_failure() {
    // a directory in place of the movie cannot be removed as a file
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stuck.mov");
    std::fs::create_dir(&path).unwrap();
    assert!(!remove_partial(&path));
    assert!(path.is_dir());
}
