use std::sync::atomic::Ordering;

use chrono::TimeZone;

use super::*;
use crate::{error::ERR_FINAL_URL, testing::FakeTranscodeBackend};

fn settings(timeout: Duration) -> TranscodeSettings {
    TranscodeSettings {
        video_bitrate: 1_250_000,
        audio_bitrate: 128_000,
        sample_rate: 44_100,
        channels: 2,
        pump_timeout: timeout,
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    input: PathBuf,
    out_dir: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("2024-01-01T00:00:00Z-0.mov");
    std::fs::write(&input, b"rendered").unwrap();
    let out_dir = dir.path().join("out");
    Fixture {
        _dir: dir,
        input,
        out_dir,
    }
}

fn transcoder(backend: FakeTranscodeBackend, f: &Fixture) -> (Arc<FakeTranscodeBackend>, Transcoder<FakeTranscodeBackend>) {
    let backend = Arc::new(backend);
    let transcoder = Transcoder::new(
        backend.clone(),
        &f.out_dir,
        settings(Duration::from_secs(10)),
    );
    (backend, transcoder)
}

async fn finishes_once(last: MediaKind) {
    let f = fixture();
    let (backend, transcoder) = transcoder(
        FakeTranscodeBackend {
            finishes_last: Some(last),
            ..Default::default()
        },
        &f,
    );

    let handoff = transcoder
        .transcode(&f.input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(handoff.intermediate, f.input);
    assert!(handoff.output.starts_with(&f.out_dir));
    assert_eq!(std::fs::read(&handoff.output).unwrap(), b"rendered");

    let log = &backend.log;
    assert_eq!(log.count("writer finished"), 1, "{:?}", log.events());
    assert_eq!(log.count("writer finished early"), 0);
    assert_eq!(log.count("video finished 30"), 1);
    assert_eq!(log.count("audio finished 40"), 1);

    let events = log.events();
    let writer = events.iter().position(|e| e == "writer finished").unwrap();
    let video = events.iter().position(|e| e == "video finished 30").unwrap();
    let audio = events.iter().position(|e| e == "audio finished 40").unwrap();
    assert!(writer > video && writer > audio, "{:?}", events);
    assert_eq!(events.last().map(String::as_str), Some("reader cancelled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_audio_finishing_last_completes_once() {
    finishes_once(MediaKind::Audio).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_video_finishing_last_completes_once() {
    finishes_once(MediaKind::Video).await;
}

#[tokio::test]
async fn test_missing_audio_track_finishes_on_video() {
    let f = fixture();
    let (backend, transcoder) = transcoder(
        FakeTranscodeBackend {
            audio_samples: None,
            ..Default::default()
        },
        &f,
    );

    let handoff = transcoder
        .transcode(&f.input, &CancellationToken::new())
        .await
        .unwrap();
    assert!(handoff.output.is_file());
    assert_eq!(backend.log.count("writer finished"), 1);
}

#[tokio::test]
async fn test_open_failure_reports_final_url() {
    let f = fixture();
    let (backend, transcoder) = transcoder(
        FakeTranscodeBackend {
            fail_open: true,
            ..Default::default()
        },
        &f,
    );

    let err = transcoder
        .transcode(&f.input, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::TranscodeInit(_)), "{:?}", err);
    assert_eq!(err.reason(), ERR_FINAL_URL);
    assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    assert!(backend.log.events().is_empty());
}

#[tokio::test]
async fn test_pump_error_never_finalizes() {
    let f = fixture();
    let (backend, transcoder) = transcoder(
        FakeTranscodeBackend {
            fail_video_at: Some(7),
            ..Default::default()
        },
        &f,
    );

    let err = transcoder
        .transcode(&f.input, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::Transcode(_)), "{:?}", err);
    assert!(err.to_string().contains("decode error at 7"), "{}", err);
    assert_eq!(backend.log.count("writer finished"), 0);
    assert_eq!(backend.log.count("reader cancelled"), 1);
    assert_eq!(std::fs::read_dir(&f.out_dir).unwrap().count(), 0);
}

fn job(f: &Fixture) -> TranscodeJob {
    std::fs::create_dir_all(&f.out_dir).unwrap();
    TranscodeJob::new(
        f.input.clone(),
        f.out_dir.join("final.mov"),
        settings(Duration::from_secs(10)),
    )
}

#[tokio::test]
async fn test_job_records_both_pumps_finished() {
    let f = fixture();
    let (_, transcoder) = transcoder(FakeTranscodeBackend::default(), &f);
    let mut job = job(&f);
    assert_eq!((job.video_pump, job.audio_pump), (PumpState::Reading, PumpState::Reading));

    transcoder.run(&mut job, &CancellationToken::new()).await.unwrap();
    assert_eq!(job.video_pump, PumpState::Finished);
    assert_eq!(job.audio_pump, PumpState::Finished);
}

#[tokio::test]
async fn test_job_keeps_failed_pump_reading() {
    let f = fixture();
    let (_, transcoder) = transcoder(
        FakeTranscodeBackend {
            audio_samples: None,
            fail_video_at: Some(3),
            ..Default::default()
        },
        &f,
    );
    let mut job = job(&f);

    let err = transcoder.run(&mut job, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, MergeError::Transcode(_)), "{:?}", err);
    // no audio track counts as finished from the start
    assert_eq!(job.audio_pump, PumpState::Finished);
    assert_eq!(job.video_pump, PumpState::Reading);
}

#[tokio::test]
async fn test_stalled_writer_times_out() {
    let f = fixture();
    let backend = Arc::new(FakeTranscodeBackend {
        never_ready: true,
        ..Default::default()
    });
    let transcoder = Transcoder::new(
        backend.clone(),
        &f.out_dir,
        settings(Duration::from_millis(50)),
    );

    let err = transcoder
        .transcode(&f.input, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"), "{}", err);
    assert_eq!(backend.log.count("writer finished"), 0);
}

#[tokio::test]
async fn test_cancelled_request_reports_cancelled() {
    let f = fixture();
    let (backend, transcoder) = transcoder(
        FakeTranscodeBackend {
            never_ready: true,
            ..Default::default()
        },
        &f,
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = transcoder.transcode(&f.input, &cancel).await.unwrap_err();
    assert!(matches!(err, MergeError::Cancelled), "{:?}", err);
    assert_eq!(backend.log.count("writer finished"), 0);
}

#[test]
fn test_final_name_gets_suffix_when_taken() {
    let dir = tempfile::tempdir().unwrap();
    let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 59).unwrap();

    let first = final_output_path(dir.path(), now);
    assert_eq!(
        first.file_name().unwrap().to_string_lossy(),
        "mergeVideo-2024-03-09 14.05.mov"
    );
    std::fs::write(&first, b"x").unwrap();

    let second = final_output_path(dir.path(), now);
    assert_eq!(
        second.file_name().unwrap().to_string_lossy(),
        "mergeVideo-2024-03-09 14.05-1.mov"
    );
}
