use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::media::MediaKind;

/// Reader side of one track: decoded samples in presentation order.
pub trait SampleOutput<S>: Send {
    /// `Ok(None)` once the track is exhausted.
    fn copy_next_sample(&mut self) -> anyhow::Result<Option<S>>;
}

/// Writer side of one track.
pub trait SampleInput<S>: Send {
    fn is_ready_for_more(&self) -> bool;
    fn append(&mut self, sample: S) -> anyhow::Result<()>;
    fn mark_finished(&mut self) -> anyhow::Result<()>;
}

pub struct TrackPump<S> {
    pub kind: MediaKind,
    pub output: Box<dyn SampleOutput<S>>,
    pub input: Box<dyn SampleInput<S>>,
}

/// Sent by a pump to the coordinator when it stops, once.
pub struct PumpEvent {
    pub kind: MediaKind,
    pub result: anyhow::Result<u64>,
}

const READY_POLL: Duration = Duration::from_millis(1);

/// Moves samples from output to input while the input is ready, until the
/// output is exhausted. Returns the number of samples moved.
///
/// Every iteration checks `cancel` and `deadline`.
pub fn pump_track<S>(
    pump: &mut TrackPump<S>,
    cancel: &CancellationToken,
    deadline: Instant,
) -> anyhow::Result<u64> {
    let mut moved: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("{} pump cancelled after {} samples", pump.kind, moved);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("{} pump timed out after {} samples", pump.kind, moved);
        }
        if !pump.input.is_ready_for_more() {
            std::thread::sleep(READY_POLL);
            continue;
        }
        match pump.output.copy_next_sample()? {
            Some(sample) => {
                pump.input.append(sample)?;
                moved += 1;
            }
            None => {
                pump.input.mark_finished()?;
                log::debug!("{} pump finished, {} samples", pump.kind, moved);
                return Ok(moved);
            }
        }
    }
}
