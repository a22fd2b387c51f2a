use crate::media::MediaKind;

use super::PumpState;

/// Completion barrier for the two pumps. Owned by the coordinator task only,
/// so the "both finished" check has a single writer.
#[derive(Debug)]
pub struct JoinBarrier {
    video: PumpState,
    audio: PumpState,
    fired: bool,
}

impl Default for JoinBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinBarrier {
    pub fn new() -> Self {
        Self {
            video: PumpState::Reading,
            audio: PumpState::Reading,
            fired: false,
        }
    }

    pub fn state(&self, kind: MediaKind) -> PumpState {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        }
    }

    /// Marks `kind` finished. Returns `true` exactly once: on the call that
    /// leaves both pumps finished.
    pub fn record(&mut self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video = PumpState::Finished,
            MediaKind::Audio => self.audio = PumpState::Finished,
        }
        if self.fired || !self.is_complete() {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.video == PumpState::Finished && self.audio == PumpState::Finished
    }
}
