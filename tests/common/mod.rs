use std::time::Duration;

use ackledger::{CloseCode, ControlFrame, ControlFrameId, Session};

/// Session which records everything handed to it.
#[derive(Default)]
pub struct RecordingSession {
    pub written: Vec<ControlFrame>,
    pub blocked: bool,
    pub closes: Vec<(CloseCode, String)>,
    pub reorderings: Vec<u64>,
    pub reordering_times: Vec<Duration>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocked() -> Self {
        Self {
            blocked: true,
            ..Default::default()
        }
    }

    pub fn written_ids(&self) -> Vec<ControlFrameId> {
        self.written.iter().map(|frame| frame.id()).collect()
    }

    /// The most recently written frame with the given ID.
    pub fn frame(&self, id: ControlFrameId) -> ControlFrame {
        self.written
            .iter()
            .rev()
            .find(|frame| frame.id() == id)
            .cloned()
            .unwrap_or_else(|| panic!("frame {} was never written", id))
    }
}

impl Session for RecordingSession {
    fn write_frame(&mut self, frame: &ControlFrame) -> bool {
        if self.blocked {
            return false;
        }

        self.written.push(frame.clone());
        true
    }

    fn close_connection(&mut self, code: CloseCode, details: &str) {
        self.closes.push((code, details.to_string()));
    }

    fn report_reordering(&mut self, distance: u64) {
        self.reorderings.push(distance);
    }

    fn report_reordering_time(&mut self, time: Duration) {
        self.reordering_times.push(time);
    }
}

/// Returns a copy of `frame` carrying `id`, as if the ledger had assigned it.
pub fn with_id(mut frame: ControlFrame, id: ControlFrameId) -> ControlFrame {
    frame.set_id(id);
    frame
}
