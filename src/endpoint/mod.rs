use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::{CloseCode, Error, Result};
use crate::frame::{ControlFrame, ControlFrameId, INVALID_CONTROL_FRAME_ID};

pub mod ledger;
pub mod tracker;

use ledger::ControlFrameLedger;
use tracker::{AckSummary, PacketNumber, ReceivedPacketTracker};

pub trait Session {
    // Called to hand a control frame to the packet writer, false if the connection is write
    // blocked
    fn write_frame(&mut self, frame: &ControlFrame) -> bool;

    // Called when the connection must be terminated
    fn close_connection(&mut self, code: CloseCode, details: &str);

    // Called when a packet arrives after a higher numbered packet
    fn report_reordering(&mut self, _distance: u64) {}

    // Called with the delay between the largest packet and a reordered packet
    fn report_reordering_time(&mut self, _time: Duration) {}
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StateId {
    Active,
    Closed,
}

/// Connection side of the ledger and tracker. Every fatal error closes the session exactly once,
/// after which all further input is ignored.
#[derive(Debug)]
pub struct Endpoint {
    state_id: StateId,

    // Sender state
    ledger: ControlFrameLedger,

    // Receiver state
    tracker: ReceivedPacketTracker,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(tracker::Config::default())
    }
}

impl Endpoint {
    pub fn new(config: tracker::Config) -> Self {
        Self {
            state_id: StateId::Active,
            ledger: ControlFrameLedger::new(),
            tracker: ReceivedPacketTracker::new(config),
        }
    }

    pub fn state_id(&self) -> StateId {
        self.state_id
    }

    pub fn is_closed(&self) -> bool {
        self.state_id == StateId::Closed
    }

    pub fn ledger(&self) -> &ControlFrameLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &ReceivedPacketTracker {
        &self.tracker
    }

    fn close_on_error<T, C>(&mut self, result: Result<T>, ctx: &mut C) -> Option<T>
    where
        C: Session,
    {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.close(err, ctx);
                None
            }
        }
    }

    fn close<C>(&mut self, err: Error, ctx: &mut C)
    where
        C: Session,
    {
        if self.state_id == StateId::Closed {
            return;
        }

        error!("closing connection: {}", err);

        self.state_id = StateId::Closed;
        ctx.close_connection(err.close_code(), &err.to_string());
    }

    /// Buffers a control frame. Returns its ID, or `None` if it was not accepted.
    pub fn send_control_frame<C>(&mut self, frame: ControlFrame, ctx: &mut C) -> Option<ControlFrameId>
    where
        C: Session,
    {
        if self.state_id != StateId::Active {
            return None;
        }

        let result = self.ledger.create_and_buffer(frame, ctx);
        self.close_on_error(result, ctx)
            .filter(|&id| id != INVALID_CONTROL_FRAME_ID)
    }

    pub fn send_ping<C>(&mut self, ctx: &mut C) -> Option<ControlFrameId>
    where
        C: Session,
    {
        if self.state_id != StateId::Active {
            return None;
        }

        let result = self.ledger.buffer_ping(ctx);
        self.close_on_error(result, ctx).flatten()
    }

    pub fn on_can_write<C>(&mut self, ctx: &mut C)
    where
        C: Session,
    {
        if self.state_id == StateId::Active {
            let result = self.ledger.on_can_write(ctx);
            self.close_on_error(result, ctx);
        }
    }

    pub fn willing_to_write(&self) -> bool {
        self.state_id == StateId::Active && self.ledger.willing_to_write()
    }

    pub fn on_frame_sent<C>(&mut self, frame: &ControlFrame, ctx: &mut C)
    where
        C: Session,
    {
        if self.state_id == StateId::Active {
            let result = self.ledger.on_frame_sent(frame);
            self.close_on_error(result, ctx);
        }
    }

    /// Returns true if `frame` was newly acknowledged.
    pub fn on_frame_acked<C>(&mut self, frame: &ControlFrame, ctx: &mut C) -> bool
    where
        C: Session,
    {
        if self.state_id != StateId::Active {
            return false;
        }

        let result = self.ledger.on_frame_acked(frame);
        self.close_on_error(result, ctx).unwrap_or(false)
    }

    pub fn on_frame_lost<C>(&mut self, frame: &ControlFrame, ctx: &mut C)
    where
        C: Session,
    {
        if self.state_id == StateId::Active {
            let result = self.ledger.on_frame_lost(frame);
            self.close_on_error(result, ctx);
        }
    }

    /// Returns false if the frame could not be written right away.
    pub fn retransmit_frame<C>(&mut self, frame: &ControlFrame, ctx: &mut C) -> bool
    where
        C: Session,
    {
        if self.state_id != StateId::Active {
            return false;
        }

        let result = self.ledger.retransmit_now(frame, ctx);
        self.close_on_error(result, ctx).unwrap_or(false)
    }

    /// Records an arriving packet. Returns false if the packet was a duplicate or had already been
    /// given up on.
    pub fn on_packet_received<C>(
        &mut self,
        packet_number: PacketNumber,
        receipt_time: Instant,
        ctx: &mut C,
    ) -> bool
    where
        C: Session,
    {
        if self.state_id != StateId::Active {
            return false;
        }

        if !self.tracker.is_awaiting(packet_number) {
            debug!(packet_number, "dropping duplicate packet");
            return false;
        }

        self.tracker
            .record_packet_received(packet_number, receipt_time, ctx);

        true
    }

    /// Handles the peer's least packet awaiting ack.
    pub fn on_stop_waiting<C>(&mut self, least_unacked: PacketNumber, ctx: &mut C)
    where
        C: Session,
    {
        if self.state_id == StateId::Active {
            let result = self.tracker.advance_lower_bound(Some(least_unacked));
            self.close_on_error(result, ctx);
        }
    }

    pub fn ack_summary(&mut self, approx_now: Instant) -> &AckSummary {
        self.tracker.build_ack_summary(approx_now)
    }

    /// Returns true if a fresh gap in the received packets calls for an ack without delay.
    pub fn should_ack_immediately(&self) -> bool {
        self.tracker.is_ack_summary_updated() && self.tracker.has_new_missing_packets()
    }
}

#[cfg(test)]
pub(crate) struct MockSession {
    pub written: Vec<ControlFrame>,
    pub blocked: bool,
    // Number of frames which may be written before the session blocks
    pub write_budget: Option<usize>,
    pub closes: Vec<(CloseCode, String)>,
    pub reorderings: Vec<u64>,
    pub reordering_times: Vec<Duration>,
}

#[cfg(test)]
impl MockSession {
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            blocked: false,
            write_budget: None,
            closes: Vec::new(),
            reorderings: Vec::new(),
            reordering_times: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Session for MockSession {
    fn write_frame(&mut self, frame: &ControlFrame) -> bool {
        if self.blocked {
            return false;
        }

        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return false;
            }
            *budget -= 1;
        }

        println!("write frame {}", frame);
        self.written.push(frame.clone());
        true
    }

    fn close_connection(&mut self, code: CloseCode, details: &str) {
        println!("close connection {:?}: {}", code, details);
        self.closes.push((code, details.to_string()));
    }

    fn report_reordering(&mut self, distance: u64) {
        self.reorderings.push(distance);
    }

    fn report_reordering_time(&mut self, time: Duration) {
        self.reordering_times.push(time);
    }
}
