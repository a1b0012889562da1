use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::{debug, error, trace, warn};

use super::Session;
use crate::error::{Error, Result};
use crate::frame::{
    ControlFrame, ControlFrameId, StreamId, StreamOffset, INVALID_CONTROL_FRAME_ID,
};

//   least_unacked      least_unsent       least_unacked + len
//   v                  v                  v
// --*0**0*00**0***0****#########__________> control frame IDs
//
// *: sent, awaiting ack
// 0: acked, waiting to be trimmed from the front
// #: buffered, not yet sent
//
// A buffered frame may also be 0 if a newer window update for its stream replaced it; it is
// passed over when least_unsent reaches it.

/// Outbound queue of control frames.
///
/// Frames are assigned consecutive IDs as they are buffered and leave in ID order. Sent frames
/// stay in the queue until acknowledged; acknowledged frames are invalidated in place and trimmed
/// once they reach the front. Frames reported lost are resent ahead of any fresh frame.
#[derive(Debug)]
pub struct ControlFrameLedger {
    frames: VecDeque<ControlFrame>,

    last_control_frame_id: ControlFrameId,
    least_unacked: ControlFrameId,
    least_unsent: ControlFrameId,

    pending_retransmissions: BTreeSet<ControlFrameId>,

    // Most recently buffered window update per stream
    window_update_frames: HashMap<StreamId, ControlFrameId>,
}

impl Default for ControlFrameLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFrameLedger {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            last_control_frame_id: INVALID_CONTROL_FRAME_ID,
            least_unacked: 1,
            least_unsent: 1,
            pending_retransmissions: BTreeSet::new(),
            window_update_frames: HashMap::new(),
        }
    }

    pub fn least_unacked(&self) -> ControlFrameId {
        self.least_unacked
    }

    pub fn least_unsent(&self) -> ControlFrameId {
        self.least_unsent
    }

    pub fn last_control_frame_id(&self) -> ControlFrameId {
        self.last_control_frame_id
    }

    /// Number of frames held, including acknowledged frames not yet trimmed.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn slot(&self, id: ControlFrameId) -> Option<&ControlFrame> {
        let idx = id.checked_sub(self.least_unacked)?;
        self.frames.get(usize::try_from(idx).ok()?)
    }

    fn slot_mut(&mut self, id: ControlFrameId) -> Option<&mut ControlFrame> {
        let idx = id.checked_sub(self.least_unacked)?;
        self.frames.get_mut(usize::try_from(idx).ok()?)
    }

    fn is_acked(&self, id: ControlFrameId) -> bool {
        debug_assert!(id < self.least_unsent);

        match self.slot(id) {
            Some(frame) => !frame.has_valid_id(),
            None => true,
        }
    }

    fn check_order(&self) {
        debug_assert!(self.least_unacked <= self.least_unsent);
        debug_assert!(self.least_unsent <= self.last_control_frame_id + 1);
        debug_assert_eq!(
            self.least_unacked + self.frames.len() as u64,
            self.last_control_frame_id + 1
        );
    }

    /// Assigns the next ID to `frame` and queues it behind any frames already buffered. If
    /// nothing was waiting, writing starts immediately, ahead of any pending retransmission.
    ///
    /// A ping is only accepted when nothing is buffered; otherwise it is dropped and
    /// [`INVALID_CONTROL_FRAME_ID`] is returned.
    pub fn create_and_buffer<C>(&mut self, mut frame: ControlFrame, ctx: &mut C) -> Result<ControlFrameId>
    where
        C: Session,
    {
        if let ControlFrame::Ping(_) = frame {
            if self.has_buffered_frames() {
                // Do not send ping if there is buffered frames
                warn!("Try to send PING when there is buffered control frames.");
                return Ok(INVALID_CONTROL_FRAME_ID);
            }
        }

        self.last_control_frame_id += 1;
        let id = self.last_control_frame_id;

        frame.set_id(id);

        debug!("buffering {}", frame);

        let window_update_stream = frame.window_update_stream();

        self.frames.push_back(frame);

        if let Some(stream_id) = window_update_stream {
            // Only the latest window of a stream matters
            self.retire_window_update(stream_id, id)?;
        }

        self.check_order();

        if self.least_unsent == id {
            // Nothing was waiting ahead of this frame
            self.write_buffered_frames(ctx)?;
        }

        Ok(id)
    }

    pub fn buffer_rst_stream<C>(
        &mut self,
        stream_id: StreamId,
        error_code: u32,
        bytes_written: StreamOffset,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(
            ControlFrame::rst_stream(stream_id, error_code, bytes_written),
            ctx,
        )
    }

    pub fn buffer_go_away<C>(
        &mut self,
        error_code: u32,
        last_good_stream_id: StreamId,
        reason: &str,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(
            ControlFrame::go_away(error_code, last_good_stream_id, reason),
            ctx,
        )
    }

    pub fn buffer_window_update<C>(
        &mut self,
        stream_id: StreamId,
        byte_offset: StreamOffset,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(ControlFrame::window_update(stream_id, byte_offset), ctx)
    }

    pub fn buffer_blocked<C>(&mut self, stream_id: StreamId, ctx: &mut C) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(ControlFrame::blocked(stream_id), ctx)
    }

    pub fn buffer_stop_sending<C>(
        &mut self,
        stream_id: StreamId,
        application_error_code: u16,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(
            ControlFrame::stop_sending(stream_id, application_error_code),
            ctx,
        )
    }

    pub fn buffer_stream_id_blocked<C>(
        &mut self,
        stream_id: StreamId,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(ControlFrame::stream_id_blocked(stream_id), ctx)
    }

    pub fn buffer_max_stream_id<C>(
        &mut self,
        max_stream_id: StreamId,
        ctx: &mut C,
    ) -> Result<ControlFrameId>
    where
        C: Session,
    {
        self.create_and_buffer(ControlFrame::max_stream_id(max_stream_id), ctx)
    }

    /// Buffers a ping, unless other frames are waiting to be sent. Returns the ID of the ping if
    /// it was accepted.
    pub fn buffer_ping<C>(&mut self, ctx: &mut C) -> Result<Option<ControlFrameId>>
    where
        C: Session,
    {
        let id = self.create_and_buffer(ControlFrame::ping(), ctx)?;

        Ok(Some(id).filter(|&id| id != INVALID_CONTROL_FRAME_ID))
    }

    // The previous window update for the stream is superseded by `id`. If it was sent it counts
    // as acked, otherwise it is dropped before it goes out.
    fn retire_window_update(&mut self, stream_id: StreamId, id: ControlFrameId) -> Result<()> {
        let Some(prev_id) = self.window_update_frames.insert(stream_id, id) else {
            return Ok(());
        };

        if prev_id < self.least_unsent {
            self.on_frame_id_acked(prev_id)?;
        } else if let Some(prev) = self.slot_mut(prev_id) {
            debug!("dropping unsent {}", prev);
            prev.set_id(INVALID_CONTROL_FRAME_ID);
            self.skip_retired_frames();
        }

        Ok(())
    }

    // Passes over unsent frames which were dropped in place
    fn skip_retired_frames(&mut self) {
        while self
            .slot(self.least_unsent)
            .map_or(false, |frame| !frame.has_valid_id())
        {
            self.least_unsent += 1;
        }

        self.trim_acked_frames();
    }

    fn trim_acked_frames(&mut self) {
        while self
            .frames
            .front()
            .map_or(false, |frame| !frame.has_valid_id())
        {
            self.frames.pop_front();
            self.least_unacked += 1;
        }

        self.least_unsent = self.least_unsent.max(self.least_unacked);
    }

    /// Records that the connection accepted `frame` for transmission.
    pub fn on_frame_sent(&mut self, frame: &ControlFrame) -> Result<()> {
        let id = frame.id();

        if id == INVALID_CONTROL_FRAME_ID {
            error!("Send or retransmit a control frame with invalid control frame id");
            return Ok(());
        }

        if self.pending_retransmissions.remove(&id) {
            // This is a retransmitted control frame
            trace!("retransmitted {}", frame);
            return Ok(());
        }

        if id > self.least_unsent {
            error!(
                id,
                least_unsent = self.least_unsent,
                "Try to send control frames out of order"
            );
            return Err(Error::OutOfOrderSend {
                id,
                least_unsent: self.least_unsent,
            });
        }

        if id < self.least_unsent {
            // Resent outside the retransmission queue, e.g. by a forced retransmission
            trace!("resent {}", frame);
            return Ok(());
        }

        self.least_unsent += 1;
        self.skip_retired_frames();

        self.check_order();

        Ok(())
    }

    /// Returns true if `frame` was newly acknowledged.
    pub fn on_frame_acked(&mut self, frame: &ControlFrame) -> Result<bool> {
        let id = frame.id();

        if !self.on_frame_id_acked(id)? {
            return Ok(false);
        }

        if let Some(stream_id) = frame.window_update_stream() {
            if self.window_update_frames.get(&stream_id) == Some(&id) {
                self.window_update_frames.remove(&stream_id);
            }
        }

        Ok(true)
    }

    fn on_frame_id_acked(&mut self, id: ControlFrameId) -> Result<bool> {
        if id == INVALID_CONTROL_FRAME_ID {
            return Ok(false);
        }

        if id >= self.least_unsent {
            error!(
                id,
                least_unsent = self.least_unsent,
                "Try to ack unsent control frame"
            );
            return Err(Error::AckOfUnsent {
                id,
                least_unsent: self.least_unsent,
            });
        }

        let idx = match id.checked_sub(self.least_unacked) {
            Some(idx) => idx as usize,
            None => {
                trace!(id, "ack of trimmed control frame");
                return Ok(false);
            }
        };

        match self.frames.get_mut(idx) {
            Some(frame) if frame.has_valid_id() => {
                frame.set_id(INVALID_CONTROL_FRAME_ID);
            }
            _ => {
                trace!(id, "duplicate ack of control frame");
                return Ok(false);
            }
        }

        self.pending_retransmissions.remove(&id);

        self.trim_acked_frames();

        self.check_order();

        Ok(true)
    }

    /// Schedules `frame` for retransmission, unless it has already been acknowledged.
    pub fn on_frame_lost(&mut self, frame: &ControlFrame) -> Result<()> {
        let id = frame.id();

        if id == INVALID_CONTROL_FRAME_ID {
            return Ok(());
        }

        if id >= self.least_unsent {
            error!(
                id,
                least_unsent = self.least_unsent,
                "Try to mark unsent control frame as lost"
            );
            return Err(Error::LossOfUnsent {
                id,
                least_unsent: self.least_unsent,
            });
        }

        if self.is_acked(id) {
            return Ok(());
        }

        if self.pending_retransmissions.insert(id) {
            debug!("lost {}", frame);
        }

        Ok(())
    }

    /// Returns true if `frame` was sent or buffered by this ledger and has not been acknowledged.
    pub fn is_outstanding(&self, frame: &ControlFrame) -> bool {
        let id = frame.id();

        if id == INVALID_CONTROL_FRAME_ID {
            return false;
        }

        match self.slot(id) {
            Some(frame) => frame.has_valid_id(),
            None => false,
        }
    }

    pub fn has_pending_retransmission(&self) -> bool {
        !self.pending_retransmissions.is_empty()
    }

    pub fn has_buffered_frames(&self) -> bool {
        self.least_unsent < self.least_unacked + self.frames.len() as u64
    }

    pub fn willing_to_write(&self) -> bool {
        self.has_pending_retransmission() || self.has_buffered_frames()
    }

    /// The lost frame which will be resent next.
    pub fn next_pending_retransmission(&self) -> Option<&ControlFrame> {
        let &id = self.pending_retransmissions.first()?;
        self.slot(id)
    }

    /// Writes lost frames, then buffered frames, until the connection is write blocked or
    /// nothing is left.
    pub fn on_can_write<C>(&mut self, ctx: &mut C) -> Result<()>
    where
        C: Session,
    {
        if self.has_pending_retransmission() && !self.write_pending_retransmissions(ctx)? {
            return Ok(());
        }

        // Every lost frame is out, fresh frames follow in the same call
        self.write_buffered_frames(ctx)?;

        Ok(())
    }

    /// Immediately writes `frame` again. Returns false only if the connection is write blocked;
    /// a frame which has already been acknowledged needs no retransmission.
    pub fn retransmit_now<C>(&mut self, frame: &ControlFrame, ctx: &mut C) -> Result<bool>
    where
        C: Session,
    {
        let id = frame.id();

        if id == INVALID_CONTROL_FRAME_ID {
            return Ok(true);
        }

        if id >= self.least_unsent {
            error!(
                id,
                least_unsent = self.least_unsent,
                "Try to retransmit unsent control frame"
            );
            return Err(Error::RetransmitOfUnsent {
                id,
                least_unsent: self.least_unsent,
            });
        }

        let copy = match self.slot(id) {
            Some(frame) if frame.has_valid_id() => frame.clone(),
            _ => {
                // Already acked
                return Ok(true);
            }
        };

        debug!("forced to retransmit {}", copy);

        if ctx.write_frame(&copy) {
            self.pending_retransmissions.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // Returns false if the connection became write blocked
    fn write_pending_retransmissions<C>(&mut self, ctx: &mut C) -> Result<bool>
    where
        C: Session,
    {
        while let Some(&id) = self.pending_retransmissions.first() {
            let copy = match self.slot(id) {
                Some(frame) => frame.clone(),
                None => {
                    self.pending_retransmissions.remove(&id);
                    continue;
                }
            };

            debug!("retransmitting {}", copy);

            if !ctx.write_frame(&copy) {
                // Connection is write blocked
                return Ok(false);
            }

            self.on_frame_sent(&copy)?;
        }

        Ok(true)
    }

    // Returns false if the connection became write blocked
    fn write_buffered_frames<C>(&mut self, ctx: &mut C) -> Result<bool>
    where
        C: Session,
    {
        while self.has_buffered_frames() {
            let idx = (self.least_unsent - self.least_unacked) as usize;
            let copy = self.frames[idx].clone();

            if !copy.has_valid_id() {
                self.skip_retired_frames();
                continue;
            }

            if !ctx.write_frame(&copy) {
                // Connection is write blocked
                return Ok(false);
            }

            self.on_frame_sent(&copy)?;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::MockSession;
    use super::*;

    fn written_ids(session: &MockSession) -> Vec<ControlFrameId> {
        session.written.iter().map(|frame| frame.id()).collect()
    }

    #[test]
    fn ids_are_consecutive() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        for expected in 1..=10 {
            let id = ledger.buffer_blocked(expected as u32, &mut session).unwrap();
            assert_eq!(id, expected);
        }

        assert_eq!(ledger.last_control_frame_id(), 10);
        assert_eq!(ledger.least_unsent(), 11);
        assert_eq!(ledger.least_unacked(), 1);
    }

    #[test]
    fn buffered_frames_wait_while_blocked() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;

        ledger.buffer_rst_stream(3, 1, 0, &mut session).unwrap();
        ledger.buffer_blocked(5, &mut session).unwrap();
        ledger.buffer_max_stream_id(21, &mut session).unwrap();

        assert!(session.written.is_empty());
        assert!(ledger.has_buffered_frames());
        assert!(ledger.willing_to_write());
        assert_eq!(ledger.least_unsent(), 1);

        session.blocked = false;
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(written_ids(&session), vec![1, 2, 3]);
        assert!(!ledger.has_buffered_frames());
        assert!(!ledger.willing_to_write());
        assert_eq!(ledger.least_unsent(), 4);
    }

    #[test]
    fn write_budget_stops_write_loop() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        for stream_id in 0..5 {
            ledger.buffer_blocked(stream_id, &mut session).unwrap();
        }

        session.blocked = false;
        session.write_budget = Some(2);
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(written_ids(&session), vec![1, 2]);
        assert_eq!(ledger.least_unsent(), 3);
        assert!(ledger.has_buffered_frames());

        session.write_budget = None;
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(written_ids(&session), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn ack_trims_front() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        for stream_id in 0..3 {
            ledger.buffer_blocked(stream_id, &mut session).unwrap();
        }

        let frames = session.written.clone();

        // Acking out of order keeps the slot until the front is acked
        assert!(ledger.on_frame_acked(&frames[1]).unwrap());
        assert_eq!(ledger.least_unacked(), 1);
        assert_eq!(ledger.len(), 3);
        assert!(!ledger.is_outstanding(&frames[1]));
        assert!(ledger.is_outstanding(&frames[0]));

        assert!(ledger.on_frame_acked(&frames[0]).unwrap());
        assert_eq!(ledger.least_unacked(), 3);
        assert_eq!(ledger.len(), 1);

        assert!(ledger.on_frame_acked(&frames[2]).unwrap());
        assert_eq!(ledger.least_unacked(), 4);
        assert_eq!(ledger.least_unacked(), ledger.least_unsent());
        assert!(ledger.is_empty());
    }

    #[test]
    fn duplicate_ack_is_benign() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        ledger.buffer_blocked(2, &mut session).unwrap();

        let frames = session.written.clone();

        assert!(ledger.on_frame_acked(&frames[1]).unwrap());
        assert!(!ledger.on_frame_acked(&frames[1]).unwrap());

        assert!(ledger.on_frame_acked(&frames[0]).unwrap());
        assert!(!ledger.on_frame_acked(&frames[0]).unwrap());
        assert!(!ledger.on_frame_acked(&frames[1]).unwrap());

        assert!(ledger.is_empty());
        assert_eq!(ledger.least_unacked(), 3);
    }

    #[test]
    fn ack_of_unsent_frame_is_fatal() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_blocked(1, &mut session).unwrap();

        let mut unsent = ControlFrame::blocked(1);
        unsent.set_id(ledger.least_unsent());

        assert_eq!(
            ledger.on_frame_acked(&unsent),
            Err(Error::AckOfUnsent {
                id: 1,
                least_unsent: 1
            })
        );

        // Nothing moved
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.least_unacked(), 1);
        assert!(ledger.is_outstanding(&unsent));
        assert!(ledger.has_buffered_frames());
    }

    #[test]
    fn invalid_id_is_ignored() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();

        let untracked = ControlFrame::blocked(1);

        assert!(!ledger.on_frame_acked(&untracked).unwrap());
        assert!(ledger.on_frame_lost(&untracked).is_ok());
        assert!(!ledger.is_outstanding(&untracked));
        assert!(ledger.retransmit_now(&untracked, &mut session).unwrap());
        assert!(ledger.on_frame_sent(&untracked).is_ok());
        assert!(!ledger.has_pending_retransmission());
        assert_eq!(ledger.least_unsent(), 2);
    }

    #[test]
    fn lost_frame_is_resent_once() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_rst_stream(7, 3, 1200, &mut session).unwrap();
        assert_eq!(ledger.least_unsent(), 2);

        let frame = session.written[0].clone();

        ledger.on_frame_lost(&frame).unwrap();
        ledger.on_frame_lost(&frame).unwrap();
        assert!(ledger.has_pending_retransmission());
        assert_eq!(ledger.next_pending_retransmission(), Some(&frame));

        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(session.written, vec![frame.clone(), frame.clone()]);
        assert_eq!(ledger.least_unsent(), 2);
        assert!(!ledger.has_pending_retransmission());
        assert!(ledger.is_outstanding(&frame));

        // Nothing more to do
        ledger.on_can_write(&mut session).unwrap();
        assert_eq!(session.written.len(), 2);

        assert!(ledger.on_frame_acked(&frame).unwrap());
        assert!(ledger.is_empty());
    }

    #[test]
    fn retransmissions_precede_buffered_frames() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        ledger.buffer_blocked(2, &mut session).unwrap();
        ledger.buffer_blocked(3, &mut session).unwrap();

        let sent = session.written.clone();

        session.blocked = true;
        ledger.buffer_blocked(4, &mut session).unwrap();

        ledger.on_frame_lost(&sent[2]).unwrap();
        ledger.on_frame_lost(&sent[0]).unwrap();

        session.blocked = false;
        session.written.clear();
        ledger.on_can_write(&mut session).unwrap();

        // Lowest lost ID first, then the buffered frame
        assert_eq!(written_ids(&session), vec![1, 3, 4]);
        assert_eq!(ledger.least_unsent(), 5);
    }

    #[test]
    fn blocked_retransmission_stays_pending() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        let frame = session.written[0].clone();

        ledger.on_frame_lost(&frame).unwrap();

        session.blocked = true;
        ledger.on_can_write(&mut session).unwrap();
        assert!(ledger.has_pending_retransmission());

        session.blocked = false;
        ledger.on_can_write(&mut session).unwrap();
        assert!(!ledger.has_pending_retransmission());
        assert_eq!(session.written.len(), 2);
    }

    #[test]
    fn loss_of_acked_frame_is_benign() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        let frame = session.written[0].clone();

        assert!(ledger.on_frame_acked(&frame).unwrap());
        ledger.on_frame_lost(&frame).unwrap();

        assert!(!ledger.has_pending_retransmission());
    }

    #[test]
    fn ack_clears_pending_retransmission() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        let frame = session.written[0].clone();

        ledger.on_frame_lost(&frame).unwrap();
        assert!(ledger.on_frame_acked(&frame).unwrap());

        assert!(!ledger.has_pending_retransmission());
        assert_eq!(ledger.next_pending_retransmission(), None);
    }

    #[test]
    fn loss_of_unsent_frame_is_fatal() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_blocked(1, &mut session).unwrap();

        let mut unsent = ControlFrame::blocked(1);
        unsent.set_id(1);

        assert_eq!(
            ledger.on_frame_lost(&unsent),
            Err(Error::LossOfUnsent {
                id: 1,
                least_unsent: 1
            })
        );
        assert_eq!(
            ledger.retransmit_now(&unsent, &mut session),
            Err(Error::RetransmitOfUnsent {
                id: 1,
                least_unsent: 1
            })
        );
        assert!(!ledger.has_pending_retransmission());
    }

    #[test]
    fn out_of_order_send_is_fatal() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_blocked(1, &mut session).unwrap();
        ledger.buffer_blocked(2, &mut session).unwrap();

        let mut second = ControlFrame::blocked(2);
        second.set_id(2);

        assert_eq!(
            ledger.on_frame_sent(&second),
            Err(Error::OutOfOrderSend {
                id: 2,
                least_unsent: 1
            })
        );
        assert_eq!(ledger.least_unsent(), 1);
    }

    #[test]
    fn ping_only_when_idle() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        assert_eq!(ledger.buffer_ping(&mut session).unwrap(), Some(1));
        assert_eq!(session.written.len(), 1);

        session.blocked = true;
        ledger.buffer_blocked(1, &mut session).unwrap();

        // Dropped, no ID consumed
        assert_eq!(ledger.buffer_ping(&mut session).unwrap(), None);
        assert_eq!(ledger.last_control_frame_id(), 2);

        session.blocked = false;
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(ledger.buffer_ping(&mut session).unwrap(), Some(3));
        assert_eq!(written_ids(&session), vec![1, 2, 3]);
    }

    #[test]
    fn forced_retransmission() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger
            .buffer_go_away(0, 9, "shutting down", &mut session)
            .unwrap();
        let frame = session.written[0].clone();

        ledger.on_frame_lost(&frame).unwrap();

        session.blocked = true;
        assert!(!ledger.retransmit_now(&frame, &mut session).unwrap());
        assert!(ledger.has_pending_retransmission());

        session.blocked = false;
        assert!(ledger.retransmit_now(&frame, &mut session).unwrap());
        assert_eq!(session.written.len(), 2);
        assert!(!ledger.has_pending_retransmission());

        // Reporting the forced copy as sent changes nothing
        ledger.on_frame_sent(&frame).unwrap();
        assert_eq!(ledger.least_unsent(), 2);

        assert!(ledger.on_frame_acked(&frame).unwrap());

        // Acked frames need no retransmission
        assert!(ledger.retransmit_now(&frame, &mut session).unwrap());
        assert_eq!(session.written.len(), 2);
    }

    #[test]
    fn sent_window_update_superseded_on_buffer() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_window_update(4, 1000, &mut session).unwrap();
        let older = session.written[0].clone();
        assert!(ledger.is_outstanding(&older));

        session.blocked = true;
        ledger.buffer_window_update(4, 2000, &mut session).unwrap();

        // Retired without an explicit ack, even though the new one is not sent yet
        assert!(!ledger.is_outstanding(&older));
        assert_eq!(ledger.least_unacked(), 2);

        // Later acks of the retired frame are duplicates
        assert!(!ledger.on_frame_acked(&older).unwrap());
    }

    #[test]
    fn unsent_window_update_dropped() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_window_update(4, 1000, &mut session).unwrap();

        let mut older = ControlFrame::window_update(4, 1000);
        older.set_id(1);
        assert!(ledger.is_outstanding(&older));

        ledger.buffer_window_update(4, 2000, &mut session).unwrap();
        ledger.buffer_window_update(6, 500, &mut session).unwrap();

        assert!(!ledger.is_outstanding(&older));
        assert_eq!(ledger.least_unacked(), 2);
        assert_eq!(ledger.least_unsent(), 2);

        session.blocked = false;
        ledger.on_can_write(&mut session).unwrap();

        // The stale window never goes out
        assert_eq!(written_ids(&session), vec![2, 3]);
        assert_eq!(
            session.written[0],
            ControlFrame::WindowUpdate(crate::frame::WindowUpdateFrame {
                control_frame_id: 2,
                stream_id: 4,
                byte_offset: 2000,
            })
        );
        assert_eq!(ledger.least_unsent(), 4);
        assert!(!ledger.willing_to_write());
    }

    #[test]
    fn unsent_window_update_dropped_behind_other_frames() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_blocked(1, &mut session).unwrap();
        ledger.buffer_window_update(4, 1000, &mut session).unwrap();
        ledger.buffer_blocked(2, &mut session).unwrap();
        ledger.buffer_window_update(4, 2000, &mut session).unwrap();

        // Retired in the middle of the unsent frames
        assert_eq!(ledger.len(), 4);
        assert!(ledger.has_buffered_frames());

        session.blocked = false;
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(written_ids(&session), vec![1, 3, 4]);
        assert_eq!(ledger.least_unsent(), 5);

        for frame in session.written.clone() {
            assert!(ledger.on_frame_acked(&frame).unwrap());
        }

        assert!(ledger.is_empty());
        assert_eq!(ledger.least_unacked(), 5);
    }

    #[test]
    fn window_update_sent_after_write_budget() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        session.blocked = true;
        ledger.buffer_window_update(4, 1000, &mut session).unwrap();
        ledger.buffer_window_update(6, 500, &mut session).unwrap();

        session.blocked = false;
        session.write_budget = Some(1);
        ledger.on_can_write(&mut session).unwrap();

        let first = session.written[0].clone();
        assert!(ledger.is_outstanding(&first));

        // Stream 4 was sent, so the newer update retires it as if acked
        session.write_budget = None;
        ledger.buffer_window_update(4, 2000, &mut session).unwrap();
        ledger.on_can_write(&mut session).unwrap();

        assert!(!ledger.is_outstanding(&first));
        assert_eq!(written_ids(&session), vec![1, 2, 3]);
        assert_eq!(ledger.least_unacked(), 2);
    }

    #[test]
    fn buffered_frames_follow_retransmissions_in_one_call() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        let frame = session.written[0].clone();
        ledger.on_frame_lost(&frame).unwrap();

        session.blocked = true;
        ledger.buffer_blocked(2, &mut session).unwrap();

        session.blocked = false;
        session.written.clear();
        ledger.on_can_write(&mut session).unwrap();

        assert_eq!(written_ids(&session), vec![1, 2]);
        assert!(!ledger.willing_to_write());
    }

    #[test]
    fn new_frame_written_ahead_of_retransmission() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_blocked(1, &mut session).unwrap();
        let frame = session.written[0].clone();
        ledger.on_frame_lost(&frame).unwrap();

        // Nothing was buffered, so the new frame is written at once
        ledger.buffer_blocked(2, &mut session).unwrap();
        assert_eq!(written_ids(&session), vec![1, 2]);
        assert!(ledger.has_pending_retransmission());

        ledger.on_can_write(&mut session).unwrap();
        assert_eq!(written_ids(&session), vec![1, 2, 1]);
    }

    #[test]
    fn lost_window_update_superseded() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_window_update(4, 1000, &mut session).unwrap();
        let older = session.written[0].clone();

        ledger.on_frame_lost(&older).unwrap();
        assert!(ledger.has_pending_retransmission());

        ledger.buffer_window_update(4, 2000, &mut session).unwrap();

        // The stale window is never resent
        assert!(!ledger.has_pending_retransmission());
        assert_eq!(written_ids(&session), vec![1, 2]);
    }

    #[test]
    fn acked_window_update_forgotten() {
        let mut session = MockSession::new();
        let mut ledger = ControlFrameLedger::new();

        ledger.buffer_window_update(4, 1000, &mut session).unwrap();
        let first = session.written[0].clone();
        assert!(ledger.on_frame_acked(&first).unwrap());

        ledger.buffer_window_update(4, 2000, &mut session).unwrap();
        let second = session.written[1].clone();

        assert!(ledger.is_outstanding(&second));
        assert!(ledger.on_frame_acked(&second).unwrap());
        assert!(ledger.is_empty());
    }
}
