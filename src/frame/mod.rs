use std::fmt;

/// Per-connection identifier of an outbound control frame.
pub type ControlFrameId = u64;

/// Marks a frame which is not tracked by the ledger, or which has been acknowledged.
pub const INVALID_CONTROL_FRAME_ID: ControlFrameId = 0;

pub type StreamId = u32;

pub type StreamOffset = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FrameType {
    RstStream,
    GoAway,
    WindowUpdate,
    Blocked,
    StopSending,
    StreamIdBlocked,
    MaxStreamId,
    Ping,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RstStreamFrame {
    pub control_frame_id: ControlFrameId,
    pub stream_id: StreamId,
    pub error_code: u32,
    pub bytes_written: StreamOffset,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GoAwayFrame {
    pub control_frame_id: ControlFrameId,
    pub error_code: u32,
    pub last_good_stream_id: StreamId,
    pub reason: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowUpdateFrame {
    pub control_frame_id: ControlFrameId,
    pub stream_id: StreamId,
    pub byte_offset: StreamOffset,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockedFrame {
    pub control_frame_id: ControlFrameId,
    pub stream_id: StreamId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StopSendingFrame {
    pub control_frame_id: ControlFrameId,
    pub stream_id: StreamId,
    pub application_error_code: u16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamIdBlockedFrame {
    pub control_frame_id: ControlFrameId,
    pub stream_id: StreamId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaxStreamIdFrame {
    pub control_frame_id: ControlFrameId,
    pub max_stream_id: StreamId,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PingFrame {
    pub control_frame_id: ControlFrameId,
}

/// A retransmittable, non-stream signaling frame.
///
/// Frames are built with [`INVALID_CONTROL_FRAME_ID`]; the ledger stamps the real identifier when
/// the frame is buffered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlFrame {
    RstStream(RstStreamFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Blocked(BlockedFrame),
    StopSending(StopSendingFrame),
    StreamIdBlocked(StreamIdBlockedFrame),
    MaxStreamId(MaxStreamIdFrame),
    Ping(PingFrame),
}

impl ControlFrame {
    pub fn rst_stream(stream_id: StreamId, error_code: u32, bytes_written: StreamOffset) -> Self {
        Self::RstStream(RstStreamFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            stream_id,
            error_code,
            bytes_written,
        })
    }

    pub fn go_away(error_code: u32, last_good_stream_id: StreamId, reason: &str) -> Self {
        Self::GoAway(GoAwayFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            error_code,
            last_good_stream_id,
            reason: reason.to_owned(),
        })
    }

    pub fn window_update(stream_id: StreamId, byte_offset: StreamOffset) -> Self {
        Self::WindowUpdate(WindowUpdateFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            stream_id,
            byte_offset,
        })
    }

    pub fn blocked(stream_id: StreamId) -> Self {
        Self::Blocked(BlockedFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            stream_id,
        })
    }

    pub fn stop_sending(stream_id: StreamId, application_error_code: u16) -> Self {
        Self::StopSending(StopSendingFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            stream_id,
            application_error_code,
        })
    }

    pub fn stream_id_blocked(stream_id: StreamId) -> Self {
        Self::StreamIdBlocked(StreamIdBlockedFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            stream_id,
        })
    }

    pub fn max_stream_id(max_stream_id: StreamId) -> Self {
        Self::MaxStreamId(MaxStreamIdFrame {
            control_frame_id: INVALID_CONTROL_FRAME_ID,
            max_stream_id,
        })
    }

    pub fn ping() -> Self {
        Self::Ping(PingFrame::default())
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::RstStream(_) => FrameType::RstStream,
            Self::GoAway(_) => FrameType::GoAway,
            Self::WindowUpdate(_) => FrameType::WindowUpdate,
            Self::Blocked(_) => FrameType::Blocked,
            Self::StopSending(_) => FrameType::StopSending,
            Self::StreamIdBlocked(_) => FrameType::StreamIdBlocked,
            Self::MaxStreamId(_) => FrameType::MaxStreamId,
            Self::Ping(_) => FrameType::Ping,
        }
    }

    pub fn id(&self) -> ControlFrameId {
        match self {
            Self::RstStream(frame) => frame.control_frame_id,
            Self::GoAway(frame) => frame.control_frame_id,
            Self::WindowUpdate(frame) => frame.control_frame_id,
            Self::Blocked(frame) => frame.control_frame_id,
            Self::StopSending(frame) => frame.control_frame_id,
            Self::StreamIdBlocked(frame) => frame.control_frame_id,
            Self::MaxStreamId(frame) => frame.control_frame_id,
            Self::Ping(frame) => frame.control_frame_id,
        }
    }

    /// Overwrites the ID assigned by the ledger. Frames reported back to the ledger are matched
    /// by ID alone.
    pub fn set_id(&mut self, id: ControlFrameId) {
        let slot = match self {
            Self::RstStream(frame) => &mut frame.control_frame_id,
            Self::GoAway(frame) => &mut frame.control_frame_id,
            Self::WindowUpdate(frame) => &mut frame.control_frame_id,
            Self::Blocked(frame) => &mut frame.control_frame_id,
            Self::StopSending(frame) => &mut frame.control_frame_id,
            Self::StreamIdBlocked(frame) => &mut frame.control_frame_id,
            Self::MaxStreamId(frame) => &mut frame.control_frame_id,
            Self::Ping(frame) => &mut frame.control_frame_id,
        };

        *slot = id;
    }

    pub fn has_valid_id(&self) -> bool {
        self.id() != INVALID_CONTROL_FRAME_ID
    }

    /// Stream whose flow control window this frame updates, if it is a window update.
    pub fn window_update_stream(&self) -> Option<StreamId> {
        match self {
            Self::WindowUpdate(frame) => Some(frame.stream_id),
            _ => None,
        }
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RstStream(frame) => write!(
                f,
                "RST_STREAM #{} stream={} error={} offset={}",
                frame.control_frame_id, frame.stream_id, frame.error_code, frame.bytes_written
            ),
            Self::GoAway(frame) => write!(
                f,
                "GOAWAY #{} error={} last_good_stream={} reason={:?}",
                frame.control_frame_id, frame.error_code, frame.last_good_stream_id, frame.reason
            ),
            Self::WindowUpdate(frame) => write!(
                f,
                "WINDOW_UPDATE #{} stream={} offset={}",
                frame.control_frame_id, frame.stream_id, frame.byte_offset
            ),
            Self::Blocked(frame) => write!(
                f,
                "BLOCKED #{} stream={}",
                frame.control_frame_id, frame.stream_id
            ),
            Self::StopSending(frame) => write!(
                f,
                "STOP_SENDING #{} stream={} error={}",
                frame.control_frame_id, frame.stream_id, frame.application_error_code
            ),
            Self::StreamIdBlocked(frame) => write!(
                f,
                "STREAM_ID_BLOCKED #{} stream={}",
                frame.control_frame_id, frame.stream_id
            ),
            Self::MaxStreamId(frame) => write!(
                f,
                "MAX_STREAM_ID #{} max_stream={}",
                frame.control_frame_id, frame.max_stream_id
            ),
            Self::Ping(frame) => write!(f, "PING #{}", frame.control_frame_id),
        }
    }
}
