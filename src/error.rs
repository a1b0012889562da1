use crate::endpoint::tracker::PacketNumber;
use crate::frame::ControlFrameId;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Reason code handed to [`Session::close_connection`](crate::Session::close_connection).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseCode {
    InternalError,
}

impl CloseCode {
    /// Transport error code as carried by a CONNECTION_CLOSE frame.
    pub fn wire_value(self) -> u64 {
        match self {
            Self::InternalError => 0x1,
        }
    }
}

/// Invariant violations which can only be caused by a bug in the calling stack. Every variant
/// is fatal to the connection.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("Try to send control frames out of order, id: {id} least_unsent: {least_unsent}")]
    OutOfOrderSend {
        id: ControlFrameId,
        least_unsent: ControlFrameId,
    },
    #[error("Try to ack unsent control frame, id: {id} least_unsent: {least_unsent}")]
    AckOfUnsent {
        id: ControlFrameId,
        least_unsent: ControlFrameId,
    },
    #[error("Try to mark unsent control frame as lost, id: {id} least_unsent: {least_unsent}")]
    LossOfUnsent {
        id: ControlFrameId,
        least_unsent: ControlFrameId,
    },
    #[error("Try to retransmit unsent control frame, id: {id} least_unsent: {least_unsent}")]
    RetransmitOfUnsent {
        id: ControlFrameId,
        least_unsent: ControlFrameId,
    },
    #[error("Peer least awaiting ack moved backwards from {current} to {requested}")]
    LowerBoundRetreat {
        current: PacketNumber,
        requested: PacketNumber,
    },
}

impl Error {
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::OutOfOrderSend { .. }
            | Self::AckOfUnsent { .. }
            | Self::LossOfUnsent { .. }
            | Self::RetransmitOfUnsent { .. }
            | Self::LowerBoundRetreat { .. } => CloseCode::InternalError,
        }
    }
}
