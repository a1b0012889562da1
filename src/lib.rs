/*

ackledger tracks the two halves of connection reliability that are not stream data: outgoing
control frames, which must reach the peer, and incoming packets, which must be acknowledged.

# Control frames

Control frames (RST_STREAM, GOAWAY, WINDOW_UPDATE, BLOCKED, STOP_SENDING, STREAM_ID_BLOCKED,
MAX_STREAM_ID, PING) are handed to the ledger, which assigns each a control frame ID. IDs start at
1, increase by one per frame, and are never reused. ID 0 is reserved: a frame carrying it is either
not tracked by the ledger, or has been acknowledged.

The ledger keeps three counters:

  least_unacked <= least_unsent <= last_control_frame_id + 1

Frames are held in a queue covering [least_unacked, last_control_frame_id]. A frame is appended
when buffered, sent in ID order as the connection allows, and marked as acked in place (by clearing
its ID) when the peer acknowledges it. Acked frames are only removed once they reach the front of
the queue, so the queue may contain holes:

  least_unacked      least_unsent
  v                  v
  *0**0*00**0***0****#########

Frames reported lost go into a set of pending retransmissions. When the connection can write,
pending retransmissions are sent first, lowest ID first, and buffered frames follow. Writing stops
as soon as the connection reports that it is write blocked; the caller tries again later.

A PING is only buffered when nothing else is waiting to be sent, since any other frame already
elicits an ack.

Only the latest WINDOW_UPDATE of a stream carries useful information. When a newer window update
for the same stream is buffered, an older one that already went out is treated as if it had been
acked, so it is neither retransmitted nor waited on. An older one still waiting to be sent is
dropped in place and never written.

# Received packets

The tracker records every packet number received from the peer in an interval set, along with the
time the largest packet arrived. On request it builds an ack summary: the largest packet, the set
of received packets, the delay since the largest packet arrived, and (optionally) the receipt
times of packets received since the previous summary.

Packets numbered lower than the largest seen are counted as reordered, and the distance and delay
are reported.

Memory is bounded in two ways. When a maximum number of ack ranges is configured, the ranges
holding the smallest packet numbers are dropped when a summary is built. When the peer reports the
least packet it is still waiting on an ack for, everything below it is forgotten. That bound may
never move backwards.

A gap between the starting packet number and the largest received packet means packets are
missing. When only a few packets have arrived since the newest gap opened, the gap is new and an
ack should go out immediately.

# Errors

Some inputs can only be produced by a bug elsewhere in the stack: sending frames out of order, or
acking, losing, or retransmitting a frame that was never sent, or the peer's lower bound moving
backwards. These are returned as errors, and the endpoint closes the connection with an internal
error in response. Duplicate and stale events (a second ack of the same frame, loss of an acked
frame) are expected on a lossy network and are ignored.

*/

pub mod endpoint;
mod error;
pub mod frame;
mod interval_set;

pub use endpoint::ledger::ControlFrameLedger;
pub use endpoint::tracker::{AckSummary, Config, PacketNumber, ReceiveStats, ReceivedPacketTracker};
pub use endpoint::{Endpoint, Session, StateId};
pub use error::{CloseCode, Error, Result};
pub use frame::{ControlFrame, ControlFrameId, FrameType, StreamId, INVALID_CONTROL_FRAME_ID};
pub use interval_set::IntervalSet;
