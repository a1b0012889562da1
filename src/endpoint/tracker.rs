use std::time::{Duration, Instant};

use tracing::{error, trace, warn};

use super::Session;
use crate::error::{Error, Result};
use crate::interval_set::IntervalSet;

pub type PacketNumber = u64;

/// An ack should be sent immediately if the newest run of received packets after a gap is no
/// longer than this.
pub const MAX_PACKETS_AFTER_NEW_MISSING: u64 = 4;

// Receipt times are only reported for packets this close to the largest acked packet
const MAX_TIMESTAMP_DISTANCE: u64 = u8::MAX as u64;

#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of ranges reported in an ack summary. Ranges holding the smallest packet
    /// numbers are dropped first. Zero means unlimited.
    ///
    /// Default value: 0
    pub max_ack_ranges: usize,

    /// Whether receipt times of individual packets are reported in ack summaries.
    ///
    /// Default value: false
    pub save_timestamps: bool,

    /// The packet number the peer starts counting from. Packets below it are never considered
    /// missing.
    ///
    /// Default value: 1
    pub first_packet_number: PacketNumber,

    /// When set, the peer may start at an arbitrary packet number, and no packet is considered
    /// missing until the peer reports its least packet awaiting ack.
    ///
    /// Default value: false
    pub accept_random_initial_packet_number: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ack_ranges: 0,
            save_timestamps: false,
            first_packet_number: 1,
            accept_random_initial_packet_number: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Packets which arrived after a higher numbered packet.
    pub packets_reordered: u64,
    /// Largest distance between a reordered packet and the largest packet seen before it.
    pub max_sequence_reordering: u64,
    /// Largest delay between the largest packet and a reordered packet arriving after it.
    pub max_time_reordering: Duration,
}

/// The acknowledgment state which is handed to the packet writer.
#[derive(Clone, Debug, Default)]
pub struct AckSummary {
    largest_acked: Option<PacketNumber>,
    packets: IntervalSet,
    ack_delay: Option<Duration>,
    received_packet_times: Vec<(PacketNumber, Instant)>,
}

impl AckSummary {
    /// Largest packet number received so far, if any.
    pub fn largest_acked(&self) -> Option<PacketNumber> {
        self.largest_acked
    }

    pub fn packets(&self) -> &IntervalSet {
        &self.packets
    }

    /// Time since the largest acked packet was received. `None` if nothing has been received,
    /// which is reported as an infinite delay.
    pub fn ack_delay(&self) -> Option<Duration> {
        self.ack_delay
    }

    /// Receipt times of packets received since the previous summary, in arrival order.
    pub fn received_packet_times(&self) -> &[(PacketNumber, Instant)] {
        &self.received_packet_times
    }
}

/// Records which packets have been received from the peer and builds the acks which report them.
#[derive(Debug)]
pub struct ReceivedPacketTracker {
    config: Config,

    summary: AckSummary,

    // Set when the summary has changed since it was last built
    ack_summary_updated: bool,

    time_largest_observed: Option<Instant>,

    // Packets below this have been forgotten
    peer_least_packet_awaiting_ack: Option<PacketNumber>,

    least_received: Option<PacketNumber>,

    stats: ReceiveStats,
}

impl Default for ReceivedPacketTracker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl ReceivedPacketTracker {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            summary: AckSummary::default(),
            ack_summary_updated: false,
            time_largest_observed: None,
            peer_least_packet_awaiting_ack: None,
            least_received: None,
            stats: ReceiveStats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_max_ack_ranges(&mut self, max_ack_ranges: usize) {
        self.config.max_ack_ranges = max_ack_ranges;
    }

    pub fn set_save_timestamps(&mut self, save_timestamps: bool) {
        self.config.save_timestamps = save_timestamps;
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn peer_least_packet_awaiting_ack(&self) -> Option<PacketNumber> {
        self.peer_least_packet_awaiting_ack
    }

    /// Returns true if the summary changed since it was last built.
    pub fn is_ack_summary_updated(&self) -> bool {
        self.ack_summary_updated
    }

    /// Records the receipt of `packet_number`, which must not have been received before.
    pub fn record_packet_received<C>(
        &mut self,
        packet_number: PacketNumber,
        receipt_time: Instant,
        ctx: &mut C,
    ) where
        C: Session,
    {
        debug_assert!(
            !self.summary.packets.contains(packet_number),
            "packet {} already received",
            packet_number
        );

        if !self.ack_summary_updated {
            // First packet since the last ack
            self.summary.received_packet_times.clear();
        }
        self.ack_summary_updated = true;

        match self.summary.largest_acked {
            Some(largest_acked) if packet_number < largest_acked => {
                let distance = largest_acked - packet_number;
                let time = self
                    .time_largest_observed
                    .map_or(Duration::ZERO, |t| receipt_time.saturating_duration_since(t));

                trace!(packet_number, distance, ?time, "reordered packet");

                self.stats.packets_reordered += 1;
                self.stats.max_sequence_reordering =
                    self.stats.max_sequence_reordering.max(distance);
                self.stats.max_time_reordering = self.stats.max_time_reordering.max(time);

                ctx.report_reordering(distance);
                ctx.report_reordering_time(time);
            }
            _ => {
                self.summary.largest_acked = Some(packet_number);
                self.time_largest_observed = Some(receipt_time);
            }
        }

        self.summary.packets.add(packet_number);

        if self.config.save_timestamps {
            match self.summary.received_packet_times.last() {
                Some(&(_, last_time)) if receipt_time < last_time => {
                    warn!(
                        packet_number,
                        "Receive time went backwards, dropping receipt time"
                    );
                }
                _ => {
                    self.summary
                        .received_packet_times
                        .push((packet_number, receipt_time));
                }
            }
        }

        self.least_received = Some(match self.least_received {
            Some(least) => least.min(packet_number),
            None => packet_number,
        });
    }

    /// Returns true if `packet_number` is below the largest received packet and has not been
    /// received.
    pub fn is_missing(&self, packet_number: PacketNumber) -> bool {
        match self.summary.largest_acked {
            Some(largest_acked) => {
                packet_number < largest_acked && !self.summary.packets.contains(packet_number)
            }
            None => false,
        }
    }

    /// Returns true if `packet_number` has not been received and has not been given up on.
    pub fn is_awaiting(&self, packet_number: PacketNumber) -> bool {
        if let Some(least) = self.peer_least_packet_awaiting_ack {
            if packet_number < least {
                return false;
            }
        }

        !self.summary.packets.contains(packet_number)
    }

    /// Brings the ack summary up to date and returns it.
    pub fn build_ack_summary(&mut self, approx_now: Instant) -> &AckSummary {
        self.ack_summary_updated = false;

        self.summary.ack_delay = self
            .time_largest_observed
            .map(|t| approx_now.saturating_duration_since(t));

        if self.config.max_ack_ranges > 0 {
            while self.summary.packets.num_intervals() > self.config.max_ack_ranges {
                self.summary.packets.remove_smallest_interval();
            }
        }

        if let Some(largest_acked) = self.summary.largest_acked {
            self.summary
                .received_packet_times
                .retain(|&(pn, _)| largest_acked - pn < MAX_TIMESTAMP_DISTANCE);
        }

        &self.summary
    }

    /// Stops tracking packets below `least_unacked`, as reported by the peer. The bound may never
    /// move backwards.
    pub fn advance_lower_bound(&mut self, least_unacked: Option<PacketNumber>) -> Result<()> {
        let Some(least_unacked) = least_unacked else {
            return Ok(());
        };

        if let Some(current) = self.peer_least_packet_awaiting_ack {
            if least_unacked < current {
                error!(
                    current,
                    requested = least_unacked,
                    "Peer least awaiting ack moved backwards"
                );
                return Err(Error::LowerBoundRetreat {
                    current,
                    requested: least_unacked,
                });
            }

            if least_unacked == current {
                return Ok(());
            }
        }

        self.peer_least_packet_awaiting_ack = Some(least_unacked);

        if self.summary.packets.remove_up_to(least_unacked) {
            // Ack needs to reflect the pruned ranges
            self.ack_summary_updated = true;
        }

        debug_assert!(self
            .summary
            .packets
            .min()
            .map_or(true, |min| min >= least_unacked));

        Ok(())
    }

    /// Returns true if any packet between the starting floor and the largest received packet is
    /// missing.
    pub fn has_missing_packets(&self) -> bool {
        let packets = &self.summary.packets;

        let Some(min) = packets.min() else {
            return false;
        };

        if packets.num_intervals() > 1 {
            return true;
        }

        if self.config.accept_random_initial_packet_number {
            return self
                .peer_least_packet_awaiting_ack
                .map_or(false, |least| min > least);
        }

        let floor = self.config.first_packet_number;
        let least = self
            .peer_least_packet_awaiting_ack
            .map_or(floor, |least| least.max(floor));

        min > least
    }

    /// Returns true if a gap exists and only a few packets have arrived since it opened.
    pub fn has_new_missing_packets(&self) -> bool {
        self.has_missing_packets()
            && self
                .summary
                .packets
                .last_interval_length()
                .map_or(false, |len| len <= MAX_PACKETS_AFTER_NEW_MISSING)
    }

    pub fn largest_observed(&self) -> Option<PacketNumber> {
        self.summary.largest_acked
    }

    /// The number the peer started counting from.
    pub fn first_received_packet_number(&self) -> PacketNumber {
        if !self.config.accept_random_initial_packet_number {
            return self.config.first_packet_number;
        }

        match self.least_received {
            Some(least) => least,
            None => {
                error!("No packets have been received yet");
                self.config.first_packet_number
            }
        }
    }
}
