use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use ackledger::{CloseCode, Config, ControlFrame, Endpoint, FrameType, PacketNumber, Session};
use rand::Rng;
use tracing::{debug, info, warn};

const FRAME_COUNT: u32 = 500;
const LOSS_RATE: f64 = 0.15;
const MAX_EXTRA_DELAY_TICKS: u32 = 3;
const PACKETS_PER_TICK: usize = 6;
const ACK_INTERVAL_TICKS: u32 = 4;
const LOSS_TIMEOUT_TICKS: u32 = 25;
const REORDER_THRESHOLD: u64 = 3;
const MAX_TICKS: u32 = 100_000;

static TICK: Duration = Duration::from_millis(5);

struct Sender {
    outbox: Vec<ControlFrame>,
    budget: usize,
    // Frames written per type, retransmissions included
    written: HashMap<FrameType, u32>,
}

impl Session for Sender {
    fn write_frame(&mut self, frame: &ControlFrame) -> bool {
        if self.budget == 0 {
            return false;
        }

        self.budget -= 1;
        *self.written.entry(frame.frame_type()).or_insert(0) += 1;
        self.outbox.push(frame.clone());
        true
    }

    fn close_connection(&mut self, code: CloseCode, details: &str) {
        warn!(code = code.wire_value(), "sender closed: {}", details);
    }
}

struct Receiver {}

impl Session for Receiver {
    fn write_frame(&mut self, _frame: &ControlFrame) -> bool {
        true
    }

    fn close_connection(&mut self, code: CloseCode, details: &str) {
        warn!(code = code.wire_value(), "receiver closed: {}", details);
    }

    fn report_reordering(&mut self, distance: u64) {
        debug!(distance, "reordered packet");
    }
}

struct InFlight {
    frame: ControlFrame,
    sent_tick: u32,
}

fn next_frame(rng: &mut impl Rng, n: u32) -> ControlFrame {
    let stream_id = rng.gen_range(0..8);

    match rng.gen_range(0..10) {
        0 => ControlFrame::rst_stream(stream_id, 6, u64::from(n) * 100),
        1 => ControlFrame::blocked(stream_id),
        2 => ControlFrame::max_stream_id(n * 2),
        3 => ControlFrame::stop_sending(stream_id, 1),
        _ => ControlFrame::window_update(stream_id, u64::from(n) * 1024),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut rng = rand::thread_rng();

    let config = Config {
        max_ack_ranges: 32,
        save_timestamps: true,
        ..Default::default()
    };

    let mut sender = Sender {
        outbox: Vec::new(),
        budget: 0,
        written: HashMap::new(),
    };
    let mut receiver = Receiver {};

    let mut tx_endpoint = Endpoint::default();
    let mut rx_endpoint = Endpoint::new(config);

    let start = Instant::now();

    let mut frames_buffered = 0;
    let mut next_packet_number: PacketNumber = 1;
    let mut in_flight: BTreeMap<PacketNumber, InFlight> = BTreeMap::new();
    let mut link: VecDeque<(u32, PacketNumber)> = VecDeque::new();
    let mut packets_sent = 0;
    let mut packets_dropped = 0;
    let mut frames_lost = 0;

    let mut tick = 0;

    while tick < MAX_TICKS {
        let now = start + TICK * tick;

        // Offer a handful of new frames
        for _ in 0..rng.gen_range(0..4) {
            if frames_buffered == FRAME_COUNT {
                break;
            }

            frames_buffered += 1;

            if frames_buffered % 50 == 0 {
                tx_endpoint.send_ping(&mut sender);
            } else {
                let frame = next_frame(&mut rng, frames_buffered);
                tx_endpoint.send_control_frame(frame, &mut sender);
            }
        }

        sender.budget = PACKETS_PER_TICK;
        tx_endpoint.on_can_write(&mut sender);

        for frame in sender.outbox.drain(..) {
            let packet_number = next_packet_number;
            next_packet_number += 1;
            packets_sent += 1;

            in_flight.insert(
                packet_number,
                InFlight {
                    frame,
                    sent_tick: tick,
                },
            );

            if rng.gen_bool(LOSS_RATE) {
                packets_dropped += 1;
                continue;
            }

            let deliver_tick = tick + 1 + rng.gen_range(0..=MAX_EXTRA_DELAY_TICKS);
            link.push_back((deliver_tick, packet_number));
        }

        // Deliver whatever has arrived
        let mut pending = VecDeque::new();
        while let Some((deliver_tick, packet_number)) = link.pop_front() {
            if deliver_tick <= tick {
                rx_endpoint.on_packet_received(packet_number, now, &mut receiver);
            } else {
                pending.push_back((deliver_tick, packet_number));
            }
        }
        link = pending;

        if tick % ACK_INTERVAL_TICKS == 0 || rx_endpoint.should_ack_immediately() {
            let summary = rx_endpoint.ack_summary(now).clone();

            if !rng.gen_bool(LOSS_RATE) {
                let largest_acked = summary.largest_acked().unwrap_or(0);

                let packet_numbers: Vec<PacketNumber> = in_flight.keys().copied().collect();
                for packet_number in packet_numbers {
                    let timed_out = tick - in_flight[&packet_number].sent_tick > LOSS_TIMEOUT_TICKS;

                    if summary.packets().contains(packet_number) {
                        if let Some(entry) = in_flight.remove(&packet_number) {
                            tx_endpoint.on_frame_acked(&entry.frame, &mut sender);
                        }
                    } else if packet_number + REORDER_THRESHOLD <= largest_acked || timed_out {
                        if let Some(entry) = in_flight.remove(&packet_number) {
                            frames_lost += 1;
                            tx_endpoint.on_frame_lost(&entry.frame, &mut sender);
                        }
                    }
                }

                let least_unacked = in_flight
                    .keys()
                    .next()
                    .copied()
                    .unwrap_or(next_packet_number);
                rx_endpoint.on_stop_waiting(least_unacked, &mut receiver);
            }
        }

        if tx_endpoint.is_closed() || rx_endpoint.is_closed() {
            warn!(tick, "connection closed, giving up");
            break;
        }

        if frames_buffered == FRAME_COUNT && tx_endpoint.ledger().is_empty() {
            break;
        }

        tick += 1;
    }

    let mut written: Vec<_> = sender.written.iter().collect();
    written.sort_by_key(|&(_, &count)| std::cmp::Reverse(count));
    for (frame_type, count) in written {
        info!(?frame_type, count, "frames written");
    }

    let stats = rx_endpoint.tracker().stats();

    info!(
        ticks = tick,
        frames = frames_buffered,
        packets_sent,
        packets_dropped,
        frames_lost,
        unacked = tx_endpoint.ledger().len(),
        "simulation finished"
    );
    info!(
        packets_reordered = stats.packets_reordered,
        max_sequence_reordering = stats.max_sequence_reordering,
        max_time_reordering_ms = stats.max_time_reordering.as_millis() as u64,
        "receive stats"
    );
}
