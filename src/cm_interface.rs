// all the same numeric shape to allow casting/interop in counters and logs
pub type PacketId = u64;
pub type UpdateId = u64;

/// Simulated time in seconds (post-speedup scale). The clock is virtual:
/// the event loop advances it by one connection interval per tick, so runs
/// and tests never touch the wall clock.
pub type SimTime = f64;

/// Active channel index of a node (the source models one active channel
/// rather than a full hop set).
pub type Channel = u8;

/// Number of channels the master cycles through.
pub const CHANNEL_COUNT: Channel = 10;

/// Communication-event interval before speedup (seconds).
pub const BASE_CONNECTION_INTERVAL: SimTime = 0.0225;

/// Channel-map renegotiation period before speedup (seconds).
pub const BASE_CHANNEL_UPDATE_INTERVAL: SimTime = 1.5;

/// Update-sent-to-activation delay, in connection intervals.
pub const ACTIVATION_DELAY_INTERVALS: SimTime = 20.0;

/// Link timeout before speedup (seconds).
pub const BASE_TIMEOUT_DURATION: SimTime = 4.0;

/// Probability per tick that a node queues fresh application data.
pub const DATA_GENERATION_PROBABILITY: f64 = 0.3;

// ============================================================================
// Packets
// ============================================================================

/// Everything that crosses the link in either direction. Packets are plain
/// values; identity beyond the carried id does not matter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    /// Application data from either node.
    Data { id: PacketId },

    /// Master proposes switching to `channel` at the activation time the
    /// registry holds for `update_id`.
    ChannelUpdate { channel: Channel, update_id: UpdateId },

    /// Keep-alive with no payload. Never enters the pending slot, never
    /// retransmitted.
    Empty { seq: PacketId },

    /// First-hop acknowledgment, Slave -> Master. `channel_ack` marks that
    /// the acknowledged packet was a ChannelUpdate.
    Ack1 { acked_id: PacketId, channel_ack: bool },

    /// Second-hop acknowledgment, Master -> Slave (Algorithm 2 only).
    Ack2 { acked_id: PacketId },
}

impl Packet {
    pub fn is_empty(&self) -> bool {
        matches!(self, Packet::Empty { .. })
    }

    pub fn is_channel_update(&self) -> bool {
        matches!(self, Packet::ChannelUpdate { .. })
    }

    /// The id Ack1 echoes back: data id, update id, or empty-packet sequence.
    pub fn packet_id(&self) -> PacketId {
        match *self {
            Packet::Data { id } => id,
            Packet::ChannelUpdate { update_id, .. } => update_id,
            Packet::Empty { seq } => seq,
            Packet::Ack1 { acked_id, .. } | Packet::Ack2 { acked_id } => acked_id,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Which side of the link timed out first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Master saw no data and no Ack1 within the timeout window.
    MasterTimeout,
    /// Slave saw no data within the timeout window.
    SlaveTimeout,
}

/// Narration events emitted by the simulator as it processes ticks.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// A new channel update (or back-off) was scheduled.
    UpdateGenerated {
        update_id: UpdateId,
        target: Channel,
        backoff: bool,
        activation_time: SimTime,
    },
    /// Master put a packet on the air.
    MasterSent {
        event: u64,
        packet: Packet,
        retry_count: u32,
        error_rate: f64,
        master_channel: Channel,
        slave_channel: Channel,
    },
    /// The Master->Slave hop lost the packet.
    MasterLost { event: u64, packet: Packet, will_retry: bool },
    /// Slave received a packet. `expired` is set for a ChannelUpdate whose
    /// activation time has already passed (ack-only, no channel action).
    SlaveReceived { event: u64, packet: Packet, expired: bool },
    /// Slave buffered a proposed channel, waiting for activation (alg 1)
    /// or for Ack2 (alg 2).
    SlaveBuffered { event: u64, channel: Channel, activation_time: SimTime },
    /// Slave replied with Ack1, optionally piggy-backing one data packet.
    SlaveReplied { event: u64, ack: Packet, data: Option<Packet> },
    /// The Slave->Master hop lost the reply.
    ReplyLost { event: u64, ack: Packet, will_retry: bool },
    /// Master confirmed a channel-update handshake (Algorithm 2).
    Ack2Sent { event: u64, update_id: UpdateId },
    /// A scheduled update took effect on the link.
    Activated {
        update_id: UpdateId,
        backoff: bool,
        master_from: Channel,
        master_to: Channel,
        slave_from: Channel,
        slave_to: Channel,
    },
    /// An update reached its activation time without changing either channel
    /// while the channels stayed aligned; the error model will hold the
    /// maximum rate until a genuine change clears it.
    ActivationMissed { update_id: UpdateId },
    /// Algorithm 2: the activation deadline passed without a completed
    /// handshake; the update is lost.
    UpdateExpired { update_id: UpdateId },
    /// The link went down, terminally.
    Disconnected {
        cause: DisconnectCause,
        master_channel: Channel,
        slave_channel: Channel,
    },
}

/// Trait for consuming simulator narration.
pub trait EventSink {
    fn log(&mut self, now: SimTime, event: Event);
}

/// No-op event sink for batch runs and tests (zero overhead).
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _now: SimTime, _event: Event) {
        // Intentionally empty - compiler should optimize this away
    }
}

/// Console sink producing the human-readable progress lines of the CLI.
/// Lines are prefixed with the simulated timestamp; none of them is ever a
/// bare integer, so the final-line stdout contract stays intact.
pub struct LoggingEventSink {
    enabled: bool,
}

impl LoggingEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, now: SimTime, event: Event) {
        if !self.enabled {
            return;
        }

        match event {
            Event::UpdateGenerated {
                update_id,
                target,
                backoff,
                activation_time,
            } => {
                if backoff {
                    println!(
                        "[{:9.4}] update #{}: backing off to channel {} (activates {:.4}, fixed once assigned)",
                        now, update_id, target, activation_time
                    );
                } else {
                    println!(
                        "[{:9.4}] update #{}: proposing channel {} (activates {:.4}, fixed once assigned)",
                        now, update_id, target, activation_time
                    );
                }
            }
            Event::MasterSent {
                event,
                packet,
                retry_count,
                error_rate,
                master_channel,
                slave_channel,
            } => {
                let retry = if retry_count > 0 {
                    format!(" retry {}", retry_count)
                } else {
                    String::new()
                };
                println!(
                    "[{:9.4}] ev #{}: master sent {:?}{} (err {:.2}, m:{} s:{})",
                    now, event, packet, retry, error_rate, master_channel, slave_channel
                );
            }
            Event::MasterLost { event, packet, will_retry } => {
                println!(
                    "[{:9.4}] ev #{}: lost {:?} ({})",
                    now,
                    event,
                    packet,
                    if will_retry { "will retry" } else { "not retried" }
                );
            }
            Event::SlaveReceived { event, packet, expired } => {
                if expired {
                    println!(
                        "[{:9.4}] ev #{}: slave received {:?} past its activation time, ack only",
                        now, event, packet
                    );
                } else {
                    println!("[{:9.4}] ev #{}: slave received {:?}", now, event, packet);
                }
            }
            Event::SlaveBuffered { event, channel, activation_time } => {
                println!(
                    "[{:9.4}] ev #{}: slave holding channel {} until {:.4}",
                    now, event, channel, activation_time
                );
            }
            Event::SlaveReplied { event, ack, data } => match data {
                Some(data) => println!(
                    "[{:9.4}] ev #{}: slave replied {:?} + {:?}",
                    now, event, ack, data
                ),
                None => println!("[{:9.4}] ev #{}: slave replied {:?}", now, event, ack),
            },
            Event::ReplyLost { event, ack, will_retry } => {
                println!(
                    "[{:9.4}] ev #{}: reply {:?} lost ({})",
                    now,
                    event,
                    ack,
                    if will_retry { "master will retry" } else { "no retry" }
                );
            }
            Event::Ack2Sent { event, update_id } => {
                println!("[{:9.4}] ev #{}: master sent Ack2 for update #{}", now, event, update_id);
            }
            Event::Activated {
                update_id,
                backoff,
                master_from,
                master_to,
                slave_from,
                slave_to,
            } => {
                println!(
                    "[{:9.4}] update #{} activated{}: master {} -> {}, slave {} -> {}",
                    now,
                    update_id,
                    if backoff { " (back-off)" } else { "" },
                    master_from,
                    master_to,
                    slave_from,
                    slave_to
                );
            }
            Event::ActivationMissed { update_id } => {
                println!(
                    "[{:9.4}] update #{} missed with channels aligned; error rate held at maximum",
                    now, update_id
                );
            }
            Event::UpdateExpired { update_id } => {
                println!(
                    "[{:9.4}] update #{} expired: no Ack2 before its activation time",
                    now, update_id
                );
            }
            Event::Disconnected {
                cause,
                master_channel,
                slave_channel,
            } => {
                let reason = match cause {
                    DisconnectCause::MasterTimeout => "master timed out waiting for Ack1/data",
                    DisconnectCause::SlaveTimeout => "slave timed out waiting for data",
                };
                println!(
                    "[{:9.4}] DISCONNECTED: {} (m:{} s:{})",
                    now, reason, master_channel, slave_channel
                );
            }
        }
    }
}
