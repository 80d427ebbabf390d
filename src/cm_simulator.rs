use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cm_activation::ActivationEngine;
use crate::cm_config::{Algorithm, ConfigError, SimConfig, SimParams};
use crate::cm_error_model::ErrorRateModel;
use crate::cm_interface::{
    Event, EventSink, Packet, PacketId, SimTime, DATA_GENERATION_PROBABILITY,
};
use crate::cm_link::{HandshakeState, Link};
use crate::cm_registry::{UpdateRegistry, UpdateState};
use crate::cm_updates::UpdateGenerator;

// ============================================================================
// Pending Transmission
// ============================================================================

/// The single non-empty Master->Slave packet awaiting Ack1. Empty packets
/// never occupy this slot and are never retried.
#[derive(Debug, Clone, Copy)]
struct PendingTransmission {
    packet: Packet,
    retry_count: u32,
    needs_retry: bool,
}

// ============================================================================
// Simulator
// ============================================================================

/// Per-run simulation state: the link, the update machinery, both outbound
/// queues, and the virtual clock. Everything lives on this struct; nothing
/// survives across independent runs.
pub struct Simulator<S: EventSink> {
    algorithm: Algorithm,
    params: SimParams,
    seed: [u8; 32],
    rng: StdRng,

    clock: SimTime,
    link: Link,
    registry: UpdateRegistry,
    error_model: ErrorRateModel,
    generator: UpdateGenerator,
    activation: ActivationEngine,

    master_outbound: VecDeque<Packet>,
    slave_outbound: VecDeque<Packet>,
    pending: Option<PendingTransmission>,

    event_counter: u64,
    retransmissions: u64,
    master_packet_id: PacketId,
    slave_packet_id: PacketId,
    empty_seq: PacketId,

    sink: S,
}

/// End-of-run digest for the CLI epilogue and the batch driver.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub event_count: u64,
    pub master_channel: u8,
    pub slave_channel: u8,
    pub disconnected: bool,
    pub disconnect_time: Option<SimTime>,
    pub retransmissions: u64,
    pub sim_time: SimTime,
    pub seed: [u8; 32],
}

impl<S: EventSink> Simulator<S> {
    /// Validate the configuration and build a fresh run. Fails before any
    /// simulation state exists.
    pub fn new(config: &SimConfig, sink: S) -> Result<Self, ConfigError> {
        let params = config.build_params()?;
        let seed = config.seed.unwrap_or_else(|| {
            let mut seed = [0u8; 32];
            rand::thread_rng().fill(&mut seed);
            seed
        });

        Ok(Self {
            algorithm: config.algorithm,
            params,
            seed,
            rng: StdRng::from_seed(seed),
            clock: 0.0,
            link: Link::new(),
            registry: UpdateRegistry::new(),
            error_model: ErrorRateModel::new(
                config.initial_error_rate,
                config.max_error_rate,
                config.merge_success_rate,
                params.channel_update_interval,
            ),
            generator: UpdateGenerator::new(
                params.channel_update_interval,
                params.channel_activation_delay,
            ),
            activation: ActivationEngine::new(config.algorithm),
            master_outbound: VecDeque::new(),
            slave_outbound: VecDeque::new(),
            pending: None,
            event_counter: 0,
            retransmissions: 0,
            master_packet_id: 0,
            slave_packet_id: 0,
            empty_seq: 0,
            sink,
        })
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn event_count(&self) -> u64 {
        self.event_counter
    }

    pub fn is_running(&self) -> bool {
        self.link.connected && self.clock < self.params.run_duration
    }

    /// Run to completion (duration elapsed or disconnection) and return the
    /// communication-event count, the headline metric.
    pub fn run(&mut self) -> u64 {
        while self.is_running() {
            self.tick();
        }
        self.event_counter
    }

    /// One tick: error-rate update, possible channel-update generation,
    /// activation/expiration check, data generation, one communication
    /// event. Ticks are atomic; the virtual clock advances at the end.
    pub fn tick(&mut self) {
        let now = self.clock;

        self.error_model.update(now, &self.link);
        self.generator.maybe_generate(
            now,
            &mut self.link,
            &self.error_model,
            &mut self.registry,
            &mut self.master_outbound,
            &mut self.sink,
        );
        self.activation.check(
            now,
            &mut self.link,
            &mut self.registry,
            &mut self.error_model,
            &mut self.sink,
        );
        self.master_generate_data();
        self.process_communication_event(now);

        self.clock += self.params.connection_interval;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            event_count: self.event_counter,
            master_channel: self.link.master_channel,
            slave_channel: self.link.slave_channel,
            disconnected: !self.link.connected,
            disconnect_time: self.link.disconnect_time,
            retransmissions: self.retransmissions,
            sim_time: self.clock,
            seed: self.seed,
        }
    }

    // ========================================================================
    // Traffic generation
    // ========================================================================

    fn master_generate_data(&mut self) {
        // New data only while nothing is awaiting Ack1.
        if self.pending.is_none() && self.rng.gen_bool(DATA_GENERATION_PROBABILITY) {
            self.master_outbound.push_back(Packet::Data { id: self.master_packet_id });
            self.master_packet_id += 1;
        }
    }

    fn slave_generate_data(&mut self) {
        if self.rng.gen_bool(DATA_GENERATION_PROBABILITY) {
            self.slave_outbound.push_back(Packet::Data { id: self.slave_packet_id });
            self.slave_packet_id += 1;
        }
    }

    fn roll_loss(&mut self) -> bool {
        self.rng.gen::<f64>() < self.error_model.current()
    }

    // ========================================================================
    // Communication-Event Loop
    // ========================================================================

    /// One bidirectional exchange, strictly serial: Master send, loss roll,
    /// Slave receive + Ack1 reply, loss roll, Master receive (+ Ack2
    /// handshake under Algorithm 2).
    fn process_communication_event(&mut self, now: SimTime) {
        if !self.link.connected {
            return;
        }

        self.event_counter += 1;
        let event = self.event_counter;

        // --- Master send selection -------------------------------------
        let packet = match self.pending.as_mut() {
            Some(pending) if pending.needs_retry => {
                pending.retry_count += 1;
                self.retransmissions += 1;
                pending.packet
            }
            _ => {
                self.pending = None;
                if let Some(packet) = self.master_outbound.pop_front() {
                    assert!(!packet.is_empty(), "empty packet queued as application data");
                    self.pending = Some(PendingTransmission {
                        packet,
                        retry_count: 0,
                        needs_retry: false,
                    });
                    packet
                } else {
                    let seq = self.empty_seq;
                    self.empty_seq += 1;
                    Packet::Empty { seq }
                }
            }
        };

        self.sink.log(
            now,
            Event::MasterSent {
                event,
                packet,
                retry_count: self.pending.map_or(0, |p| p.retry_count),
                error_rate: self.error_model.current(),
                master_channel: self.link.master_channel,
                slave_channel: self.link.slave_channel,
            },
        );

        // --- Loss roll 1: Master -> Slave ------------------------------
        if self.roll_loss() {
            let will_retry = !packet.is_empty();
            if let Some(pending) = self.pending.as_mut() {
                pending.needs_retry = true;
            }
            self.sink.log(now, Event::MasterLost { event, packet, will_retry });
            self.link
                .check_disconnection(now, self.params.timeout_duration, &mut self.sink);
            return;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.needs_retry = false;
        }

        // --- Slave receive ---------------------------------------------
        self.link.slave_last_receive = now;

        let mut channel_update_expired = false;
        if let Packet::ChannelUpdate { channel, update_id } = packet {
            // Activation of an update the registry never saw would corrupt
            // the protocol; fail loudly.
            let update = *self
                .registry
                .find(update_id)
                .unwrap_or_else(|| panic!("channel update #{} missing from registry", update_id));

            // Strict comparison: arriving exactly at the activation time
            // still counts as on time.
            channel_update_expired = now > update.activation_time;
            self.sink.log(
                now,
                Event::SlaveReceived { event, packet, expired: channel_update_expired },
            );

            if !channel_update_expired {
                match self.algorithm {
                    Algorithm::TimeTriggered => {
                        self.link.slave_scheduled_channel = Some(channel);
                    }
                    Algorithm::AckGated => {
                        self.link.handshake = HandshakeState::AwaitingAck2 { update_id, channel };
                    }
                }
                self.sink.log(
                    now,
                    Event::SlaveBuffered {
                        event,
                        channel,
                        activation_time: update.activation_time,
                    },
                );
            }
        } else {
            self.sink.log(now, Event::SlaveReceived { event, packet, expired: false });
        }

        // --- Slave reply: Ack1 plus optional piggybacked data ----------
        self.slave_generate_data();
        let ack = Packet::Ack1 {
            acked_id: packet.packet_id(),
            channel_ack: packet.is_channel_update(),
        };
        let piggyback = self.slave_outbound.pop_front();
        self.sink.log(now, Event::SlaveReplied { event, ack, data: piggyback });

        // --- Loss roll 2: Slave -> Master ------------------------------
        if self.roll_loss() {
            if let Some(data) = piggyback {
                self.slave_outbound.push_front(data);
            }
            let will_retry = !packet.is_empty();
            if let Some(pending) = self.pending.as_mut() {
                pending.needs_retry = true;
            }
            self.sink.log(now, Event::ReplyLost { event, ack, will_retry });
            self.link
                .check_disconnection(now, self.params.timeout_duration, &mut self.sink);
            return;
        }

        // --- Master receive --------------------------------------------
        self.link.master_last_receive = now;

        if let Packet::ChannelUpdate { update_id, .. } = packet {
            if self.algorithm == Algorithm::AckGated && !channel_update_expired {
                // Ack2 is treated as always delivered once Ack1 succeeded;
                // no third loss roll is modeled.
                self.sink.log(now, Event::Ack2Sent { event, update_id });
                self.complete_handshake(now, update_id);
            }
        }

        // Full round trip: the non-empty packet is confirmed and leaves the
        // pending slot.
        if !packet.is_empty() {
            self.pending = None;
        }
    }

    /// First Ack2 for the in-flight update activates it on both sides in the
    /// same tick.
    fn complete_handshake(&mut self, now: SimTime, acked_update_id: u64) {
        let HandshakeState::AwaitingAck2 { update_id, channel } = self.link.handshake else {
            return;
        };
        if update_id != acked_update_id {
            return;
        }

        let old_master = self.link.master_channel;
        let old_slave = self.link.slave_channel;
        self.link.master_channel = channel;
        self.link.slave_channel = channel;
        self.link.handshake = HandshakeState::Idle;
        self.link.activation_missed = false;

        let is_backoff = self
            .registry
            .find(update_id)
            .map_or(false, |u| u.is_backoff);
        self.registry.retire(update_id, UpdateState::Activated);

        self.sink.log(
            now,
            Event::Activated {
                update_id,
                backoff: is_backoff,
                master_from: old_master,
                master_to: self.link.master_channel,
                slave_from: old_slave,
                slave_to: self.link.slave_channel,
            },
        );
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm_interface::NoOpSink;
    use crate::cm_registry::UpdateState;

    fn config(
        initial: f64,
        max: f64,
        merge: f64,
        algorithm: Algorithm,
        duration: f64,
    ) -> SimConfig {
        SimConfig {
            initial_error_rate: initial,
            max_error_rate: max,
            merge_success_rate: merge,
            algorithm,
            duration_secs: duration,
            speedup: 5.0,
            seed: Some([7u8; 32]),
        }
    }

    fn sim(config: &SimConfig) -> Simulator<NoOpSink> {
        Simulator::new(config, NoOpSink).unwrap()
    }

    #[test]
    fn test_zero_loss_run_counts_every_tick() {
        let config = config(0.0, 0.0, 1.0, Algorithm::TimeTriggered, 5.0);
        let mut sim = sim(&config);
        let count = sim.run();

        // floor(run_duration / connection_interval) +/- 1
        let expected = (sim.params.run_duration / sim.params.connection_interval) as u64;
        assert!(count >= expected - 1 && count <= expected + 2, "count {}", count);

        let summary = sim.summary();
        assert!(!summary.disconnected);
        assert_eq!(summary.retransmissions, 0);
        // every epoch ends realigned under zero loss
        assert_eq!(summary.master_channel, summary.slave_channel);
    }

    #[test]
    fn test_zero_loss_round_trip_law_time_triggered() {
        let config = config(0.0, 0.0, 1.0, Algorithm::TimeTriggered, 10.0);
        let mut sim = sim(&config);
        sim.run();

        assert!(!sim.registry.history().is_empty());
        for (update, state) in sim.registry.history() {
            assert_eq!(*state, UpdateState::Activated, "update #{}", update.update_id);
            assert!(!update.is_backoff);
        }
        assert!(!sim.registry.has_pending() || sim.registry.history().len() > 0);
    }

    #[test]
    fn test_zero_loss_round_trip_law_ack_gated() {
        let config = config(0.0, 0.0, 1.0, Algorithm::AckGated, 10.0);
        let mut sim = sim(&config);
        sim.run();

        // every generated update completed its handshake before its sibling
        assert!(!sim.registry.history().is_empty());
        for (_, state) in sim.registry.history() {
            assert_eq!(*state, UpdateState::Activated);
        }
        assert_eq!(sim.link.handshake, HandshakeState::Idle);
        assert_eq!(sim.link.master_channel, sim.link.slave_channel);
    }

    #[test]
    fn test_total_loss_disconnects_at_timeout() {
        let config = config(1.0, 1.0, 0.0, Algorithm::TimeTriggered, 10.0);
        let mut sim = sim(&config);
        let count = sim.run();

        let summary = sim.summary();
        assert!(summary.disconnected);

        // the monitor fires on the first tick strictly past the timeout
        let timeout = sim.params.timeout_duration;
        let disconnect_time = summary.disconnect_time.unwrap();
        assert!(disconnect_time > timeout);
        assert!(disconnect_time < timeout + 2.0 * sim.params.connection_interval);

        // every tick still counts even though all of them were losses
        let expected = (disconnect_time / sim.params.connection_interval) as u64 + 1;
        assert!(count >= expected - 1 && count <= expected + 1, "count {}", count);
    }

    #[test]
    fn test_same_seed_reproduces_event_count() {
        let config = config(0.1, 0.5, 0.5, Algorithm::AckGated, 60.0);
        let first = sim(&config).run();
        let second = sim(&config).run();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ack_gated_activates_only_through_ack2() {
        let config = config(0.35, 0.7, 0.5, Algorithm::AckGated, 60.0);
        let mut sim = Simulator::new(&config, RecordingSink::default()).unwrap();
        sim.run();

        // every activation must have been preceded by its Ack2
        let mut acked = Vec::new();
        for (_, event) in &sim.sink.events {
            match *event {
                Event::Ack2Sent { update_id, .. } => acked.push(update_id),
                Event::Activated { update_id, .. } => {
                    assert!(acked.contains(&update_id), "update #{} activated without Ack2", update_id)
                }
                _ => {}
            }
        }

        // with this loss profile both outcomes occur
        let history = sim.registry.history();
        assert!(history.iter().any(|(_, s)| *s == UpdateState::Activated));
        assert!(history.iter().any(|(_, s)| *s == UpdateState::Expired));
    }

    #[test]
    fn test_time_triggered_activates_every_due_batch() {
        let config = config(0.2, 0.6, 0.5, Algorithm::TimeTriggered, 60.0);
        let mut sim = sim(&config);
        sim.run();

        // forced activation retires every generated update, and each due
        // batch applied exactly its earliest member
        assert!(!sim.registry.has_pending() || sim.summary().disconnected);
        assert!(sim
            .registry
            .history()
            .iter()
            .any(|(_, s)| *s == UpdateState::Activated));
    }

    #[test]
    fn test_empty_packets_are_never_retried() {
        let config = config(1.0, 1.0, 0.0, Algorithm::TimeTriggered, 1.0);
        let mut sim = sim(&config);

        // no queued data: the master sends empty packets into certain loss
        sim.process_communication_event(0.0);
        assert!(sim.pending.is_none());
        sim.process_communication_event(0.0045);
        assert!(sim.pending.is_none());
        assert_eq!(sim.retransmissions, 0);
        assert_eq!(sim.event_counter, 2);
        // distinct sequence numbers, no reuse after loss
        assert_eq!(sim.empty_seq, 2);
    }

    #[test]
    fn test_lost_data_packet_stays_pending_until_acked() {
        let config = config(1.0, 1.0, 0.0, Algorithm::TimeTriggered, 1.0);
        let mut sim = sim(&config);

        sim.master_outbound.push_back(Packet::Data { id: 0 });
        sim.process_communication_event(0.0);

        let pending = sim.pending.unwrap();
        assert_eq!(pending.packet, Packet::Data { id: 0 });
        assert!(pending.needs_retry);

        // retransmission re-sends the same packet and bumps the counter
        sim.process_communication_event(0.0045);
        let pending = sim.pending.unwrap();
        assert_eq!(pending.packet, Packet::Data { id: 0 });
        assert_eq!(pending.retry_count, 1);
        assert_eq!(sim.retransmissions, 1);
    }

    #[test]
    fn test_handshake_completes_exactly_at_activation_time() {
        let config = config(0.0, 0.0, 1.0, Algorithm::AckGated, 10.0);
        let mut sim = sim(&config);

        let id = sim.registry.schedule(1.0, 4, false);
        sim.master_outbound
            .push_back(Packet::ChannelUpdate { channel: 4, update_id: id });

        // Ack1 arriving exactly at the activation time is on time
        sim.process_communication_event(1.0);

        assert_eq!(sim.link.master_channel, 4);
        assert_eq!(sim.link.slave_channel, 4);
        assert_eq!(sim.link.handshake, HandshakeState::Idle);
        assert_eq!(sim.registry.history()[0].1, UpdateState::Activated);
    }

    #[test]
    fn test_update_received_past_activation_time_is_ack_only() {
        let config = config(0.0, 0.0, 1.0, Algorithm::AckGated, 10.0);
        let mut sim = sim(&config);

        let id = sim.registry.schedule(1.0, 4, false);
        sim.master_outbound
            .push_back(Packet::ChannelUpdate { channel: 4, update_id: id });

        // one instant later: expired, acknowledged without channel action
        sim.process_communication_event(1.0001);

        assert_eq!(sim.link.master_channel, 0);
        assert_eq!(sim.link.slave_channel, 0);
        assert_eq!(sim.link.handshake, HandshakeState::Idle);
        // the registry still holds it; the activation engine will expire it
        assert!(sim.registry.has_pending());
    }

    #[test]
    fn test_lossy_run_preserves_invariants_each_tick() {
        let config = config(0.3, 0.7, 0.4, Algorithm::AckGated, 20.0);
        let mut sim = sim(&config);

        let mut last_count = 0;
        while sim.is_running() {
            sim.tick();

            // at most one non-empty packet pending, never an empty one
            if let Some(pending) = sim.pending {
                assert!(!pending.packet.is_empty());
            }
            // the loss probability stays a probability
            let rate = sim.error_model.current();
            assert!((0.0..=1.0).contains(&rate));
            // the event counter is strictly monotonic while connected
            assert_eq!(sim.event_counter, last_count + 1);
            last_count = sim.event_counter;
        }
    }

    #[test]
    fn test_piggybacked_data_requeued_on_reply_loss() {
        // Losing the Slave->Master reply must push the piggybacked data back
        // to the queue front, so the delivered slave data ids stay
        // sequential and gap-free across the whole lossy run.
        let config = config(0.4, 0.8, 0.5, Algorithm::TimeTriggered, 30.0);
        let mut sim = Simulator::new(&config, RecordingSink::default()).unwrap();
        sim.run();

        let mut delivered = Vec::new();
        let mut in_flight: Option<(u64, PacketId)> = None;
        for (_, event) in &sim.sink.events {
            match *event {
                Event::SlaveReplied { event, data: Some(Packet::Data { id }), .. } => {
                    in_flight = Some((event, id));
                }
                Event::ReplyLost { event, .. } => {
                    if in_flight.map_or(false, |(e, _)| e == event) {
                        in_flight = None;
                    }
                }
                Event::MasterSent { .. } => {
                    if let Some((_, id)) = in_flight.take() {
                        delivered.push(id);
                    }
                }
                _ => {}
            }
        }
        if let Some((_, id)) = in_flight.take() {
            delivered.push(id);
        }

        assert!(!delivered.is_empty());
        for (expected, id) in delivered.iter().enumerate() {
            assert_eq!(*id, expected as PacketId);
        }
    }

    /// Test sink capturing the narration stream for assertions.
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<(SimTime, Event)>,
    }

    impl EventSink for RecordingSink {
        fn log(&mut self, now: SimTime, event: Event) {
            self.events.push((now, event));
        }
    }
}
