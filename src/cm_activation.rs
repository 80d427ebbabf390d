use crate::cm_config::Algorithm;
use crate::cm_error_model::ErrorRateModel;
use crate::cm_interface::{Event, EventSink, SimTime};
use crate::cm_link::{HandshakeState, Link};
use crate::cm_registry::{UpdateRegistry, UpdateState};

// ============================================================================
// Activation Engine
// ============================================================================

/// Per-tick processing of due scheduled updates.
///
/// Algorithm 1 force-activates the earliest due update; Algorithm 2 only
/// expires due updates, because activation happens exclusively through the
/// Ack2 handshake inside the event loop.
#[derive(Debug)]
pub struct ActivationEngine {
    algorithm: Algorithm,
}

impl ActivationEngine {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }

    pub fn check(
        &self,
        now: SimTime,
        link: &mut Link,
        registry: &mut UpdateRegistry,
        error_model: &mut ErrorRateModel,
        sink: &mut impl EventSink,
    ) {
        if !link.connected || !registry.has_pending() {
            return;
        }

        // Recomputed on every check that sees pending updates; persists
        // while the registry is empty.
        link.activation_missed = false;

        match self.algorithm {
            Algorithm::TimeTriggered => self.check_forced(now, link, registry, error_model, sink),
            Algorithm::AckGated => self.check_expired(now, link, registry, error_model, sink),
        }
    }

    /// Algorithm 1: the earliest due update takes effect unconditionally on
    /// the Master; the Slave follows only if it had buffered the same target.
    /// Later updates of the same due batch are superseded without effect.
    fn check_forced(
        &self,
        now: SimTime,
        link: &mut Link,
        registry: &mut UpdateRegistry,
        error_model: &mut ErrorRateModel,
        sink: &mut impl EventSink,
    ) {
        let due = registry.take_due(now);
        let Some(first) = due.first().copied() else {
            return;
        };

        link.is_backed_off = first.is_backoff;
        let old_master = link.master_channel;
        let old_slave = link.slave_channel;

        link.master_channel = first.target_channel;
        if link.slave_scheduled_channel == Some(first.target_channel) {
            link.slave_channel = first.target_channel;
            link.slave_scheduled_channel = None;
        }

        sink.log(
            now,
            Event::Activated {
                update_id: first.update_id,
                backoff: first.is_backoff,
                master_from: old_master,
                master_to: link.master_channel,
                slave_from: old_slave,
                slave_to: link.slave_channel,
            },
        );

        // The no-op-but-consistent case the error model must penalize.
        let changed = old_master != link.master_channel || old_slave != link.slave_channel;
        if !changed && link.channels_aligned() {
            link.activation_missed = true;
            sink.log(now, Event::ActivationMissed { update_id: first.update_id });
        }

        for (i, update) in due.into_iter().enumerate() {
            let state = if i == 0 {
                UpdateState::Activated
            } else {
                UpdateState::Expired
            };
            registry.record(update, state);
        }

        error_model.reset_epoch(now);
    }

    /// Algorithm 2: every due update expires; the half-completed handshake
    /// tied to it is cleared so a stale wait state cannot leak into the next
    /// update's round trip.
    fn check_expired(
        &self,
        now: SimTime,
        link: &mut Link,
        registry: &mut UpdateRegistry,
        error_model: &mut ErrorRateModel,
        sink: &mut impl EventSink,
    ) {
        let expired = registry.take_due(now);
        if expired.is_empty() {
            return;
        }

        for update in expired {
            let channels_unchanged = link.master_channel != update.target_channel
                || link.slave_channel != update.target_channel;
            link.activation_missed = channels_unchanged && link.channels_aligned();

            sink.log(now, Event::UpdateExpired { update_id: update.update_id });
            if link.activation_missed {
                sink.log(now, Event::ActivationMissed { update_id: update.update_id });
            }

            if let HandshakeState::AwaitingAck2 { update_id, .. } = link.handshake {
                if update_id == update.update_id {
                    link.handshake = HandshakeState::Idle;
                }
            }

            registry.record(update, UpdateState::Expired);
        }

        error_model.reset_epoch(now);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
