use std::collections::VecDeque;

use crate::cm_error_model::ErrorRateModel;
use crate::cm_interface::{Event, EventSink, Packet, SimTime, UpdateId, CHANNEL_COUNT};
use crate::cm_link::Link;
use crate::cm_registry::UpdateRegistry;

// ============================================================================
// Channel-Update Generator
// ============================================================================

/// Periodically proposes the next channel (or a back-off to the previous
/// one), registers the proposal with its immutable activation time, and
/// queues the ChannelUpdate packet at the front of the master's outbound
/// queue.
#[derive(Debug)]
pub struct UpdateGenerator {
    channel_update_interval: SimTime,
    channel_activation_delay: SimTime,
    last_update_time: SimTime,
}

impl UpdateGenerator {
    pub fn new(channel_update_interval: SimTime, channel_activation_delay: SimTime) -> Self {
        Self {
            channel_update_interval,
            channel_activation_delay,
            last_update_time: 0.0,
        }
    }

    /// Fire when a full update interval has elapsed since the previous
    /// firing. Returns the new update's id when one was generated.
    pub fn maybe_generate(
        &mut self,
        now: SimTime,
        link: &mut Link,
        error_model: &ErrorRateModel,
        registry: &mut UpdateRegistry,
        master_outbound: &mut VecDeque<Packet>,
        sink: &mut impl EventSink,
    ) -> Option<UpdateId> {
        if !link.connected {
            return None;
        }
        if now - self.last_update_time < self.channel_update_interval {
            return None;
        }

        // A fresh update supersedes any stale one still waiting in the queue.
        // A ChannelUpdate already in the pending-transmission slot keeps
        // retransmitting; only un-sent ones are purged.
        master_outbound.retain(|p| !p.is_channel_update());

        // The rate exceeds the ceiling only through the channel-mismatch
        // branch of the error model, i.e. when the previous epoch failed to
        // activate on both sides. That excursion is the back-off trigger.
        let is_backoff = error_model.current() > error_model.max_error_rate();
        let target_channel = if is_backoff {
            link.is_backed_off = true;
            link.last_master_channel
        } else {
            link.last_master_channel = link.master_channel;
            link.is_backed_off = false;
            link.activation_missed = false;
            (link.master_channel + 1) % CHANNEL_COUNT
        };

        let activation_time = now + self.channel_activation_delay;
        let update_id = registry.schedule(activation_time, target_channel, is_backoff);

        sink.log(
            now,
            Event::UpdateGenerated {
                update_id,
                target: target_channel,
                backoff: is_backoff,
                activation_time,
            },
        );

        master_outbound.push_front(Packet::ChannelUpdate {
            channel: target_channel,
            update_id,
        });
        self.last_update_time = now;

        Some(update_id)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
