use indexmap::IndexMap;

use crate::cm_interface::{Channel, SimTime, UpdateId};

// ============================================================================
// Scheduled Updates
// ============================================================================

/// An immutable channel-update proposal. Created once by the update
/// generator; the activation time never changes after assignment. The record
/// only ever moves from the pending registry to the history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUpdate {
    pub activation_time: SimTime,
    pub target_channel: Channel,
    pub update_id: UpdateId,
    pub is_backoff: bool,
}

/// Terminal state an update reaches when it leaves the pending registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Took effect on the link (forced under Algorithm 1, handshake under
    /// Algorithm 2).
    Activated,
    /// Reached its activation time without taking effect.
    Expired,
}

// ============================================================================
// Registry
// ============================================================================

/// Pending and processed channel updates.
///
/// Pending updates sit in an insertion-ordered map so iteration follows
/// update-id order (the generator assigns strictly increasing ids) and the
/// Slave's activation-time lookups stay O(1). Retired updates are kept in
/// the history so a retransmitted ChannelUpdate can still resolve its
/// immutable activation time.
#[derive(Debug, Default)]
pub struct UpdateRegistry {
    pending: IndexMap<UpdateId, ScheduledUpdate>,
    history: Vec<(ScheduledUpdate, UpdateState)>,
    next_update_id: UpdateId,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new update and hand out its id. The activation time is
    /// fixed here, once.
    pub fn schedule(
        &mut self,
        activation_time: SimTime,
        target_channel: Channel,
        is_backoff: bool,
    ) -> UpdateId {
        let update_id = self.next_update_id;
        self.next_update_id += 1;
        let previous = self.pending.insert(
            update_id,
            ScheduledUpdate {
                activation_time,
                target_channel,
                update_id,
                is_backoff,
            },
        );
        assert!(previous.is_none(), "duplicate update id {}", update_id);
        update_id
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove and return every pending update that is due (`now` at or past
    /// its activation time), ordered by activation time, ties broken by
    /// update id.
    pub fn take_due(&mut self, now: SimTime) -> Vec<ScheduledUpdate> {
        let mut due: Vec<ScheduledUpdate> = self
            .pending
            .values()
            .filter(|u| now >= u.activation_time)
            .copied()
            .collect();
        due.sort_by(|a, b| {
            a.activation_time
                .partial_cmp(&b.activation_time)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.update_id.cmp(&b.update_id))
        });
        for update in &due {
            self.pending.shift_remove(&update.update_id);
        }
        due
    }

    /// Move a pending update to the history with its terminal state.
    /// Returns false when the update already left the pending registry.
    pub fn retire(&mut self, update_id: UpdateId, state: UpdateState) -> bool {
        match self.pending.shift_remove(&update_id) {
            Some(update) => {
                self.history.push((update, state));
                true
            }
            None => false,
        }
    }

    /// Record an already-removed update into the history.
    pub fn record(&mut self, update: ScheduledUpdate, state: UpdateState) {
        self.history.push((update, state));
    }

    /// Look an update up by id, pending first, then history. The Slave uses
    /// this to resolve the immutable activation time of a received
    /// ChannelUpdate, which may already have been processed.
    pub fn find(&self, update_id: UpdateId) -> Option<&ScheduledUpdate> {
        self.pending.get(&update_id).or_else(|| {
            self.history
                .iter()
                .find(|(u, _)| u.update_id == update_id)
                .map(|(u, _)| u)
        })
    }

    pub fn history(&self) -> &[(ScheduledUpdate, UpdateState)] {
        &self.history
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_ids_strictly_increase() {
        let mut registry = UpdateRegistry::new();
        let a = registry.schedule(1.0, 1, false);
        let b = registry.schedule(2.0, 2, false);
        let c = registry.schedule(3.0, 3, true);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_take_due_orders_by_time_then_id() {
        let mut registry = UpdateRegistry::new();
        let a = registry.schedule(2.0, 1, false);
        let b = registry.schedule(1.0, 2, false);
        let c = registry.schedule(1.0, 3, false);
        let d = registry.schedule(9.0, 4, false);

        let due = registry.take_due(2.0);
        let ids: Vec<UpdateId> = due.iter().map(|u| u.update_id).collect();
        assert_eq!(ids, vec![b, c, a]);

        // the not-yet-due update stays pending
        assert!(registry.has_pending());
        assert!(registry.find(d).is_some());
    }

    #[test]
    fn test_due_boundary_is_inclusive() {
        let mut registry = UpdateRegistry::new();
        registry.schedule(1.0, 5, false);

        assert!(registry.take_due(0.999).is_empty());
        assert_eq!(registry.take_due(1.0).len(), 1);
    }

    #[test]
    fn test_activation_time_survives_retirement() {
        let mut registry = UpdateRegistry::new();
        let id = registry.schedule(4.5, 7, false);

        let before = registry.find(id).copied().unwrap();
        assert!(registry.retire(id, UpdateState::Expired));
        let after = registry.find(id).copied().unwrap();

        assert_eq!(before, after);
        assert_eq!(registry.history().len(), 1);
        assert_eq!(registry.history()[0].1, UpdateState::Expired);
    }

    #[test]
    fn test_retire_unknown_update_is_reported() {
        let mut registry = UpdateRegistry::new();
        assert!(!registry.retire(42, UpdateState::Activated));
        assert!(registry.history().is_empty());
    }
}
