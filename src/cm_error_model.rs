use crate::cm_interface::SimTime;
use crate::cm_link::Link;

// ============================================================================
// Error-Rate Model
// ============================================================================

/// Time-varying packet-loss model, evaluated once per tick.
///
/// Priority order of the policy:
/// 1. An update missed its activation with the channels nominally aligned:
///    hold the maximum rate (the "are we actually on the same channel?"
///    ambiguity of the real protocol).
/// 2. The link is in back-off with the channels aligned: hold the maximum.
/// 3. Channels aligned: ramp linearly from the initial to the maximum rate
///    over one channel-update interval, measured from the last activation.
///    Once the rate reaches the maximum it is never recomputed downward.
/// 4. Channels mismatched: `1 - (1 - max) * merge_success`, a partial
///    cross-channel reception probability. Note this can exceed the maximum
///    rate whenever `merge_success < 1`; the update generator uses exactly
///    that excursion as its back-off trigger.
#[derive(Debug, Clone)]
pub struct ErrorRateModel {
    initial_error_rate: f64,
    max_error_rate: f64,
    merge_success_rate: f64,
    channel_update_interval: SimTime,

    current: f64,
    /// Origin of the linear ramp. Set on first evaluation and whenever the
    /// activation engine processes a batch (activation under Algorithm 1,
    /// expiration under Algorithm 2).
    last_activation_time: Option<SimTime>,
}

impl ErrorRateModel {
    pub fn new(
        initial_error_rate: f64,
        max_error_rate: f64,
        merge_success_rate: f64,
        channel_update_interval: SimTime,
    ) -> Self {
        Self {
            initial_error_rate,
            max_error_rate,
            merge_success_rate,
            channel_update_interval,
            current: initial_error_rate,
            last_activation_time: None,
        }
    }

    /// Current packet-loss probability, always in [0, 1].
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn max_error_rate(&self) -> f64 {
        self.max_error_rate
    }

    /// Restart the ramp epoch at `now`.
    pub fn reset_epoch(&mut self, now: SimTime) {
        self.last_activation_time = Some(now);
    }

    /// Re-evaluate the rate for this tick.
    pub fn update(&mut self, now: SimTime, link: &Link) -> f64 {
        let aligned = link.master_channel == link.slave_channel;

        if link.activation_missed && aligned {
            self.current = self.max_error_rate;
            return self.current;
        }

        if link.is_backed_off && aligned {
            self.current = self.max_error_rate;
            return self.current;
        }

        if aligned {
            let epoch_start = match self.last_activation_time {
                Some(t) => t,
                None => {
                    self.current = self.initial_error_rate;
                    self.last_activation_time = Some(now);
                    now
                }
            };
            if self.current < self.max_error_rate {
                let ratio = ((now - epoch_start) / self.channel_update_interval).clamp(0.0, 1.0);
                self.current = (self.initial_error_rate
                    + (self.max_error_rate - self.initial_error_rate) * ratio)
                    .clamp(0.0, 1.0);
            }
        } else {
            self.current =
                (1.0 - (1.0 - self.max_error_rate) * self.merge_success_rate).clamp(0.0, 1.0);
        }

        self.current
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::new()
    }

    #[test]
    fn test_ramp_from_initial_to_max_over_one_interval() {
        let mut model = ErrorRateModel::new(0.1, 0.5, 0.5, 1.0);
        let link = link();

        // first evaluation pins the epoch start and the initial rate
        assert!((model.update(0.0, &link) - 0.1).abs() < 1e-12);

        // halfway through the interval: halfway up the ramp
        assert!((model.update(0.5, &link) - 0.3).abs() < 1e-12);

        // at and past one interval: clamped to the maximum
        assert!((model.update(1.0, &link) - 0.5).abs() < 1e-12);
        assert!((model.update(5.0, &link) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rate_ratchets_at_max_within_epoch() {
        let mut model = ErrorRateModel::new(0.0, 0.4, 1.0, 1.0);
        let link = link();

        model.update(0.0, &link);
        model.update(2.0, &link);
        assert!((model.current() - 0.4).abs() < 1e-12);

        // resetting the epoch alone does not lower an already-maxed rate
        model.reset_epoch(2.0);
        assert!((model.update(2.1, &link) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_missed_activation_holds_max_while_aligned() {
        let mut model = ErrorRateModel::new(0.1, 0.5, 0.5, 1.0);
        let mut link = link();
        link.activation_missed = true;

        assert!((model.update(0.0, &link) - 0.5).abs() < 1e-12);

        // once the channels diverge the missed flag no longer applies
        link.master_channel = 3;
        let mismatched = model.update(0.1, &link);
        assert!((mismatched - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_backoff_holds_max_while_aligned() {
        let mut model = ErrorRateModel::new(0.1, 0.5, 0.5, 1.0);
        let mut link = link();
        link.is_backed_off = true;

        assert!((model.update(0.0, &link) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_mismatch_rate_can_exceed_max() {
        let mut model = ErrorRateModel::new(0.1, 0.5, 0.5, 1.0);
        let mut link = link();
        link.slave_channel = 7;

        // 1 - (1 - 0.5) * 0.5 = 0.75 > max_error_rate
        let rate = model.update(0.0, &link);
        assert!((rate - 0.75).abs() < 1e-12);
        assert!(rate > model.max_error_rate());
    }

    #[test]
    fn test_rate_stays_in_unit_interval() {
        let mut model = ErrorRateModel::new(1.0, 1.0, 0.0, 1.0);
        let mut link = link();

        assert!(model.update(0.0, &link) <= 1.0);
        link.slave_channel = 1;
        let rate = model.update(0.1, &link);
        assert!((0.0..=1.0).contains(&rate));
        assert!((rate - 1.0).abs() < 1e-12);
    }
}
