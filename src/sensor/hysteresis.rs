//! Change-detection gate deciding when a reading is worth reporting.
//!
//! Suppresses noise-driven churn: a report only goes out when the reading
//! has moved by more than the threshold since the last reported value.

#[derive(Debug)]
pub struct HysteresisGate {
    previous: f32,
    threshold: f32,
}

impl HysteresisGate {
    pub fn new(threshold: f32) -> Self {
        HysteresisGate {
            previous: 0.0,
            threshold,
        }
    }

    /// True when the reading moved strictly more than the threshold away
    /// from the last reported value. The history updates only in that case,
    /// so a skipped reading never shifts the reference point.
    pub fn should_report(&mut self, reading: f32) -> bool {
        let delta = reading - self.previous;
        if delta.abs() > self.threshold {
            self.previous = reading;
            true
        } else {
            false
        }
    }

    pub fn previous(&self) -> f32 {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_changes_are_skipped_and_leave_history_untouched() {
        let mut gate = HysteresisGate::new(0.1);
        assert!(gate.should_report(20.0));
        assert!(!gate.should_report(20.05));
        assert_eq!(gate.previous(), 20.0);
    }

    #[test]
    fn change_equal_to_the_threshold_is_not_enough() {
        let mut gate = HysteresisGate::new(0.1);
        assert!(gate.should_report(20.0));
        assert!(!gate.should_report(20.1));
        assert_eq!(gate.previous(), 20.0);
    }

    #[test]
    fn large_change_updates_history_regardless_of_direction() {
        let mut gate = HysteresisGate::new(0.1);
        assert!(gate.should_report(20.0));
        assert!(gate.should_report(19.5));
        assert_eq!(gate.previous(), 19.5);
    }

    #[test]
    fn reference_sequence_triggers_at_first_and_third_reading() {
        let mut gate = HysteresisGate::new(0.1);
        let readings = [20.0, 20.05, 20.5, 20.45];
        let triggered: Vec<bool> = readings
            .iter()
            .map(|&r| gate.should_report(r))
            .collect();
        assert_eq!(triggered, vec![true, false, true, false]);
        assert_eq!(gate.previous(), 20.5);
    }
}
