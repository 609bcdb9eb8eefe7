/// Slack added before flooring so that amounts summing to a whole number
/// exactly (in decimal) are not lost to float rounding. The carry may then
/// dip below zero by at most this much, which is paid back on later calls.
const ROUNDING_SLACK: f32 = 1e-4;

/// Turns a continuous emission rate into whole splat counts, carrying the
/// fractional remainder over to the next call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateAccumulator {
    carry: f32,
}

impl RateAccumulator {
    /// Adds `quantity * rate` and returns how many whole splats are due.
    /// A non-positive rate resets the carry.
    pub fn accumulate(&mut self, rate: f32, quantity: f32) -> u32 {
        if rate <= 0.0 {
            self.carry = 0.0;
            return 0;
        }
        self.carry += quantity.max(0.0) * rate;
        let whole = (self.carry + ROUNDING_SLACK).floor();
        self.carry -= whole;
        whole as u32
    }

    pub fn carry(&self) -> f32 {
        self.carry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_sums() {
        // Two quarter seconds at 2 per second
        let mut acc = RateAccumulator::default();
        assert_eq!(acc.accumulate(2.0, 0.25), 0);
        assert_eq!(acc.accumulate(2.0, 0.25), 1);

        // Ten tenths at 1 per unit
        let mut acc = RateAccumulator::default();
        let total: u32 = (0..10).map(|_| acc.accumulate(1.0, 0.1)).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_carry_is_kept() {
        let mut acc = RateAccumulator::default();
        assert_eq!(acc.accumulate(3.0, 1.5), 4);
        assert!((acc.carry() - 0.5).abs() < 1e-5);
        assert_eq!(acc.accumulate(3.0, 0.5), 2);
        assert!(acc.carry().abs() < 1e-4);
    }

    #[test]
    fn test_long_run_matches_rate() {
        let mut acc = RateAccumulator::default();
        let total: u32 = (0..1000).map(|_| acc.accumulate(30.0, 1.0 / 60.0)).sum();
        assert_eq!(total, 500);

        // 7 per second never lands on a whole count within a tick
        let mut acc = RateAccumulator::default();
        let total: u32 = (0..600).map(|_| acc.accumulate(7.0, 1.0 / 60.0)).sum();
        assert_eq!(total, 70);
    }

    #[test]
    fn test_early_splat_is_paid_back() {
        let mut acc = RateAccumulator::default();
        // Just short of one, but within the slack
        assert_eq!(acc.accumulate(1.0, 0.99995), 1);
        assert!(acc.carry() < 0.0);
        // 1.99986 in total is still one splat
        assert_eq!(acc.accumulate(1.0, 0.99991), 0);
        assert_eq!(acc.accumulate(1.0, 0.0001), 1);
    }

    #[test]
    fn test_zero_rate_resets() {
        let mut acc = RateAccumulator::default();
        acc.accumulate(1.0, 0.7);
        assert_eq!(acc.accumulate(0.0, 1.0), 0);
        assert_eq!(acc.carry(), 0.0);
        assert_eq!(acc.accumulate(1.0, 0.7), 0);
    }
}
