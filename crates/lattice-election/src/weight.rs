//! Timestamp-decay weight factor (spec §4.3 "Timestamp-weight factor").

use lattice_types::constants::MAX_TIMESTAMP_DIFF;
use lattice_types::Timestamp;

/// Percentage (0..=100) a vote cast at `t` counts for, evaluated against
/// wall clock `now`. Ramps linearly in the outer bands so a vote that
/// just aged out of full weight doesn't snap to zero.
pub fn weight_factor(t: Timestamp, now: Timestamp) -> u64 {
    let d = MAX_TIMESTAMP_DIFF as i128;
    let diff = (t - now) as i128;

    if diff <= -2 * d {
        0
    } else if diff <= -d {
        (((diff + 2 * d) * 100) / d).clamp(0, 100) as u64
    } else if diff <= d {
        100
    } else if diff <= 2 * d {
        (((2 * d - diff) * 100) / d).clamp(0, 100) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::constants::MAX_TIMESTAMP_DIFF as D;

    #[test]
    fn full_weight_within_window() {
        assert_eq!(weight_factor(1000, 1000), 100);
        assert_eq!(weight_factor(1000 + D, 1000), 100);
        assert_eq!(weight_factor(1000 - D, 1000), 100);
    }

    #[test]
    fn zero_weight_far_outside_window() {
        assert_eq!(weight_factor(1000 + 3 * D, 1000), 0);
        assert_eq!(weight_factor(1000 - 3 * D, 1000), 0);
    }

    #[test]
    fn ramps_between_d_and_2d() {
        let mid = weight_factor(1000 + (3 * D) / 2, 1000);
        assert!(mid > 0 && mid < 100);
    }
}
