//! Picks the processed variant of an image that best fits a target size.

use super::models::Dimensions;

/// Maximum relative area error accepted when no variant matches exactly.
pub const AREA_TOLERANCE: f64 = 0.20;

/// Select the candidate that best matches `target`, the requested long edge.
///
/// - `target == 0`: the smallest variant by area (first one on ties).
/// - `target > 0`: the first variant whose long edge equals `target`,
///   otherwise the variant with the smallest relative area error
///   `|target² - long·short| / target²`, if that error is within
///   [`AREA_TOLERANCE`].
/// - `target < 0`: no match.
pub fn select_best_resolution<T: Dimensions>(target: i64, candidates: &[T]) -> Option<&T> {
    if target == 0 {
        return candidates.iter().fold(None, |best: Option<&T>, candidate| match best {
            Some(current) if current.area() <= candidate.area() => Some(current),
            _ => Some(candidate),
        });
    }
    if target < 0 {
        return None;
    }

    if let Some(exact) = candidates
        .iter()
        .find(|candidate| candidate.long_side() as i64 == target)
    {
        return Some(exact);
    }

    let target_area = (target as f64) * (target as f64);
    let mut best: Option<(&T, f64)> = None;
    for candidate in candidates {
        let area = candidate.long_side() as f64 * candidate.short_side() as f64;
        let error = (target_area - area).abs() / target_area;
        match best {
            Some((_, best_error)) if best_error <= error => {}
            _ => best = Some((candidate, error)),
        }
    }

    best.filter(|(_, error)| *error <= AREA_TOLERANCE)
        .map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARIANTS: [(u32, u32); 3] = [(500, 500), (1000, 1000), (1600, 900)];

    #[test]
    fn test_closest_within_tolerance() {
        assert_eq!(select_best_resolution(1024, &VARIANTS), Some(&(1000, 1000)));
    }

    #[test]
    fn test_nothing_within_tolerance() {
        assert_eq!(select_best_resolution(2000, &VARIANTS), None);
    }

    #[test]
    fn test_exact_long_edge_wins() {
        // 1600x900 has a larger area error than 1000x1000 would for 1600,
        // but its long edge matches exactly.
        assert_eq!(select_best_resolution(1600, &VARIANTS), Some(&(1600, 900)));
        assert_eq!(select_best_resolution(500, &VARIANTS), Some(&(500, 500)));
    }

    #[test]
    fn test_zero_target_picks_smallest_area() {
        assert_eq!(select_best_resolution(0, &VARIANTS), Some(&(500, 500)));

        let tied = [(200, 100), (100, 200), (300, 300)];
        assert_eq!(select_best_resolution(0, &tied), Some(&(200, 100)));
    }

    #[test]
    fn test_negative_target_is_no_match() {
        assert_eq!(select_best_resolution(-512, &VARIANTS), None);
    }

    #[test]
    fn test_empty_candidates() {
        let none: [(u32, u32); 0] = [];
        assert_eq!(select_best_resolution(0, &none), None);
        assert_eq!(select_best_resolution(512, &none), None);
    }
}
