//! Local-maximum search with optional prominence threshold.
//!
//! Flat tops count once, reported at the middle sample (rounded down).
//! Samples at either end of the series are never peaks.

/// Indices of strict local maxima, plateaus collapsed to their midpoint.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of the two lowest points reachable on
/// each side before meeting a sample taller than the peak.
pub fn prominence(x: &[f64], peak: usize) -> f64 {
    let top = x[peak];

    let mut left_min = top;
    for &v in x[..=peak].iter().rev() {
        if v > top {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = top;
    for &v in &x[peak..] {
        if v > top {
            break;
        }
        right_min = right_min.min(v);
    }

    top - left_min.max(right_min)
}

/// Local maxima whose prominence is at least `min_prominence`.
pub fn find_peaks(x: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(x)
        .into_iter()
        .filter(|&p| prominence(x, p) >= min_prominence)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_maxima() {
        let x = [0.0, 1.0, 0.0, 2.0, 0.5, 3.0, 1.0];
        assert_eq!(local_maxima(&x), vec![1, 3, 5]);
    }

    #[test]
    fn test_plateau_reports_midpoint() {
        let x = [0.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![2]);
        // shoulder that keeps rising is not a peak
        let y = [0.0, 1.0, 1.0, 2.0, 0.0];
        assert_eq!(local_maxima(&y), vec![3]);
    }

    #[test]
    fn test_edges_and_monotone_series_have_no_peaks() {
        assert!(local_maxima(&[3.0, 2.0, 1.0]).is_empty());
        assert!(local_maxima(&[1.0, 2.0, 3.0, 4.0]).is_empty());
        assert!(local_maxima(&[1.0, 2.0]).is_empty());
        // plateau running into the last sample
        assert!(local_maxima(&[0.0, 1.0, 1.0]).is_empty());
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        let x = [0.0, 3.0, 1.0, 2.0, 0.5, 4.0, 0.0];
        assert_eq!(prominence(&x, 1), 2.5);
        // bounded by 3.0 on the left and 4.0 on the right
        assert_eq!(prominence(&x, 3), 1.0);
        assert_eq!(prominence(&x, 5), 4.0);
    }

    #[test]
    fn test_find_peaks_filters_by_prominence() {
        let x = [0.0, 3.0, 1.0, 1.2, 1.0, 4.0, 0.0];
        assert_eq!(find_peaks(&x, 0.0), vec![1, 3, 5]);
        assert_eq!(find_peaks(&x, 0.5), vec![1, 5]);
    }
}
