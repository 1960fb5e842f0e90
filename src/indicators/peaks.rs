// =============================================================================
// Peak / trough detection
// =============================================================================
//
// A point at index `i` is a peak (trough) when it is the strict max (min) of
// the symmetric window `[i - width, i + width]`. Points within `width` of
// either edge of the series can never be classified and are skipped.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Peak,
    Trough,
}

#[derive(Debug, Clone, Copy)]
pub struct Extremum {
    pub index: usize,
    pub kind: ExtremumKind,
}

/// Scan `values` for local peaks/troughs using a symmetric window of `width`
/// points on either side. `width == 0` yields no extrema (every point is
/// trivially its own max and min).
pub fn find_extrema(values: &[f64], width: usize) -> Vec<Extremum> {
    if width == 0 || values.len() < 2 * width + 1 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for i in width..values.len() - width {
        let window = &values[i - width..=i + width];
        let center = values[i];
        let is_peak = window.iter().all(|&v| v <= center) && window.iter().any(|&v| v < center);
        let is_trough = window.iter().all(|&v| v >= center) && window.iter().any(|&v| v > center);

        if is_peak {
            out.push(Extremum {
                index: i,
                kind: ExtremumKind::Peak,
            });
        } else if is_trough {
            out.push(Extremum {
                index: i,
                kind: ExtremumKind::Trough,
            });
        }
    }
    out
}

/// Convenience: highest high over the most recent `lookback` values,
/// excluding the last `exclude_recent` values (so the current forming bar
/// can be excluded from a breakout range per the regime detector's needs).
pub fn rolling_high(values: &[f64], lookback: usize, exclude_recent: usize) -> Option<f64> {
    if values.len() <= exclude_recent {
        return None;
    }
    let usable = &values[..values.len() - exclude_recent];
    if usable.len() < lookback {
        return None;
    }
    usable[usable.len() - lookback..]
        .iter()
        .cloned()
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

pub fn rolling_low(values: &[f64], lookback: usize, exclude_recent: usize) -> Option<f64> {
    if values.len() <= exclude_recent {
        return None;
    }
    let usable = &values[..values.len() - exclude_recent];
    if usable.len() < lookback {
        return None;
    }
    usable[usable.len() - lookback..]
        .iter()
        .cloned()
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.min(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_zero_yields_nothing() {
        assert!(find_extrema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn single_peak_detected() {
        let values = vec![1.0, 2.0, 5.0, 2.0, 1.0];
        let extrema = find_extrema(&values, 2);
        assert_eq!(extrema.len(), 1);
        assert_eq!(extrema[0].index, 2);
        assert_eq!(extrema[0].kind, ExtremumKind::Peak);
    }

    #[test]
    fn single_trough_detected() {
        let values = vec![5.0, 4.0, 1.0, 4.0, 5.0];
        let extrema = find_extrema(&values, 2);
        assert_eq!(extrema.len(), 1);
        assert_eq!(extrema[0].kind, ExtremumKind::Trough);
    }

    #[test]
    fn flat_series_has_no_extrema() {
        assert!(find_extrema(&[1.0; 10], 2).is_empty());
    }

    #[test]
    fn rolling_high_excludes_recent() {
        let values = vec![1.0, 2.0, 10.0, 3.0, 4.0];
        // exclude the last 1 (value 4.0); lookback 3 over [1,2,10,3]
        assert_eq!(rolling_high(&values, 3, 1), Some(10.0));
    }

    #[test]
    fn rolling_low_excludes_recent() {
        let values = vec![5.0, 2.0, 0.5, 3.0, 4.0];
        assert_eq!(rolling_low(&values, 3, 1), Some(0.5));
    }
}
