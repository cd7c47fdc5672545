//! Technical indicators over one ticker's daily series.
//!
//! All functions are pure and take closes (or volumes) in ascending date
//! order. Window-based values are `None` until enough observations exist.

use crate::data::Candle;

pub const MA_SHORT: usize = 5;
pub const MA_LONG: usize = 20;
pub const BB_WINDOW: usize = 20;
pub const BB_K: f64 = 2.0;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

// ============================================================================
// Rolling Windows
// ============================================================================

/// Simple rolling mean; the first `window - 1` points are `None`.
pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            (i + 1 >= window).then(|| mean(&values[i + 1 - window..=i]))
        })
        .collect()
}

/// Rolling sample standard deviation (ddof = 1).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, _)| (i + 1 >= window).then(|| sample_std(&values[i + 1 - window..=i])))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Mean of the last `n` values, `None` when fewer exist.
pub fn trailing_mean(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    Some(mean(&values[values.len() - n..]))
}

// ============================================================================
// Exponential Averages
// ============================================================================

/// Exponential moving average, α = 2 / (span + 1).
///
/// Seeded with the first value and not bias-adjusted, so it is defined from
/// the first point onward.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());

    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// MACD line and signal line.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal);
    Macd { line, signal }
}

// ============================================================================
// Bollinger Bands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub mid: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger_bands(closes: &[f64], window: usize, k: f64) -> BollingerBands {
    let mid = moving_average(closes, window);
    let std = rolling_std(closes, window);

    let band = |sign: f64| -> Vec<Option<f64>> {
        mid.iter()
            .zip(&std)
            .map(|(m, s)| Some(m.as_ref()? + sign * k * s.as_ref()?))
            .collect()
    };

    BollingerBands {
        upper: band(1.0),
        lower: band(-1.0),
        mid,
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Percent change from the close at `len - n` to the latest close.
///
/// The reference is the oldest session of the trailing `n`-session window.
/// `None` when the series is too short or the reference close is zero.
pub fn percent_change(closes: &[f64], n: usize) -> Option<f64> {
    if n == 0 || closes.len() < n {
        return None;
    }
    let latest = *closes.last()?;
    let reference = closes[closes.len() - n];
    if reference == 0.0 {
        return None;
    }
    Some((latest - reference) / reference * 100.0)
}

/// Strict upward crossing of `line` over `signal` between `t - 1` and `t`.
pub fn golden_cross(line: &[f64], signal: &[f64], t: usize) -> bool {
    if t == 0 || t >= line.len() || t >= signal.len() {
        return false;
    }
    line[t - 1] < signal[t - 1] && line[t] > signal[t]
}

/// Close strictly above the upper band.
pub fn breakout(close: f64, upper: Option<f64>) -> bool {
    upper.is_some_and(|u| close > u)
}

// ============================================================================
// Indicator Set
// ============================================================================

/// Per-date indicator series for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub ma5: Vec<Option<f64>>,
    pub ma20: Vec<Option<f64>>,
    pub bands: BollingerBands,
    pub macd: Macd,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Self {
            ma5: moving_average(&closes, MA_SHORT),
            ma20: moving_average(&closes, MA_LONG),
            bands: bollinger_bands(&closes, BB_WINDOW, BB_K),
            macd: macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
        }
    }

    pub fn len(&self) -> usize {
        self.macd.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Golden cross at the latest session.
    pub fn latest_golden_cross(&self) -> bool {
        self.len() >= 2 && golden_cross(&self.macd.line, &self.macd.signal, self.len() - 1)
    }

    pub fn latest_upper_band(&self) -> Option<f64> {
        self.bands.upper.last().copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_moving_average_leading_undefined() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(ma, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_window_longer_than_series() {
        assert!(moving_average(&[1.0, 2.0], 5).iter().all(Option::is_none));
        assert!(rolling_std(&[1.0, 2.0], 5).iter().all(Option::is_none));
    }

    #[test]
    fn test_rolling_std_is_sample() {
        // Sample std of [2, 4, 4, 4, 5, 5, 7, 9] is sqrt(32 / 7).
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = rolling_std(&values, 8);
        assert_close(std[7].unwrap(), (32.0_f64 / 7.0).sqrt());
    }

    #[test]
    fn test_ema_first_value_seeded() {
        let out = ema(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        let expected = [10.0, 10.5, 11.25, 12.125, 13.0625];
        for (a, b) in out.iter().zip(expected) {
            assert_close(*a, b);
        }
    }

    #[test]
    fn test_macd_constant_series_is_flat() {
        let m = macd(&[100.0; 40], MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(m.line.iter().all(|v| v.abs() < 1e-12));
        assert!(m.signal.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_bollinger_constant_series_collapses() {
        let bands = bollinger_bands(&[50.0; 25], BB_WINDOW, BB_K);
        assert_eq!(bands.upper[18], None);
        assert_eq!(bands.upper[19], Some(50.0));
        assert_eq!(bands.lower[24], Some(50.0));
        assert_eq!(bands.mid[24], Some(50.0));
    }

    #[test]
    fn test_percent_change_reference_offset() {
        // len 6, n 5: reference is closes[1].
        let closes = [1.0, 100.0, 101.0, 102.0, 103.0, 110.0];
        assert_close(percent_change(&closes, 5).unwrap(), 10.0);
    }

    #[test]
    fn test_percent_change_zero_reference() {
        assert_eq!(percent_change(&[5.0, 0.0, 1.0, 2.0, 3.0, 4.0], 5), None);
        assert_eq!(percent_change(&[1.0, 2.0], 5), None);
    }

    #[test]
    fn test_golden_cross_strict() {
        assert!(golden_cross(&[1.0, 3.0], &[2.0, 2.0], 1));
        // Touching from below is not a cross.
        assert!(!golden_cross(&[1.0, 2.0], &[2.0, 2.0], 1));
        // Starting level is not a cross.
        assert!(!golden_cross(&[2.0, 3.0], &[2.0, 2.0], 1));
        // Downward flip.
        assert!(!golden_cross(&[3.0, 1.0], &[2.0, 2.0], 1));
        assert!(!golden_cross(&[1.0], &[2.0], 0));
    }

    #[test]
    fn test_breakout_strict() {
        assert!(breakout(101.0, Some(100.0)));
        assert!(!breakout(100.0, Some(100.0)));
        assert!(!breakout(101.0, None));
    }

    #[test]
    fn test_trailing_mean() {
        assert_eq!(trailing_mean(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(trailing_mean(&[1.0], 2), None);
    }

    proptest! {
        #[test]
        fn moving_average_matches_trailing_mean(
            values in prop::collection::vec(1.0f64..10_000.0, 1..60),
            window in 1usize..25,
        ) {
            let ma = moving_average(&values, window);
            for (i, v) in ma.iter().enumerate() {
                if i + 1 < window {
                    prop_assert!(v.is_none());
                } else {
                    let expected = trailing_mean(&values[..=i], window).unwrap();
                    prop_assert!((v.unwrap() - expected).abs() < 1e-6);
                }
            }
        }

        #[test]
        fn percent_change_finite_for_nonzero_reference(
            values in prop::collection::vec(1.0f64..1_000_000.0, 35..80),
        ) {
            prop_assert!(percent_change(&values, 5).is_some_and(f64::is_finite));
        }
    }
}
