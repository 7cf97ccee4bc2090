//! Candle synthesis from raw price series
//!
//! Degraded-mode substitute for the provider's OHLC endpoint: buckets a
//! `(timestamp, price)` series into at most `target` candles. Only used when
//! neither a fresh nor a cached OHLC payload is available.

use crate::constants::{SHORT_RANGE_MAX_DAYS, SYNTHETIC_CANDLES_LONG, SYNTHETIC_CANDLES_SHORT};
use crate::types::CandleBucket;
use serde_json::Value;

/// Buckets `series` into at most `target` contiguous candles
///
/// Each bucket holds `ceil(len / target)` samples (the last may hold fewer).
/// The series is expected in timestamp order; it is not re-sorted.
pub fn synthesize(series: &[(i64, f64)], target: usize) -> Vec<CandleBucket> {
    if series.is_empty() || target == 0 {
        return Vec::new();
    }

    let step = series.len().div_ceil(target).max(1);

    series
        .chunks(step)
        .map(|bucket| {
            let (time, open) = bucket[0];
            let close = bucket[bucket.len() - 1].1;
            let (high, low) = bucket
                .iter()
                .fold((open, open), |(high, low), &(_, price)| {
                    (high.max(price), low.min(price))
                });
            CandleBucket {
                time,
                open,
                high,
                low,
                close,
            }
        })
        .collect()
}

/// Extracts the `prices` series of a market chart payload
///
/// Rows that are not `[timestamp, price]` number pairs are skipped.
pub fn price_series(payload: &Value) -> Vec<(i64, f64)> {
    let Some(rows) = payload.get("prices").and_then(Value::as_array) else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let pair = row.as_array()?;
            let time = pair.first()?;
            let time = time.as_i64().or_else(|| time.as_f64().map(|t| t as i64))?;
            let price = pair.get(1)?.as_f64()?;
            price.is_finite().then_some((time, price))
        })
        .collect()
}

/// Candle count to aim for when synthesizing a `days` range
///
/// Unparsable ranges such as `max` are treated as long.
pub fn target_candles(days: &str) -> usize {
    match days.trim().parse::<f64>() {
        Ok(days) if days <= SHORT_RANGE_MAX_DAYS => SYNTHETIC_CANDLES_SHORT,
        _ => SYNTHETIC_CANDLES_LONG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn increasing_series(len: usize) -> Vec<(i64, f64)> {
        (0..len)
            .map(|i| (1_700_000_000_000 + i as i64 * 3_600_000, 100.0 + i as f64 * 0.5))
            .collect()
    }

    #[test]
    fn test_bucket_count_and_bounds() {
        let series = increasing_series(730);
        let candles = synthesize(&series, 120);

        assert!(candles.len() <= 120);
        assert!(!candles.is_empty());
        for candle in &candles {
            assert!(candle.low <= candle.open && candle.open <= candle.high);
            assert!(candle.low <= candle.close && candle.close <= candle.high);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let series = increasing_series(730);
        let first = serde_json::to_vec(&synthesize(&series, 120)).unwrap();
        let second = serde_json::to_vec(&synthesize(&series, 120)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_buckets_are_contiguous() {
        // 10 samples, target 4 -> step 3 -> buckets of 3, 3, 3, 1
        let series = increasing_series(10);
        let candles = synthesize(&series, 4);

        assert_eq!(candles.len(), 4);
        assert_eq!(candles[0].time, series[0].0);
        assert_eq!(candles[1].time, series[3].0);
        assert_eq!(candles[3].time, series[9].0);
        assert_eq!(candles[3].open, candles[3].close);
        assert_eq!(candles[0].close, series[2].1);
    }

    #[test]
    fn test_high_low_track_extremes() {
        let series = vec![(1, 10.0), (2, 15.0), (3, 5.0), (4, 12.0)];
        let candles = synthesize(&series, 1);

        assert_eq!(
            candles,
            vec![CandleBucket {
                time: 1,
                open: 10.0,
                high: 15.0,
                low: 5.0,
                close: 12.0,
            }]
        );
    }

    #[test]
    fn test_short_series_gets_one_candle_per_sample() {
        let series = increasing_series(3);
        assert_eq!(synthesize(&series, 120).len(), 3);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(synthesize(&[], 120).is_empty());
        assert!(synthesize(&increasing_series(5), 0).is_empty());
    }

    #[test]
    fn test_price_series_skips_malformed_rows() {
        let payload = json!({
            "prices": [[1000, 1.5], [2000.0, 2.5], ["bad", 3.0], [3000], [4000, 4.5]],
            "market_caps": [],
        });
        assert_eq!(price_series(&payload), vec![(1000, 1.5), (2000, 2.5), (4000, 4.5)]);
        assert!(price_series(&json!({"prices": "nope"})).is_empty());
    }

    #[test]
    fn test_target_candles() {
        assert_eq!(target_candles("1"), 120);
        assert_eq!(target_candles("7"), 120);
        assert_eq!(target_candles("30"), 80);
        assert_eq!(target_candles("max"), 80);
    }
}
