//! Alpha Score rubric
//!
//! A fixed point rubric over the latest price and its indicators, clamped to
//! [0, 100]. Conditions on an undefined indicator simply do not fire.

use crate::config::ScoringRubric;
use crate::types::{Fundamentals, IndicatorSnapshot};

/// Points per fundamental signal
pub const FUNDAMENTAL_POINTS: i32 = 5;

/// Unclamped rubric total
pub fn raw_score(latest_price: f64, indicators: &IndicatorSnapshot, rubric: &ScoringRubric) -> i32 {
    let mut points = rubric.base;

    if let Some(sma_50) = indicators.sma_50 {
        if latest_price > sma_50 {
            points = points.saturating_add(rubric.above_short_sma);
        }
        if let Some(sma_200) = indicators.sma_200 {
            if sma_50 > sma_200 {
                points = points.saturating_add(rubric.golden_trend);
            }
        }
    }

    if let Some(rsi) = indicators.rsi {
        if rsi > rubric.rsi_oversold && rsi < rubric.rsi_neutral {
            points = points.saturating_add(rubric.recovering);
        } else if rsi < rubric.rsi_oversold {
            points = points.saturating_add(rubric.oversold);
        }
        if rsi > rubric.rsi_overbought {
            points = points.saturating_sub(rubric.overbought_penalty);
        }
    }

    if let Some(ret) = indicators.return_window {
        if ret > 0.0 {
            points = points.saturating_add(rubric.momentum);
        } else if ret < 0.0 {
            points = points.saturating_sub(rubric.momentum);
        }
    }

    points
}

pub fn clamp_score(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

/// Alpha Score in [0, 100]
pub fn score(latest_price: f64, indicators: &IndicatorSnapshot, rubric: &ScoringRubric) -> u8 {
    clamp_score(raw_score(latest_price, indicators, rubric))
}

/// Adjustment from fundamentals; unknown fields are neutral.
///
/// | field | +5 | −5 |
/// |---|---|---|
/// | P/E | 0 < pe ≤ 25 | pe ≤ 0 or pe > 50 |
/// | EV/EBITDA | 0 < x ≤ 12 | x ≤ 0 or x > 25 |
/// | profit margin | ≥ 15% | < 0 |
/// | ROE | ≥ 15% | < 0 |
/// | debt/equity | < 0.5 | > 2.0 |
pub fn fundamentals_adjustment(fundamentals: &Fundamentals) -> i32 {
    fn band(value: Option<f64>, good: impl Fn(f64) -> bool, bad: impl Fn(f64) -> bool) -> i32 {
        match value.filter(|v| v.is_finite()) {
            Some(v) if good(v) => FUNDAMENTAL_POINTS,
            Some(v) if bad(v) => -FUNDAMENTAL_POINTS,
            _ => 0,
        }
    }

    band(fundamentals.pe, |v| v > 0.0 && v <= 25.0, |v| v <= 0.0 || v > 50.0)
        + band(fundamentals.ev_ebitda, |v| v > 0.0 && v <= 12.0, |v| v <= 0.0 || v > 25.0)
        + band(fundamentals.profit_margin, |v| v >= 0.15, |v| v < 0.0)
        + band(fundamentals.roe, |v| v >= 0.15, |v| v < 0.0)
        + band(fundamentals.debt_to_equity, |v| v < 0.5, |v| v > 2.0)
}

/// Alpha Score including the fundamentals adjustment, in [0, 100]
pub fn score_with_fundamentals(
    latest_price: f64,
    indicators: &IndicatorSnapshot,
    fundamentals: &Fundamentals,
    rubric: &ScoringRubric,
) -> u8 {
    clamp_score(
        raw_score(latest_price, indicators, rubric)
            .saturating_add(fundamentals_adjustment(fundamentals)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(rsi: f64, sma_50: f64, sma_200: f64, ret: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: Some(rsi),
            sma_50: Some(sma_50),
            sma_200: Some(sma_200),
            return_window: Some(ret),
        }
    }

    #[test]
    fn test_flat_series_scenario() {
        // RSI 100 by the zero-loss convention, price == SMA 50 == SMA 200, no momentum
        let s = snap(100.0, 100.0, 100.0, 0.0);
        assert_eq!(score(100.0, &s, &ScoringRubric::default()), 30);
    }

    #[test]
    fn test_rising_series_scenario() {
        // +10 above SMA 50, +10 golden trend, -20 overbought, +10 momentum
        let s = snap(100.0, 320.0, 250.0, 0.07);
        assert_eq!(score(359.0, &s, &ScoringRubric::default()), 60);
    }

    #[test]
    fn test_falling_series_never_above_base() {
        // +10 oversold, -10 momentum
        let s = snap(0.0, 260.0, 335.0, -0.08);
        let value = score(241.0, &s, &ScoringRubric::default());
        assert_eq!(value, 50);
        assert!(value <= 50);
    }

    #[test]
    fn test_recovering_zone_is_most_favorable() {
        let rubric = ScoringRubric::default();
        let recovering = score(110.0, &snap(40.0, 100.0, 90.0, 0.02), &rubric);
        let oversold = score(110.0, &snap(25.0, 100.0, 90.0, 0.02), &rubric);
        assert_eq!(recovering, 100);
        assert_eq!(oversold, 90);
    }

    #[test]
    fn test_rsi_band_edges_do_not_fire() {
        let rubric = ScoringRubric::default();
        assert_eq!(score(100.0, &snap(30.0, 100.0, 100.0, 0.0), &rubric), 50);
        assert_eq!(score(100.0, &snap(50.0, 100.0, 100.0, 0.0), &rubric), 50);
        assert_eq!(score(100.0, &snap(70.0, 100.0, 100.0, 0.0), &rubric), 50);
    }

    #[test]
    fn test_undefined_indicators_are_neutral() {
        let rubric = ScoringRubric::default();
        assert_eq!(score(100.0, &IndicatorSnapshot::default(), &rubric), 50);
    }

    #[test]
    fn test_score_always_clamped() {
        let extremes = [
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::MAX,
            f64::MIN,
            -1.0,
            0.0,
            29.999,
            30.0001,
            49.999,
            70.0001,
            100.0,
            1e9,
        ];
        let rubrics = [
            ScoringRubric::default(),
            ScoringRubric {
                base: 95,
                recovering: 40,
                ..ScoringRubric::default()
            },
            ScoringRubric {
                base: 5,
                overbought_penalty: 80,
                momentum: 30,
                ..ScoringRubric::default()
            },
            ScoringRubric {
                base: i32::MAX,
                ..ScoringRubric::default()
            },
            ScoringRubric {
                base: i32::MIN,
                ..ScoringRubric::default()
            },
        ];
        for rubric in &rubrics {
            for &rsi in &extremes {
                for &price in &extremes {
                    for &sma in &extremes {
                        for &ret in &[f64::NAN, -0.5, 0.0, 0.5, f64::INFINITY] {
                            let s = snap(rsi, sma, 100.0, ret);
                            let value = score(price, &s, rubric);
                            assert!(value <= 100);
                            let f = Fundamentals {
                                pe: Some(10.0),
                                ev_ebitda: Some(8.0),
                                profit_margin: Some(0.3),
                                roe: Some(0.3),
                                debt_to_equity: Some(0.1),
                            };
                            assert!(score_with_fundamentals(price, &s, &f, rubric) <= 100);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_unknown_fundamentals_are_neutral() {
        assert_eq!(fundamentals_adjustment(&Fundamentals::default()), 0);

        let rubric = ScoringRubric::default();
        let s = snap(40.0, 100.0, 90.0, -0.01);
        assert_eq!(
            score_with_fundamentals(95.0, &s, &Fundamentals::default(), &rubric),
            score(95.0, &s, &rubric)
        );
    }

    #[test]
    fn test_fundamentals_adjustment_bands() {
        let strong = Fundamentals {
            pe: Some(18.0),
            ev_ebitda: Some(9.0),
            profit_margin: Some(0.22),
            roe: Some(0.19),
            debt_to_equity: Some(0.3),
        };
        assert_eq!(fundamentals_adjustment(&strong), 25);

        let weak = Fundamentals {
            pe: Some(-4.0),
            ev_ebitda: Some(40.0),
            profit_margin: Some(-0.05),
            roe: None,
            debt_to_equity: Some(3.1),
        };
        assert_eq!(fundamentals_adjustment(&weak), -20);

        // Zero is a reported value, not a missing one
        let zero_margin = Fundamentals {
            profit_margin: Some(0.0),
            ..Fundamentals::default()
        };
        assert_eq!(fundamentals_adjustment(&zero_margin), 0);
    }
}
