//! Bar resolutions and magnifier sub-bar resolution selection.

use super::ohlcv::OhlcvSeries;

/// Resolutions (in minutes) that sub-bar data may exist at.
pub const VALID_RESOLUTIONS: [u32; 6] = [1, 5, 15, 60, 240, 1440];

pub const DEFAULT_TARGET_SUB_BARS: u32 = 10;
pub const DEFAULT_MAX_SUB_BARS: u32 = 16;

/// Outcome of [`select_sub_resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubResolution {
    pub minutes: u32,
    /// Sub-bars per chart bar, rounded up for non-divisors.
    pub sub_bars: u32,
    pub exact: bool,
}

/// Pick the sub-bar resolution for a chart resolution.
///
/// Candidates are the valid resolutions strictly finer than the chart. Exact
/// divisors whose sub-bar count does not exceed `max_sub_bars` are preferred,
/// choosing the count closest to `target` (ties go to the finer resolution).
/// Non-divisors are considered only when no divisor qualifies. When nothing
/// qualifies the finest valid resolution is used. A 1-minute chart has no
/// finer data and maps to itself.
pub fn select_sub_resolution(chart_minutes: u32, target: u32, max_sub_bars: u32) -> SubResolution {
    let finer: Vec<u32> = VALID_RESOLUTIONS
        .iter()
        .copied()
        .filter(|&r| r < chart_minutes)
        .collect();

    if finer.is_empty() {
        return SubResolution {
            minutes: chart_minutes,
            sub_bars: 1,
            exact: true,
        };
    }

    let pick = |exact: bool| -> Option<SubResolution> {
        finer
            .iter()
            .filter(|&&r| (chart_minutes % r == 0) == exact)
            .map(|&r| SubResolution {
                minutes: r,
                sub_bars: chart_minutes.div_ceil(r),
                exact,
            })
            .filter(|c| c.sub_bars <= max_sub_bars)
            .min_by_key(|c| (c.sub_bars.abs_diff(target), std::cmp::Reverse(c.sub_bars)))
    };

    if let Some(choice) = pick(true).or_else(|| pick(false)) {
        return choice;
    }

    let finest = finer[0];
    SubResolution {
        minutes: finest,
        sub_bars: chart_minutes.div_ceil(finest),
        exact: chart_minutes % finest == 0,
    }
}

/// Chart resolution in minutes, taken as the smallest gap between
/// consecutive bars. `None` for a single bar or sub-minute spacing.
pub fn infer_minutes(series: &OhlcvSeries) -> Option<u32> {
    series
        .bars()
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_minutes())
        .min()
        .filter(|&m| m > 0)
        .and_then(|m| u32::try_from(m).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::OhlcvBar;
    use chrono::NaiveDate;

    fn series(minutes: &[i64]) -> OhlcvSeries {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        OhlcvSeries::new(
            minutes
                .iter()
                .map(|&m| OhlcvBar {
                    timestamp: start + chrono::Duration::minutes(m),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn infers_smallest_gap() {
        assert_eq!(infer_minutes(&series(&[0, 60, 120, 300])), Some(60));
        assert_eq!(infer_minutes(&series(&[0])), None);
    }

    #[test]
    fn four_hour_chart_uses_fifteen_minutes() {
        let choice = select_sub_resolution(240, 10, 16);
        assert_eq!(choice.minutes, 15);
        assert_eq!(choice.sub_bars, 16);
        assert!(choice.exact);
    }

    #[test]
    fn hourly_chart_uses_five_minutes() {
        let choice = select_sub_resolution(60, 10, 16);
        assert_eq!(choice.minutes, 5);
        assert_eq!(choice.sub_bars, 12);
    }

    #[test]
    fn one_minute_chart_has_no_finer_data() {
        let choice = select_sub_resolution(1, 10, 16);
        assert_eq!(choice.minutes, 1);
        assert_eq!(choice.sub_bars, 1);
    }

    #[test]
    fn daily_chart_respects_ceiling() {
        // 60m would give 24 sub-bars, over the ceiling
        let choice = select_sub_resolution(1440, 10, 16);
        assert_eq!(choice.minutes, 240);
        assert_eq!(choice.sub_bars, 6);
    }

    #[test]
    fn non_divisor_used_when_no_divisor_fits() {
        // 1000 is divisible by 1 and 5 only, both far over the ceiling
        let choice = select_sub_resolution(1000, 10, 16);
        assert!(!choice.exact);
        assert_eq!(choice.minutes, 240);
        assert_eq!(choice.sub_bars, 5);
    }

    #[test]
    fn falls_back_to_finest_when_nothing_qualifies() {
        let choice = select_sub_resolution(1000, 10, 2);
        assert_eq!(choice.minutes, 1);
        assert_eq!(choice.sub_bars, 1000);
    }

    #[test]
    fn odd_chart_minutes() {
        let choice = select_sub_resolution(45, 10, 16);
        assert_eq!(choice.minutes, 5);
        assert_eq!(choice.sub_bars, 9);
    }
}
