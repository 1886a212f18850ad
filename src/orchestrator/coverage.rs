use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::models::{Granularity, PriceBar, PriceRequest};

/// Completeness threshold for a fetched series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoverageConfig {
    /// Largest tolerated run of missing bars
    pub max_missing_bars: u64,
    /// Session open in UTC (NSE cash market opens 09:15 IST)
    pub session_open: NaiveTime,
    /// Length of one trading session (NSE cash market: 09:15-15:30)
    pub session_minutes: u32,
    /// Exchange holidays; no bars are expected on these dates
    pub holidays: Vec<NaiveDate>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            max_missing_bars: 8,
            session_open: NaiveTime::from_hms_opt(3, 45, 0).unwrap_or(NaiveTime::MIN),
            session_minutes: 375,
            holidays: Vec::new(),
        }
    }
}

impl CoverageConfig {
    fn bars_per_session(&self, granularity: Granularity) -> u64 {
        if !granularity.is_intraday() {
            return 1;
        }
        let minutes = granularity.minutes() as u64;
        (self.session_minutes as u64).div_ceil(minutes)
    }

    fn is_trading_day(&self, day: NaiveDate) -> bool {
        !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&day)
    }

    /// Trading days strictly between two dates
    fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> u64 {
        let mut count = 0;
        let mut day = from.succ_opt();

        while let Some(d) = day {
            if d >= to {
                break;
            }
            if self.is_trading_day(d) {
                count += 1;
            }
            day = d.succ_opt();
        }

        count
    }

    /// Expected intraday bar timestamps `t` with `from < t < to`
    fn slots_between(&self, from: DateTime<Utc>, to: DateTime<Utc>, granularity: Granularity) -> u64 {
        let step = granularity.minutes();
        let per_session = self.bars_per_session(granularity) as i64;
        let mut count = 0;
        // A session opening the previous day may run past midnight
        let mut day = from.date_naive().pred_opt();

        while let Some(d) = day {
            if d > to.date_naive() {
                break;
            }
            if self.is_trading_day(d) {
                let open = Utc.from_utc_datetime(&d.and_time(self.session_open));
                count += (0..per_session)
                    .map(|k| open + Duration::minutes(k * step))
                    .filter(|slot| *slot > from && *slot < to)
                    .count() as u64;
            }
            day = d.succ_opt();
        }

        count
    }
}

/// Drop invalid bars, sort, dedupe by timestamp and clip to the request range
pub fn normalize_bars(source: &str, request: &PriceRequest, bars: Vec<PriceBar>) -> Vec<PriceBar> {
    let before = bars.len();
    let mut bars: Vec<PriceBar> = bars.into_iter().filter(PriceBar::is_valid).collect();

    if bars.len() < before {
        tracing::warn!(
            "{} returned {} invalid bar(s) for {}, dropped",
            source,
            before - bars.len(),
            request.symbol
        );
    }

    bars.retain(|b| b.timestamp >= request.start && b.timestamp <= request.end);
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

/// Largest run of expected-but-missing bars over `[start, min(end, as_of)]`.
///
/// Overnight breaks, weekends and configured holidays are not counted. Intraday bars
/// missing at the close of one session and the open of the next form a single run.
/// `bars` must be normalized.
pub fn largest_gap(
    bars: &[PriceBar],
    request: &PriceRequest,
    as_of: DateTime<Utc>,
    config: &CoverageConfig,
) -> u64 {
    let end = request.end.min(as_of);
    let granularity = request.granularity;

    if !granularity.is_intraday() {
        return daily_gap(bars, request.start.date_naive(), end.date_naive(), config);
    }

    // Slots at or after start; trailing slots only once their bar has closed
    let lower = request.start - Duration::seconds(1);
    let upper = end - Duration::minutes(granularity.minutes()) + Duration::seconds(1);

    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return config.slots_between(lower, upper, granularity);
    };

    let mut largest = config
        .slots_between(lower, first.timestamp, granularity)
        .max(config.slots_between(last.timestamp, upper, granularity));

    for pair in bars.windows(2) {
        let (prev, next) = (pair[0].timestamp, pair[1].timestamp);

        let missing = if prev.date_naive() == next.date_naive() {
            let steps = (next - prev).num_minutes() / granularity.minutes();
            steps.saturating_sub(1) as u64
        } else {
            config.slots_between(prev, next, granularity)
        };

        largest = largest.max(missing);
    }

    largest
}

/// Missing trading days, edges included as whole days only
fn daily_gap(bars: &[PriceBar], start: NaiveDate, end: NaiveDate, config: &CoverageConfig) -> u64 {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return config.trading_days_between(start, end);
    };

    let mut largest = config
        .trading_days_between(start, first.timestamp.date_naive())
        .max(config.trading_days_between(last.timestamp.date_naive(), end));

    for pair in bars.windows(2) {
        let missing =
            config.trading_days_between(pair[0].timestamp.date_naive(), pair[1].timestamp.date_naive());
        largest = largest.max(missing);
    }

    largest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(timestamp: DateTime<Utc>) -> PriceBar {
        PriceBar {
            timestamp,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1000.0,
        }
    }

    /// 15m bars of one NSE session (03:45-10:00 UTC) on `day`
    fn session(day: NaiveDate) -> Vec<PriceBar> {
        let open = Utc.from_utc_datetime(&day.and_hms_opt(3, 45, 0).unwrap());
        (0..25).map(|i| bar(open + Duration::minutes(15 * i))).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day_start(day: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
    }

    fn far_future() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_trading_days_between() {
        let config = CoverageConfig::default();
        // Fri 2024-01-05 .. Mon 2024-01-08: only the weekend lies between
        assert_eq!(config.trading_days_between(date(2024, 1, 5), date(2024, 1, 8)), 0);
        // Mon .. Fri: Tue, Wed, Thu
        assert_eq!(config.trading_days_between(date(2024, 1, 1), date(2024, 1, 5)), 3);
        assert_eq!(config.trading_days_between(date(2024, 1, 5), date(2024, 1, 5)), 0);

        let config = CoverageConfig {
            holidays: vec![date(2024, 1, 3)],
            ..Default::default()
        };
        assert_eq!(config.trading_days_between(date(2024, 1, 1), date(2024, 1, 5)), 2);
    }

    #[test]
    fn test_overnight_and_weekend_do_not_count() {
        // Thu, Fri, then Mon
        let mut bars = session(date(2024, 1, 4));
        bars.extend(session(date(2024, 1, 5)));
        bars.extend(session(date(2024, 1, 8)));
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 4)),
            day_start(date(2024, 1, 9)),
            Granularity::FifteenMinutes,
        );

        let gap = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(gap, 0);
    }

    #[test]
    fn test_intraday_hole_within_session() {
        let mut bars = session(date(2024, 1, 4));
        // Remove 10:45 through 13:15 IST (11 bars)
        bars.drain(6..17);
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 4)),
            day_start(date(2024, 1, 5)),
            Granularity::FifteenMinutes,
        );

        let gap = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(gap, 11);
    }

    #[test]
    fn test_missing_trading_day_counts_a_session() {
        // Wed 2024-01-03 missing between Tue and Thu
        let mut bars = session(date(2024, 1, 2));
        bars.extend(session(date(2024, 1, 4)));
        let request = PriceRequest::new(
            "INFY",
            day_start(date(2024, 1, 2)),
            day_start(date(2024, 1, 5)),
            Granularity::FifteenMinutes,
        );

        let gap = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(gap, 25);
    }

    #[test]
    fn test_truncated_session_counts_missing_close() {
        // Tue stops after 5 of 25 bars, Wed is complete
        let mut bars = session(date(2024, 1, 2));
        bars.truncate(5);
        bars.extend(session(date(2024, 1, 3)));
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 2)),
            day_start(date(2024, 1, 4)),
            Granularity::FifteenMinutes,
        );

        let gap = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(gap, 20);
    }

    #[test]
    fn test_late_open_and_early_close_join_one_run() {
        // Tue loses its last 3 bars, Wed its first 4
        let mut bars = session(date(2024, 1, 2));
        bars.truncate(22);
        bars.extend(session(date(2024, 1, 3)).into_iter().skip(4));
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 2)),
            day_start(date(2024, 1, 4)),
            Granularity::FifteenMinutes,
        );

        let gap = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(gap, 7);
    }

    #[test]
    fn test_holiday_is_not_a_gap() {
        // Fri 2024-01-26 is an exchange holiday
        let mut bars = session(date(2024, 1, 25));
        bars.extend(session(date(2024, 1, 29)));
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 25)),
            day_start(date(2024, 1, 30)),
            Granularity::FifteenMinutes,
        );

        let without = largest_gap(&bars, &request, far_future(), &CoverageConfig::default());
        assert_eq!(without, 25);

        let config = CoverageConfig {
            holidays: vec![date(2024, 1, 26)],
            ..Default::default()
        };
        assert_eq!(largest_gap(&bars, &request, far_future(), &config), 0);

        let daily: Vec<PriceBar> = [25, 29].iter().map(|d| bar(day_start(date(2024, 1, *d)))).collect();
        let request = PriceRequest::new(
            "TCS",
            day_start(date(2024, 1, 25)),
            day_start(date(2024, 1, 29)),
            Granularity::OneDay,
        );
        assert_eq!(largest_gap(&daily, &request, far_future(), &config), 0);
    }

    #[test]
    fn test_daily_edges_and_as_of() {
        let bars = vec![bar(day_start(date(2024, 1, 8))), bar(day_start(date(2024, 1, 9)))];
        // Range runs to the following Monday, but resolution happens on Wednesday
        let request = PriceRequest::new(
            "RELIANCE",
            day_start(date(2024, 1, 5)),
            day_start(date(2024, 1, 15)),
            Granularity::OneDay,
        );

        let as_of = day_start(date(2024, 1, 10)) + Duration::hours(12);
        assert_eq!(
            largest_gap(&bars, &request, as_of, &CoverageConfig::default()),
            0
        );

        // Resolved a week later, Jan 10-12 are missing
        assert_eq!(
            largest_gap(&bars, &request, far_future(), &CoverageConfig::default()),
            3
        );
    }

    #[test]
    fn test_normalize_drops_invalid_and_duplicates() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 4, 4, 0, 0).unwrap();
        let mut broken = bar(t0 + Duration::minutes(30));
        broken.high = 50.0;
        let bars = vec![
            bar(t0 + Duration::minutes(15)),
            bar(t0),
            broken,
            bar(t0),
            bar(t0 - Duration::days(2)),
        ];
        let request = PriceRequest::new("TCS", t0, t0 + Duration::hours(2), Granularity::FifteenMinutes);

        let normalized = normalize_bars("yahoo", &request, bars);

        let stamps: Vec<_> = normalized.iter().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![t0, t0 + Duration::minutes(15)]);
    }
}
