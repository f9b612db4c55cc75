//! Series reducers
//!
//! Every reducer folds each Series of a SeriesSet into one Number for the
//! same group through [`reduce`]. The fold functions are pure and only ever
//! see non-empty series.

use super::{tags_of_first, Args, FuncSpec, FunctionRegistry};
use crate::error::{Error, Result};
use crate::results::{Results, TaggedValue};
use crate::state::State;
use crate::value::{Series, Value, ValueType};
use chrono::{DateTime, Utc};

/// What to do with an empty series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptySeries {
    /// Leave the group out of the output
    Drop,
    /// Fail with `Error::EmptySeries`
    Error,
}

/// Fold each Series of `results` into a Number with `f`
///
/// `expr` names the calling expression in errors. Entries that are not
/// series are an argument error.
pub fn reduce<F>(results: Results, expr: &str, policy: EmptySeries, f: F) -> Result<Results>
where
    F: Fn(&Series) -> f64,
{
    let mut reduced = Vec::with_capacity(results.len());
    let template = results.with_results(Vec::new());
    for entry in results {
        let series = match &entry.value {
            Value::Series(s) => s,
            other => {
                return Err(Error::argument(
                    expr,
                    format!(
                        "expected a series for group {}, got a {}",
                        entry.group,
                        other.value_type()
                    ),
                ))
            }
        };
        if series.is_empty() {
            match policy {
                EmptySeries::Drop => continue,
                EmptySeries::Error => {
                    return Err(Error::EmptySeries {
                        expr: expr.to_string(),
                        group: entry.group.to_string(),
                    })
                }
            }
        }
        let value = f(series);
        reduced.push(TaggedValue {
            value: Value::Number(value),
            group: entry.group,
            computations: entry.computations,
        });
    }
    Ok(template.with_results(reduced))
}

fn values(s: &Series) -> impl Iterator<Item = f64> + '_ {
    s.values().copied()
}

fn sorted(s: &Series) -> Vec<f64> {
    let mut v: Vec<f64> = values(s).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Arithmetic mean
pub fn avg(s: &Series) -> f64 {
    sum(s) / s.len() as f64
}

/// Earliest value
pub fn first(s: &Series) -> f64 {
    s.values().next().copied().unwrap_or(f64::NAN)
}

/// Latest value
pub fn last(s: &Series) -> f64 {
    s.values().next_back().copied().unwrap_or(f64::NAN)
}

/// Middle value, mean of the two middle values for an even count
pub fn median(s: &Series) -> f64 {
    let v = sorted(s);
    match v.len() {
        0 => f64::NAN,
        n if n % 2 == 1 => v[n / 2],
        n => (v[n / 2 - 1] + v[n / 2]) / 2.0,
    }
}

/// Smallest value
pub fn min(s: &Series) -> f64 {
    values(s).fold(f64::INFINITY, f64::min)
}

/// Largest value
pub fn max(s: &Series) -> f64 {
    values(s).fold(f64::NEG_INFINITY, f64::max)
}

/// Sum of all values
pub fn sum(s: &Series) -> f64 {
    values(s).sum()
}

/// Number of points
pub fn len(s: &Series) -> f64 {
    s.len() as f64
}

/// Sample standard deviation, 0 for a single point
pub fn dev(s: &Series) -> f64 {
    let n = s.len();
    if n < 2 {
        return 0.0;
    }
    let mean = avg(s);
    let ss: f64 = values(s).map(|v| (v - mean).powi(2)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Latest minus earliest value
pub fn diff(s: &Series) -> f64 {
    last(s) - first(s)
}

/// Nearest-rank percentile, `p` in [0, 1]
pub fn percentile(s: &Series, p: f64) -> f64 {
    let v = sorted(s);
    if v.is_empty() {
        return f64::NAN;
    }
    let rank = (p * v.len() as f64).ceil() as usize;
    v[rank.saturating_sub(1).min(v.len() - 1)]
}

/// Longest run of consecutive non-zero values
pub fn streak(s: &Series) -> f64 {
    let (mut longest, mut current) = (0usize, 0usize);
    for v in values(s) {
        if v != 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest as f64
}

/// Number of times the value changes between consecutive points
pub fn change_count(s: &Series) -> f64 {
    values(s)
        .zip(values(s).skip(1))
        .filter(|(a, b)| a != b)
        .count() as f64
}

/// Seconds from the last point to `now`
pub fn since(s: &Series, now: DateTime<Utc>) -> f64 {
    match s.keys().next_back() {
        Some(t) => (now - *t).num_milliseconds() as f64 / 1000.0,
        None => f64::NAN,
    }
}

/// Seconds from `now` until the least-squares line through `s` reaches `y`
///
/// -1 when the line is flat or reached `y` in the past.
pub fn forecast_lr(s: &Series, y: f64, now: DateTime<Utc>) -> f64 {
    let n = s.len() as f64;
    let xs: Vec<f64> = s
        .keys()
        .map(|t| (*t - now).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = avg(s);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (x, v) in xs.iter().zip(values(s)) {
        sxy += (x - mean_x) * (v - mean_y);
        sxx += (x - mean_x).powi(2);
    }
    if sxx == 0.0 || sxy == 0.0 {
        return -1.0;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let x = (y - intercept) / slope;
    if x.is_finite() && x >= 0.0 {
        x
    } else {
        -1.0
    }
}

fn series_reducer(name: &'static str, f: fn(&Series) -> f64) -> FuncSpec {
    FuncSpec::new(
        vec![ValueType::SeriesSet],
        ValueType::NumberSet,
        move |_: &mut State<'_>, mut args: Args| {
            let series = args.results()?;
            reduce(series, name, EmptySeries::Drop, f)
        },
    )
    .with_tags(tags_of_first)
}

pub(crate) fn register(registry: &mut FunctionRegistry) {
    let simple: [(&'static str, fn(&Series) -> f64); 12] = [
        ("avg", avg),
        ("first", first),
        ("last", last),
        ("median", median),
        ("min", min),
        ("max", max),
        ("sum", sum),
        ("len", len),
        ("dev", dev),
        ("diff", diff),
        ("streak", streak),
        ("cCount", change_count),
    ];
    for (name, f) in simple {
        registry.insert(name, series_reducer(name, f));
    }

    registry.insert(
        "percentile",
        FuncSpec::new(
            vec![ValueType::SeriesSet, ValueType::Scalar],
            ValueType::NumberSet,
            |_: &mut State<'_>, mut args: Args| {
                let series = args.results()?;
                let p = args.number()?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(Error::argument(
                        "percentile",
                        format!("percentile must be within [0, 1], got {}", p),
                    ));
                }
                reduce(series, "percentile", EmptySeries::Drop, |s| percentile(s, p))
            },
        )
        .with_tags(tags_of_first),
    );

    registry.insert(
        "since",
        FuncSpec::new(
            vec![ValueType::SeriesSet],
            ValueType::NumberSet,
            |state: &mut State<'_>, mut args: Args| {
                let now = state.now();
                reduce(args.results()?, "since", EmptySeries::Error, |s| since(s, now))
            },
        )
        .with_tags(tags_of_first),
    );

    registry.insert(
        "forecastlr",
        FuncSpec::new(
            vec![ValueType::SeriesSet, ValueType::Scalar],
            ValueType::NumberSet,
            |state: &mut State<'_>, mut args: Args| {
                let now = state.now();
                let series = args.results()?;
                let y = args.number()?;
                reduce(series, "forecastlr", EmptySeries::Error, |s| forecast_lr(s, y, now))
            },
        )
        .with_tags(tags_of_first),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagSet;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn series(values: &[f64]) -> Series {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (at(i as i64 * 60), *v))
            .collect()
    }

    fn set(entries: Vec<(&str, Series)>) -> Results {
        Results::from_values(
            entries
                .into_iter()
                .map(|(tags, s)| TaggedValue::new(Value::Series(s), TagSet::parse(tags).unwrap()))
                .collect(),
        )
    }

    #[test]
    fn test_constant_series() {
        let s = series(&[4.0, 4.0, 4.0]);
        for f in [avg, first, last, median, min, max] {
            assert_eq!(f(&s), 4.0);
        }
        assert_eq!(dev(&s), 0.0);
        assert_eq!(diff(&s), 0.0);
        assert_eq!(change_count(&s), 0.0);
    }

    #[test]
    fn test_reducers() {
        let s = series(&[3.0, 1.0, 4.0, 1.0, 5.0]);
        assert_eq!(avg(&s), 2.8);
        assert_eq!(first(&s), 3.0);
        assert_eq!(last(&s), 5.0);
        assert_eq!(median(&s), 3.0);
        assert_eq!(median(&series(&[1.0, 2.0, 3.0, 4.0])), 2.5);
        assert_eq!(min(&s), 1.0);
        assert_eq!(max(&s), 5.0);
        assert_eq!(sum(&s), 14.0);
        assert_eq!(len(&s), 5.0);
        assert_eq!(diff(&s), 2.0);
        assert_eq!(change_count(&s), 4.0);
        assert!((dev(&series(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])) - 2.138).abs() < 1e-3);
        assert_eq!(dev(&series(&[7.0])), 0.0);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let s = series(&[15.0, 20.0, 35.0, 40.0, 50.0]);
        assert_eq!(percentile(&s, 0.0), 15.0);
        assert_eq!(percentile(&s, 0.3), 20.0);
        assert_eq!(percentile(&s, 0.4), 20.0);
        assert_eq!(percentile(&s, 0.5), 35.0);
        assert_eq!(percentile(&s, 1.0), 50.0);
    }

    #[test]
    fn test_streak() {
        assert_eq!(streak(&series(&[1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0])), 3.0);
        assert_eq!(streak(&series(&[0.0, 0.0])), 0.0);
    }

    #[test]
    fn test_since_and_forecast() {
        let s = series(&[0.0, 10.0, 20.0]);
        let now = at(120) + Duration::seconds(30);
        assert_eq!(since(&s, now), 30.0);

        // 10 per minute, at 20 when now - 30s; reaches 40 after 120s more
        let eta = forecast_lr(&s, 40.0, now);
        assert!((eta - 90.0).abs() < 1e-9, "eta {}", eta);
        assert_eq!(forecast_lr(&s, -10.0, now), -1.0);
        assert_eq!(forecast_lr(&series(&[5.0, 5.0]), 10.0, now), -1.0);
        assert_eq!(forecast_lr(&series(&[5.0]), 10.0, now), -1.0);
    }

    #[test]
    fn test_reduce_drops_empty() {
        let input = set(vec![("host=a", series(&[1.0, 3.0])), ("host=b", Series::new())]);
        let out = reduce(input, "avg", EmptySeries::Drop, avg).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.results[0].value, Value::Number(2.0));
        assert_eq!(out.results[0].group, TagSet::parse("host=a").unwrap());
    }

    #[test]
    fn test_reduce_empty_error() {
        let input = set(vec![("host=b", Series::new())]);
        let err = reduce(input, "since", EmptySeries::Error, len).unwrap_err();
        match err {
            Error::EmptySeries { expr, group } => {
                assert_eq!(expr, "since");
                assert_eq!(group, "{host=b}");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_reduce_rejects_numbers() {
        let input = Results::number(1.0);
        assert!(matches!(
            reduce(input, "avg", EmptySeries::Drop, avg),
            Err(Error::Argument { .. })
        ));
    }
}
