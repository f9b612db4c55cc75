//! Backend query functions
//!
//! - `q(query, start, end)`: series for a relative window
//! - `band(query, duration, period, num)`: the same window in `num` earlier
//!   periods, merged into one series per group at their original instants
//! - `over(query, duration, period, num)`: the same window in the current and
//!   `num - 1` earlier periods, one series per period tagged with `shift`
//! - `count(query, start, end)`: number of series the query returns
//!
//! Windows are relative to the evaluation time: `start` and `end` are
//! durations before now, an empty `end` means now. Squelched groups and
//! empty series are left out of every result.

use super::{Args, FuncSpec, FunctionRegistry};
use crate::ast::{Literal, Node};
use crate::backend::{BackendQuery, RawSeries, SeriesQuery};
use crate::duration::{format_duration, parse_duration};
use crate::error::{Error, Result};
use crate::results::{Results, TaggedValue};
use crate::state::State;
use crate::types::TagKeys;
use crate::value::{Series, Value, ValueType};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Tag key added by `over`
pub const SHIFT_TAG: &str = "shift";

/// Run one window, dropping squelched groups and empty series
fn fetch_window(
    state: &mut State<'_>,
    text: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<RawSeries>> {
    let query = BackendQuery {
        text: text.to_string(),
        start,
        end,
    };
    let mut series = state.fetch(None, &query)?;
    series.retain(|raw| !raw.series.is_empty() && !state.squelched(&raw.group));
    Ok(series)
}

/// `at - ago`, or an error when that leaves the representable range
fn before(at: DateTime<Utc>, ago: Duration) -> Result<DateTime<Utc>> {
    at.checked_sub_signed(ago).ok_or_else(|| {
        Error::InvalidDuration(format!("{} before {} is out of range", format_duration(ago), at))
    })
}

/// Resolve `start` and `end` duration strings against now
fn window(
    state: &State<'_>,
    func: &str,
    start: &str,
    end: &str,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let now = state.now();
    let start = before(now, parse_duration(start)?)?;
    let end = if end.trim().is_empty() {
        now
    } else {
        before(now, parse_duration(end)?)?
    };
    if start > end {
        return Err(Error::argument(func, format!("start {} is after end {}", start, end)));
    }
    Ok((start, end))
}

/// Average points into `points` equal time buckets, stamped at bucket start
fn downsample(series: Series, start: DateTime<Utc>, end: DateTime<Utc>, points: usize) -> Series {
    if points == 0 || series.len() <= points {
        return series;
    }
    let span = (end - start).num_milliseconds().max(1);
    let width = (span / points as i64).max(1);
    let mut buckets: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for (t, v) in series {
        let offset = (t - start).num_milliseconds().clamp(0, span - 1);
        let slot = buckets.entry(offset / width).or_insert((0.0, 0));
        slot.0 += v;
        slot.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(bucket, (sum, n))| {
            (start + Duration::milliseconds(bucket * width), sum / f64::from(n))
        })
        .collect()
}

fn to_results(series: Vec<RawSeries>) -> Results {
    Results::from_values(
        series
            .into_iter()
            .map(|raw| TaggedValue::new(Value::Series(raw.series), raw.group))
            .collect(),
    )
}

/// `q(query, start, end)`
fn q(state: &mut State<'_>, mut args: Args) -> Result<Results> {
    let text = args.string()?;
    let (start, end) = window(state, "q", &args.string()?, &args.string()?)?;
    let mut series = fetch_window(state, &text, start, end)?;
    let autods = state.autods();
    if autods > 0 {
        for raw in &mut series {
            raw.series = downsample(std::mem::take(&mut raw.series), start, end, autods);
        }
    }
    Ok(to_results(series))
}

/// `count(query, start, end)`
fn count(state: &mut State<'_>, mut args: Args) -> Result<Results> {
    let text = args.string()?;
    let (start, end) = window(state, "count", &args.string()?, &args.string()?)?;
    let series = fetch_window(state, &text, start, end)?;
    Ok(Results::scalar(series.len() as f64))
}

/// Shared arguments of `band` and `over`
struct Periods {
    text: String,
    duration: Duration,
    period: Duration,
    num: usize,
}

impl Periods {
    fn parse(func: &str, args: &mut Args) -> Result<Self> {
        let text = args.string()?;
        let duration = parse_duration(&args.string()?)?;
        let period = parse_duration(&args.string()?)?;
        let num = args.number()?;
        if num < 1.0 || num.fract() != 0.0 {
            return Err(Error::argument(
                func,
                format!("num must be a positive integer, got {}", num),
            ));
        }
        Ok(Self {
            text,
            duration,
            period,
            num: num as usize,
        })
    }

    /// Window `i` periods back and the shift that moves it onto the current one
    fn window(
        &self,
        now: DateTime<Utc>,
        i: usize,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>, Duration)> {
        let shift = i32::try_from(i)
            .ok()
            .and_then(|i| self.period.checked_mul(i))
            .ok_or_else(|| Error::InvalidDuration(format!("{} periods overflow", i)))?;
        let end = before(now, shift)?;
        Ok((before(end, self.duration)?, end, shift))
    }
}

/// `band(query, duration, period, num)`
fn band(state: &mut State<'_>, mut args: Args) -> Result<Results> {
    let periods = Periods::parse("band", &mut args)?;
    let now = state.now();
    let mut merged: BTreeMap<_, Series> = BTreeMap::new();
    for i in 1..=periods.num {
        let (start, end, _) = periods.window(now, i)?;
        for raw in fetch_window(state, &periods.text, start, end)? {
            merged.entry(raw.group).or_default().extend(raw.series);
        }
    }
    debug!(query = %periods.text, periods = periods.num, groups = merged.len(), "band");
    let mut results = Results::from_values(
        merged
            .into_iter()
            .map(|(group, series)| TaggedValue::new(Value::Series(series), group))
            .collect(),
    );
    results.ignore_unjoined = true;
    results.ignore_other_unjoined = true;
    Ok(results)
}

/// `over(query, duration, period, num)`
fn over(state: &mut State<'_>, mut args: Args) -> Result<Results> {
    let periods = Periods::parse("over", &mut args)?;
    let now = state.now();
    let mut results = Results::new();
    for i in 0..periods.num {
        let (start, end, shift) = periods.window(now, i)?;
        let label = format_duration(shift);
        for raw in fetch_window(state, &periods.text, start, end)? {
            let series = raw.series.into_iter().map(|(t, v)| (t + shift, v)).collect();
            results.push(TaggedValue::new(
                Value::Series(series),
                raw.group.with(SHIFT_TAG, label.clone()),
            ));
        }
    }
    results.ignore_unjoined = true;
    results.ignore_other_unjoined = true;
    Ok(results)
}

/// Tag hook of the query functions: keys named by the query text
fn query_tags(args: &[Node]) -> Result<TagKeys> {
    match args.first() {
        Some(Node::Literal(Literal::String(text))) => SeriesQuery::parse(text)
            .map(|q| q.keys())
            .map_err(|e| Error::Parse(e.to_string())),
        _ => Ok(TagKeys::new()),
    }
}

fn over_tags(args: &[Node]) -> Result<TagKeys> {
    let mut keys = query_tags(args)?;
    keys.insert(SHIFT_TAG.to_string());
    Ok(keys)
}

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use ValueType::*;

    registry.insert(
        "q",
        FuncSpec::new(vec![String, String, String], SeriesSet, q).with_tags(query_tags),
    );
    registry.insert(
        "band",
        FuncSpec::new(vec![String, String, String, Scalar], SeriesSet, band).with_tags(query_tags),
    );
    registry.insert(
        "over",
        FuncSpec::new(vec![String, String, String, Scalar], SeriesSet, over).with_tags(over_tags),
    );
    registry.insert("count", FuncSpec::new(vec![String, String, String], Scalar, count));
}
