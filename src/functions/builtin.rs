//! Set transforms and scalar helpers

use super::{tags_of_first, Args, FuncSpec, FunctionRegistry};
use crate::alert_key::AlertKeys;
use crate::ast::{Literal, Node};
use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::results::{Results, TaggedValue};
use crate::state::State;
use crate::types::{TagKeys, TagSet};
use crate::value::{Series, Value, ValueType};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

fn map_numbers(value: Value, f: impl Fn(f64) -> f64) -> Value {
    match value {
        Value::Scalar(v) => Value::Scalar(f(v)),
        Value::Number(v) => Value::Number(f(v)),
        Value::Series(s) => Value::Series(s.into_iter().map(|(t, v)| (t, f(v))).collect()),
    }
}

/// `abs(set)`
fn abs(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    let template = set.with_results(Vec::new());
    let out = set
        .into_iter()
        .map(|mut r| {
            r.value = map_numbers(r.value, f64::abs);
            r
        })
        .collect();
    Ok(template.with_results(out))
}

/// `nv(set, v)`: placeholder value for unjoined groups
///
/// An empty set becomes a single ungrouped Number `v`.
fn nv(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let mut set = args.results()?;
    let v = args.number()?;
    if set.is_empty() {
        set.push(TaggedValue::new(Value::Number(v), TagSet::new()));
    }
    set.nan_value = Some(v);
    Ok(set)
}

fn number_of(func: &str, r: &TaggedValue) -> Result<f64> {
    r.value.as_f64().ok_or_else(|| {
        Error::argument(func, format!("group {} is not a number", r.group))
    })
}

/// `sort(set, "asc"|"desc")`
fn sort(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    let order = args.string()?;
    let descending = match order.as_str() {
        "asc" => false,
        "desc" => true,
        other => {
            return Err(Error::argument(
                "sort",
                format!("order must be \"asc\" or \"desc\", got \"{}\"", other),
            ))
        }
    };
    let mut keyed = set
        .iter()
        .map(|r| number_of("sort", r))
        .collect::<Result<Vec<f64>>>()?
        .into_iter()
        .zip(set.results.iter().cloned())
        .collect::<Vec<_>>();
    // NaN sorts last in either order
    keyed.sort_by(|(a, _), (b, _)| match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if descending => b.total_cmp(a),
        (false, false) => a.total_cmp(b),
    });
    Ok(set.with_results(keyed.into_iter().map(|(_, r)| r).collect()))
}

/// `limit(set, n)`: the first `n` entries
fn limit(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let mut set = args.results()?;
    let n = args.number()?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(Error::argument(
            "limit",
            format!("limit must be a non-negative integer, got {}", n),
        ));
    }
    set.results.truncate(n as usize);
    Ok(set)
}

/// `ungroup(set)`: the only entry of `set` as an ungrouped Scalar
fn ungroup(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    match set.results.as_slice() {
        [only] => Ok(Results::scalar(number_of("ungroup", only)?)),
        [] => Err(Error::NoResults("ungroup of an empty set".to_string())),
        other => Err(Error::argument(
            "ungroup",
            format!("requires exactly one group, got {}", other.len()),
        )),
    }
}

/// `t(set, "key,key2")`: transpose a number set into series grouped by the given keys
///
/// Points of each output series are numbered from the Unix epoch in input
/// order, one second apart.
fn transpose(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    let keys = parse_keys(&args.string()?)?;
    let mut groups: Vec<(TagSet, Series)> = Vec::new();
    for r in set.iter() {
        let v = number_of("t", r)?;
        let group = r.group.project(&keys);
        if group.len() != keys.len() {
            return Err(Error::argument(
                "t",
                format!("group {} does not have all tags of {:?}", r.group, keys),
            ));
        }
        let slot = match groups.iter().position(|(g, _)| *g == group) {
            Some(i) => i,
            None => {
                groups.push((group, Series::new()));
                groups.len() - 1
            }
        };
        let series = &mut groups[slot].1;
        let instant = DateTime::<Utc>::from_timestamp(series.len() as i64, 0)
            .ok_or_else(|| Error::Internal("transpose index out of range".to_string()))?;
        series.insert(instant, v);
    }
    let out = groups
        .into_iter()
        .map(|(group, s)| TaggedValue::new(Value::Series(s), group))
        .collect();
    Ok(set.with_results(out))
}

fn parse_keys(s: &str) -> Result<TagKeys> {
    let mut keys = TagKeys::new();
    for key in s.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.insert(key.to_string()) {
            return Err(Error::InvalidTags(format!("duplicate key {} in {}", key, s)));
        }
    }
    Ok(keys)
}

/// Tag hook of `t`: the keys named by the string argument
fn transpose_tags(args: &[Node]) -> Result<TagKeys> {
    match args.get(1) {
        Some(Node::Literal(Literal::String(s))) => parse_keys(s),
        _ => Ok(TagKeys::new()),
    }
}

/// `dropna(series)`: remove NaN and infinite points, then empty series
fn dropna(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    let template = set.with_results(Vec::new());
    let mut out = Vec::with_capacity(set.len());
    for mut r in set {
        match r.value {
            Value::Series(s) => {
                let kept: Series = s.into_iter().filter(|(_, v)| v.is_finite()).collect();
                if kept.is_empty() {
                    continue;
                }
                r.value = Value::Series(kept);
            }
            _ => {
                return Err(Error::argument(
                    "dropna",
                    format!("group {} is not a series", r.group),
                ))
            }
        }
        out.push(r);
    }
    Ok(template.with_results(out))
}

/// `tail(series, n)`: the last `n` points of each series
fn tail(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let set = args.results()?;
    let n = args.number()?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(Error::argument(
            "tail",
            format!("count must be a non-negative integer, got {}", n),
        ));
    }
    let n = n as usize;
    let template = set.with_results(Vec::new());
    let mut out = Vec::with_capacity(set.len());
    for mut r in set {
        match r.value {
            Value::Series(s) => {
                let skip = s.len().saturating_sub(n);
                let kept: Series = s.into_iter().skip(skip).collect();
                if kept.is_empty() {
                    continue;
                }
                r.value = Value::Series(kept);
            }
            _ => {
                return Err(Error::argument(
                    "tail",
                    format!("group {} is not a series", r.group),
                ))
            }
        }
        out.push(r);
    }
    Ok(template.with_results(out))
}

/// `epoch()`: evaluation time in Unix seconds
fn epoch(state: &mut State<'_>, _: Args) -> Result<Results> {
    Ok(Results::scalar(state.now().timestamp() as f64))
}

/// `duration("1h")`: duration in seconds
fn duration(_: &mut State<'_>, mut args: Args) -> Result<Results> {
    let d = parse_duration(&args.string()?)?;
    Ok(Results::scalar(d.num_milliseconds() as f64 / 1000.0))
}

fn alert_states(func: &str, keys: AlertKeys) -> Result<Results> {
    let mut out = Results::new();
    for key in keys {
        out.push(TaggedValue::new(Value::Number(1.0), key.group()?));
    }
    // groups of other alerts never join these
    out.ignore_other_unjoined = true;
    tracing::debug!(func, groups = out.len(), "alert state lookup");
    Ok(out)
}

fn history_lookup(
    state: &State<'_>,
    func: &str,
    mut args: Args,
) -> Result<(AlertKeys, AlertKeys)> {
    let alert = args.string()?;
    let history = state
        .history()
        .ok_or_else(|| Error::argument(func, "no alert history configured"))?;
    Ok(history.unknown_and_unevaluated(&alert))
}

/// `unknown("alert")`: 1 per group of `alert` currently unknown
fn unknown(state: &mut State<'_>, args: Args) -> Result<Results> {
    let (unknown, _) = history_lookup(state, "unknown", args)?;
    alert_states("unknown", unknown)
}

/// `unevaluated("alert")`: 1 per group of `alert` currently unevaluated
fn unevaluated(state: &mut State<'_>, args: Args) -> Result<Results> {
    let (_, unevaluated) = history_lookup(state, "unevaluated", args)?;
    alert_states("unevaluated", unevaluated)
}

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use ValueType::*;

    registry.insert("abs", FuncSpec::new(vec![NumberSet], NumberSet, abs).with_tags(tags_of_first));
    registry.insert(
        "nv",
        FuncSpec::new(vec![NumberSet, Scalar], NumberSet, nv).with_tags(tags_of_first),
    );
    registry.insert(
        "sort",
        FuncSpec::new(vec![NumberSet, String], NumberSet, sort).with_tags(tags_of_first),
    );
    registry.insert(
        "limit",
        FuncSpec::new(vec![NumberSet, Scalar], NumberSet, limit).with_tags(tags_of_first),
    );
    registry.insert("ungroup", FuncSpec::new(vec![NumberSet], Scalar, ungroup));
    registry.insert(
        "t",
        FuncSpec::new(vec![NumberSet, String], SeriesSet, transpose).with_tags(transpose_tags),
    );
    registry.insert(
        "dropna",
        FuncSpec::new(vec![SeriesSet], SeriesSet, dropna).with_tags(tags_of_first),
    );
    registry.insert(
        "tail",
        FuncSpec::new(vec![SeriesSet, Scalar], SeriesSet, tail).with_tags(tags_of_first),
    );
    registry.insert("epoch", FuncSpec::new(vec![], Scalar, epoch));
    registry.insert("duration", FuncSpec::new(vec![String], Scalar, duration));
    registry.insert("unknown", FuncSpec::new(vec![String], NumberSet, unknown));
    registry.insert("unevaluated", FuncSpec::new(vec![String], NumberSet, unevaluated));
}
