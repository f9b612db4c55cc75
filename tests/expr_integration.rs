//! End-to-end Expression Tests
//!
//! Parses and evaluates whole expressions against an in-memory backend,
//! covering group joins, placeholders, the function library, the query
//! cache and the audit trail.

use chrono::{DateTime, Duration, TimeZone, Utc};
use kuba_expr::backend::{Backends, InMemoryBackend};
use kuba_expr::cache::{CacheConfig, QueryCache};
use kuba_expr::error::BackendError;
use kuba_expr::state::{Squelches, StaticHistory};
use kuba_expr::{
    AlertKey, Error, ExecuteContext, Expr, FunctionRegistry, Results, Series, TagSet, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// One point per minute over the last ten minutes, all equal to `value`
fn flat(value: f64) -> Series {
    (0..10).map(|i| (now() - Duration::minutes(i), value)).collect()
}

fn tags(s: &str) -> TagSet {
    TagSet::parse(s).unwrap()
}

/// cpu for three hosts in two data centers, mem for the two web hosts
fn backend() -> InMemoryBackend {
    InMemoryBackend::new()
        .with_series("cpu", tags("host=web-01,dc=us"), flat(90.0))
        .with_series("cpu", tags("host=web-02,dc=us"), flat(30.0))
        .with_series("cpu", tags("host=db-01,dc=eu"), flat(60.0))
        .with_series("mem", tags("host=web-01"), flat(4.0))
        .with_series("mem", tags("host=web-02"), flat(8.0))
}

fn context_with(backend: Arc<InMemoryBackend>) -> ExecuteContext {
    ExecuteContext::new(Backends::new().with("mem", backend)).at(now())
}

fn context() -> ExecuteContext {
    context_with(Arc::new(backend()))
}

fn eval(text: &str, ctx: &ExecuteContext) -> Result<Results, Error> {
    let expr = Expr::new(text, &FunctionRegistry::builtin())?;
    Ok(expr.execute(ctx)?.results)
}

fn number_of(results: &Results, group: &str) -> f64 {
    let group = tags(group);
    results
        .iter()
        .find(|r| r.group == group)
        .and_then(|r| r.value.as_f64())
        .unwrap_or_else(|| panic!("no number for {}", group))
}

// =============================================================================
// Scalars and grouped comparisons
// =============================================================================

#[test]
fn test_constant_expressions() {
    let ctx = context();
    assert_eq!(eval("1 == 1", &ctx).unwrap().as_single_scalar(), Some(1.0));
    assert_eq!(eval("-1 < 0", &ctx).unwrap().as_single_scalar(), Some(1.0));
    assert_eq!(eval("10 / 4", &ctx).unwrap().as_single_scalar(), Some(2.5));
    assert_eq!(eval("1 || 0 && 0", &ctx).unwrap().as_single_scalar(), Some(1.0));

    let nan = eval("0 / 0 > 1", &ctx).unwrap().as_single_scalar().unwrap();
    assert!(nan.is_nan());
}

#[test]
fn test_threshold_per_host() {
    let out = eval(r#"avg(q("cpu{host=*}", "5m", "")) > 50"#, &context()).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(number_of(&out, "host=web-01"), 1.0);
    assert_eq!(number_of(&out, "host=web-02"), 0.0);
    assert_eq!(number_of(&out, "host=db-01"), 1.0);
    assert!(out.iter().all(|r| matches!(r.value, Value::Number(_))));
}

#[test]
fn test_decimal_threshold() {
    let out = eval(r#"avg(q("mem{host=*}", "5m", "")) / 10 > 0.5"#, &context()).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(number_of(&out, "host=web-01"), 0.0);
    assert_eq!(number_of(&out, "host=web-02"), 1.0);

    let out = eval("2 > 1.5", &context()).unwrap();
    assert_eq!(out.as_single_scalar(), Some(1.0));
}

#[test]
fn test_static_tags() {
    let registry = FunctionRegistry::builtin();
    let expr = Expr::new(
        r#"avg(q("cpu{host=*,dc=*}", "5m", "")) / avg(q("cpu{dc=*}", "5m", ""))"#,
        &registry,
    )
    .unwrap();
    let expected: BTreeSet<String> = ["dc".to_string()].into();
    assert_eq!(expr.tags().unwrap(), Some(expected));

    let incompatible = Expr::new(
        r#"avg(q("cpu{host=*}", "5m", "")) + avg(q("cpu{dc=*}", "5m", ""))"#,
        &registry,
    );
    assert!(matches!(incompatible, Err(Error::Parse(_))));
}

// =============================================================================
// Group joins
// =============================================================================

#[test]
fn test_subset_join_keeps_smaller_group() {
    let out = eval(
        r#"avg(q("cpu{host=*,dc=*}", "5m", "")) / avg(q("cpu{dc=*}", "5m", ""))"#,
        &context(),
    )
    .unwrap();
    assert_eq!(out.len(), 3);
    let groups: Vec<String> = out.iter().map(|r| r.group.to_string()).collect();
    assert_eq!(groups.iter().filter(|g| *g == "{dc=us}").count(), 2);
    assert_eq!(groups.iter().filter(|g| *g == "{dc=eu}").count(), 1);

    // us average is 60, eu is 60
    let mut ratios: Vec<f64> = out.iter().filter_map(|r| r.value.as_f64()).collect();
    ratios.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(ratios, vec![0.5, 1.0, 1.5]);
}

#[test]
fn test_unjoined_groups_get_placeholders() {
    let text = r#"avg(q("cpu{host=*}", "5m", "")) + avg(q("mem{host=*}", "5m", ""))"#;
    let out = eval(text, &context()).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(number_of(&out, "host=web-01"), 94.0);
    assert_eq!(number_of(&out, "host=web-02"), 38.0);
    assert!(number_of(&out, "host=db-01").is_nan());

    let out = eval(text, &context().with_unjoined_ok(true)).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|r| r.group != tags("host=db-01")));
}

#[test]
fn test_nan_substitute() {
    let out = eval(
        r#"avg(q("cpu{host=*}", "5m", "")) + nv(avg(q("mem{host=*}", "5m", "")), 0)"#,
        &context(),
    )
    .unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(number_of(&out, "host=db-01"), 60.0);
}

#[test]
fn test_empty_operand_yields_nothing() {
    let out = eval(r#"avg(q("disk{host=*}", "5m", "")) > 1"#, &context()).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_series_arithmetic() {
    let out = eval(r#"q("mem{host=web-01}", "5m", "") * 2 + 1"#, &context()).unwrap();
    assert_eq!(out.len(), 1);
    let series = out.results[0].value.as_series().unwrap();
    assert_eq!(series.len(), 6);
    assert!(series.values().all(|v| *v == 9.0));

    let both = Expr::new(
        r#"q("mem{host=*}", "5m", "") + q("cpu{host=*}", "5m", "")"#,
        &FunctionRegistry::builtin(),
    );
    assert!(matches!(both, Err(Error::Parse(_))));
}

// =============================================================================
// Function library
// =============================================================================

#[test]
fn test_reducers() {
    let ctx = context();
    let out = eval(r#"len(q("cpu{host=web-01}", "5m", ""))"#, &ctx).unwrap();
    assert_eq!(number_of(&out, "host=web-01"), 6.0);

    let out = eval(r#"dev(q("cpu{host=web-01}", "5m", ""))"#, &ctx).unwrap();
    assert_eq!(number_of(&out, "host=web-01"), 0.0);

    let out = eval(r#"percentile(q("cpu{host=*}", "5m", ""), 1.5)"#, &ctx);
    assert!(matches!(out, Err(Error::Argument { .. })));
}

#[test]
fn test_sort_and_limit() {
    let out = eval(
        r#"limit(sort(avg(q("cpu{host=*}", "5m", "")), "desc"), 2)"#,
        &context(),
    )
    .unwrap();
    let groups: Vec<String> = out.iter().map(|r| r.group.to_string()).collect();
    assert_eq!(groups, vec!["{host=web-01}", "{host=db-01}"]);
}

#[test]
fn test_sort_places_placeholders_last() {
    let ratio = r#"avg(q("cpu{host=*}", "5m", "")) / avg(q("mem{host=*}", "5m", ""))"#;
    for (order, expected) in [
        ("asc", ["{host=web-02}", "{host=web-01}", "{host=db-01}"]),
        ("desc", ["{host=web-01}", "{host=web-02}", "{host=db-01}"]),
    ] {
        let out = eval(&format!(r#"sort({}, "{}")"#, ratio, order), &context()).unwrap();
        let groups: Vec<String> = out.iter().map(|r| r.group.to_string()).collect();
        assert_eq!(groups, expected);
        assert!(out.results[2].value.as_f64().unwrap().is_nan());
    }
}

#[test]
fn test_transpose() {
    let out = eval(
        r#"len(t(avg(q("cpu{host=*,dc=*}", "5m", "")), "dc"))"#,
        &context(),
    )
    .unwrap();
    assert_eq!(number_of(&out, "dc=us"), 2.0);
    assert_eq!(number_of(&out, "dc=eu"), 1.0);
}

#[test]
fn test_count_and_ungroup() {
    let ctx = context();
    let out = eval(r#"count("cpu{host=*}", "5m", "")"#, &ctx).unwrap();
    assert_eq!(out.as_single_scalar(), Some(3.0));

    let out = eval(r#"ungroup(avg(q("mem{host=web-02}", "5m", ""))) * 2"#, &ctx).unwrap();
    assert_eq!(out.as_single_scalar(), Some(16.0));
}

#[test]
fn test_over_labels_periods() {
    let out = eval(r#"avg(over("cpu{host=web-01}", "5m", "1m", 3))"#, &context()).unwrap();
    let shifts: BTreeSet<String> = out
        .iter()
        .filter_map(|r| r.group.get("shift").cloned())
        .collect();
    let expected: BTreeSet<String> = ["0s", "1m", "2m"].iter().map(|s| s.to_string()).collect();
    assert_eq!(shifts, expected);
}

#[test]
fn test_unknown_alerts() {
    let history = StaticHistory::new().with_alert(
        "cpu.high",
        vec![AlertKey::new("cpu.high", &tags("host=web-01"))],
        vec![],
    );
    let ctx = context().with_history(Arc::new(history));
    let out = eval(r#"unknown("cpu.high")"#, &ctx).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(number_of(&out, "host=web-01"), 1.0);

    let out = eval(r#"avg(q("cpu{host=*}", "5m", "")) + unknown("cpu.high")"#, &ctx).unwrap();
    // hosts that are not unknown get no placeholder
    assert_eq!(out.len(), 1);
    assert!(number_of(&out, "host=web-01").is_finite());

    assert!(eval(r#"unknown("cpu.high")"#, &context()).is_err());
}

// =============================================================================
// Context features
// =============================================================================

#[test]
fn test_squelched_series_are_dropped() {
    let squelch = Squelches::parse(["host=db-.*"]).unwrap();
    let ctx = context().with_squelch(Arc::new(squelch));
    let out = eval(r#"avg(q("cpu{host=*}", "5m", ""))"#, &ctx).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|r| r.group != tags("host=db-01")));
}

#[test]
fn test_identical_queries_share_one_backend_call() {
    let backend = Arc::new(backend());
    let cache = Arc::new(QueryCache::new(CacheConfig::default()));
    let ctx = context_with(backend.clone()).with_cache(cache.clone());

    let expr = Expr::new(
        r#"avg(q("cpu{host=*}", "5m", "")) - min(q("cpu{host=*}", "5m", ""))"#,
        &FunctionRegistry::builtin(),
    )
    .unwrap();
    let execution = expr.execute(&ctx).unwrap();

    assert_eq!(execution.queries.len(), 2);
    assert_eq!(execution.queries[0], execution.queries[1]);
    assert_eq!(backend.query_count(), 1);
    assert_eq!(cache.stats().snapshot().hits, 1);
    assert!(execution.results.iter().all(|r| r.value == Value::Number(0.0)));
}

#[test]
fn test_out_of_range_window_is_an_error() {
    let out = eval(r#"avg(q("cpu{host=*}", "1000000y", ""))"#, &context());
    assert!(matches!(out, Err(Error::InvalidDuration(_))));
    let out = eval(r#"avg(band("cpu{host=*}", "1h", "100000y", 5))"#, &context());
    assert!(matches!(out, Err(Error::InvalidDuration(_))));
}

#[test]
fn test_backend_failure_is_an_error() {
    let backend = Arc::new(backend());
    backend.set_failure(Some(BackendError::Unavailable("connection refused".to_string())));
    let out = eval(r#"avg(q("cpu{host=*}", "5m", ""))"#, &context_with(backend));
    assert!(matches!(out, Err(Error::Backend(_))));
}

#[test]
fn test_audit_trail() {
    let ctx = context().with_computations(true);
    let out = eval(r#"avg(q("mem{host=*}", "5m", "")) * 2 > 10"#, &ctx).unwrap();
    let web02 = out.iter().find(|r| r.group == tags("host=web-02")).unwrap();
    let trail: Vec<(&str, f64)> = web02
        .computations
        .iter()
        .map(|c| (c.text.as_str(), c.value))
        .collect();
    assert_eq!(
        trail,
        vec![
            (r#"avg(q("mem{host=*}", "5m", ""))"#, 8.0),
            (r#"avg(q("mem{host=*}", "5m", "")) * 2"#, 16.0),
            (r#"avg(q("mem{host=*}", "5m", "")) * 2 > 10"#, 1.0),
        ]
    );
}

#[test]
fn test_autods_limits_points() {
    let ctx = context().with_autods(2);
    let out = eval(r#"len(q("cpu{host=web-01}", "10m", ""))"#, &ctx).unwrap();
    assert!(number_of(&out, "host=web-01") <= 2.0);
}
