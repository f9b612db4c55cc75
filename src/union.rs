//! Group join for binary operators
//!
//! Pairs the entries of two [`Results`] by tag-set compatibility:
//!
//! - equal groups join
//! - an empty group joins every group on the other side
//! - groups with the same number of tags but different content never join
//! - otherwise a strict subset joins its superset, and the result carries the
//!   smaller (more specific) group
//!
//! Entries that never join are *unjoined*. Unless the caller allows unjoined
//! groups, each one is paired with the other side's NaN substitute, subject to
//! the suppression flags on both collections.
//!
//! # Complexity
//!
//! The right side is indexed by canonical group and by cardinality, so
//! equality and broadcast matches cost a hash lookup. Only groups with a
//! different cardinality are checked for the subset relation. Candidates for
//! each left entry are sorted by right-side position, which keeps the output
//! in the same order as a plain nested loop.

use crate::results::{Computation, Results};
use crate::types::TagSet;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// One pair of operand values feeding a binary operator
#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    /// Left operand value
    pub a: Value,
    /// Right operand value
    pub b: Value,
    /// Group of the operator result
    pub group: TagSet,
    /// Audit trail of both operands (left first)
    pub computations: Vec<Computation>,
}

/// Join policy
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOptions {
    /// Never synthesize placeholders for unjoined groups
    pub unjoined_ok: bool,
    /// Attach audit notes to placeholder unions
    pub record_computations: bool,
}

/// Index over the right-hand operand
struct GroupIndex<'a> {
    by_group: HashMap<&'a TagSet, Vec<usize>>,
    by_len: BTreeMap<usize, Vec<usize>>,
    empty: Vec<usize>,
}

impl<'a> GroupIndex<'a> {
    fn build(results: &'a Results) -> Self {
        let mut by_group: HashMap<&TagSet, Vec<usize>> = HashMap::new();
        let mut by_len: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut empty = Vec::new();
        for (i, r) in results.results.iter().enumerate() {
            if r.group.is_empty() {
                empty.push(i);
            } else {
                by_group.entry(&r.group).or_default().push(i);
                by_len.entry(r.group.len()).or_default().push(i);
            }
        }
        Self {
            by_group,
            by_len,
            empty,
        }
    }

    /// Positions on the right side that join `group`, with the result group,
    /// in ascending position order
    fn matches(&self, group: &'a TagSet, right: &'a Results) -> Vec<(usize, &'a TagSet)> {
        if group.is_empty() {
            return right
                .results
                .iter()
                .enumerate()
                .map(|(i, r)| (i, &r.group))
                .collect();
        }

        let mut found: Vec<(usize, &TagSet)> = Vec::new();
        found.extend(self.empty.iter().map(|&i| (i, group)));
        if let Some(equal) = self.by_group.get(group) {
            found.extend(equal.iter().map(|&i| (i, group)));
        }
        for (&len, positions) in &self.by_len {
            if len == group.len() {
                continue;
            }
            for &i in positions {
                let other = &right.results[i].group;
                if group.subset(other) {
                    found.push((i, group));
                } else if other.subset(group) {
                    found.push((i, other));
                }
            }
        }
        found.sort_by_key(|(i, _)| *i);
        found
    }
}

/// Compute the join of `a` and `b`
///
/// `expr` is the text of the binary expression, used in placeholder audit
/// notes. Output order: matched pairs in left-then-right scan order, then
/// left placeholders, then right placeholders.
pub fn union(a: &Results, b: &Results, expr: &str, options: JoinOptions) -> Vec<Union> {
    let mut unions = Vec::new();
    if a.is_empty() || b.is_empty() {
        return unions;
    }

    let index = GroupIndex::build(b);
    let mut a_joined = vec![false; a.len()];
    let mut b_joined = vec![false; b.len()];

    for (ia, ra) in a.results.iter().enumerate() {
        for (ib, group) in index.matches(&ra.group, b) {
            let rb = &b.results[ib];
            a_joined[ia] = true;
            b_joined[ib] = true;
            let mut computations = ra.computations.clone();
            computations.extend(rb.computations.iter().cloned());
            unions.push(Union {
                a: ra.value.clone(),
                b: rb.value.clone(),
                group: group.clone(),
                computations,
            });
        }
    }
    let matched = unions.len();

    if !options.unjoined_ok {
        if !a.ignore_unjoined && !b.ignore_other_unjoined {
            let placeholder = b.nan();
            for (ra, _) in a.results.iter().zip(&a_joined).filter(|(_, j)| !**j) {
                let mut computations = ra.computations.clone();
                if options.record_computations {
                    computations.push(Computation {
                        text: format!("unjoined group {} (left of {})", ra.group, expr),
                        value: placeholder,
                    });
                }
                unions.push(Union {
                    a: ra.value.clone(),
                    b: Value::Number(placeholder),
                    group: ra.group.clone(),
                    computations,
                });
            }
        }
        if !b.ignore_unjoined && !a.ignore_other_unjoined {
            let placeholder = a.nan();
            for (rb, _) in b.results.iter().zip(&b_joined).filter(|(_, j)| !**j) {
                let mut computations = rb.computations.clone();
                if options.record_computations {
                    computations.push(Computation {
                        text: format!("unjoined group {} (right of {})", rb.group, expr),
                        value: placeholder,
                    });
                }
                unions.push(Union {
                    a: Value::Number(placeholder),
                    b: rb.value.clone(),
                    group: rb.group.clone(),
                    computations,
                });
            }
        }
    }

    trace!(
        expr,
        left = a.len(),
        right = b.len(),
        matched,
        placeholders = unions.len() - matched,
        "joined operand groups"
    );
    unions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::TaggedValue;

    fn results(entries: &[(&str, f64)]) -> Results {
        Results::from_values(
            entries
                .iter()
                .map(|(tags, v)| TaggedValue::new(Value::Number(*v), TagSet::parse(tags).unwrap()))
                .collect(),
        )
    }

    fn groups(unions: &[Union]) -> Vec<String> {
        unions.iter().map(|u| u.group.to_string()).collect()
    }

    #[test]
    fn test_empty_operand_yields_nothing() {
        let a = results(&[("host=a", 1.0)]);
        let empty = Results::new();
        assert!(union(&a, &empty, "x", JoinOptions::default()).is_empty());
        assert!(union(&empty, &a, "x", JoinOptions::default()).is_empty());
        assert!(union(&empty, &empty, "x", JoinOptions::default()).is_empty());
    }

    #[test]
    fn test_ungrouped_broadcasts() {
        let a = results(&[("host=a", 2.0)]);
        let b = results(&[("", 3.0)]);
        let u = union(&a, &b, "a + b", JoinOptions::default());
        assert_eq!(u.len(), 1);
        assert_eq!(u[0].group, TagSet::parse("host=a").unwrap());
        assert_eq!(u[0].a, Value::Number(2.0));
        assert_eq!(u[0].b, Value::Number(3.0));
    }

    #[test]
    fn test_both_empty_groups() {
        let u = union(&results(&[("", 1.0)]), &results(&[("", 2.0)]), "x", JoinOptions::default());
        assert_eq!(u.len(), 1);
        assert!(u[0].group.is_empty());
    }

    #[test]
    fn test_disjoint_same_cardinality_produces_placeholders() {
        let a = results(&[("host=a", 1.0)]);
        let b = results(&[("host=b", 2.0)]);
        let u = union(&a, &b, "a + b", JoinOptions::default());
        assert_eq!(u.len(), 2);

        assert_eq!(u[0].group, TagSet::parse("host=a").unwrap());
        assert_eq!(u[0].a, Value::Number(1.0));
        assert!(matches!(u[0].b, Value::Number(v) if v.is_nan()));

        assert_eq!(u[1].group, TagSet::parse("host=b").unwrap());
        assert!(matches!(u[1].a, Value::Number(v) if v.is_nan()));
        assert_eq!(u[1].b, Value::Number(2.0));
    }

    #[test]
    fn test_unjoined_ok_suppresses_placeholders() {
        let a = results(&[("host=a", 1.0)]);
        let b = results(&[("host=b", 2.0)]);
        let options = JoinOptions {
            unjoined_ok: true,
            ..JoinOptions::default()
        };
        assert!(union(&a, &b, "x", options).is_empty());
    }

    #[test]
    fn test_suppression_flags() {
        let mut a = results(&[("host=a", 1.0)]);
        let b = results(&[("host=b", 2.0)]);
        a.ignore_unjoined = true;
        let u = union(&a, &b, "x", JoinOptions::default());
        assert_eq!(groups(&u), vec!["{host=b}"]);

        let mut a = results(&[("host=a", 1.0)]);
        a.ignore_other_unjoined = true;
        let u = union(&a, &b, "x", JoinOptions::default());
        assert_eq!(groups(&u), vec!["{host=a}"]);
    }

    #[test]
    fn test_custom_nan_value() {
        let a = results(&[("host=a", 1.0)]);
        let mut b = results(&[("host=b", 2.0)]);
        b.nan_value = Some(0.0);
        let u = union(&a, &b, "x", JoinOptions::default());
        assert_eq!(u[0].b, Value::Number(0.0));
        assert!(matches!(u[1].a, Value::Number(v) if v.is_nan()));
    }

    #[test]
    fn test_subset_takes_smaller_group() {
        let a = results(&[("host=a", 1.0), ("host=b", 2.0)]);
        let b = results(&[
            ("host=a,disk=x", 10.0),
            ("host=a,disk=y", 20.0),
            ("host=b,disk=x", 30.0),
        ]);
        let u = union(&a, &b, "x", JoinOptions::default());
        assert_eq!(groups(&u), vec!["{host=a}", "{host=a}", "{host=b}"]);
        assert_eq!(u[1].b, Value::Number(20.0));

        let swapped = union(&b, &a, "x", JoinOptions::default());
        assert_eq!(groups(&swapped), vec!["{host=a}", "{host=a}", "{host=b}"]);
        assert_eq!(swapped[0].a, Value::Number(10.0));
        assert_eq!(swapped[0].b, Value::Number(1.0));
    }

    #[test]
    fn test_matched_order_follows_scan_order() {
        let a = results(&[("host=a", 1.0), ("", 2.0)]);
        let b = results(&[("host=a,dc=x", 1.0), ("", 2.0), ("host=a", 3.0)]);
        let u = union(&a, &b, "x", JoinOptions::default());
        let pairs: Vec<_> = u
            .iter()
            .map(|u| (u.a.as_f64().unwrap(), u.b.as_f64().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1.0, 1.0), (1.0, 2.0), (1.0, 3.0), (2.0, 1.0), (2.0, 2.0), (2.0, 3.0)]
        );
    }

    #[test]
    fn test_placeholder_audit_note() {
        let a = results(&[("host=a", 1.0)]);
        let b = results(&[("host=b", 2.0)]);
        let options = JoinOptions {
            record_computations: true,
            ..JoinOptions::default()
        };
        let u = union(&a, &b, "a + b", options);
        assert_eq!(u[0].computations.len(), 1);
        assert!(u[0].computations[0].text.contains("unjoined group {host=a}"));
        assert!(u[1].computations[0].text.contains("right of a + b"));
    }

    #[test]
    fn test_computations_are_concatenated() {
        let mut a = results(&[("host=a", 1.0)]);
        let mut b = results(&[("host=a", 2.0)]);
        a.results[0].computations.push(Computation {
            text: "left".to_string(),
            value: 1.0,
        });
        b.results[0].computations.push(Computation {
            text: "right".to_string(),
            value: 2.0,
        });
        let u = union(&a, &b, "x", JoinOptions::default());
        let texts: Vec<_> = u[0].computations.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["left", "right"]);
    }
}
