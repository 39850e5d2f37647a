//! Per-step refinement pipeline.
//!
//! A step's [`FilterSpec`] list compiles into [`Refinements`]: keyword
//! predicates for `filter`/`exclude` and grouped aggregations for
//! `count`/`sum`/`avg`/`min`/`max`. Predicates that run before the first
//! aggregation are applied to raw fetched rows, before source pairing; the
//! aggregation and anything after it run on paired edges.

use std::cmp::Ordering;
use std::collections::HashMap;

use trellis_proto::{FilterSpec, SourceKey, Value};

use super::count::AggregateEntity;
use super::engine::Edge;
use crate::entity::Entity;
use crate::error::Error;

/// Field lookup of a keyword predicate (`field__lookup=value`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    Range,
}

impl Lookup {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "in" => Lookup::In,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "isnull" => Lookup::IsNull,
            "range" => Lookup::Range,
            _ => return None,
        })
    }
}

/// One compiled keyword predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub lookup: Lookup,
    pub value: Value,
}

impl Predicate {
    /// Compile `name=value`, validating the value shape for the lookup.
    pub fn compile(name: &str, value: Value) -> Result<Self, Error> {
        let (field, lookup) = match name.rsplit_once("__") {
            Some((field, suffix)) if !field.is_empty() => match Lookup::from_suffix(suffix) {
                Some(lookup) => (field, lookup),
                None => (name, Lookup::Exact),
            },
            _ => (name, Lookup::Exact),
        };

        let shape_ok = match lookup {
            Lookup::In => value.as_list().is_some(),
            Lookup::Range => value.as_list().is_some_and(|l| l.len() == 2),
            Lookup::IsNull => value.as_bool().is_some(),
            _ => true,
        };
        if !shape_ok {
            return Err(Error::MalformedFilter(format!(
                "lookup '{}' cannot take {} value {}",
                name,
                value.type_name(),
                value
            )));
        }

        Ok(Self {
            field: field.to_string(),
            lookup,
            value,
        })
    }

    /// Evaluate against an entity. A missing field never matches.
    pub fn matches(&self, entity: &Entity) -> bool {
        let Some(actual) = entity.get(&self.field) else {
            return false;
        };
        let expected = &self.value;
        match self.lookup {
            Lookup::Exact => values_equal(&actual, expected),
            Lookup::IExact => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                _ => values_equal(&actual, expected),
            },
            Lookup::Contains => str_match(&actual, expected, false, |a, b| a.contains(b)),
            Lookup::IContains => str_match(&actual, expected, true, |a, b| a.contains(b)),
            Lookup::StartsWith => str_match(&actual, expected, false, |a, b| a.starts_with(b)),
            Lookup::IStartsWith => str_match(&actual, expected, true, |a, b| a.starts_with(b)),
            Lookup::EndsWith => str_match(&actual, expected, false, |a, b| a.ends_with(b)),
            Lookup::IEndsWith => str_match(&actual, expected, true, |a, b| a.ends_with(b)),
            Lookup::In => expected
                .as_list()
                .is_some_and(|items| items.iter().any(|v| values_equal(&actual, v))),
            Lookup::Gt => compare_values(&actual, expected).is_some_and(Ordering::is_gt),
            Lookup::Gte => compare_values(&actual, expected).is_some_and(Ordering::is_ge),
            Lookup::Lt => compare_values(&actual, expected).is_some_and(Ordering::is_lt),
            Lookup::Lte => compare_values(&actual, expected).is_some_and(Ordering::is_le),
            Lookup::IsNull => expected.as_bool() == Some(actual.is_null()),
            Lookup::Range => match expected.as_list() {
                Some([low, high]) => {
                    compare_values(&actual, low).is_some_and(Ordering::is_ge)
                        && compare_values(&actual, high).is_some_and(Ordering::is_le)
                }
                _ => false,
            },
        }
    }
}

fn str_match(actual: &Value, expected: &Value, fold: bool, f: fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) if fold => f(&a.to_lowercase(), &b.to_lowercase()),
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Check two values for equality. Integers and floats compare numerically.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        _ => a == b,
    }
}

/// Compare two values, returning their ordering if comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn from_method(method: &str) -> Option<Self> {
        Some(match method {
            "count" => AggregateFunction::Count,
            "sum" => AggregateFunction::Sum,
            "avg" => AggregateFunction::Avg,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            _ => return None,
        })
    }

    /// Fold the non-null values of one group.
    pub fn compute(&self, values: &[Value]) -> Value {
        let values: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        match self {
            AggregateFunction::Count => Value::Int(values.len() as i64),
            _ if values.is_empty() => Value::Null,
            AggregateFunction::Sum => {
                if values.iter().all(|v| matches!(v, Value::Int(_))) {
                    Value::Int(values.iter().filter_map(|v| v.as_i64()).sum())
                } else {
                    Value::Float(values.iter().filter_map(|v| v.as_f64()).sum())
                }
            }
            AggregateFunction::Avg => {
                let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            AggregateFunction::Min => extreme(&values, Ordering::Less),
            AggregateFunction::Max => extreme(&values, Ordering::Greater),
        }
    }
}

fn extreme(values: &[&Value], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &v in values {
        match best {
            None => best = Some(v),
            Some(b) if compare_values(v, b) == Some(want) => best = Some(v),
            Some(_) => {}
        }
    }
    best.cloned().unwrap_or(Value::Null)
}

/// One stage of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep entities matching every predicate.
    Filter(Vec<Predicate>),
    /// Drop entities matching every predicate.
    Exclude(Vec<Predicate>),
    /// Replace the edges with one aggregate entity per source.
    Aggregate {
        func: AggregateFunction,
        field: String,
    },
}

impl Stage {
    fn keeps(&self, entity: &Entity) -> bool {
        match self {
            Stage::Filter(preds) => preds.iter().all(|p| p.matches(entity)),
            Stage::Exclude(preds) => preds.is_empty() || !preds.iter().all(|p| p.matches(entity)),
            Stage::Aggregate { .. } => true,
        }
    }
}

/// A compiled refinement pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refinements {
    stages: Vec<Stage>,
    /// Index of the first aggregation stage.
    split: usize,
}

impl Refinements {
    /// Compile filter specifications, in declared order.
    ///
    /// Fails with [`Error::MalformedFilter`] on unknown methods, missing
    /// arguments or ill-shaped lookup values.
    pub fn compile(specs: &[FilterSpec]) -> Result<Self, Error> {
        let mut stages = Vec::with_capacity(specs.len());
        for spec in specs {
            let stage = match spec.method.as_str() {
                "filter" | "exclude" => {
                    let kwargs = spec.kwargs.as_ref().ok_or_else(|| match &spec.field {
                        Some(field) => Error::MalformedFilter(format!(
                            "'{}' requires keyword arguments, not the bare field '{}'; \
                             aggregate it with a named method such as .count({})",
                            spec.method, field, field
                        )),
                        None => Error::MalformedFilter(format!(
                            "'{}' requires keyword arguments",
                            spec.method
                        )),
                    })?;
                    let preds = kwargs
                        .iter()
                        .map(|(name, value)| Predicate::compile(name, value.clone()))
                        .collect::<Result<Vec<_>, _>>()?;
                    if spec.method == "filter" {
                        Stage::Filter(preds)
                    } else {
                        Stage::Exclude(preds)
                    }
                }
                method => {
                    let func = AggregateFunction::from_method(method).ok_or_else(|| {
                        Error::MalformedFilter(format!("unknown filter method '{}'", method))
                    })?;
                    let field = spec.field.clone().ok_or_else(|| {
                        Error::MalformedFilter(format!("'{}' requires a field name", method))
                    })?;
                    Stage::Aggregate { func, field }
                }
            };
            stages.push(stage);
        }
        let split = stages
            .iter()
            .position(|s| matches!(s, Stage::Aggregate { .. }))
            .unwrap_or(stages.len());
        Ok(Self { stages, split })
    }

    /// Check if there are no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check if any stage aggregates.
    pub fn has_aggregation(&self) -> bool {
        self.split < self.stages.len()
    }

    /// Stages, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Apply the stages before the first aggregation to an unpaired entity.
    pub fn keeps(&self, entity: &Entity) -> bool {
        self.stages[..self.split].iter().all(|s| s.keeps(entity))
    }

    /// Apply the stages from the first aggregation on to paired edges.
    pub fn finish(&self, mut edges: Vec<Edge>) -> Vec<Edge> {
        for stage in &self.stages[self.split..] {
            edges = match stage {
                Stage::Aggregate { func, field } => aggregate(edges, *func, field),
                _ => edges.into_iter().filter(|e| stage.keeps(&e.target)).collect(),
            };
        }
        edges
    }

    /// Apply every stage to paired edges.
    pub fn apply(&self, edges: Vec<Edge>) -> Vec<Edge> {
        let kept = edges.into_iter().filter(|e| self.keeps(&e.target)).collect();
        self.finish(kept)
    }
}

/// Group edges by source, in first-appearance order, and fold each group.
fn aggregate(edges: Vec<Edge>, func: AggregateFunction, field: &str) -> Vec<Edge> {
    let mut order: Vec<SourceKey> = Vec::new();
    let mut groups: HashMap<SourceKey, Vec<Value>> = HashMap::new();
    for edge in edges {
        let value = edge.target.get(field).unwrap_or(Value::Null);
        groups
            .entry(edge.source.clone())
            .or_insert_with(|| {
                order.push(edge.source.clone());
                Vec::new()
            })
            .push(value);
    }
    order
        .into_iter()
        .map(|source| {
            let values = groups.remove(&source).unwrap_or_default();
            Edge::new(
                AggregateEntity::new(func.compute(&values)).into(),
                source,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRow;
    use pretty_assertions::assert_eq;
    use trellis_proto::EntityId;

    fn entry(id: i64, rating: i64, headline: &str) -> Entity {
        EntityRow::new("blog__Entry", id)
            .with_field("rating", rating)
            .with_field("headline", headline)
            .into()
    }

    fn edge(source: i64, target: Entity) -> Edge {
        Edge::new(target, EntityId::Int(source))
    }

    fn compile(specs: Vec<FilterSpec>) -> Refinements {
        Refinements::compile(&specs).unwrap()
    }

    #[test]
    fn test_lookup_parsing() {
        let p = Predicate::compile("headline__icontains", "rust".into()).unwrap();
        assert_eq!(p.field, "headline");
        assert_eq!(p.lookup, Lookup::IContains);

        // Unknown suffixes stay part of the field name.
        let p = Predicate::compile("pub__date", Value::Int(1)).unwrap();
        assert_eq!(p.field, "pub__date");
        assert_eq!(p.lookup, Lookup::Exact);
    }

    #[test]
    fn test_string_lookups() {
        let e = entry(1, 3, "Learning Rust");
        let check = |name: &str, value: &str| {
            Predicate::compile(name, value.into()).unwrap().matches(&e)
        };
        assert!(check("headline", "Learning Rust"));
        assert!(check("headline__iexact", "learning rust"));
        assert!(check("headline__contains", "Rust"));
        assert!(!check("headline__contains", "rust"));
        assert!(check("headline__icontains", "rust"));
        assert!(check("headline__startswith", "Learn"));
        assert!(check("headline__istartswith", "learn"));
        assert!(check("headline__endswith", "Rust"));
        assert!(check("headline__iendswith", "RUST"));
    }

    #[test]
    fn test_numeric_lookups() {
        let e = entry(1, 3, "x");
        let check = |name: &str, value: Value| Predicate::compile(name, value).unwrap().matches(&e);
        assert!(check("rating", Value::Float(3.0)));
        assert!(check("rating__gt", Value::Int(2)));
        assert!(!check("rating__gt", Value::Int(3)));
        assert!(check("rating__gte", Value::Int(3)));
        assert!(check("rating__lt", Value::Float(3.5)));
        assert!(check("rating__lte", Value::Int(3)));
        assert!(check("rating__in", vec![1, 3].into()));
        assert!(check("rating__range", vec![3, 5].into()));
        assert!(!check("rating__range", vec![4, 5].into()));
        assert!(check("rating__isnull", Value::Bool(false)));
        assert!(!check("rating__gt", "2".into()));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let e = entry(1, 3, "x");
        for name in ["missing", "missing__isnull", "missing__in"] {
            let value = match name {
                "missing__isnull" => Value::Bool(true),
                "missing__in" => Value::List(vec![Value::Null]),
                _ => Value::Null,
            };
            assert!(!Predicate::compile(name, value).unwrap().matches(&e), "{}", name);
        }
    }

    #[test]
    fn test_malformed_specs() {
        let bad = [
            FilterSpec::bare("frobnicate"),
            FilterSpec::bare("filter"),
            FilterSpec::bare("exclude"),
            FilterSpec::bare("count"),
            FilterSpec::filter([("rating__in", Value::Int(1))]),
            FilterSpec::filter([("rating__range", vec![1].into())]),
            FilterSpec::filter([("rating__isnull", Value::Int(1))]),
        ];
        for spec in bad {
            assert!(
                matches!(Refinements::compile(&[spec.clone()]), Err(Error::MalformedFilter(_))),
                "{:?}",
                spec
            );
        }
        // Empty keyword lists are accepted.
        assert!(Refinements::compile(&[FilterSpec::filter(Vec::<(String, Value)>::new())]).is_ok());
    }

    #[test]
    fn test_filter_and_exclude_in_order() {
        let r = compile(vec![
            FilterSpec::filter([("rating__gte", Value::Int(2))]),
            FilterSpec::exclude([("headline__startswith", Value::from("Draft"))]),
        ]);
        assert!(!r.has_aggregation());
        assert!(r.keeps(&entry(1, 3, "Final")));
        assert!(!r.keeps(&entry(2, 3, "Draft 1")));
        assert!(!r.keeps(&entry(3, 1, "Final")));
        assert!(compile(vec![FilterSpec::exclude(Vec::<(String, Value)>::new())]).keeps(&entry(1, 1, "x")));
    }

    #[test]
    fn test_aggregate_groups_by_source() {
        let r = compile(vec![FilterSpec::aggregate("sum", "rating")]);
        assert!(r.has_aggregation());
        let edges = vec![
            edge(10, entry(1, 3, "a")),
            edge(20, entry(2, 5, "b")),
            edge(10, entry(3, 4, "c")),
        ];
        let out = r.finish(edges);
        let summary: Vec<_> = out
            .iter()
            .map(|e| (e.source.clone(), e.target.get("value")))
            .collect();
        assert_eq!(
            summary,
            vec![
                (EntityId::Int(10), Some(Value::Int(7))),
                (EntityId::Int(20), Some(Value::Int(5))),
            ]
        );
    }

    #[test]
    fn test_aggregate_functions() {
        let vals = vec![Value::Int(2), Value::Null, Value::Float(4.0)];
        assert_eq!(AggregateFunction::Count.compute(&vals), Value::Int(2));
        assert_eq!(AggregateFunction::Sum.compute(&vals), Value::Float(6.0));
        assert_eq!(AggregateFunction::Avg.compute(&vals), Value::Float(3.0));
        assert_eq!(AggregateFunction::Min.compute(&vals), Value::Int(2));
        assert_eq!(AggregateFunction::Max.compute(&vals), Value::Float(4.0));
        assert_eq!(AggregateFunction::Sum.compute(&[Value::Int(1), Value::Int(2)]), Value::Int(3));
        assert_eq!(AggregateFunction::Max.compute(&[]), Value::Null);
        assert_eq!(AggregateFunction::Count.compute(&[Value::Null]), Value::Int(0));
    }

    #[test]
    fn test_stages_after_aggregation_see_aggregates() {
        let r = compile(vec![
            FilterSpec::filter([("rating__gte", Value::Int(2))]),
            FilterSpec::aggregate("count", "id"),
            FilterSpec::filter([("value__gt", Value::Int(1))]),
        ]);
        let edges = vec![
            edge(10, entry(1, 3, "a")),
            edge(10, entry(2, 3, "b")),
            edge(20, entry(3, 3, "c")),
            edge(20, entry(4, 1, "d")),
        ];
        let out = r.apply(edges);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, EntityId::Int(10));
        assert_eq!(out[0].target.get("value"), Some(Value::Int(2)));
    }
}
