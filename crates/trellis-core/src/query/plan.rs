//! Plan compiler: resolves a parsed query against the catalog.
//!
//! Compilation performs every check that does not need data: type and
//! relationship resolution, the allow-list, filter validation and static type
//! flow between steps. A query that compiles only fails afterwards on store
//! errors, budget limits or inconsistent custom relationships.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use trellis_lang::{
    Branch, FilterArgs, FilterCall, Hop, Literal, Modifier, Query, Recursion, Seed, StepKind,
};
use trellis_proto::{EntityId, FilterSpec, Value};

use super::refine::Refinements;
use crate::catalog::{Catalog, Relationship, AGGREGATE_TYPE};
use crate::error::Error;

/// A compiled query.
#[derive(Debug)]
pub struct Plan {
    /// How the root entities are selected.
    pub seed: SeedPlan,
    /// Steps, in execution order.
    pub steps: Vec<PlanStep>,
}

/// Root selection.
#[derive(Debug)]
pub struct SeedPlan {
    /// Qualified type of the roots.
    pub entity_type: String,
    /// Selector within the type.
    pub selector: SeedSelector,
}

/// How seed entities are selected within their type.
#[derive(Debug)]
pub enum SeedSelector {
    /// Exactly one entity by id.
    Id(EntityId),
    /// Every entity passing the refinements.
    Filtered(Refinements),
}

/// One executable step.
#[derive(Debug)]
pub struct PlanStep {
    /// Merge outputs into the current level instead of descending.
    pub join: bool,
    /// What the step does.
    pub kind: PlanStepKind,
    /// Label for logs and errors.
    pub label: String,
}

/// The shape of a step.
#[derive(Debug)]
pub enum PlanStepKind {
    Hop(HopPlan),
    Or(Vec<BranchPlan>),
    Sub {
        modifier: Modifier,
        branch: BranchPlan,
    },
}

/// How often a hop is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    /// Once.
    Once,
    /// Until a round yields nothing new (`*` and `$`).
    Fixpoint,
    /// Zero or one time (`?`).
    ZeroOrOne,
}

/// A resolved relationship hop.
#[derive(Debug)]
pub struct HopPlan {
    /// Qualified type the hop consumes.
    pub source_type: String,
    /// The resolved relationship.
    pub relationship: Relationship,
    /// Qualified type the hop produces.
    pub target_type: String,
    /// Compiled filters.
    pub refinements: Refinements,
    /// Recursion mode.
    pub repeat: RepeatMode,
    /// `Type.relationship` as written.
    pub label: String,
}

/// A resolved branch of an or-step or sub-query.
#[derive(Debug)]
pub struct BranchPlan {
    /// Hops, in order. Never empty.
    pub hops: Vec<HopPlan>,
    /// Hop labels joined with spaces.
    pub label: String,
}

impl BranchPlan {
    /// Type consumed by the first hop.
    pub fn source_type(&self) -> &str {
        self.hops.first().map_or("", |h| h.source_type.as_str())
    }

    /// Type produced by the last hop.
    pub fn target_type(&self) -> &str {
        self.hops.last().map_or("", |h| h.target_type.as_str())
    }
}

/// Compiles parsed queries against a catalog.
pub struct PlanCompiler<'a> {
    catalog: &'a Catalog,
}

impl<'a> PlanCompiler<'a> {
    /// Create a compiler.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Compile a query.
    pub fn compile(&self, query: &Query) -> Result<Plan, Error> {
        let seed = self.compile_seed(query)?;

        // Types present at each result level, mirroring the executor.
        let mut levels: Vec<BTreeSet<String>> = vec![BTreeSet::from([seed.entity_type.clone()])];
        let mut cursor = 0;
        let mut prev_input = 0;

        let mut steps = Vec::with_capacity(query.steps.len());
        for step in &query.steps {
            let input_level = if step.join { prev_input } else { cursor };
            let (kind, label, produced) = match &step.kind {
                StepKind::Hop(hop) => {
                    let hop = self.compile_hop(hop)?;
                    check_consumes(&levels[input_level], &hop.source_type, &hop.label)?;
                    let produced = BTreeSet::from([hop.target_type.clone()]);
                    let label = hop.label.clone();
                    (PlanStepKind::Hop(hop), label, Some(produced))
                }
                StepKind::Or(branches) => {
                    let branches = branches
                        .iter()
                        .map(|b| self.compile_branch(b))
                        .collect::<Result<Vec<_>, _>>()?;
                    let mut produced = BTreeSet::new();
                    for branch in &branches {
                        check_consumes(&levels[input_level], branch.source_type(), &branch.label)?;
                        produced.insert(branch.target_type().to_string());
                    }
                    let label = branches
                        .iter()
                        .map(|b| format!("({})", b.label))
                        .collect::<Vec<_>>()
                        .join(" | ");
                    (PlanStepKind::Or(branches), label, Some(produced))
                }
                StepKind::Sub { modifier, branch } => {
                    let branch = self.compile_branch(branch)?;
                    check_consumes(&levels[cursor], branch.source_type(), &branch.label)?;
                    let label = branch.label.clone();
                    (
                        PlanStepKind::Sub {
                            modifier: *modifier,
                            branch,
                        },
                        label,
                        None,
                    )
                }
            };

            if let Some(produced) = produced {
                if step.join {
                    levels[cursor].extend(produced);
                } else {
                    prev_input = cursor;
                    levels.push(produced);
                    cursor = levels.len() - 1;
                }
            }
            steps.push(PlanStep {
                join: step.join,
                kind,
                label,
            });
        }

        Ok(Plan { seed, steps })
    }

    fn compile_seed(&self, query: &Query) -> Result<SeedPlan, Error> {
        let entity_type = self.catalog.qualify(&query.object.entity.value)?;
        let selector = match &query.object.seed {
            Seed::Id(id) => SeedSelector::Id(match &id.value {
                Literal::Int(i) => EntityId::Int(*i),
                Literal::String(s) => EntityId::Text(s.clone()),
                other => {
                    return Err(Error::MalformedFilter(format!(
                        "object id cannot be a {}",
                        other.kind_name()
                    )))
                }
            }),
            Seed::Filters(calls) => {
                let refinements = self.compile_filters(calls)?;
                if refinements.has_aggregation() {
                    return Err(Error::MalformedFilter(format!(
                        "aggregation is not allowed on the object query '{}'",
                        query.object.entity.value
                    )));
                }
                SeedSelector::Filtered(refinements)
            }
        };
        Ok(SeedPlan {
            entity_type,
            selector,
        })
    }

    fn compile_branch(&self, branch: &Branch) -> Result<BranchPlan, Error> {
        let hops = branch
            .hops
            .iter()
            .map(|h| self.compile_hop(h))
            .collect::<Result<Vec<_>, _>>()?;
        for pair in hops.windows(2) {
            if pair[0].target_type != pair[1].source_type {
                return Err(Error::TypeMismatch {
                    expected: pair[1].source_type.clone(),
                    found: pair[0].target_type.clone(),
                    step: pair[1].label.clone(),
                });
            }
        }
        let label = hops
            .iter()
            .map(|h| h.label.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(BranchPlan { hops, label })
    }

    fn compile_hop(&self, hop: &Hop) -> Result<HopPlan, Error> {
        let source_type = self.catalog.qualify(&hop.entity.value)?;
        let relationship = self
            .catalog
            .resolve_relationship(&source_type, &hop.relation.value)?;
        if !self.catalog.is_allowed(&source_type, &hop.relation.value) {
            return Err(Error::AccessDenied {
                entity_type: source_type,
                relationship: hop.relation.value.clone(),
            });
        }

        let refinements = self.compile_filters(&hop.filters)?;
        let target_type = if refinements.has_aggregation() {
            AGGREGATE_TYPE.to_string()
        } else {
            self.catalog.qualify(&relationship.target)?
        };

        let repeat = match hop.recursion.as_ref().map(|r| r.value) {
            None => RepeatMode::Once,
            Some(Recursion::Repeat) | Some(Recursion::Fixpoint) => RepeatMode::Fixpoint,
            Some(Recursion::Optional) => RepeatMode::ZeroOrOne,
        };
        if repeat != RepeatMode::Once && target_type != source_type {
            return Err(Error::TypeMismatch {
                expected: source_type,
                found: target_type,
                step: hop.label(),
            });
        }

        Ok(HopPlan {
            source_type,
            relationship,
            target_type,
            refinements,
            repeat,
            label: hop.label(),
        })
    }

    fn compile_filters(&self, calls: &[FilterCall]) -> Result<Refinements, Error> {
        let specs = calls
            .iter()
            .map(filter_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Refinements::compile(&specs)
    }
}

fn check_consumes(level: &BTreeSet<String>, source_type: &str, step: &str) -> Result<(), Error> {
    if level.contains(source_type) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: source_type.to_string(),
            found: level.iter().cloned().collect::<Vec<_>>().join(" | "),
            step: step.to_string(),
        })
    }
}

/// Lower a parsed filter call to a filter specification.
pub fn filter_spec(call: &FilterCall) -> Result<FilterSpec, Error> {
    let method = call
        .method
        .as_ref()
        .map_or("filter", |m| m.value.as_str())
        .to_string();
    Ok(match &call.args {
        FilterArgs::Keywords(args) => FilterSpec {
            method,
            kwargs: Some(
                args.iter()
                    .map(|arg| {
                        literal_value(&arg.value.value).map(|v| (arg.name.value.clone(), v))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            field: None,
        },
        FilterArgs::Field(field) => FilterSpec {
            method,
            kwargs: None,
            field: Some(field.value.clone()),
        },
    })
}

/// Convert a literal to a runtime value.
pub fn literal_value(literal: &Literal) -> Result<Value, Error> {
    Ok(match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Tagged { value, .. } => Value::Timestamp(parse_timestamp(value)?),
        Literal::List(items) => Value::List(
            items
                .iter()
                .map(|item| literal_value(&item.value))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

/// Parse a tagged timestamp literal into microseconds since the Unix epoch.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD`; naive forms are taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<i64, Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_micros());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt.and_utc().timestamp_micros());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_micros())
        .ok_or_else(|| Error::MalformedFilter(format!("invalid timestamp literal t\"{}\"", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityType;
    use crate::query::count_wrapper;
    use trellis_lang::parse;

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog.register(EntityType::new("blog", "Blog")).unwrap();
        catalog.register(EntityType::new("blog", "Entry")).unwrap();
        catalog.register(EntityType::new("blog", "Author")).unwrap();
        catalog
            .add_relationship("Blog", Relationship::reverse_multi("entry_set", "Entry", "blog_id"))
            .unwrap();
        catalog
            .add_relationship("Entry", Relationship::forward_single("blog", "Blog", "blog_id"))
            .unwrap();
        catalog
            .add_relationship("Author", Relationship::forward_single("mentor", "Author", "mentor_id"))
            .unwrap();
        catalog
            .add_relationship(
                "Blog",
                count_wrapper(Relationship::reverse_multi("entry_count", "Entry", "blog_id")),
            )
            .unwrap();
        catalog.freeze().unwrap();
        catalog
    }

    fn compile(source: &str) -> Result<Plan, Error> {
        let catalog = catalog();
        let query = parse(source)?;
        PlanCompiler::new(&catalog).compile(&query)
    }

    #[test]
    fn test_compile_hops() {
        let plan = compile("Blog(1) Blog.entry_set(rating__gte=3) Entry.blog").unwrap();
        assert_eq!(plan.seed.entity_type, "blog__Blog");
        assert!(matches!(plan.seed.selector, SeedSelector::Id(EntityId::Int(1))));
        assert_eq!(plan.steps.len(), 2);
        let PlanStepKind::Hop(hop) = &plan.steps[0].kind else {
            panic!("expected hop");
        };
        assert_eq!(hop.source_type, "blog__Blog");
        assert_eq!(hop.target_type, "blog__Entry");
        assert_eq!(hop.label, "Blog.entry_set");
        assert_eq!(hop.refinements.stages().len(), 1);
    }

    #[test]
    fn test_seed_filters_and_ids() {
        let plan = compile("Blog(name__icontains='db')").unwrap();
        assert!(matches!(plan.seed.selector, SeedSelector::Filtered(ref r) if !r.is_empty()));
        let plan = compile("Blog('slug')").unwrap();
        assert!(matches!(plan.seed.selector, SeedSelector::Id(EntityId::Text(ref s)) if s == "slug"));
        let plan = compile("Blog").unwrap();
        assert!(matches!(plan.seed.selector, SeedSelector::Filtered(ref r) if r.is_empty()));
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(compile("Post(1)"), Err(Error::UnknownType { .. })));
        assert!(matches!(
            compile("Blog(1) Blog.posts"),
            Err(Error::UnknownRelationship { ref relationship, .. }) if relationship == "posts"
        ));
        assert!(matches!(compile("Blog(1) Blog.entry_set("), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_custom_relationship_requires_allow_list() {
        assert!(matches!(
            compile("Blog(1) Blog.entry_count"),
            Err(Error::AccessDenied { ref relationship, .. }) if relationship == "entry_count"
        ));
    }

    #[test]
    fn test_type_flow() {
        assert!(matches!(
            compile("Blog(1) Entry.blog"),
            Err(Error::TypeMismatch { ref expected, .. }) if expected == "blog__Entry"
        ));
        // A join consumes the level the previous step consumed.
        assert!(compile("Blog(1) Blog.entry_set, Blog.entry_set").is_ok());
        assert!(matches!(
            compile("Blog(1) Blog.entry_set, Entry.blog"),
            Err(Error::TypeMismatch { .. })
        ));
        // Chains inside a branch must connect.
        assert!(matches!(
            compile("Blog(1) +(Blog.entry_set Blog.entry_set)"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(compile("Blog(1) +(Blog.entry_set Entry.blog)").is_ok());
    }

    #[test]
    fn test_recursion_modes() {
        let plan = compile("Author(1) Author.mentor* Author.mentor? Author.mentor$").unwrap();
        let modes: Vec<_> = plan
            .steps
            .iter()
            .map(|s| match &s.kind {
                PlanStepKind::Hop(h) => h.repeat,
                _ => RepeatMode::Once,
            })
            .collect();
        assert_eq!(modes, vec![RepeatMode::Fixpoint, RepeatMode::ZeroOrOne, RepeatMode::Fixpoint]);
        assert!(matches!(
            compile("Blog(1) Blog.entry_set*"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregation_targets_aggregate_type() {
        let plan = compile("Blog Blog.entry_set.count(id)").unwrap();
        let PlanStepKind::Hop(hop) = &plan.steps[0].kind else {
            panic!("expected hop");
        };
        assert_eq!(hop.target_type, AGGREGATE_TYPE);
        assert!(matches!(
            compile("Blog.count(id)"),
            Err(Error::MalformedFilter(_))
        ));
        assert!(matches!(
            compile("Blog Blog.entry_set.median(id)"),
            Err(Error::MalformedFilter(_))
        ));
    }

    #[test]
    fn test_bare_field_group_is_not_an_aggregation() {
        let query = parse("Blog(1) Blog.entry_set(rating)").unwrap();
        let StepKind::Hop(hop) = &query.steps[0].kind else {
            panic!("expected hop");
        };
        let spec = filter_spec(&hop.filters[0]).unwrap();
        assert_eq!(spec.method, "filter");
        assert_eq!(spec.kwargs, None);
        assert_eq!(spec.field.as_deref(), Some("rating"));

        match compile("Blog(1) Blog.entry_set(rating)") {
            Err(Error::MalformedFilter(message)) => assert!(message.contains("rating")),
            other => panic!("expected malformed filter, got {:?}", other),
        }
        assert!(compile("Blog(1) Blog.entry_set.count(rating)").is_ok());
    }

    #[test]
    fn test_or_and_sub_labels() {
        let plan = compile("Entry(1) (Entry.blog) | (Entry.blog Blog.entry_set) -(Entry.blog)").unwrap();
        assert_eq!(plan.steps[0].label, "(Entry.blog) | (Entry.blog Blog.entry_set)");
        assert!(matches!(
            plan.steps[1].kind,
            PlanStepKind::Sub {
                modifier: Modifier::Excluded,
                ..
            }
        ));
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), 86_400_000_000);
        assert_eq!(parse_timestamp("1970-01-01 00:00:01").unwrap(), 1_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:01:00").unwrap(), 60_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:00:00+01:00").unwrap(), -3_600_000_000);
        assert!(matches!(parse_timestamp("yesterday"), Err(Error::MalformedFilter(_))));
    }

    #[test]
    fn test_filter_spec_lowering() {
        let query = parse("Blog(1) Blog.entry_set(rating=[1, 2]).exclude(x=None).max(rating)").unwrap();
        let StepKind::Hop(hop) = &query.steps[0].kind else {
            panic!("expected hop");
        };
        let specs: Vec<_> = hop.filters.iter().map(|f| filter_spec(f).unwrap()).collect();
        assert_eq!(
            specs,
            vec![
                FilterSpec::filter([("rating", Value::List(vec![Value::Int(1), Value::Int(2)]))]),
                FilterSpec::exclude([("x", Value::Null)]),
                FilterSpec::aggregate("max", "rating"),
            ]
        );
    }
}
