// src/query_planner.rs
// Query planner - index selection and explain output

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::find_options::{SortDirection, SortSpec};
use crate::index::{Index, IndexKey, IndexManager, KeyRange, ScanBounds};
use crate::query::{CompareOp, Filter};

/// Query plan - describes how to execute a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Full collection scan (no index used)
    CollectionScan {
        sort_in_memory: bool,
    },

    /// Bounded walk over one index, then fetch
    IndexScan {
        index_name: String,
        key_pattern: Value,
        bounds: ScanBounds,
        reverse: bool,
        /// Walk order is the result order; otherwise insertion order applies
        ordered_walk: bool,
        sort_in_memory: bool,
    },
}

impl QueryPlan {
    pub fn sort_in_memory(&self) -> bool {
        match self {
            QueryPlan::CollectionScan { sort_in_memory } => *sort_in_memory,
            QueryPlan::IndexScan { sort_in_memory, .. } => *sort_in_memory,
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::CollectionScan { .. } => None,
            QueryPlan::IndexScan { index_name, .. } => Some(index_name),
        }
    }

    pub fn winning_plan(&self) -> WinningPlan {
        match self {
            QueryPlan::CollectionScan { .. } => WinningPlan {
                stage: PlanStage::CollectionScan,
                index_name: None,
                key_pattern: None,
                direction: None,
            },
            QueryPlan::IndexScan { index_name, key_pattern, reverse, .. } => WinningPlan {
                stage: PlanStage::IndexScan,
                index_name: Some(index_name.clone()),
                key_pattern: Some(key_pattern.clone()),
                direction: Some(if *reverse { ScanDirection::Backward } else { ScanDirection::Forward }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStage {
    #[serde(rename = "COLLSCAN")]
    CollectionScan,
    #[serde(rename = "IXSCAN")]
    IndexScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinningPlan {
    pub stage: PlanStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ScanDirection>,
}

/// Explain output for one query, in the `executionStats` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub winning_plan: WinningPlan,
    pub n_returned: u64,
    pub total_keys_examined: u64,
    pub total_docs_examined: u64,
    pub in_memory_sort: bool,
    pub execution_time_millis: u64,
}

impl ExecutionStats {
    pub fn used_index(&self) -> bool {
        self.winning_plan.stage == PlanStage::IndexScan
    }

    pub fn is_collection_scan(&self) -> bool {
        self.winning_plan.stage == PlanStage::CollectionScan
    }
}

/// How an index satisfies the requested sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortCover {
    /// Every sort field is pinned by an equality predicate
    Pinned,
    /// Walking the index (backwards if `reverse`) yields the sort order
    Walk { reverse: bool },
}

/// Candidate evaluation for one index
struct Candidate<'a> {
    index: &'a Index,
    equality_len: usize,
    bounds: ScanBounds,
    sort_cover: Option<SortCover>,
}

impl Candidate<'_> {
    fn score(&self) -> (usize, bool, bool) {
        (self.equality_len, self.sort_cover.is_some(), self.bounds.range.is_some())
    }
}

/// Query planner - analyzes queries and selects the execution plan
pub struct QueryPlanner;

impl QueryPlanner {
    /// Pick a plan for `filter` (and optional `sort`) among the collection's indexes
    pub fn plan(filter: &Filter, sort: Option<&SortSpec>, indexes: &IndexManager) -> QueryPlan {
        let sort = sort.filter(|s| !s.is_empty());

        let mut best: Option<Candidate> = None;
        for index in indexes.indexes() {
            let Some(candidate) = Self::evaluate(index, filter, sort) else {
                continue;
            };
            // Strictly better only: ties go to the earliest index
            if best.as_ref().map_or(true, |b| candidate.score() > b.score()) {
                best = Some(candidate);
            }
        }

        match best {
            None => QueryPlan::CollectionScan {
                sort_in_memory: sort.is_some(),
            },
            Some(candidate) => QueryPlan::IndexScan {
                index_name: candidate.index.name().to_string(),
                key_pattern: candidate.index.spec().to_json(),
                bounds: candidate.bounds,
                reverse: candidate.sort_cover == Some(SortCover::Walk { reverse: true }),
                ordered_walk: matches!(candidate.sort_cover, Some(SortCover::Walk { .. })),
                sort_in_memory: sort.is_some() && candidate.sort_cover.is_none(),
            },
        }
    }

    fn evaluate<'a>(index: &'a Index, filter: &Filter, sort: Option<&SortSpec>) -> Option<Candidate<'a>> {
        let keys = index.spec().keys();
        let leading = index.spec().leading_field()?;
        if filter.predicates_on(leading).next().is_none() {
            return None;
        }

        let equality: Vec<IndexKey> = keys.iter()
            .map_while(|(field, _)| filter.equality_on(field).map(IndexKey::from))
            .collect();
        let equality_len = equality.len();

        let range = keys.get(equality_len).and_then(|(field, _)| Self::range_for(filter, field));

        Some(Candidate {
            index,
            equality_len,
            bounds: ScanBounds { equality, range },
            sort_cover: sort.and_then(|s| Self::sort_cover(s, keys, equality_len, filter)),
        })
    }

    /// Combined bounds of the range predicates on `field`
    fn range_for(filter: &Filter, field: &str) -> Option<KeyRange> {
        let mut range: Option<KeyRange> = None;
        for predicate in filter.predicates_on(field).filter(|p| p.op.is_range()) {
            let key = IndexKey::from(&predicate.value);
            let current = range.take().unwrap_or_default();
            range = Some(match predicate.op {
                CompareOp::Gt => current.with_lower(key, false),
                CompareOp::Gte => current.with_lower(key, true),
                CompareOp::Lt => current.with_upper(key, false),
                CompareOp::Lte | CompareOp::Eq => current.with_upper(key, true),
            });
        }
        range
    }

    /// Whether the index satisfies `sort`.
    ///
    /// Sort fields pinned by an equality predicate are constant and ignored;
    /// if nothing else is left the sort is a no-op and insertion order stands.
    /// The rest must name exactly the index fields after the equality
    /// prefix, with every direction equal or every direction reversed, so
    /// ties in the walk are ties in the sort.
    fn sort_cover(
        sort: &SortSpec,
        keys: &[(String, SortDirection)],
        equality_len: usize,
        filter: &Filter,
    ) -> Option<SortCover> {
        let remaining: Vec<&(String, SortDirection)> = sort.keys().iter()
            .filter(|(field, _)| filter.equality_on(field).is_none())
            .collect();
        let tail = &keys[equality_len..];

        if remaining.is_empty() {
            return Some(SortCover::Pinned);
        }
        if remaining.len() != tail.len() {
            return None;
        }

        let mut same = true;
        let mut reversed = true;
        for ((sort_field, sort_dir), (index_field, index_dir)) in remaining.iter().map(|k| (&k.0, k.1)).zip(tail) {
            if sort_field != index_field {
                return None;
            }
            same &= sort_dir == *index_dir;
            reversed &= sort_dir == index_dir.reverse();
        }

        if same {
            Some(SortCover::Walk { reverse: false })
        } else if reversed {
            Some(SortCover::Walk { reverse: true })
        } else {
            None
        }
    }
}
