//! src/store/query.rs
//!
//! Find directives for the document store: a MongoDB-style JSON filter
//! grammar, single-field sorting, and skip/limit windows. Matching runs over
//! parsed documents in natural (insertion) order.

use crate::models::document::Document;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("filter is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("filter must be a JSON object")]
    NotAnObject,
    #[error("unsupported operator `{0}`")]
    UnknownOperator(String),
    #[error("operator `{op}` {reason}")]
    InvalidOperand { op: String, reason: &'static str },
}

pub type QueryResult<T> = Result<T, QueryError>;

/// A compiled filter. An empty `All` matches every document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    NoneOf(Vec<Filter>),
    Field { path: String, cond: Condition },
}

/// Predicate applied to the value found at a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Everything a `find` needs besides the collection. `limit == 0` means no limit.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub skip: u64,
    pub limit: u64,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: Filter::match_all(),
            sort: None,
            skip: 0,
            limit: 0,
        }
    }
}

impl FindOptions {
    /// Apply filter, then sort, then skip, then limit.
    ///
    /// Sorting is stable so ties keep natural order.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.filter.matches(doc))
            .collect();

        if let Some(sort) = &self.sort {
            matched.sort_by(|a, b| {
                let ord = compare_values(
                    resolve(a, &sort.field).unwrap_or(&Value::Null),
                    resolve(b, &sort.field).unwrap_or(&Value::Null),
                );
                match sort.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }

        let skipped = matched.into_iter().skip(self.skip as usize);
        if self.limit == 0 {
            skipped.collect()
        } else {
            skipped.take(self.limit as usize).collect()
        }
    }
}

impl Filter {
    pub fn match_all() -> Self {
        Filter::All(Vec::new())
    }

    /// Parse filter text. Blank text matches everything.
    pub fn parse(text: &str) -> QueryResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::match_all());
        }
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Self::from_object(&map),
            _ => Err(QueryError::NotAnObject),
        }
    }

    fn from_object(map: &Map<String, Value>) -> QueryResult<Self> {
        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Filter::All(Self::sub_filters(key, value)?),
                "$or" => Filter::Any(Self::sub_filters(key, value)?),
                "$nor" => Filter::NoneOf(Self::sub_filters(key, value)?),
                op if op.starts_with('$') => {
                    return Err(QueryError::UnknownOperator(op.to_string()));
                }
                path => Filter::Field {
                    path: path.to_string(),
                    cond: Condition::parse(value)?,
                },
            };
            clauses.push(clause);
        }
        if clauses.len() == 1 {
            if let Some(only) = clauses.pop() {
                return Ok(only);
            }
        }
        Ok(Filter::All(clauses))
    }

    fn sub_filters(op: &str, value: &Value) -> QueryResult<Vec<Filter>> {
        let items = match value {
            Value::Array(items) if !items.is_empty() => items,
            _ => {
                return Err(QueryError::InvalidOperand {
                    op: op.to_string(),
                    reason: "expects a non-empty array",
                });
            }
        };
        items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Self::from_object(map),
                _ => Err(QueryError::InvalidOperand {
                    op: op.to_string(),
                    reason: "expects an array of objects",
                }),
            })
            .collect()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::NoneOf(filters) => !filters.iter().any(|f| f.matches(doc)),
            Filter::Field { path, cond } => cond.matches(resolve(doc, path)),
        }
    }
}

impl Condition {
    /// An object whose keys all start with `$` is an operator object; any
    /// other value is matched for equality.
    fn parse(value: &Value) -> QueryResult<Self> {
        let ops = match value {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                return Err(QueryError::InvalidOperand {
                    op: map
                        .keys()
                        .find(|k| k.starts_with('$'))
                        .cloned()
                        .unwrap_or_default(),
                    reason: "cannot be mixed with plain fields",
                });
            }
            other => return Ok(Condition::Eq(other.clone())),
        };

        let mut conds = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            let cond = match op.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                "$in" => Condition::In(Self::operand_list(op, operand)?),
                "$nin" => Condition::Nin(Self::operand_list(op, operand)?),
                "$exists" => Condition::Exists(truthy(operand)),
                "$not" => match operand {
                    Value::Object(_) => Condition::Not(Box::new(Self::parse(operand)?)),
                    _ => {
                        return Err(QueryError::InvalidOperand {
                            op: op.clone(),
                            reason: "expects an operator object",
                        });
                    }
                },
                other => return Err(QueryError::UnknownOperator(other.to_string())),
            };
            conds.push(cond);
        }
        if conds.len() == 1 {
            if let Some(only) = conds.pop() {
                return Ok(only);
            }
        }
        Ok(Condition::All(conds))
    }

    fn operand_list(op: &str, operand: &Value) -> QueryResult<Vec<Value>> {
        match operand {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(QueryError::InvalidOperand {
                op: op.to_string(),
                reason: "expects an array",
            }),
        }
    }

    fn matches(&self, found: Option<&Value>) -> bool {
        match self {
            Condition::Eq(target) => eq_matches(found, target),
            Condition::Ne(target) => !eq_matches(found, target),
            Condition::Gt(target) => range_matches(found, target, |o| o == Ordering::Greater),
            Condition::Gte(target) => range_matches(found, target, |o| o != Ordering::Less),
            Condition::Lt(target) => range_matches(found, target, |o| o == Ordering::Less),
            Condition::Lte(target) => range_matches(found, target, |o| o != Ordering::Greater),
            Condition::In(targets) => targets.iter().any(|t| eq_matches(found, t)),
            Condition::Nin(targets) => !targets.iter().any(|t| eq_matches(found, t)),
            Condition::Exists(expected) => found.is_some() == *expected,
            Condition::Not(inner) => !inner.matches(found),
            Condition::All(conds) => conds.iter().all(|c| c.matches(found)),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Equality with array fan-out: an array field matches when it equals the
/// target as a whole or when any element does. Missing matches `null`.
fn eq_matches(found: Option<&Value>, target: &Value) -> bool {
    match found {
        None => target.is_null(),
        Some(value) if values_equal(value, target) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, target)),
        Some(_) => false,
    }
}

/// Range comparison only between values of the same type class.
fn range_matches(found: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| {
        type_rank(value) == type_rank(target) && accept(compare_values(value, target))
    };
    match found {
        None => false,
        Some(Value::Array(items)) if !target.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Walk a dotted path through nested objects; numeric segments index arrays.
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: null < numbers < strings < objects < arrays < booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
