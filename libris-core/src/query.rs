// src/query.rs
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::error::{Result, LibrisError};

/// Supported comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,     // $eq
    Gt,     // $gt
    Gte,    // $gte
    Lt,     // $lt
    Lte,    // $lte
}

impl CompareOp {
    pub fn as_operator(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    pub fn is_range(&self) -> bool {
        !matches!(self, CompareOp::Eq)
    }

    /// Does `ordering` (document value vs. target) satisfy this operator
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        }
    }
}

impl FromStr for CompareOp {
    type Err = LibrisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches('$') {
            "eq" => Ok(CompareOp::Eq),
            "gt" => Ok(CompareOp::Gt),
            "gte" => Ok(CompareOp::Gte),
            "lt" => Ok(CompareOp::Lt),
            "lte" => Ok(CompareOp::Lte),
            _ => Err(LibrisError::UnsupportedOperator(s.to_string())),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_operator())
    }
}

/// Single field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Predicate with the operator given by name (`"gt"` or `"$gt"`)
    pub fn parse(field: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Self::new(field, op.parse()?, value))
    }

    pub fn matches(&self, document: &Value) -> bool {
        let Some(actual) = document.get(&self.field) else {
            return false;
        };

        match self.op {
            CompareOp::Eq => values_equal(actual, &self.value),
            op => compare_values(actual, &self.value).map_or(false, |ord| op.accepts(ord)),
        }
    }
}

/// Conjunction of field predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Empty filter - matches every document
    pub fn new() -> Self {
        Filter { predicates: Vec::new() }
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, CompareOp::Eq, value))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, CompareOp::Gt, value))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, CompareOp::Gte, value))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, CompareOp::Lt, value))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, CompareOp::Lte, value))
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Predicates on `field`, in declaration order
    pub fn predicates_on<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Predicate> + 'a {
        self.predicates.iter().filter(move |p| p.field == field)
    }

    /// Equality target for `field`, if the filter pins it
    pub fn equality_on(&self, field: &str) -> Option<&Value> {
        self.predicates
            .iter()
            .find(|p| p.field == field && p.op == CompareOp::Eq)
            .map(|p| &p.value)
    }

    /// All predicates must hold
    pub fn matches(&self, document: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(document))
    }

    /// Parse a query document restricted to the supported operators
    pub fn from_json(json: &Value) -> Result<Self> {
        let mut filter = Filter::new();
        filter.parse_into(json)?;
        Ok(filter)
    }

    fn parse_into(&mut self, json: &Value) -> Result<()> {
        let Value::Object(map) = json else {
            return Err(LibrisError::InvalidQuery("Query must be an object".into()));
        };

        for (field, condition) in map {
            if field == "$and" {
                let Value::Array(items) = condition else {
                    return Err(LibrisError::InvalidQuery("$and requires array".into()));
                };
                for item in items {
                    self.parse_into(item)?;
                }
            } else if field.starts_with('$') {
                return Err(LibrisError::UnsupportedOperator(field.clone()));
            } else {
                self.parse_condition(field, condition)?;
            }
        }

        Ok(())
    }

    fn parse_condition(&mut self, field: &str, condition: &Value) -> Result<()> {
        match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                for (op, value) in ops {
                    let op = op.parse::<CompareOp>()?;
                    self.predicates.push(Predicate::new(field, op, value.clone()));
                }
            }
            // Plain values (and embedded documents) mean equality
            other => {
                self.predicates.push(Predicate::new(field, CompareOp::Eq, other.clone()));
            }
        }
        Ok(())
    }

    /// Render as the query document a document database expects
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();

        for predicate in &self.predicates {
            let entry = map.entry(predicate.field.clone()).or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                if ops.contains_key(predicate.op.as_operator()) {
                    // The same operator twice on a field cannot share one object
                    return self.to_json_and();
                }
                ops.insert(predicate.op.as_operator().to_string(), predicate.value.clone());
            }
        }

        // Collapse lone equality to the shorthand form
        for value in map.values_mut() {
            if let Value::Object(ops) = value {
                if ops.len() == 1 {
                    if let Some(target) = ops.get("$eq") {
                        if !target.is_object() {
                            *value = target.clone();
                        }
                    }
                }
            }
        }

        Value::Object(map)
    }

    fn to_json_and(&self) -> Value {
        let clauses: Vec<Value> = self.predicates.iter()
            .map(|p| {
                let mut ops = Map::new();
                ops.insert(p.op.as_operator().to_string(), p.value.clone());
                let mut clause = Map::new();
                clause.insert(p.field.clone(), Value::Object(ops));
                Value::Object(clause)
            })
            .collect();

        let mut map = Map::new();
        map.insert("$and".to_string(), Value::Array(clauses));
        Value::Object(map)
    }
}

/// Equality with numeric coercion (`10 == 10.0`)
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Compare values of the same kind; mismatched kinds are incomparable
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
                return Some(i1.cmp(&i2));
            }
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_eq_operator() {
        let filter = Filter::from_json(&json!({"genre": "Fiction"})).unwrap();

        assert!(filter.matches(&json!({"genre": "Fiction"})));
        assert!(!filter.matches(&json!({"genre": "Fantasy"})));
    }

    #[test]
    fn test_query_gt_operator() {
        let filter = Filter::from_json(&json!({"published_year": {"$gt": 1940}})).unwrap();

        assert!(filter.matches(&json!({"published_year": 1949})));
        assert!(!filter.matches(&json!({"published_year": 1940})));
        assert!(!filter.matches(&json!({"published_year": 1813})));
    }

    #[test]
    fn test_query_gte_lte_operators() {
        let filter = Filter::new().gte("price", 10).lte("price", 12.5);

        assert!(filter.matches(&json!({"price": 10})));
        assert!(filter.matches(&json!({"price": 12.5})));
        assert!(!filter.matches(&json!({"price": 9.99})));
        assert!(!filter.matches(&json!({"price": 13})));
    }

    #[test]
    fn test_query_lt_operator() {
        let filter = Filter::new().lt("price", 10);

        assert!(filter.matches(&json!({"price": 8.99})));
        assert!(!filter.matches(&json!({"price": 10.0})));
    }

    #[test]
    fn test_query_conjunction() {
        let filter = Filter::from_json(&json!({
            "in_stock": true,
            "published_year": {"$gt": 2010}
        })).unwrap();

        assert!(filter.matches(&json!({"in_stock": true, "published_year": 2015})));
        assert!(!filter.matches(&json!({"in_stock": false, "published_year": 2015})));
        assert!(!filter.matches(&json!({"in_stock": true, "published_year": 1999})));
    }

    #[test]
    fn test_query_and_flattens() {
        let filter = Filter::from_json(&json!({
            "$and": [
                {"author": "George Orwell"},
                {"published_year": {"$lt": 1940}}
            ]
        })).unwrap();

        assert_eq!(filter.predicates().len(), 2);
        assert!(filter.matches(&json!({"author": "George Orwell", "published_year": 1938})));
        assert!(!filter.matches(&json!({"author": "George Orwell", "published_year": 1949})));
    }

    #[test]
    fn test_query_rejects_unsupported_operators() {
        let err = Filter::from_json(&json!({"genre": {"$in": ["Fiction"]}})).unwrap_err();
        assert!(matches!(err, LibrisError::UnsupportedOperator(op) if op == "$in"));

        let err = Filter::from_json(&json!({"$or": []})).unwrap_err();
        assert!(matches!(err, LibrisError::UnsupportedOperator(_)));

        assert!(Filter::from_json(&json!("title")).is_err());
    }

    #[test]
    fn test_compare_op_from_str() {
        assert_eq!("gt".parse::<CompareOp>().unwrap(), CompareOp::Gt);
        assert_eq!("$lte".parse::<CompareOp>().unwrap(), CompareOp::Lte);
        assert!(matches!("ne".parse::<CompareOp>(), Err(LibrisError::UnsupportedOperator(_))));
    }

    #[test]
    fn test_query_missing_field() {
        let filter = Filter::new().eq("isbn", "978-0");
        assert!(!filter.matches(&json!({"title": "Emma"})));
    }

    #[test]
    fn test_query_mismatched_types_never_match_range() {
        let filter = Filter::new().gt("published_year", 1900);
        assert!(!filter.matches(&json!({"published_year": "1950"})));
    }

    #[test]
    fn test_query_numeric_equality_coerces() {
        let filter = Filter::new().eq("price", 10);
        assert!(filter.matches(&json!({"price": 10.0})));
    }

    #[test]
    fn test_query_string_comparison() {
        let filter = Filter::new().gt("title", "M");

        assert!(filter.matches(&json!({"title": "Pride and Prejudice"})));
        assert!(!filter.matches(&json!({"title": "Emma"})));
    }

    #[test]
    fn test_equality_on_skips_range_predicates() {
        let filter = Filter::new().gt("published_year", 1900).eq("author", "Jane Austen");

        let field = String::from("author");
        let pinned = filter.equality_on(&field);
        drop(field);
        assert_eq!(pinned, Some(&json!("Jane Austen")));
        assert_eq!(filter.equality_on("published_year"), None);
    }

    #[test]
    fn test_to_json_shapes() {
        let filter = Filter::new().eq("in_stock", true).gt("published_year", 2010);
        assert_eq!(filter.to_json(), json!({"in_stock": true, "published_year": {"$gt": 2010}}));

        let range = Filter::new().gte("price", 5).lt("price", 10);
        assert_eq!(range.to_json(), json!({"price": {"$gte": 5, "$lt": 10}}));

        let repeated = Filter::new().gt("price", 5).gt("price", 7);
        let rendered = repeated.to_json();
        assert!(rendered.get("$and").is_some());
        assert_eq!(Filter::from_json(&rendered).unwrap(), repeated);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.matches(&json!({})));
        assert_eq!(filter.to_json(), json!({}));
    }
}
