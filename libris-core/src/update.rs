// src/update.rs
// Update operators and write results

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::document::{Document, ID_FIELD};
use crate::error::{Result, LibrisError};
use crate::query::values_equal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    Set(String, Value),     // $set
    Inc(String, Value),     // $inc
    Unset(String),          // $unset
}

/// Ordered list of update operators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, amount: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), amount.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Fields touched by this update
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| match op {
            UpdateOp::Set(field, _) | UpdateOp::Inc(field, _) | UpdateOp::Unset(field) => field.as_str(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(LibrisError::InvalidUpdate("update must contain at least one operator".into()));
        }
        for field in self.fields() {
            if field == ID_FIELD {
                return Err(LibrisError::InvalidUpdate("_id is immutable".into()));
            }
        }
        for op in &self.ops {
            if let UpdateOp::Inc(field, amount) = op {
                if !amount.is_number() {
                    return Err(LibrisError::InvalidUpdate(format!("$inc on '{}' requires a number", field)));
                }
            }
        }
        Ok(())
    }

    /// Parse `{"$set": {...}, "$inc": {...}, "$unset": {...}}`
    pub fn from_json(json: &Value) -> Result<Self> {
        let Value::Object(update_ops) = json else {
            return Err(LibrisError::InvalidUpdate("update must be an object".into()));
        };

        let mut spec = UpdateSpec::new();
        for (op, fields) in update_ops {
            let Value::Object(field_values) = fields else {
                return Err(LibrisError::InvalidUpdate(format!("{} requires an object", op)));
            };
            for (field, value) in field_values {
                spec.ops.push(match op.as_str() {
                    "$set" => UpdateOp::Set(field.clone(), value.clone()),
                    "$inc" => UpdateOp::Inc(field.clone(), value.clone()),
                    "$unset" => UpdateOp::Unset(field.clone()),
                    _ => return Err(LibrisError::UnsupportedOperator(op.clone())),
                });
            }
        }

        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for op in &self.ops {
            let (name, field, value) = match op {
                UpdateOp::Set(field, value) => ("$set", field, value.clone()),
                UpdateOp::Inc(field, value) => ("$inc", field, value.clone()),
                UpdateOp::Unset(field) => ("$unset", field, Value::String(String::new())),
            };
            if let Value::Object(fields) = root.entry(name).or_insert_with(|| Value::Object(Map::new())) {
                fields.insert(field.clone(), value);
            }
        }
        Value::Object(root)
    }

    /// Apply to a document - returns whether anything actually changed
    pub fn apply(&self, document: &mut Document) -> Result<bool> {
        let mut was_modified = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    let unchanged = document.get(field).map_or(false, |current| current == value);
                    if !unchanged {
                        document.set(field.clone(), value.clone());
                        was_modified = true;
                    }
                }
                UpdateOp::Inc(field, amount) => {
                    let next = match document.get(field) {
                        None => amount.clone(),
                        Some(current) => add_numbers(current, amount).ok_or_else(|| {
                            LibrisError::InvalidUpdate(format!("cannot $inc non-numeric field '{}'", field))
                        })?,
                    };
                    let unchanged = document.get(field).map_or(false, |current| values_equal(current, &next));
                    if !unchanged {
                        document.set(field.clone(), next);
                        was_modified = true;
                    }
                }
                UpdateOp::Unset(field) => {
                    if document.remove(field).is_some() {
                        was_modified = true;
                    }
                }
            }
        }

        Ok(was_modified)
    }
}

/// Integer arithmetic when both sides are integers, float otherwise
fn add_numbers(current: &Value, amount: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let sum = current.as_f64()? + amount.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}
