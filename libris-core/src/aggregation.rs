// src/aggregation.rs
// Aggregation pipeline implementation

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::error::{Result, LibrisError};
use crate::find_options::{compare_by_keys, compare_for_sort, SortDirection, SortSpec};
use crate::query::Filter;

/// Aggregation pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    Sort(SortSpec),
    Limit(usize),
    Skip(usize),
    Project(ProjectStage),
    AddFields(AddFieldsStage),
}

/// Computed value over one document
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    FieldRef(String),               // "$field"
    Literal(Value),
    Multiply(Vec<Expression>),      // $multiply
    Divide(Box<Expression>, Box<Expression>),   // $divide
    Floor(Box<Expression>),         // $floor
    Round(Box<Expression>, u32),    // $round
    Object(Vec<(String, Expression)>),
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    id: Expression,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
}

/// $project stage - reshape documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,                    // 1
    Exclude,                    // 0
    Computed(Expression),       // "$field" or operator expression
}

/// $addFields stage - add computed fields, keep everything else
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddFieldsStage {
    fields: Vec<(String, Expression)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn match_filter(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn group(self, group: GroupStage) -> Self {
        self.stage(Stage::Group(group))
    }

    pub fn sort(self, sort: SortSpec) -> Self {
        self.stage(Stage::Sort(sort))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.stage(Stage::Limit(limit))
    }

    pub fn skip(self, skip: usize) -> Self {
        self.stage(Stage::Skip(skip))
    }

    pub fn project(self, project: ProjectStage) -> Self {
        self.stage(Stage::Project(project))
    }

    pub fn add_fields(self, add_fields: AddFieldsStage) -> Self {
        self.stage(Stage::AddFields(add_fields))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(LibrisError::AggregationError("Pipeline cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Value::Array(stages_array) = pipeline_json else {
            return Err(LibrisError::AggregationError("Pipeline must be an array".to_string()));
        };

        let stages = stages_array.iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Pipeline { stages };
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.stages.iter().map(Stage::to_json).collect())
    }

    /// Execute pipeline on documents, stage by stage in order
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        self.validate()?;
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Project(_) => "$project",
            Stage::AddFields(_) => "$addFields",
        }
    }

    fn from_json(stage_json: &Value) -> Result<Self> {
        let (stage_name, spec) = single_entry(stage_json, "Each stage must have exactly one operator")?;

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(Filter::from_json(spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(spec)?)),
            "$sort" => Ok(Stage::Sort(sort_from_json(spec)?)),
            "$limit" => Ok(Stage::Limit(count_from_json(spec, "$limit")?)),
            "$skip" => Ok(Stage::Skip(count_from_json(spec, "$skip")?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(spec)?)),
            "$addFields" | "$set" => Ok(Stage::AddFields(AddFieldsStage::from_json(spec)?)),
            _ => Err(LibrisError::AggregationError(
                format!("Unknown pipeline stage: {}", stage_name)
            )),
        }
    }

    fn to_json(&self) -> Value {
        let spec = match self {
            Stage::Match(filter) => filter.to_json(),
            Stage::Group(group) => group.to_json(),
            Stage::Sort(sort) => sort.to_json(),
            Stage::Limit(n) | Stage::Skip(n) => Value::from(*n as u64),
            Stage::Project(project) => project.to_json(),
            Stage::AddFields(add_fields) => add_fields.to_json(),
        };

        let mut map = Map::new();
        map.insert(self.name().to_string(), spec);
        Value::Object(map)
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(filter) => Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect()),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(sort) => {
                let mut docs = docs;
                // Vec::sort_by is stable: ties keep their input order
                docs.sort_by(|a, b| compare_by_keys(a, b, sort.keys()));
                Ok(docs)
            }
            Stage::Limit(limit) => Ok(docs.into_iter().take(*limit).collect()),
            Stage::Skip(skip) => Ok(docs.into_iter().skip(*skip).collect()),
            Stage::Project(stage) => docs.iter().map(|doc| stage.project_document(doc)).collect(),
            Stage::AddFields(stage) => docs.into_iter().map(|doc| stage.add_to_document(doc)).collect(),
        }
    }
}

fn single_entry<'a>(json: &'a Value, message: &str) -> Result<(&'a String, &'a Value)> {
    match json {
        Value::Object(obj) if obj.len() == 1 => obj.iter().next()
            .ok_or_else(|| LibrisError::AggregationError(message.to_string())),
        _ => Err(LibrisError::AggregationError(message.to_string())),
    }
}

fn sort_from_json(spec: &Value) -> Result<SortSpec> {
    let Value::Object(obj) = spec else {
        return Err(LibrisError::AggregationError("$sort must be an object".to_string()));
    };

    let mut sort = SortSpec::new();
    for (field, value) in obj {
        let direction = value.as_i64()
            .and_then(SortDirection::from_i64)
            .ok_or_else(|| LibrisError::AggregationError("Sort direction must be 1 or -1".to_string()))?;
        sort = sort.then(field.clone(), direction);
    }
    Ok(sort)
}

fn count_from_json(spec: &Value, stage: &str) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| LibrisError::AggregationError(format!("{} must be a non-negative integer", stage)))
}

impl Expression {
    pub fn field(name: impl Into<String>) -> Self {
        Expression::FieldRef(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn multiply(factors: Vec<Expression>) -> Self {
        Expression::Multiply(factors)
    }

    pub fn divide(dividend: Expression, divisor: Expression) -> Self {
        Expression::Divide(Box::new(dividend), Box::new(divisor))
    }

    pub fn floor(inner: Expression) -> Self {
        Expression::Floor(Box::new(inner))
    }

    pub fn round(inner: Expression, places: u32) -> Self {
        Expression::Round(Box::new(inner), places)
    }

    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Expression)>,
        S: Into<String>,
    {
        Expression::Object(fields.into_iter().map(|(name, expr)| (name.into(), expr)).collect())
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
            Value::Object(obj) if obj.len() == 1 && obj.keys().all(|k| k.starts_with('$')) => {
                let (op, args) = single_entry(json, "Expression must have exactly one operator")?;
                Self::parse_operator(op, args)
            }
            Value::Object(obj) => {
                let fields = obj.iter()
                    .map(|(name, value)| Ok((name.clone(), Expression::from_json(value)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Object(fields))
            }
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    fn parse_operator(op: &str, args: &Value) -> Result<Self> {
        match op {
            "$literal" => Ok(Expression::Literal(args.clone())),
            "$multiply" => {
                let Value::Array(items) = args else {
                    return Err(LibrisError::AggregationError("$multiply requires array".to_string()));
                };
                let factors = items.iter().map(Expression::from_json).collect::<Result<Vec<_>>>()?;
                Ok(Expression::Multiply(factors))
            }
            "$divide" => match args {
                Value::Array(items) if items.len() == 2 => Ok(Expression::divide(
                    Expression::from_json(&items[0])?,
                    Expression::from_json(&items[1])?,
                )),
                _ => Err(LibrisError::AggregationError("$divide requires [dividend, divisor]".to_string())),
            },
            "$floor" => Ok(Expression::floor(Expression::from_json(args)?)),
            "$round" => match args {
                Value::Array(items) if items.len() == 1 => Ok(Expression::round(Expression::from_json(&items[0])?, 0)),
                Value::Array(items) if items.len() == 2 => {
                    let places = items[1].as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| LibrisError::AggregationError("$round places must be a non-negative integer".to_string()))?;
                    Ok(Expression::round(Expression::from_json(&items[0])?, places))
                }
                _ => Err(LibrisError::AggregationError("$round requires [number, places]".to_string())),
            },
            _ => Err(LibrisError::UnsupportedOperator(op.to_string())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expression::FieldRef(name) => Value::String(format!("${}", name)),
            Expression::Literal(value) => match value {
                Value::String(s) if s.starts_with('$') => operator_json("$literal", value.clone()),
                Value::Object(_) => operator_json("$literal", value.clone()),
                other => other.clone(),
            },
            Expression::Multiply(factors) => {
                operator_json("$multiply", Value::Array(factors.iter().map(Expression::to_json).collect()))
            }
            Expression::Divide(a, b) => operator_json("$divide", Value::Array(vec![a.to_json(), b.to_json()])),
            Expression::Floor(inner) => operator_json("$floor", inner.to_json()),
            Expression::Round(inner, places) => {
                operator_json("$round", Value::Array(vec![inner.to_json(), Value::from(*places)]))
            }
            Expression::Object(fields) => {
                let mut map = Map::new();
                for (name, expr) in fields {
                    map.insert(name.clone(), expr.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// Evaluate against a document; missing fields and null operands yield null
    pub fn evaluate(&self, doc: &Value) -> Result<Value> {
        match self {
            Expression::FieldRef(name) => Ok(doc.get(name).cloned().unwrap_or(Value::Null)),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Multiply(factors) => {
                let mut int_product: Option<i64> = Some(1);
                let mut float_product = 1.0;
                for factor in factors {
                    let value = factor.evaluate(doc)?;
                    if value.is_null() {
                        return Ok(Value::Null);
                    }
                    let n = numeric_operand(&value, "$multiply")?;
                    int_product = match (int_product, value.as_i64()) {
                        (Some(acc), Some(i)) => acc.checked_mul(i),
                        _ => None,
                    };
                    float_product *= n;
                }
                Ok(match int_product {
                    Some(product) => Value::from(product),
                    None => number_value(float_product),
                })
            }
            Expression::Divide(a, b) => {
                let (a, b) = (a.evaluate(doc)?, b.evaluate(doc)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                let dividend = numeric_operand(&a, "$divide")?;
                let divisor = numeric_operand(&b, "$divide")?;
                if divisor == 0.0 {
                    return Err(LibrisError::AggregationError("$divide by zero".to_string()));
                }
                Ok(number_value(dividend / divisor))
            }
            Expression::Floor(inner) => {
                let value = inner.evaluate(doc)?;
                if value.is_null() || value.is_i64() {
                    return Ok(value);
                }
                // Toward negative infinity, not toward zero
                Ok(number_value(numeric_operand(&value, "$floor")?.floor()))
            }
            Expression::Round(inner, places) => {
                let value = inner.evaluate(doc)?;
                if value.is_null() || value.is_i64() {
                    return Ok(value);
                }
                Ok(number_value(round_half_even(numeric_operand(&value, "$round")?, *places)?))
            }
            Expression::Object(fields) => {
                let mut map = Map::new();
                for (name, expr) in fields {
                    let value = expr.evaluate(doc)?;
                    map.insert(name.clone(), value);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

fn operator_json(op: &str, args: Value) -> Value {
    let mut map = Map::new();
    map.insert(op.to_string(), args);
    Value::Object(map)
}

fn numeric_operand(value: &Value, op: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        LibrisError::AggregationError(format!("{} only supports numeric types, got {}", op, value))
    })
}

/// Integral results that fit i64 are emitted as integers
fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Round half to even at `places` decimal digits
pub(crate) fn round_half_even(n: f64, places: u32) -> Result<f64> {
    let exponent = i32::try_from(places)
        .map_err(|_| LibrisError::AggregationError(format!("$round places out of range: {}", places)))?;
    let factor = 10f64.powi(exponent);
    let scaled = n * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;

    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };

    Ok(rounded / factor)
}

impl GroupStage {
    /// Group by the value of `field`
    pub fn by_field(field: impl Into<String>) -> Self {
        Self::by(Expression::field(field))
    }

    /// Group by an arbitrary expression; a null literal puts everything in one group
    pub fn by(id: Expression) -> Self {
        GroupStage { id, accumulators: Vec::new() }
    }

    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(LibrisError::AggregationError("$group must be an object".to_string()));
        };

        let id = obj.get("_id")
            .ok_or_else(|| LibrisError::AggregationError("Group stage must have _id field".to_string()))
            .and_then(Expression::from_json)?;

        let mut group = GroupStage::by(id);
        for (field, value) in obj {
            if field == "_id" {
                continue; // Already parsed
            }
            group.accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(group)
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("_id".to_string(), self.id.to_json());
        for (name, accumulator) in &self.accumulators {
            map.insert(name.clone(), accumulator.to_json());
        }
        Value::Object(map)
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Groups are emitted in first-seen order
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();

        for doc in docs {
            let key = self.id.evaluate(&doc)?;
            let key_str = serde_json::to_string(&key)?;

            match positions.get(&key_str) {
                Some(&index) => groups[index].1.push(doc),
                None => {
                    positions.insert(key_str, groups.len());
                    groups.push((key, vec![doc]));
                }
            }
        }

        let mut results = Vec::with_capacity(groups.len());
        for (key, group_docs) in groups {
            let mut result = Map::new();
            result.insert("_id".to_string(), key);

            for (field, accumulator) in &self.accumulators {
                result.insert(field.clone(), accumulator.compute(&group_docs)?);
            }

            results.push(Value::Object(result));
        }

        Ok(results)
    }
}

impl Accumulator {
    /// `{"$sum": 1}`
    pub fn count() -> Self {
        Accumulator::Sum(Expression::literal(1))
    }

    pub fn sum(field: impl Into<String>) -> Self {
        Accumulator::Sum(Expression::field(field))
    }

    pub fn avg(field: impl Into<String>) -> Self {
        Accumulator::Avg(Expression::field(field))
    }

    pub fn min(field: impl Into<String>) -> Self {
        Accumulator::Min(Expression::field(field))
    }

    pub fn max(field: impl Into<String>) -> Self {
        Accumulator::Max(Expression::field(field))
    }

    pub fn push(expr: Expression) -> Self {
        Accumulator::Push(expr)
    }

    fn name(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::Min(_) => "$min",
            Accumulator::Max(_) => "$max",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Push(_) => "$push",
        }
    }

    fn expression(&self) -> &Expression {
        match self {
            Accumulator::Sum(expr)
            | Accumulator::Avg(expr)
            | Accumulator::Min(expr)
            | Accumulator::Max(expr)
            | Accumulator::First(expr)
            | Accumulator::Last(expr)
            | Accumulator::Push(expr) => expr,
        }
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let (op, value) = single_entry(spec, "Accumulator must have exactly one operator")?;
        let expr = Expression::from_json(value)?;

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(expr)),
            "$avg" => Ok(Accumulator::Avg(expr)),
            "$min" => Ok(Accumulator::Min(expr)),
            "$max" => Ok(Accumulator::Max(expr)),
            "$first" => Ok(Accumulator::First(expr)),
            "$last" => Ok(Accumulator::Last(expr)),
            "$push" => Ok(Accumulator::Push(expr)),
            _ => Err(LibrisError::AggregationError(
                format!("Unknown accumulator: {}", op)
            )),
        }
    }

    fn to_json(&self) -> Value {
        operator_json(self.name(), self.expression().to_json())
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        let values = docs.iter()
            .map(|doc| self.expression().evaluate(doc))
            .collect::<Result<Vec<_>>>()?;

        match self {
            Accumulator::Sum(_) => {
                let mut sum_int: i64 = 0;
                let mut sum_float: f64 = 0.0;
                let mut has_float = false;

                for value in &values {
                    match value.as_i64().and_then(|n| sum_int.checked_add(n)) {
                        Some(next) => sum_int = next,
                        None => {
                            if let Some(f) = value.as_f64() {
                                sum_float += f;
                                has_float = true;
                            }
                        }
                    }
                }

                if has_float {
                    Ok(number_value(sum_float + sum_int as f64))
                } else {
                    Ok(Value::from(sum_int))
                }
            }

            Accumulator::Avg(_) => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                Ok(Number::from_f64(mean).map(Value::Number).unwrap_or(Value::Null))
            }

            Accumulator::Min(_) => Ok(values.into_iter()
                .filter(|v| !v.is_null())
                .min_by(|a, b| compare_for_sort(Some(a), Some(b)))
                .unwrap_or(Value::Null)),

            Accumulator::Max(_) => Ok(values.into_iter()
                .filter(|v| !v.is_null())
                .max_by(|a, b| compare_for_sort(Some(a), Some(b)))
                .unwrap_or(Value::Null)),

            Accumulator::First(_) => Ok(values.into_iter().next().unwrap_or(Value::Null)),

            Accumulator::Last(_) => Ok(values.into_iter().last().unwrap_or(Value::Null)),

            Accumulator::Push(_) => Ok(Value::Array(values)),
        }
    }
}

impl ProjectStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), ProjectField::Include));
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), ProjectField::Exclude));
        self
    }

    pub fn compute(mut self, field: impl Into<String>, expr: Expression) -> Self {
        self.fields.push((field.into(), ProjectField::Computed(expr)));
        self
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(LibrisError::AggregationError("$project must be an object".to_string()));
        };

        let mut project = ProjectStage::new();
        for (field, value) in obj {
            let project_field = match value {
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::Number(n) if n.as_i64() == Some(1) => ProjectField::Include,
                Value::Number(n) if n.as_i64() == Some(0) => ProjectField::Exclude,
                other => ProjectField::Computed(Expression::from_json(other)?),
            };
            project.fields.push((field.clone(), project_field));
        }

        Ok(project)
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, action) in &self.fields {
            let value = match action {
                ProjectField::Include => Value::from(1),
                ProjectField::Exclude => Value::from(0),
                ProjectField::Computed(expr) => expr.to_json(),
            };
            map.insert(field.clone(), value);
        }
        Value::Object(map)
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        let Value::Object(obj) = doc else {
            return Ok(doc.clone());
        };

        let has_inclusions = self.fields.iter()
            .any(|(_, f)| matches!(f, ProjectField::Include | ProjectField::Computed(_)));
        let has_non_id_exclusions = self.fields.iter()
            .any(|(field, f)| matches!(f, ProjectField::Exclude) && field != "_id");

        if has_inclusions && has_non_id_exclusions {
            return Err(LibrisError::AggregationError(
                "Cannot mix inclusion and exclusion in $project (except _id)".to_string()
            ));
        }

        let mut result = Map::new();

        if has_inclusions {
            // Include mode: _id unless excluded, then the listed fields in order
            let exclude_id = self.fields.iter()
                .any(|(field, f)| field == "_id" && matches!(f, ProjectField::Exclude));
            if !exclude_id {
                if let Some(id) = obj.get("_id") {
                    result.insert("_id".to_string(), id.clone());
                }
            }

            for (field, action) in &self.fields {
                match action {
                    ProjectField::Include => {
                        if let Some(value) = obj.get(field) {
                            result.insert(field.clone(), value.clone());
                        }
                    }
                    ProjectField::Computed(expr) => {
                        result.insert(field.clone(), expr.evaluate(doc)?);
                    }
                    ProjectField::Exclude => {}
                }
            }
        } else {
            // Exclude mode: everything except the listed fields
            for (field, value) in obj {
                if !self.fields.iter().any(|(excluded, _)| excluded == field) {
                    result.insert(field.clone(), value.clone());
                }
            }
        }

        Ok(Value::Object(result))
    }
}

impl AddFieldsStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, expr: Expression) -> Self {
        self.fields.push((name.into(), expr));
        self
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(LibrisError::AggregationError("$addFields must be an object".to_string()));
        };

        let fields = obj.iter()
            .map(|(name, value)| Ok((name.clone(), Expression::from_json(value)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(AddFieldsStage { fields })
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, expr) in &self.fields {
            map.insert(name.clone(), expr.to_json());
        }
        Value::Object(map)
    }

    fn add_to_document(&self, doc: Value) -> Result<Value> {
        let Value::Object(mut obj) = doc else {
            return Err(LibrisError::AggregationError("$addFields input must be a document".to_string()));
        };

        for (name, expr) in &self.fields {
            // Each expression sees the document as it was before this stage
            let value = expr.evaluate(&Value::Object(obj.clone()))?;
            obj.insert(name.clone(), value);
        }

        Ok(Value::Object(obj))
    }
}
