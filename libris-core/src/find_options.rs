// libris-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use std::cmp::Ordering;

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::document::ID_FIELD;
use crate::error::{Result, LibrisError};

/// Sort direction, rendered as 1 / -1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }

    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(SortDirection::Ascending),
            -1 => Some(SortDirection::Descending),
            _ => None,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    pub(crate) fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Fields to include; `_id` is excluded unless asked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    fields: Vec<String>,
    include_id: bool,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut projection = Projection::default();
        for field in fields {
            projection = projection.field(field);
        }
        projection
    }

    /// Add a field (duplicates are ignored)
    pub fn field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if field == ID_FIELD {
            self.include_id = true;
        } else if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }

    pub fn with_id(mut self) -> Self {
        self.include_id = true;
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn includes_id(&self) -> bool {
        self.include_id
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.include_id
    }

    /// Reject projections that would select nothing
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LibrisError::InvalidProjection(
                "projection must name at least one field".to_string()
            ));
        }
        Ok(())
    }

    /// Render as `{"title": 1, ..., "_id": 0}`
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for field in &self.fields {
            map.insert(field.clone(), Value::from(1));
        }
        map.insert(ID_FIELD.to_string(), Value::from(if self.include_id { 1 } else { 0 }));
        Value::Object(map)
    }
}

/// Ordered sort keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new().then(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new().then(field, SortDirection::Descending)
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, direction) in &self.keys {
            map.insert(field.clone(), Value::from(direction.as_i32()));
        }
        Value::Object(map)
    }
}

/// Zero-based page of fixed size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    page_size: usize,
    page_number: usize,
}

impl Page {
    pub fn new(page_size: usize, page_number: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(LibrisError::InvalidPage("page size must be positive".to_string()));
        }
        if page_number.checked_mul(page_size).is_none() {
            return Err(LibrisError::InvalidPage(
                format!("page {} of size {} overflows", page_number, page_size)
            ));
        }
        Ok(Page { page_size, page_number })
    }

    /// Human page numbering: page 1 is the first page
    pub fn from_one_based(page: usize, page_size: usize) -> Result<Self> {
        if page == 0 {
            return Err(LibrisError::InvalidPage("page numbers start at 1".to_string()));
        }
        Self::new(page_size, page - 1)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn skip(&self) -> usize {
        self.page_number * self.page_size
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Option<SortSpec>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_page(self, page: Page) -> Self {
        self.with_skip(page.skip()).with_limit(page.limit())
    }

    /// Sort, then skip/limit, then projection
    pub fn apply(&self, mut docs: Vec<Value>) -> Vec<Value> {
        if let Some(ref sort) = self.sort {
            apply_sort(&mut docs, sort);
        }

        docs = apply_limit_skip(docs, self.limit, self.skip);

        match self.projection {
            Some(ref projection) => docs.iter().map(|doc| apply_projection(doc, projection)).collect(),
            None => docs,
        }
    }
}

/// Apply projection to a document
pub fn apply_projection(doc: &Value, projection: &Projection) -> Value {
    let Value::Object(obj) = doc else {
        return doc.clone();
    };

    let mut result = Map::new();
    if projection.includes_id() {
        if let Some(id) = obj.get(ID_FIELD) {
            result.insert(ID_FIELD.to_string(), id.clone());
        }
    }
    for field in projection.fields() {
        if let Some(value) = obj.get(field) {
            result.insert(field.clone(), value.clone());
        }
    }

    Value::Object(result)
}

/// Stable sort of documents by the sort keys
pub fn apply_sort(docs: &mut [Value], sort: &SortSpec) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| compare_by_keys(a, b, sort.keys()));
}

pub(crate) fn compare_by_keys(a: &Value, b: &Value, keys: &[(String, SortDirection)]) -> Ordering {
    for (field, direction) in keys {
        let cmp = compare_for_sort(a.get(field), b.get(field));
        if cmp != Ordering::Equal {
            return direction.apply(cmp);
        }
    }
    Ordering::Equal
}

/// Total order over JSON values for sorting
pub(crate) fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,    // missing < any value
        (Some(_), None) => Ordering::Greater,

        (Some(Value::Number(n1)), Some(Value::Number(n2))) => {
            if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
                return i1.cmp(&i2);
            }
            let f1 = n1.as_f64().unwrap_or(0.0);
            let f2 = n2.as_f64().unwrap_or(0.0);
            f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
        }

        (Some(Value::String(s1)), Some(Value::String(s2))) => s1.cmp(s2),

        (Some(Value::Bool(b1)), Some(Value::Bool(b2))) => b1.cmp(b2),

        // Type priority: null < number < string < bool < object < array
        (Some(a_val), Some(b_val)) => type_priority(a_val).cmp(&type_priority(b_val)),
    }
}

fn type_priority(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}

/// Apply limit and skip to documents
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    let skip_count = skip.unwrap_or(0);
    let take_count = limit.unwrap_or(usize::MAX);

    docs.into_iter().skip(skip_count).take(take_count).collect()
}
