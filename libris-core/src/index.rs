// src/index.rs
// Compound secondary indexes over a collection

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{Result, LibrisError};
use crate::find_options::SortDirection;

/// Name of the index every collection carries on `_id`
pub const ID_INDEX_NAME: &str = "_id_";

/// Index key - one indexed field value
///
/// Ordered the same way documents sort: missing < null < number < string <
/// bool < object < array. Ints and floats compare numerically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKey {
    Missing,
    Null,
    Int(i64),
    Float(OrderedFloat),
    String(String),
    Bool(bool),
    Document,
    Array,
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

impl IndexKey {
    fn type_class(&self) -> u8 {
        match self {
            IndexKey::Missing => 0,
            IndexKey::Null => 1,
            IndexKey::Int(_) | IndexKey::Float(_) => 2,
            IndexKey::String(_) => 3,
            IndexKey::Bool(_) => 4,
            IndexKey::Document => 5,
            IndexKey::Array => 6,
        }
    }

    /// Key for `field` of a stored document
    pub fn of_field(doc: &Document, field: &str) -> Self {
        if field == ID_FIELD {
            return IndexKey::from(&doc.id.to_value());
        }
        doc.get(field).map_or(IndexKey::Missing, IndexKey::from)
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            // Integral floats are stored as Int, so equal magnitudes only
            // meet here through precision loss; Int sorts first
            (Int(a), Float(b)) => OrderedFloat(*a as f64).cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.cmp(&OrderedFloat(*b as f64)).then(Ordering::Greater),
            (String(a), String(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            _ => self.type_class().cmp(&other.type_class()),
        }
    }
}

/// Convert serde_json::Value to IndexKey
impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    IndexKey::Int(i)
                } else if let Some(f) = n.as_f64() {
                    // 10.0 and 10 must land on the same key
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        IndexKey::Int(f as i64)
                    } else {
                        IndexKey::Float(OrderedFloat(f))
                    }
                } else {
                    IndexKey::Null
                }
            }
            Value::String(s) => IndexKey::String(s.clone()),
            Value::Object(_) => IndexKey::Document,
            Value::Array(_) => IndexKey::Array,
        }
    }
}

/// Key pattern of an index: ordered (field, direction) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    keys: Vec<(String, SortDirection)>,
}

impl IndexSpec {
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

    /// The automatic primary key index
    pub fn id() -> Self {
        Self::ascending(ID_FIELD)
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(field, _)| field.as_str())
    }

    pub fn leading_field(&self) -> Option<&str> {
        self.keys.first().map(|(field, _)| field.as_str())
    }

    /// Canonical name: `author_1_published_year_-1`
    pub fn name(&self) -> String {
        if *self == Self::id() {
            return ID_INDEX_NAME.to_string();
        }
        self.keys.iter()
            .map(|(field, direction)| format!("{}_{}", field, direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(LibrisError::InvalidIndexSpec("index must have at least one field".into()));
        }
        for (i, (field, _)) in self.keys.iter().enumerate() {
            if field.is_empty() {
                return Err(LibrisError::InvalidIndexSpec("index field name cannot be empty".into()));
            }
            if self.keys[..i].iter().any(|(seen, _)| seen == field) {
                return Err(LibrisError::InvalidIndexSpec(format!("field '{}' repeated in index", field)));
            }
        }
        Ok(())
    }

    /// Parse `{"author": 1, "published_year": -1}`
    pub fn from_json(json: &Value) -> Result<Self> {
        let Value::Object(obj) = json else {
            return Err(LibrisError::InvalidIndexSpec("index spec must be an object".into()));
        };

        let mut spec = IndexSpec::new();
        for (field, direction) in obj {
            let direction = direction.as_i64()
                .and_then(SortDirection::from_i64)
                .ok_or_else(|| LibrisError::InvalidIndexSpec(
                    format!("direction for '{}' must be 1 or -1", field)
                ))?;
            spec = spec.then(field.clone(), direction);
        }

        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, direction) in &self.keys {
            map.insert(field.clone(), Value::from(direction.as_i32()));
        }
        Value::Object(map)
    }
}

/// A physical index as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHandle {
    pub name: String,
    pub spec: IndexSpec,
}

/// One component of a stored compound key, ordered by its field's direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPart {
    pub key: IndexKey,
    pub direction: SortDirection,
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        self.direction.apply(self.key.cmp(&other.key))
    }
}

/// Bounds on a single indexed field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyRange {
    pub lower: Option<(IndexKey, bool)>,    // (key, inclusive)
    pub upper: Option<(IndexKey, bool)>,
}

impl KeyRange {
    /// Tighten the lower bound
    pub fn with_lower(mut self, key: IndexKey, inclusive: bool) -> Self {
        let tighter = match &self.lower {
            None => true,
            Some((current, current_inclusive)) => match key.cmp(current) {
                Ordering::Greater => true,
                Ordering::Equal => *current_inclusive && !inclusive,
                Ordering::Less => false,
            },
        };
        if tighter {
            self.lower = Some((key, inclusive));
        }
        self
    }

    /// Tighten the upper bound
    pub fn with_upper(mut self, key: IndexKey, inclusive: bool) -> Self {
        let tighter = match &self.upper {
            None => true,
            Some((current, current_inclusive)) => match key.cmp(current) {
                Ordering::Less => true,
                Ordering::Equal => *current_inclusive && !inclusive,
                Ordering::Greater => false,
            },
        };
        if tighter {
            self.upper = Some((key, inclusive));
        }
        self
    }

    /// Keys of a different type than a bound never fall inside it
    pub fn contains(&self, key: &IndexKey) -> bool {
        if let Some((lower, inclusive)) = &self.lower {
            if key.type_class() != lower.type_class() {
                return false;
            }
            match key.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        if let Some((upper, inclusive)) = &self.upper {
            if key.type_class() != upper.type_class() {
                return false;
            }
            match key.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

/// Scan bounds: equality values for a key prefix, then an optional range on the next field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanBounds {
    pub equality: Vec<IndexKey>,
    pub range: Option<KeyRange>,
}

/// Result of walking an index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexScanOutput {
    pub doc_ids: Vec<DocumentId>,
    pub keys_examined: usize,
}

/// Compound index: key tuples in index order, each mapping to its documents
/// in insertion order
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    spec: IndexSpec,
    entries: BTreeMap<Vec<KeyPart>, Vec<DocumentId>>,
}

impl Index {
    pub fn new(spec: IndexSpec) -> Self {
        Index {
            name: spec.name(),
            spec,
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn handle(&self) -> IndexHandle {
        IndexHandle {
            name: self.name.clone(),
            spec: self.spec.clone(),
        }
    }

    fn key_for(&self, doc: &Document) -> Vec<KeyPart> {
        self.spec.keys().iter()
            .map(|(field, direction)| KeyPart {
                key: IndexKey::of_field(doc, field),
                direction: *direction,
            })
            .collect()
    }

    pub fn insert(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        self.entries.entry(key).or_default().push(doc.id.clone());
    }

    pub fn remove(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.retain(|id| id != &doc.id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn rebuild<'a>(&mut self, docs: impl IntoIterator<Item = &'a Document>) {
        self.entries.clear();
        for doc in docs {
            self.insert(doc);
        }
    }

    /// Walk the entries inside `bounds`, backwards when `reverse` is set.
    /// Documents sharing a key keep insertion order either way.
    pub fn scan(&self, bounds: &ScanBounds, reverse: bool) -> IndexScanOutput {
        let prefix: Vec<KeyPart> = bounds.equality.iter()
            .zip(self.spec.keys())
            .map(|(key, (_, direction))| KeyPart { key: key.clone(), direction: *direction })
            .collect();
        let range_position = prefix.len();

        let mut matched: Vec<&Vec<DocumentId>> = self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| match (&bounds.range, key.get(range_position)) {
                (Some(range), Some(part)) => range.contains(&part.key),
                _ => true,
            })
            .map(|(_, ids)| ids)
            .collect();

        if reverse {
            matched.reverse();
        }

        let doc_ids: Vec<DocumentId> = matched.into_iter().flatten().cloned().collect();
        IndexScanOutput {
            keys_examined: doc_ids.len(),
            doc_ids,
        }
    }
}

/// Index Manager - manages all indexes for a collection
#[derive(Debug, Clone)]
pub struct IndexManager {
    indexes: Vec<Index>,
}

impl IndexManager {
    /// New manager holding only the `_id_` index
    pub fn new() -> Self {
        IndexManager {
            indexes: vec![Index::new(IndexSpec::id())],
        }
    }

    /// Create the index unless an identical one exists.
    /// Returns the handle and whether it was created.
    pub fn ensure<'a>(
        &mut self,
        spec: IndexSpec,
        docs: impl IntoIterator<Item = &'a Document>,
    ) -> Result<(IndexHandle, bool)> {
        spec.validate()?;

        if let Some(existing) = self.get(&spec.name()) {
            return Ok((existing.handle(), false));
        }

        let mut index = Index::new(spec);
        index.rebuild(docs);
        let handle = index.handle();
        self.indexes.push(index);
        Ok((handle, true))
    }

    /// Drop index by spec
    pub fn drop_index(&mut self, spec: &IndexSpec) -> Result<IndexHandle> {
        let name = spec.name();
        if name == ID_INDEX_NAME {
            return Err(LibrisError::InvalidIndexSpec("cannot drop the _id_ index".into()));
        }

        let position = self.indexes.iter()
            .position(|index| index.name == name)
            .ok_or(LibrisError::IndexNotFound(name))?;
        Ok(self.indexes.remove(position).handle())
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.name == name)
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Handles in creation order, `_id_` first
    pub fn list_indexes(&self) -> Vec<IndexHandle> {
        self.indexes.iter().map(Index::handle).collect()
    }

    pub fn on_insert(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.insert(doc);
        }
    }

    pub fn on_remove(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.remove(doc);
        }
    }

    pub fn on_update(&mut self, before: &Document, after: &Document) {
        for index in &mut self.indexes {
            index.remove(before);
            index.insert(after);
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: i64, value: Value) -> Document {
        Document::from_value(value, DocumentId::Int(id)).unwrap()
    }

    fn author_year_spec() -> IndexSpec {
        IndexSpec::ascending("author").then("published_year", SortDirection::Descending)
    }

    fn sample_docs() -> Vec<Document> {
        vec![
            doc(1, json!({"author": "George Orwell", "published_year": 1945})),
            doc(2, json!({"author": "Jane Austen", "published_year": 1813})),
            doc(3, json!({"author": "George Orwell", "published_year": 1949})),
            doc(4, json!({"author": "George Orwell", "published_year": 1936})),
        ]
    }

    #[test]
    fn test_index_key_ordering() {
        assert!(IndexKey::Missing < IndexKey::Null);
        assert!(IndexKey::Null < IndexKey::Int(0));
        assert!(IndexKey::Int(5) < IndexKey::Int(10));
        assert!(IndexKey::Int(10) < IndexKey::Float(OrderedFloat(10.5)));
        assert!(IndexKey::Float(OrderedFloat(9.5)) < IndexKey::Int(10));
        assert!(IndexKey::Float(OrderedFloat(10.5)) < IndexKey::String("a".to_string()));
        assert!(IndexKey::String("a".to_string()) < IndexKey::String("b".to_string()));
        assert!(IndexKey::String("z".to_string()) < IndexKey::Bool(false));
        assert!(IndexKey::Bool(false) < IndexKey::Bool(true));
    }

    #[test]
    fn test_integral_float_maps_to_int_key() {
        assert_eq!(IndexKey::from(&json!(10.0)), IndexKey::Int(10));
        assert_eq!(IndexKey::from(&json!(10.5)), IndexKey::Float(OrderedFloat(10.5)));
        assert_eq!(IndexKey::from(&json!({"a": 1})), IndexKey::Document);
    }

    #[test]
    fn test_spec_name_and_json() {
        let spec = author_year_spec();
        assert_eq!(spec.name(), "author_1_published_year_-1");
        assert_eq!(spec.to_json(), json!({"author": 1, "published_year": -1}));
        assert_eq!(IndexSpec::id().name(), ID_INDEX_NAME);

        let parsed = IndexSpec::from_json(&json!({"price": -1})).unwrap();
        assert_eq!(parsed, IndexSpec::descending("price"));
    }

    #[test]
    fn test_spec_from_json_keeps_field_order() {
        let spec = IndexSpec::from_json(&json!({"published_year": -1, "author": 1})).unwrap();

        assert_eq!(spec.leading_field(), Some("published_year"));
        assert_eq!(spec.name(), "published_year_-1_author_1");
        assert_eq!(spec.to_json().to_string(), r#"{"published_year":-1,"author":1}"#);
    }

    #[test]
    fn test_spec_validation() {
        assert!(IndexSpec::new().validate().is_err());
        assert!(IndexSpec::ascending("a").then("a", SortDirection::Descending).validate().is_err());
        assert!(IndexSpec::ascending("").validate().is_err());
        assert!(IndexSpec::from_json(&json!({"price": 2})).is_err());
        assert!(IndexSpec::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let docs = sample_docs();
        let mut manager = IndexManager::new();

        let (first, created) = manager.ensure(author_year_spec(), &docs).unwrap();
        assert!(created);
        let (second, created_again) = manager.ensure(author_year_spec(), &docs).unwrap();
        assert!(!created_again);
        assert_eq!(first, second);

        let names: Vec<String> = manager.list_indexes().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["_id_".to_string(), "author_1_published_year_-1".to_string()]);
    }

    #[test]
    fn test_drop_index() {
        let docs = sample_docs();
        let mut manager = IndexManager::new();
        manager.ensure(author_year_spec(), &docs).unwrap();

        assert!(manager.drop_index(&author_year_spec()).is_ok());
        assert!(matches!(
            manager.drop_index(&author_year_spec()),
            Err(LibrisError::IndexNotFound(name)) if name == "author_1_published_year_-1"
        ));
        assert!(manager.drop_index(&IndexSpec::id()).is_err());
        assert_eq!(manager.list_indexes().len(), 1);
    }

    #[test]
    fn test_scan_equality_prefix_in_index_order() {
        let docs = sample_docs();
        let mut index = Index::new(author_year_spec());
        index.rebuild(&docs);

        let bounds = ScanBounds {
            equality: vec![IndexKey::String("George Orwell".to_string())],
            range: None,
        };

        let forward = index.scan(&bounds, false);
        assert_eq!(forward.doc_ids, vec![DocumentId::Int(3), DocumentId::Int(1), DocumentId::Int(4)]);
        assert_eq!(forward.keys_examined, 3);

        let backward = index.scan(&bounds, true);
        assert_eq!(backward.doc_ids, vec![DocumentId::Int(4), DocumentId::Int(1), DocumentId::Int(3)]);
    }

    #[test]
    fn test_scan_range_on_following_field() {
        let docs = sample_docs();
        let mut index = Index::new(author_year_spec());
        index.rebuild(&docs);

        let bounds = ScanBounds {
            equality: vec![IndexKey::String("George Orwell".to_string())],
            range: Some(KeyRange::default().with_lower(IndexKey::Int(1940), false)),
        };
        let output = index.scan(&bounds, false);
        assert_eq!(output.doc_ids, vec![DocumentId::Int(3), DocumentId::Int(1)]);
    }

    #[test]
    fn test_key_range_tightening_and_type_bracketing() {
        let range = KeyRange::default()
            .with_lower(IndexKey::Int(1900), true)
            .with_lower(IndexKey::Int(1940), false)
            .with_lower(IndexKey::Int(1920), true)
            .with_upper(IndexKey::Int(2000), true);

        assert_eq!(range.lower, Some((IndexKey::Int(1940), false)));
        assert!(!range.contains(&IndexKey::Int(1940)));
        assert!(range.contains(&IndexKey::Int(1941)));
        assert!(range.contains(&IndexKey::Int(2000)));
        assert!(!range.contains(&IndexKey::String("1950".to_string())));
    }

    #[test]
    fn test_maintenance_on_update_and_remove() {
        let docs = sample_docs();
        let mut manager = IndexManager::new();
        manager.ensure(IndexSpec::ascending("author"), &docs).unwrap();

        let mut updated = docs[1].clone();
        updated.set("author".to_string(), json!("J. Austen"));
        manager.on_update(&docs[1], &updated);
        manager.on_remove(&docs[0]);

        let index = manager.get("author_1").unwrap();
        let austen = ScanBounds { equality: vec![IndexKey::String("Jane Austen".into())], range: None };
        assert!(index.scan(&austen, false).doc_ids.is_empty());

        let renamed = ScanBounds { equality: vec![IndexKey::String("J. Austen".into())], range: None };
        assert_eq!(index.scan(&renamed, false).doc_ids, vec![DocumentId::Int(2)]);

        let orwell = ScanBounds { equality: vec![IndexKey::String("George Orwell".into())], range: None };
        assert_eq!(index.scan(&orwell, false).doc_ids.len(), 2);
    }
}
