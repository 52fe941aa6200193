// src/document.rs
use std::hash::{Hash, Hasher};

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, LibrisError};

/// Name of the primary key field assigned by the store
pub const ID_FIELD: &str = "_id";

/// Stored document: primary key plus free-form fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Document ID types.
///
/// An ObjectId reads back from JSON as a plain string, so `String` and
/// `ObjectId` with the same text are the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),
}

impl DocumentId {
    /// Random ObjectId-style ID (UUID v4, hex)
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().simple().to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) | DocumentId::ObjectId(s) => Value::String(s.clone()),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            DocumentId::Int(_) => None,
            DocumentId::String(s) | DocumentId::ObjectId(s) => Some(s),
        }
    }
}

impl PartialEq for DocumentId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DocumentId::Int(a), DocumentId::Int(b)) => a == b,
            _ => self.as_str().is_some() && self.as_str() == other.as_str(),
        }
    }
}

impl Eq for DocumentId {}

impl Hash for DocumentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DocumentId::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            DocumentId::String(s) | DocumentId::ObjectId(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl Document {
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Build a document from a JSON object, assigning `id` unless `_id` is present
    pub fn from_value(value: Value, id: DocumentId) -> Result<Self> {
        match value {
            Value::Object(mut fields) => {
                let id = match fields.shift_remove(ID_FIELD) {
                    Some(existing) => serde_json::from_value(existing)?,
                    None => id,
                };
                Ok(Document { id, fields })
            }
            other => Err(LibrisError::InvalidQuery(
                format!("Document must be a JSON object, got {}", other)
            )),
        }
    }

    /// JSON view including `_id`
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(ID_FIELD.to_string(), self.id.to_value());
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: String, value: Value) {
        self.fields.insert(field, value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.to_value()
    }
}

/// A complete book record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i64,
    pub price: f64,
    pub in_stock: bool,
}

impl Book {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        genre: impl Into<String>,
        published_year: i64,
        price: f64,
        in_stock: bool,
    ) -> Self {
        Book {
            title: title.into(),
            author: author.into(),
            genre: genre.into(),
            published_year,
            price,
            in_stock,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A projected book: only the requested fields are present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialBook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<bool>,
}

impl PartialBook {
    /// Full record, if every field was projected
    pub fn into_book(self) -> Option<Book> {
        Some(Book {
            title: self.title?,
            author: self.author?,
            genre: self.genre?,
            published_year: self.published_year?,
            price: self.price?,
            in_stock: self.in_stock?,
        })
    }
}

impl From<Book> for PartialBook {
    fn from(book: Book) -> Self {
        PartialBook {
            title: Some(book.title),
            author: Some(book.author),
            genre: Some(book.genre),
            published_year: Some(book.published_year),
            price: Some(book.price),
            in_stock: Some(book.in_stock),
        }
    }
}

/// `{title, author}` pair collected per decade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSummary {
    pub title: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenrePriceSummary {
    pub genre: String,
    pub average_price: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorBookCount {
    pub author: String,
    pub total_books: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecadeBucket {
    pub decade: i64,
    pub book_count: u64,
    pub books: Vec<BookSummary>,
}
