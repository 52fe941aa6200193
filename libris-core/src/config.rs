// src/config.rs
use serde::{Serialize, Deserialize};

use crate::error::{Result, LibrisError};

/// Façade settings
///
/// Every field has a default, so a partial JSON document such as
/// `{"default_page_size": 10}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Collection the caller works against by default
    pub collection: String,
    /// Page size used by `page_of`
    pub default_page_size: usize,
    /// Decimal places kept when presenting average prices
    pub price_decimals: u32,
    /// Bucket width of `books_by_decade`
    pub decade_width: i64,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            collection: "books".to_string(),
            default_page_size: 5,
            price_decimals: 2,
            decade_width: 10,
        }
    }
}

impl FacadeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_price_decimals(mut self, decimals: u32) -> Self {
        self.price_decimals = decimals;
        self
    }

    pub fn with_decade_width(mut self, width: i64) -> Self {
        self.decade_width = width;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(LibrisError::InvalidQuery("collection name cannot be empty".into()));
        }
        if self.default_page_size == 0 {
            return Err(LibrisError::InvalidPage("default page size must be positive".into()));
        }
        if self.decade_width <= 0 {
            return Err(LibrisError::AggregationError("decade width must be positive".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FacadeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
