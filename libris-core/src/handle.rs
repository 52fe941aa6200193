// src/handle.rs
//! Database handle abstraction
//!
//! `DatabaseHandle` is the only way the façade reaches stored documents.
//! The bundled [`MemoryDatabase`](crate::memory::MemoryDatabase) implements
//! it in-process; any other backend only has to provide these operations.
//!
//! Every call is an independent request. Implementations must be
//! `Send + Sync` so a single handle can serve concurrent callers.

use std::sync::Arc;

use serde_json::Value;

use crate::aggregation::Pipeline;
use crate::document::DocumentId;
use crate::error::Result;
use crate::find_options::{FindOptions, SortSpec};
use crate::index::{IndexHandle, IndexSpec};
use crate::query::Filter;
use crate::query_planner::ExecutionStats;
use crate::update::{DeleteResult, UpdateResult, UpdateSpec};

pub trait DatabaseHandle: Send + Sync {
    /// Run a find: filter, then sort, skip/limit and projection from `options`
    fn execute(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Value>>;

    /// Run an aggregation pipeline over the whole collection
    fn execute_aggregation(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>>;

    /// Insert documents, returning their ids in input order
    fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocumentId>>;

    /// Apply `update` to the first document matching `filter`
    fn update_one(&self, collection: &str, filter: &Filter, update: &UpdateSpec) -> Result<UpdateResult>;

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteResult>;

    /// Create the index if missing; an identical existing index is returned as is
    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<IndexHandle>;

    /// # Errors
    ///
    /// `IndexNotFound` if no index has this key pattern.
    fn drop_index(&self, collection: &str, spec: &IndexSpec) -> Result<()>;

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexHandle>>;

    /// Plan and run the query in explain mode; no rows are returned
    fn explain(&self, collection: &str, filter: &Filter, sort: Option<&SortSpec>) -> Result<ExecutionStats>;
}

macro_rules! forward_handle {
    ($($target:ty),*) => {$(
        impl<T: DatabaseHandle + ?Sized> DatabaseHandle for $target {
            fn execute(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Value>> {
                (**self).execute(collection, filter, options)
            }

            fn execute_aggregation(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>> {
                (**self).execute_aggregation(collection, pipeline)
            }

            fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
                (**self).insert_many(collection, docs)
            }

            fn update_one(&self, collection: &str, filter: &Filter, update: &UpdateSpec) -> Result<UpdateResult> {
                (**self).update_one(collection, filter, update)
            }

            fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteResult> {
                (**self).delete_one(collection, filter)
            }

            fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<IndexHandle> {
                (**self).create_index(collection, spec)
            }

            fn drop_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
                (**self).drop_index(collection, spec)
            }

            fn list_indexes(&self, collection: &str) -> Result<Vec<IndexHandle>> {
                (**self).list_indexes(collection)
            }

            fn explain(&self, collection: &str, filter: &Filter, sort: Option<&SortSpec>) -> Result<ExecutionStats> {
                (**self).explain(collection, filter, sort)
            }
        }
    )*};
}

forward_handle!(&T, Arc<T>);
