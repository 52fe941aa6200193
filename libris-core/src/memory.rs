// src/memory.rs
// In-process document store implementing DatabaseHandle

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::aggregation::{Pipeline, Stage};
use crate::document::{Document, DocumentId};
use crate::error::{Result, LibrisError};
use crate::find_options::{FindOptions, SortSpec};
use crate::handle::DatabaseHandle;
use crate::index::{IndexHandle, IndexManager, IndexSpec};
use crate::query::Filter;
use crate::query_planner::{ExecutionStats, QueryPlan, QueryPlanner};
use crate::update::{DeleteResult, UpdateResult, UpdateSpec};

/// In-memory database: named collections, each behind its own lock
///
/// Reads on a collection share its lock, writes exclude each other, so
/// every handle call observes and produces a consistent collection state.
pub struct MemoryDatabase {
    collections: DashMap<String, Arc<RwLock<CollectionData>>>,
    available: AtomicBool,
}

/// Documents in insertion order plus their indexes
struct CollectionData {
    docs: BTreeMap<u64, Document>,
    positions: HashMap<DocumentId, u64>,
    next_seq: u64,
    indexes: IndexManager,
}

/// Documents produced by a plan, with what it took to produce them
struct PlanRun {
    matches: Vec<(u64, Value)>,
    keys_examined: u64,
    docs_examined: u64,
}

impl CollectionData {
    fn new() -> Self {
        CollectionData {
            docs: BTreeMap::new(),
            positions: HashMap::new(),
            next_seq: 0,
            indexes: IndexManager::new(),
        }
    }

    fn insert(&mut self, doc: Document) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.indexes.on_insert(&doc);
        self.positions.insert(doc.id.clone(), seq);
        self.docs.insert(seq, doc);
    }

    /// Run `plan`, keeping documents that match `filter`.
    ///
    /// Results come back in index order when the plan's index yields the
    /// requested sort, otherwise in insertion order.
    fn run_plan(&self, filter: &Filter, plan: &QueryPlan) -> PlanRun {
        match plan {
            QueryPlan::IndexScan { index_name, bounds, reverse, ordered_walk, .. } => {
                if let Some(index) = self.indexes.get(index_name) {
                    let scan = index.scan(bounds, *reverse);
                    let mut docs_examined = 0;
                    let mut matches = Vec::new();

                    for id in &scan.doc_ids {
                        let Some(doc) = self.positions.get(id).and_then(|seq| self.docs.get(seq).map(|d| (*seq, d))) else {
                            continue;
                        };
                        docs_examined += 1;
                        let value = doc.1.to_value();
                        if filter.matches(&value) {
                            matches.push((doc.0, value));
                        }
                    }

                    if !*ordered_walk {
                        matches.sort_by_key(|(seq, _)| *seq);
                    }

                    return PlanRun {
                        matches,
                        keys_examined: scan.keys_examined as u64,
                        docs_examined,
                    };
                }
                self.collection_scan(filter)
            }
            QueryPlan::CollectionScan { .. } => self.collection_scan(filter),
        }
    }

    fn collection_scan(&self, filter: &Filter) -> PlanRun {
        let matches = self.docs.iter()
            .map(|(seq, doc)| (*seq, doc.to_value()))
            .filter(|(_, value)| filter.matches(value))
            .collect();

        PlanRun {
            matches,
            keys_examined: 0,
            docs_examined: self.docs.len() as u64,
        }
    }

    /// Sequence number of the first document (insertion order) matching `filter`
    fn first_match(&self, filter: &Filter) -> Option<u64> {
        let plan = QueryPlanner::plan(filter, None, &self.indexes);
        self.run_plan(filter, &plan).matches.first().map(|(seq, _)| *seq)
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        MemoryDatabase {
            collections: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Stop serving requests; every later call fails with `DatabaseUnavailable`
    pub fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
        tracing::info!("Memory database closed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Names of collections created so far, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of documents in `collection`
    pub fn count(&self, collection: &str) -> Result<usize> {
        let coll = self.collection(collection)?;
        let data = coll.read();
        Ok(data.docs.len())
    }

    /// Remove a collection and its indexes; returns whether it existed
    pub fn drop_collection(&self, collection: &str) -> Result<bool> {
        self.ensure_available()?;
        let existed = self.collections.remove(collection).is_some();
        if existed {
            tracing::info!("Dropped collection '{collection}'");
        }
        Ok(existed)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LibrisError::DatabaseUnavailable("memory database is closed".to_string()))
        }
    }

    /// Collection by name, created on first use
    fn collection(&self, name: &str) -> Result<Arc<RwLock<CollectionData>>> {
        self.ensure_available()?;
        if name.is_empty() {
            return Err(LibrisError::InvalidQuery("collection name cannot be empty".to_string()));
        }

        if let Some(existing) = self.collections.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CollectionData::new())));
        Ok(Arc::clone(entry.value()))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseHandle for MemoryDatabase {
    fn execute(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Value>> {
        if let Some(projection) = &options.projection {
            projection.validate()?;
        }

        let coll = self.collection(collection)?;
        let data = coll.read();

        let plan = QueryPlanner::plan(filter, options.sort.as_ref(), &data.indexes);
        let run = data.run_plan(filter, &plan);
        drop(data);

        let docs: Vec<Value> = run.matches.into_iter().map(|(_, value)| value).collect();
        let results = if plan.sort_in_memory() {
            options.apply(docs)
        } else {
            // Already in the requested order
            FindOptions { sort: None, ..options.clone() }.apply(docs)
        };

        tracing::debug!(
            "find on '{collection}': plan={:?}, examined={}, returned={}",
            plan.index_name().unwrap_or("COLLSCAN"),
            run.docs_examined,
            results.len()
        );
        Ok(results)
    }

    fn execute_aggregation(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>> {
        pipeline.validate()?;

        let coll = self.collection(collection)?;
        let docs: Vec<Value> = {
            let data = coll.read();
            match pipeline.stages().first() {
                // A leading $match can use an index; the stage still runs
                Some(Stage::Match(filter)) => {
                    let plan = QueryPlanner::plan(filter, None, &data.indexes);
                    data.run_plan(filter, &plan).matches.into_iter().map(|(_, value)| value).collect()
                }
                _ => data.docs.values().map(Document::to_value).collect(),
            }
        };

        let input = docs.len();
        let results = pipeline.execute(docs)?;
        tracing::debug!(
            "aggregate on '{collection}': {} stages, {input} documents in, {} out",
            pipeline.len(),
            results.len()
        );
        Ok(results)
    }

    fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
        let coll = self.collection(collection)?;
        let mut data = coll.write();

        let documents = docs.into_iter()
            .map(|value| Document::from_value(value, DocumentId::new_object_id()))
            .collect::<Result<Vec<_>>>()?;

        // All-or-nothing: reject duplicates before touching the collection
        let mut seen = std::collections::HashSet::new();
        for doc in &documents {
            if data.positions.contains_key(&doc.id) || !seen.insert(&doc.id) {
                return Err(LibrisError::InvalidQuery(format!("duplicate _id: {}", doc.id.to_value())));
            }
        }

        let ids: Vec<DocumentId> = documents.iter().map(|doc| doc.id.clone()).collect();
        for doc in documents {
            data.insert(doc);
        }

        tracing::debug!("inserted {} documents into '{collection}'", ids.len());
        Ok(ids)
    }

    fn update_one(&self, collection: &str, filter: &Filter, update: &UpdateSpec) -> Result<UpdateResult> {
        update.validate()?;

        let coll = self.collection(collection)?;
        let mut guard = coll.write();
        let data = &mut *guard;

        let Some(seq) = data.first_match(filter) else {
            tracing::debug!("update on '{collection}': no match");
            return Ok(UpdateResult::default());
        };
        let Some(current) = data.docs.get_mut(&seq) else {
            return Ok(UpdateResult::default());
        };

        // Applied to a copy so a failing operator leaves the document untouched
        let mut updated = current.clone();
        let modified = update.apply(&mut updated)?;
        if modified {
            data.indexes.on_update(current, &updated);
            *current = updated;
        }

        tracing::debug!("update on '{collection}': matched 1, modified {}", u64::from(modified));
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteResult> {
        let coll = self.collection(collection)?;
        let mut guard = coll.write();
        let data = &mut *guard;

        let Some(seq) = data.first_match(filter) else {
            return Ok(DeleteResult::default());
        };
        let Some(doc) = data.docs.remove(&seq) else {
            return Ok(DeleteResult::default());
        };

        data.positions.remove(&doc.id);
        data.indexes.on_remove(&doc);

        tracing::debug!("deleted 1 document from '{collection}'");
        Ok(DeleteResult { deleted_count: 1 })
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<IndexHandle> {
        let coll = self.collection(collection)?;
        let mut guard = coll.write();
        let data = &mut *guard;

        let (handle, created) = data.indexes.ensure(spec.clone(), data.docs.values())?;
        if created {
            tracing::info!("Created index '{}' on '{collection}'", handle.name);
        } else {
            tracing::debug!("Index '{}' on '{collection}' already exists", handle.name);
        }
        Ok(handle)
    }

    fn drop_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        let coll = self.collection(collection)?;
        let mut data = coll.write();

        let handle = data.indexes.drop_index(spec)?;
        tracing::info!("Dropped index '{}' on '{collection}'", handle.name);
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexHandle>> {
        let coll = self.collection(collection)?;
        let data = coll.read();
        Ok(data.indexes.list_indexes())
    }

    fn explain(&self, collection: &str, filter: &Filter, sort: Option<&SortSpec>) -> Result<ExecutionStats> {
        let coll = self.collection(collection)?;
        let data = coll.read();

        let started = Instant::now();
        let plan = QueryPlanner::plan(filter, sort, &data.indexes);
        let run = data.run_plan(filter, &plan);

        let stats = ExecutionStats {
            winning_plan: plan.winning_plan(),
            n_returned: run.matches.len() as u64,
            total_keys_examined: run.keys_examined,
            total_docs_examined: run.docs_examined,
            in_memory_sort: plan.sort_in_memory(),
            execution_time_millis: started.elapsed().as_millis() as u64,
        };

        tracing::debug!("explain on '{collection}': {:?}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_options::{Projection, SortDirection};
    use serde_json::json;

    fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert_many("books", vec![
            json!({"title": "1984", "author": "George Orwell", "published_year": 1949, "price": 10.99}),
            json!({"title": "Emma", "author": "Jane Austen", "published_year": 1815, "price": 7.99}),
            json!({"title": "Animal Farm", "author": "George Orwell", "published_year": 1945, "price": 8.5}),
            json!({"title": "Persuasion", "author": "Jane Austen", "published_year": 1817, "price": 9.25}),
        ]).unwrap();
        db
    }

    #[test]
    fn test_insert_assigns_object_ids() {
        let db = MemoryDatabase::new();
        let ids = db.insert_many("books", vec![json!({"title": "A"}), json!({"title": "B"})]).unwrap();

        assert_eq!(ids.len(), 2);
        assert!(matches!(ids[0], DocumentId::ObjectId(_)));
        assert_ne!(ids[0], ids[1]);
        assert_eq!(db.count("books").unwrap(), 2);
    }

    #[test]
    fn test_insert_rejects_duplicate_ids_atomically() {
        let db = MemoryDatabase::new();
        db.insert_many("books", vec![json!({"_id": 1, "title": "A"})]).unwrap();

        let result = db.insert_many("books", vec![json!({"_id": 2}), json!({"_id": 1})]);
        assert!(result.is_err());
        assert_eq!(db.count("books").unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_string_copy_of_assigned_id() {
        let db = MemoryDatabase::new();
        let ids = db.insert_many("books", vec![json!({"title": "A"})]).unwrap();
        let id = ids[0].to_value();

        let result = db.insert_many("books", vec![json!({"_id": id.clone(), "title": "B"})]);
        assert!(matches!(result, Err(LibrisError::InvalidQuery(_))));

        let found = db.execute("books", &Filter::new().eq("_id", id), &FindOptions::new()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["title"], "A");
    }

    #[test]
    fn test_pinned_sort_keeps_insertion_order_with_index() {
        let db = seeded();
        db.insert_many("books", vec![
            json!({"title": "Collected Essays", "author": "George Orwell", "published_year": 1961}),
        ]).unwrap();
        let filter = Filter::new().eq("author", "George Orwell");
        let options = FindOptions::new()
            .with_sort(SortSpec::ascending("author"))
            .with_projection(Projection::include(["title"]));

        let before = db.execute("books", &filter, &options).unwrap();
        db.create_index("books", &IndexSpec::ascending("author").then("published_year", SortDirection::Descending)).unwrap();
        let after = db.execute("books", &filter, &options).unwrap();

        assert_eq!(before, after);
        assert_eq!(after, vec![
            json!({"title": "1984"}),
            json!({"title": "Animal Farm"}),
            json!({"title": "Collected Essays"}),
        ]);
    }

    #[test]
    fn test_find_in_insertion_order_without_sort() {
        let db = seeded();
        let docs = db.execute("books", &Filter::new().eq("author", "George Orwell"), &FindOptions::new()).unwrap();
        let titles: Vec<&str> = docs.iter().filter_map(|d| d["title"].as_str()).collect();
        assert_eq!(titles, vec!["1984", "Animal Farm"]);
    }

    #[test]
    fn test_index_plan_returns_same_rows_as_collection_scan() {
        let db = seeded();
        let filter = Filter::new().eq("author", "Jane Austen");
        let options = FindOptions::new()
            .with_sort(SortSpec::descending("published_year"))
            .with_projection(Projection::include(["title"]));

        let before = db.execute("books", &filter, &options).unwrap();
        db.create_index("books", &IndexSpec::ascending("author").then("published_year", SortDirection::Descending)).unwrap();
        let after = db.execute("books", &filter, &options).unwrap();

        assert_eq!(before, after);
        assert_eq!(after, vec![json!({"title": "Persuasion"}), json!({"title": "Emma"})]);
    }

    #[test]
    fn test_update_and_delete_first_match() {
        let db = seeded();
        let filter = Filter::new().eq("author", "George Orwell");

        let result = db.update_one("books", &filter, &UpdateSpec::new().set("price", 5.0)).unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });

        let docs = db.execute("books", &Filter::new().eq("title", "1984"), &FindOptions::new()).unwrap();
        assert_eq!(docs[0]["price"], json!(5.0));

        let deleted = db.delete_one("books", &filter).unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert_eq!(db.count("books").unwrap(), 3);

        let missing = db.delete_one("books", &Filter::new().eq("title", "Dune")).unwrap();
        assert_eq!(missing.deleted_count, 0);
    }

    #[test]
    fn test_failed_update_leaves_document_unchanged() {
        let db = seeded();
        let filter = Filter::new().eq("title", "Emma");
        let update = UpdateSpec::new().set("price", 1.0).inc("title", 1);

        assert!(db.update_one("books", &filter, &update).is_err());
        let docs = db.execute("books", &filter, &FindOptions::new()).unwrap();
        assert_eq!(docs[0]["price"], json!(7.99));
    }

    #[test]
    fn test_index_maintained_across_writes() {
        let db = seeded();
        db.create_index("books", &IndexSpec::ascending("author")).unwrap();

        db.update_one("books", &Filter::new().eq("title", "Emma"), &UpdateSpec::new().set("author", "J. Austen")).unwrap();
        let austen = db.execute("books", &Filter::new().eq("author", "Jane Austen"), &FindOptions::new()).unwrap();
        assert_eq!(austen.len(), 1);

        let stats = db.explain("books", &Filter::new().eq("author", "J. Austen"), None).unwrap();
        assert!(stats.used_index());
        assert_eq!(stats.n_returned, 1);
        assert_eq!(stats.total_docs_examined, 1);
    }

    #[test]
    fn test_aggregation_with_leading_match() {
        let db = seeded();
        let pipeline = Pipeline::from_json(&json!([
            {"$match": {"author": "Jane Austen"}},
            {"$group": {"_id": "$author", "n": {"$sum": 1}}}
        ])).unwrap();

        let results = db.execute_aggregation("books", &pipeline).unwrap();
        assert_eq!(results, vec![json!({"_id": "Jane Austen", "n": 2})]);
    }

    #[test]
    fn test_closed_database_is_unavailable() {
        let db = seeded();
        db.close();

        assert!(matches!(
            db.execute("books", &Filter::new(), &FindOptions::new()),
            Err(LibrisError::DatabaseUnavailable(_))
        ));
        assert!(matches!(db.list_indexes("books"), Err(LibrisError::DatabaseUnavailable(_))));
    }

    #[test]
    fn test_collections_are_independent() {
        let db = seeded();
        db.insert_many("magazines", vec![json!({"title": "Wired"})]).unwrap();

        assert_eq!(db.collection_names(), vec!["books".to_string(), "magazines".to_string()]);
        assert!(db.drop_collection("magazines").unwrap());
        assert_eq!(db.count("books").unwrap(), 4);
        assert!(db.execute("", &Filter::new(), &FindOptions::new()).is_err());
    }
}
