// src/facade.rs
//! Typed query and aggregation façade over a books collection
//!
//! `QueryFacade` turns typed requests (filters, projections, sort specs,
//! pages, index specs) into calls on a [`DatabaseHandle`] and decodes the
//! returned documents into typed rows. It holds no mutable state of its
//! own, so it is `Send + Sync` whenever its handle is.
//!
//! # Example
//!
//! ```
//! use libris_core::{Book, MemoryDatabase, Projection, QueryFacade};
//!
//! let facade = QueryFacade::new(MemoryDatabase::new());
//! facade.insert_books("books", &[
//!     Book::new("Wuthering Heights", "Emily Brontë", "Gothic", 1847, 10.0, true),
//! ]).unwrap();
//!
//! let rows = facade
//!     .find_by_field("books", "author", "Emily Brontë", &Projection::include(["title"]))
//!     .unwrap();
//! assert_eq!(rows[0].title.as_deref(), Some("Wuthering Heights"));
//! ```

use serde::de::DeserializeOwned;
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::aggregation::{Accumulator, AddFieldsStage, Expression, GroupStage, Pipeline, ProjectStage};
use crate::config::FacadeConfig;
use crate::document::{AuthorBookCount, Book, DecadeBucket, DocumentId, GenrePriceSummary, PartialBook};
use crate::error::{Result, LibrisError};
use crate::find_options::{FindOptions, Page, Projection, SortDirection, SortSpec};
use crate::handle::DatabaseHandle;
use crate::index::{IndexHandle, IndexSpec};
use crate::query::{CompareOp, Filter, Predicate};
use crate::query_planner::ExecutionStats;
use crate::update::{DeleteResult, UpdateResult, UpdateSpec};

/// Explain output for the same query before and after creating an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanComparison {
    pub without: ExecutionStats,
    pub with: ExecutionStats,
}

impl PlanComparison {
    /// Documents the index spared the query from examining
    pub fn docs_examined_saved(&self) -> u64 {
        self.without.total_docs_examined.saturating_sub(self.with.total_docs_examined)
    }
}

pub struct QueryFacade<H: DatabaseHandle> {
    handle: H,
    config: FacadeConfig,
}

impl<H: DatabaseHandle> QueryFacade<H> {
    /// Façade with the default configuration
    pub fn new(handle: H) -> Self {
        QueryFacade {
            handle,
            config: FacadeConfig::default(),
        }
    }

    pub fn with_config(handle: H, config: FacadeConfig) -> Result<Self> {
        config.validate()?;
        Ok(QueryFacade { handle, config })
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Configured default collection
    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    // ========== FIND ==========

    /// Books whose `field` equals `value`, projected
    ///
    /// # Errors
    ///
    /// `InvalidProjection` if `projection` selects nothing.
    pub fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: impl Into<Value>,
        projection: &Projection,
    ) -> Result<Vec<PartialBook>> {
        projection.validate()?;
        tracing::debug!("find_by_field on '{collection}': {field}");

        let filter = Filter::new().eq(field, value);
        self.find_projected(collection, &filter, projection)
    }

    /// Books whose `field` compares to `value` under a range operator
    ///
    /// # Errors
    ///
    /// `UnsupportedOperator` for `Eq` (use [`find_by_field`](Self::find_by_field)),
    /// `InvalidProjection` if `projection` selects nothing.
    pub fn find_by_comparison(
        &self,
        collection: &str,
        field: &str,
        op: CompareOp,
        value: impl Into<Value>,
        projection: &Projection,
    ) -> Result<Vec<PartialBook>> {
        if !op.is_range() {
            return Err(LibrisError::UnsupportedOperator(
                format!("{} is not a comparison operator", op)
            ));
        }
        projection.validate()?;
        tracing::debug!("find_by_comparison on '{collection}': {field} {op}");

        let filter = Filter::new().with(Predicate::new(field, op, value));
        self.find_projected(collection, &filter, projection)
    }

    /// Books matching every `(field, operator, value)` predicate
    ///
    /// Operators are named `"gt"` or `"$gt"`; anything outside
    /// `eq|gt|gte|lt|lte` fails with `UnsupportedOperator`.
    pub fn find_by_conjunction(
        &self,
        collection: &str,
        predicates: &[(&str, &str, Value)],
        projection: &Projection,
    ) -> Result<Vec<PartialBook>> {
        let filter = predicates.iter()
            .try_fold(Filter::new(), |filter, (field, op, value)| {
                Ok::<_, LibrisError>(filter.with(Predicate::parse(*field, op, value.clone())?))
            })?;
        projection.validate()?;
        tracing::debug!("find_by_conjunction on '{collection}': {} predicates", filter.predicates().len());

        self.find_projected(collection, &filter, projection)
    }

    fn find_projected(&self, collection: &str, filter: &Filter, projection: &Projection) -> Result<Vec<PartialBook>> {
        let options = FindOptions::new().with_projection(projection.clone());
        let rows = self.handle.execute(collection, filter, &options)?;
        decode_rows(rows)
    }

    // ========== WRITES ==========

    /// Set `price` on the first book whose `match_field` equals `match_value`
    ///
    /// No match is not an error: both counts are zero. Setting the price a
    /// book already has matches without modifying.
    pub fn update_one_price(
        &self,
        collection: &str,
        match_field: &str,
        match_value: impl Into<Value>,
        new_price: f64,
    ) -> Result<UpdateResult> {
        if !new_price.is_finite() || new_price < 0.0 {
            return Err(LibrisError::InvalidUpdate(
                format!("price must be a non-negative number, got {}", new_price)
            ));
        }
        tracing::debug!("update_one_price on '{collection}': {match_field} -> {new_price}");

        let filter = Filter::new().eq(match_field, match_value);
        self.handle.update_one(collection, &filter, &UpdateSpec::new().set("price", new_price))
    }

    pub fn delete_one(&self, collection: &str, match_field: &str, match_value: impl Into<Value>) -> Result<DeleteResult> {
        tracing::debug!("delete_one on '{collection}': {match_field}");
        let filter = Filter::new().eq(match_field, match_value);
        self.handle.delete_one(collection, &filter)
    }

    /// Seed helper: insert books, returning their assigned ids
    pub fn insert_books(&self, collection: &str, books: &[Book]) -> Result<Vec<DocumentId>> {
        let docs = books.iter().map(Book::to_value).collect::<Result<Vec<_>>>()?;
        tracing::debug!("insert_books on '{collection}': {}", docs.len());
        self.handle.insert_many(collection, docs)
    }

    // ========== SORT & PAGINATION ==========

    /// All books sorted, then the requested page, then the projection
    pub fn sorted_page(
        &self,
        collection: &str,
        sort: &SortSpec,
        page: Page,
        projection: Option<&Projection>,
    ) -> Result<Vec<PartialBook>> {
        tracing::debug!(
            "sorted_page on '{collection}': page {} of size {}",
            page.page_number(),
            page.page_size()
        );
        let options = FindOptions::new().with_sort(sort.clone()).with_page(page);
        self.find_with(collection, options, projection)
    }

    /// All books ordered by price
    pub fn sorted_by_price(
        &self,
        collection: &str,
        direction: SortDirection,
        projection: Option<&Projection>,
    ) -> Result<Vec<PartialBook>> {
        tracing::debug!("sorted_by_price on '{collection}': {}", direction.as_i32());
        let options = FindOptions::new().with_sort(SortSpec::new().then("price", direction));
        self.find_with(collection, options, projection)
    }

    /// Human-numbered page (first page is 1) of the configured default size
    pub fn page_of(
        &self,
        collection: &str,
        sort: &SortSpec,
        page: usize,
        projection: Option<&Projection>,
    ) -> Result<Vec<PartialBook>> {
        let page = Page::from_one_based(page, self.config.default_page_size)?;
        self.sorted_page(collection, sort, page, projection)
    }

    fn find_with(&self, collection: &str, options: FindOptions, projection: Option<&Projection>) -> Result<Vec<PartialBook>> {
        let options = match projection {
            Some(projection) => {
                projection.validate()?;
                options.with_projection(projection.clone())
            }
            None => options,
        };
        let rows = self.handle.execute(collection, &Filter::new(), &options)?;
        decode_rows(rows)
    }

    // ========== AGGREGATION ==========

    /// Run any pipeline and decode each output document as `T`
    pub fn run_pipeline<T: DeserializeOwned>(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<T>> {
        let rows = self.handle.execute_aggregation(collection, pipeline)?;
        rows.iter().map(decode_row).collect()
    }

    /// Average price and book count per genre, most expensive genre first
    pub fn average_price_by_genre(&self, collection: &str) -> Result<Vec<GenrePriceSummary>> {
        tracing::debug!("average_price_by_genre on '{collection}'");
        self.run_pipeline(collection, &average_price_pipeline(self.config.price_decimals))
    }

    /// The author with the most books; ties go to the alphabetically first name
    ///
    /// # Errors
    ///
    /// `EmptyCollection` if the collection holds no books.
    pub fn author_with_most_books(&self, collection: &str) -> Result<AuthorBookCount> {
        tracing::debug!("author_with_most_books on '{collection}'");
        let rows: Vec<AuthorBookCount> = self.run_pipeline(collection, &top_author_pipeline())?;
        rows.into_iter()
            .next()
            .ok_or_else(|| LibrisError::EmptyCollection(collection.to_string()))
    }

    /// Books bucketed by publication decade, oldest decade first
    pub fn books_by_decade(&self, collection: &str) -> Result<Vec<DecadeBucket>> {
        tracing::debug!("books_by_decade on '{collection}'");
        self.run_pipeline(collection, &decade_pipeline(self.config.decade_width))
    }

    // ========== INDEXES & EXPLAIN ==========

    /// Create the index unless it already exists
    pub fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<IndexHandle> {
        spec.validate()?;
        self.handle.create_index(collection, spec)
    }

    pub fn drop_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        self.handle.drop_index(collection, spec)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexHandle>> {
        self.handle.list_indexes(collection)
    }

    /// Execution statistics for a query; no rows are returned
    pub fn explain_plan(&self, collection: &str, filter: &Filter, sort: Option<&SortSpec>) -> Result<ExecutionStats> {
        tracing::debug!("explain_plan on '{collection}'");
        self.handle.explain(collection, filter, sort)
    }

    /// Explain without `index`, create it, explain again.
    ///
    /// The index is dropped first if present and left in place afterwards.
    pub fn compare_plans(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&SortSpec>,
        index: &IndexSpec,
    ) -> Result<PlanComparison> {
        match self.drop_index(collection, index) {
            Ok(()) | Err(LibrisError::IndexNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let without = self.explain_plan(collection, filter, sort)?;
        self.ensure_index(collection, index)?;
        let with = self.explain_plan(collection, filter, sort)?;

        Ok(PlanComparison { without, with })
    }
}

fn decode_rows(rows: Vec<Value>) -> Result<Vec<PartialBook>> {
    rows.iter().map(decode_row).collect()
}

/// Typed view of one result row; a stored field of the wrong type names the row
fn decode_row<T: DeserializeOwned>(row: &Value) -> Result<T> {
    T::deserialize(row).map_err(|e| LibrisError::MalformedDocument(format!("{} in {}", e, row)))
}

/// `$group` by genre, `$sort` by average price descending, `$project` rounded
pub fn average_price_pipeline(price_decimals: u32) -> Pipeline {
    Pipeline::new()
        .group(GroupStage::by_field("genre")
            .accumulate("averagePrice", Accumulator::avg("price"))
            .accumulate("count", Accumulator::count()))
        .sort(SortSpec::descending("averagePrice"))
        .project(ProjectStage::new()
            .exclude("_id")
            .compute("genre", Expression::field("_id"))
            .compute("averagePrice", Expression::round(Expression::field("averagePrice"), price_decimals))
            .include("count"))
}

/// `$group` by author, most books first with ties by name, first row only
pub fn top_author_pipeline() -> Pipeline {
    Pipeline::new()
        .group(GroupStage::by_field("author").accumulate("bookCount", Accumulator::count()))
        .sort(SortSpec::descending("bookCount").then("_id", SortDirection::Ascending))
        .limit(1)
        .project(ProjectStage::new()
            .exclude("_id")
            .compute("author", Expression::field("_id"))
            .compute("totalBooks", Expression::field("bookCount")))
}

/// `decade = floor(published_year / width) * width`, then group and sort by decade
pub fn decade_pipeline(width: i64) -> Pipeline {
    let decade = Expression::multiply(vec![
        Expression::floor(Expression::divide(Expression::field("published_year"), Expression::literal(width))),
        Expression::literal(width),
    ]);

    Pipeline::new()
        .add_fields(AddFieldsStage::new().field("decade", decade))
        .group(GroupStage::by_field("decade")
            .accumulate("bookCount", Accumulator::count())
            .accumulate("books", Accumulator::push(Expression::object([
                ("title", Expression::field("title")),
                ("author", Expression::field("author")),
            ]))))
        .sort(SortSpec::ascending("_id"))
        .project(ProjectStage::new()
            .exclude("_id")
            .compute("decade", Expression::field("_id"))
            .include("bookCount")
            .include("books"))
}
