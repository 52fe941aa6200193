// libris-core/src/lib.rs
// Typed query and aggregation façade over a books document collection

pub mod error;
pub mod config;
pub mod document;
pub mod query;
pub mod find_options;
pub mod update;
pub mod aggregation;
pub mod index;
pub mod query_planner;
pub mod handle;
pub mod memory;
pub mod facade;

// Public exports
pub use error::{LibrisError, Result};
pub use config::FacadeConfig;
pub use document::{
    AuthorBookCount, Book, BookSummary, DecadeBucket, Document, DocumentId, GenrePriceSummary, PartialBook,
};
pub use query::{CompareOp, Filter, Predicate};
pub use find_options::{FindOptions, Page, Projection, SortDirection, SortSpec};
pub use update::{DeleteResult, UpdateResult, UpdateSpec};
pub use aggregation::{Accumulator, AddFieldsStage, Expression, GroupStage, Pipeline, ProjectStage, Stage};
pub use index::{IndexHandle, IndexSpec};
pub use query_planner::{ExecutionStats, PlanStage, QueryPlan, QueryPlanner};
pub use handle::DatabaseHandle;
pub use memory::MemoryDatabase;
pub use facade::{PlanComparison, QueryFacade};
