//! Query cursor construction.
//!
//! This module composes all query-shaping concerns into a single executable
//! cursor: field elision, sort, paging, the two-step id-then-document
//! optimization, batch sizing, index hinting, retry on transient failure,
//! and total counting.
//!
//! - [`filter`] - the AND-combination rule for filter documents
//! - [`hints`] - static index-hint resolution
//! - [`cursor`] - the uniform async cursor wrapper
//! - [`pipeline`] - the cursor pipeline builder and partition-aware executor

pub mod cursor;
pub mod filter;
pub mod hints;
pub mod pipeline;

pub use cursor::ResourceCursor;
pub use filter::and_combine;
pub use hints::{IndexDefinition, IndexHintConfig};
pub use pipeline::{QueryPlan, SearchArgs, SearchExecutor, SearchPipeline, TotalMode};
