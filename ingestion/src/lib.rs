//! # Ingestion
//!
//! Loads the product review table, normalizes each row into a
//! [`Document`](reviewqa_retrieval::Document) and writes the documents the
//! index does not hold yet.
//!
//! ```rust,ignore
//! use reviewqa_ingestion::{ColumnMapping, DocumentStore, IngestionPipeline};
//!
//! let documents = DocumentStore::from_csv_path("data/reviews.csv", &ColumnMapping::default())?
//!     .normalize();
//! let report = IngestionPipeline::new(embedder, index, spec).run(&documents).await?;
//! println!("{report}");
//! ```

pub mod error;
pub mod normalize;
pub mod pipeline;

pub use error::{IngestError, Result};
pub use normalize::{ColumnMapping, DocumentStore, ReviewRecord};
pub use pipeline::{DEFAULT_BATCH_SIZE, IngestReport, IngestionPipeline};
