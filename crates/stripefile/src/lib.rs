//! # stripefile
//!
//! Read path for stripe-organized columnar files.
//!
//! A file is opened once into a [`Reader`], which parses the footer and keeps
//! it behind an `Arc`. Any number of [`RecordReader`]s can then be derived
//! from the same `Reader`, each with its own [`Options`]:
//! - a byte range selecting which stripes to scan, for split-based parallelism
//! - a column subset
//! - a [`Predicate`] evaluated against stripe and row-group statistics so that
//!   data which cannot match is never read
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stripefile::{Options, Predicate, Reader};
//! use storage::LocalStorage;
//!
//! let reader = Reader::open(Arc::new(LocalStorage::new()), "people.strp", Default::default()).unwrap();
//!
//! let options = Options::builder()
//!     .search_argument(Predicate::greater_than("age", 60), Vec::new())
//!     .build();
//!
//! let mut rows = reader.rows_with_options(&options).unwrap();
//! while let Some(row) = rows.next_row().unwrap() {
//!     println!("{}: {:?}", row.row_number(), row.values());
//! }
//! ```

pub mod codec;
pub mod error;
pub mod evaluate;
pub mod footer;
pub mod loader;
pub mod metadata;
pub mod options;
pub mod plan;
pub mod predicate;
pub mod proto;
pub mod reader;
pub mod record_reader;
pub mod statistics;
pub mod types;
pub mod value;
pub mod writer;

pub use codec::Codec;
pub use error::{ErrorKind, Result, StripeFileError};
pub use evaluate::{BoundPredicate, TruthValue, Verdict};
pub use footer::{CompressionKind, Footer, StripeInformation, Version, WriterVersion};
pub use loader::{LoadedStripe, PooledBuffer, StripeLoader};
pub use metadata::{ChunkLocation, MetadataReader, StripeMetadata};
pub use options::{Options, OptionsBuilder, SearchArgument};
pub use plan::{check_coverage, PlannedStripe, ScanPlan};
pub use predicate::{Literal, Operator, Predicate, PredicateLeaf};
pub use reader::Reader;
pub use record_reader::RecordReader;
pub use statistics::{ColumnStatistics, TypeStatistics};
pub use types::{DataType, TypeKind, TypeTree};
pub use value::{Row, Value};
pub use writer::{FileWriter, WriterOptions};
