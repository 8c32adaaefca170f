//! # archiver
//!
//! Streaming harvest-then-purge archiving for live tables.
//!
//! Rows are read out of a table in primary-key order with keyset pagination
//! (`pk > last_seen LIMIT n`), one batch at a time, and the key of every
//! delivered row is handed to a decoupled purger that deletes it from the
//! source. The table is never locked and never loaded wholesale.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  rows   ┌──────────────┐  keys   ┌──────────────┐
//! │  Harvester   │ ──────▶ │   Pipeline   │ ──────▶ │    Purger    │
//! │ DESC + fetch │ ◀────── │  (forwarder) │         │ DELETE by pk │
//! └──────────────┘  pull   └──────────────┘         └──────────────┘
//!         ▲                        │                        ▲
//!         └──────── Session (id, cancellation, batch limit) ┘
//! ```
//!
//! Harvesters and purgers are looked up by backend name in process-wide
//! registries (see [`registry`]); `mysql` is built in.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use archiver::prelude::*;
//!
//! registry::register_builtin_modules();
//!
//! let config = ArchiverConfig::from_file("archiver.yaml")?;
//! config.validate()?;
//!
//! let session = Session::new(config.batch_limit);
//! let mut pipeline = Pipeline::from_registry(&config.backend, config.purge)?;
//! let report = pipeline.run(&session, &config).await?;
//! assert!(report.is_success());
//! ```
//!
//! The harvested rows are not written anywhere by this crate; consumers that
//! need the row data drive a [`harvester::Harvester`] directly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod harvester;
pub mod meta;
pub mod pipeline;
pub mod purger;
pub mod registry;
pub mod session;

pub use error::{ArchiverError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ArchiverConfig;
    pub use crate::error::{ArchiverError, Result};
    pub use crate::harvester::{mysql::MySqlHarvester, HarvestStats, Harvester, RowStream};
    pub use crate::meta::{ColumnDescriptor, KeyKind, KeyRole, Nullability, Row};
    pub use crate::pipeline::{delete_statement, Pipeline, PipelineReport};
    pub use crate::purger::{mysql::MySqlPurger, FailedKey, KeyIntake, PurgeReport, Purger};
    pub use crate::registry::{self, Module, ModuleRegistry};
    pub use crate::session::Session;
}
