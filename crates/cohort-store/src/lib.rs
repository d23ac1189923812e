//! Transactional record store wrapping Fjall.
//!
//! [`Store`] is the backing store for every Cohort table. All writes go
//! through [`Store::write`], which runs a closure as one atomic unit of work:
//! buffered puts and deletes, precondition checks, and [`LogPosition`]
//! allocation either all commit together or not at all.
//!
//! On top of it sit the generic pieces the registry builds on:
//!
//! - [`HistoryLedger`]: append-only snapshots keyed by `(entity, version)`
//! - [`VersionedTable`]: optimistic-concurrency CRUD for any [`Versioned`] type
//! - the change feed: one [`FeedEntry`] per committed write, ordered by
//!   [`LogPosition`]
//!
//! [`LogPosition`]: cohort_types::LogPosition

mod backend;
mod error;
mod history;
mod store;
mod versioned;

pub use error::StoreError;
pub use history::{HistoryIter, HistoryLedger, HistoryRecord};
pub use store::{FeedEntry, Store, Writer};
pub use cohort_types::Versioned;
pub use versioned::VersionedTable;

/// Internal bookkeeping keyspace (LogPosition counter).
pub const META_TABLE: &str = "meta";

/// Change feed keyspace: LogPosition (8 bytes BE) → [`FeedEntry`].
pub const FEED_TABLE: &str = "log_feed";
