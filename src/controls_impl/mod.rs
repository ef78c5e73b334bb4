//! Per-control codecs and semantics, keyed by the OIDs declared in
//! [`crate::controls`]. The generic [`crate::controls::Control`] envelope
//! is decoded first; callers then dispatch on `oid` into this module to
//! interpret `value`.

pub mod paged_results;
pub mod persistent_search;
pub mod sort;

pub use paged_results::{PagedError, PagedRequestControl, PagedSearchManager, PagedSearchState};
pub use persistent_search::{ChangeTypes, EntryChangeNotification, PersistentSearchControl};
pub use sort::{SortKey, SortRequestControl, SortResponseControl, SortResult};
