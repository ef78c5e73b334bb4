//! The storage interface operation handlers depend on. Everything in this
//! module is data; actual storage lives in [`crate::backend_memory`] (the
//! reference implementation used by the CLI and the test suite) or in a
//! third party's own `Backend` impl.

use async_trait::async_trait;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::BackendError;
use crate::request::Scope;

/// A directory entry: a DN and an ordered, case-insensitively-keyed
/// attribute map. Values are opaque bytes; the core never interprets them
/// as text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl Entry {
    pub fn get(&self, name: &str) -> Option<&Vec<Vec<u8>>> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
        if let Some(entry) = self.attributes.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            entry.1 = values;
        } else {
            self.attributes.push((name.to_string(), values));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.attributes.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Add = 1,
    Delete = 2,
    Modify = 4,
    ModifyDn = 8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub dn: String,
    pub previous_dn: Option<String>,
    pub change_number: u64,
}

/// The external collaborator interface operation handlers call through.
/// `subscribe` is optional: a backend that doesn't support persistent
/// search can leave it unimplemented, and the persistent-search control
/// will answer `unavailable` for that backend.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_entry(&self, dn: &str) -> Result<Option<Entry>, BackendError>;
    async fn add_entry(&self, entry: Entry) -> Result<(), BackendError>;
    async fn delete_entry(&self, dn: &str) -> Result<(), BackendError>;
    async fn modify_entry(&self, dn: &str, changes: Vec<(String, Vec<Vec<u8>>, ModifyKind)>) -> Result<(), BackendError>;
    async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<(), BackendError>;

    /// Open a cursor over candidates for `base_dn`/`scope`, unfiltered. The
    /// caller drives it with repeated `next()` calls, which lets it check a
    /// time limit or cancellation between entries instead of only before or
    /// after one bulk fetch.
    async fn search_by_dn(&self, base_dn: &str, scope: Scope) -> Box<dyn SearchCursor>;

    fn subscribe(&self) -> Option<BroadcastStream<ChangeEvent>> {
        None
    }

    /// Longest ancestor of `dn` that actually exists, for matchedDN on
    /// `noSuchObject`. A backend that can't answer this cheaply can leave it
    /// at the default; callers treat an empty string as "unknown".
    async fn longest_existing_ancestor(&self, _dn: &str) -> String {
        String::new()
    }
}

/// One step of a [`SearchCursor`]: a candidate entry, a terminal backend
/// error, or end of the candidate set. `Error` and `Close` are both
/// terminal; a cursor need not be polled again after either.
pub enum SearchEvent {
    Entry(Entry),
    Error(BackendError),
    Close,
}

#[async_trait]
pub trait SearchCursor: Send {
    async fn next(&mut self) -> SearchEvent;
}

/// What kind of change `modify_entry` should apply to one attribute. This
/// is a backend-facing reduction of [`crate::request::ModifyOp`]; handlers
/// translate the wire enum into this one so a backend never needs to know
/// about BER.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifyKind {
    Add,
    Delete,
    Replace,
    Increment,
}
