//! An in-memory `Backend`, good enough to drive every scenario in the test
//! suite and to give the CLI something to serve out of the box. Not a
//! schema-validating directory: no matching rules, no access control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::backend::{Backend, ChangeEvent, ChangeType, Entry, ModifyKind, SearchCursor, SearchEvent};
use crate::error::BackendError;
use crate::request::Scope;

fn fold(dn: &str) -> String {
    dn.trim().to_lowercase()
}

/// `dc=test`'s parent is `` (the root); this finds the parent DN by
/// stripping the leading RDN, the same convention the reference add/delete
/// handlers use to report matchedDN.
fn parent_dn(dn: &str) -> Option<String> {
    dn.find(',').map(|idx| dn[idx + 1..].trim().to_string())
}

pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    changes: broadcast::Sender<ChangeEvent>,
    change_counter: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Arc<MemoryBackend> {
        let (tx, _rx) = broadcast::channel(1024);
        Arc::new(MemoryBackend {
            entries: RwLock::new(HashMap::new()),
            changes: tx,
            change_counter: AtomicU64::new(0),
        })
    }

    fn next_change_number(&self) -> u64 {
        self.change_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(&self, change_type: ChangeType, dn: &str, previous_dn: Option<String>) {
        let _ = self.changes.send(ChangeEvent {
            change_type,
            dn: dn.to_string(),
            previous_dn,
            change_number: self.next_change_number(),
        });
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_entry(&self, dn: &str) -> Result<Option<Entry>, BackendError> {
        Ok(self.entries.read().await.get(&fold(dn)).cloned())
    }

    async fn add_entry(&self, entry: Entry) -> Result<(), BackendError> {
        let key = fold(&entry.dn);
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(BackendError::AlreadyExists);
        }
        if let Some(parent) = parent_dn(&entry.dn) {
            if !parent.is_empty() && !entries.contains_key(&fold(&parent)) {
                return Err(BackendError::NotFound);
            }
        }
        entries.insert(key, entry.clone());
        drop(entries);
        self.notify(ChangeType::Add, &entry.dn, None);
        Ok(())
    }

    async fn delete_entry(&self, dn: &str) -> Result<(), BackendError> {
        let key = fold(dn);
        let mut entries = self.entries.write().await;
        let has_children = entries.keys().any(|k| k != &key && parent_dn(k).map(|p| fold(&p)) == Some(key.clone()));
        if has_children {
            return Err(BackendError::SchemaViolation("entry has children".to_string()));
        }
        if entries.remove(&key).is_none() {
            return Err(BackendError::NotFound);
        }
        drop(entries);
        self.notify(ChangeType::Delete, dn, None);
        Ok(())
    }

    async fn modify_entry(
        &self,
        dn: &str,
        changes: Vec<(String, Vec<Vec<u8>>, ModifyKind)>,
    ) -> Result<(), BackendError> {
        let key = fold(dn);
        let mut entries = self.entries.write().await;
        let entry = entries.get(&key).ok_or(BackendError::NotFound)?;
        let mut working = entry.clone();
        for (attr, values, kind) in &changes {
            match kind {
                ModifyKind::Add => {
                    let existing = working.get(attr).cloned().unwrap_or_default();
                    if values.iter().any(|v| existing.contains(v)) {
                        return Err(BackendError::AttributeOrValueExists(attr.clone()));
                    }
                    let mut merged = existing;
                    merged.extend(values.clone());
                    working.set(attr, merged);
                }
                ModifyKind::Delete => {
                    if values.is_empty() {
                        if working.get(attr).is_none() {
                            return Err(BackendError::NoSuchAttribute(attr.clone()));
                        }
                        working.remove(attr);
                    } else {
                        let existing = working.get(attr).cloned().ok_or_else(|| BackendError::NoSuchAttribute(attr.clone()))?;
                        if values.iter().any(|v| !existing.contains(v)) {
                            return Err(BackendError::NoSuchAttribute(attr.clone()));
                        }
                        let remaining: Vec<_> = existing.into_iter().filter(|v| !values.contains(v)).collect();
                        if remaining.is_empty() {
                            working.remove(attr);
                        } else {
                            working.set(attr, remaining);
                        }
                    }
                }
                ModifyKind::Replace => {
                    if values.is_empty() {
                        working.remove(attr);
                    } else {
                        working.set(attr, values.clone());
                    }
                }
                ModifyKind::Increment => {
                    let existing = working.get(attr).cloned().unwrap_or_default();
                    let current: i64 = existing
                        .first()
                        .and_then(|v| std::str::from_utf8(v).ok())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    let delta: i64 = values
                        .first()
                        .and_then(|v| std::str::from_utf8(v).ok())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    working.set(attr, vec![(current + delta).to_string().into_bytes()]);
                }
            }
        }
        entries.insert(key, working);
        drop(entries);
        self.notify(ChangeType::Modify, dn, None);
        Ok(())
    }

    async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<(), BackendError> {
        let key = fold(dn);
        let mut entries = self.entries.write().await;
        let has_children = entries.keys().any(|k| k != &key && parent_dn(k).map(|p| fold(&p)) == Some(key.clone()));
        if has_children {
            return Err(BackendError::SchemaViolation("entry has children".to_string()));
        }
        let mut entry = entries.remove(&key).ok_or(BackendError::NotFound)?;
        let superior = new_superior
            .map(|s| s.to_string())
            .or_else(|| parent_dn(dn))
            .unwrap_or_default();
        let new_dn = if superior.is_empty() {
            new_rdn.to_string()
        } else {
            format!("{},{}", new_rdn, superior)
        };
        let new_key = fold(&new_dn);
        if entries.contains_key(&new_key) {
            entries.insert(key, entry);
            return Err(BackendError::AlreadyExists);
        }
        if delete_old_rdn {
            if let Some((attr, _)) = new_rdn.split_once('=') {
                entry.remove(attr.trim());
            }
        }
        let old_dn = entry.dn.clone();
        entry.dn = new_dn.clone();
        entries.insert(new_key, entry);
        drop(entries);
        self.notify(ChangeType::ModifyDn, &new_dn, Some(old_dn));
        Ok(())
    }

    async fn search_by_dn(&self, base_dn: &str, scope: Scope) -> Box<dyn SearchCursor> {
        let entries = self.entries.read().await;
        let base_key = fold(base_dn);
        let results: Vec<Entry> = match scope {
            Scope::Base => entries.get(&base_key).cloned().into_iter().collect(),
            Scope::OneLevel => entries
                .values()
                .filter(|e| parent_dn(&e.dn).map(|p| fold(&p)) == Some(base_key.clone()))
                .cloned()
                .collect(),
            Scope::Subtree => entries
                .values()
                .filter(|e| {
                    let k = fold(&e.dn);
                    k == base_key || (base_key.is_empty()) || k.ends_with(&format!(",{}", base_key))
                })
                .cloned()
                .collect(),
        };
        Box::new(MemorySearchCursor { entries: results, next: 0 })
    }

    fn subscribe(&self) -> Option<BroadcastStream<ChangeEvent>> {
        Some(BroadcastStream::new(self.changes.subscribe()))
    }

    async fn longest_existing_ancestor(&self, dn: &str) -> String {
        let entries = self.entries.read().await;
        let mut cursor = parent_dn(dn);
        while let Some(candidate) = cursor {
            if entries.contains_key(&fold(&candidate)) || candidate.is_empty() {
                return candidate;
            }
            cursor = parent_dn(&candidate);
        }
        String::new()
    }
}

/// Already-materialized since the in-memory backend has no I/O to stage;
/// other backends gain the ability to yield entries as they arrive rather
/// than buffering the whole result set up front.
struct MemorySearchCursor {
    entries: Vec<Entry>,
    next: usize,
}

#[async_trait]
impl SearchCursor for MemorySearchCursor {
    async fn next(&mut self) -> SearchEvent {
        match self.entries.get(self.next) {
            Some(entry) => {
                let entry = entry.clone();
                self.next += 1;
                SearchEvent::Entry(entry)
            }
            None => SearchEvent::Close,
        }
    }
}
