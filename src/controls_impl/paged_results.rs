//! Simple Paged Results (RFC 2696, OID `1.2.840.113556.1.4.319`).
//!
//! Cookies carry only a random id; all real state — the snapshot of
//! matching entries and the originating query's shape — lives server-side
//! in the [`PagedSearchManager`]. This keeps a client from forging or
//! replaying a cursor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use lber::parse::{ber_integer_to_i64, parse_tag_complete};
use lber::structures::{ASNTag, Integer, OctetString, Sequence, Tag};
use rand::RngCore;

use crate::backend::Entry;
use crate::error::LdapError;
use crate::request::Scope;

const COOKIE_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagedRequestControl {
    pub size: i64,
    pub cookie: Vec<u8>,
}

impl PagedRequestControl {
    pub fn decode(value: &[u8]) -> Result<PagedRequestControl, LdapError> {
        let tag = parse_tag_complete(value).map_err(LdapError::from)?;
        let mut inner = tag
            .expect_constructed()
            .ok_or_else(|| LdapError::Protocol("paged results control value must be a SEQUENCE".to_string()))?
            .into_iter();
        let size_bytes = inner
            .next()
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| LdapError::Protocol("paged results control missing size".to_string()))?;
        let size = ber_integer_to_i64(&size_bytes).map_err(LdapError::from)?;
        let cookie = inner
            .next()
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| LdapError::Protocol("paged results control missing cookie".to_string()))?;
        Ok(PagedRequestControl { size, cookie })
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: self.size,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: self.cookie.clone(),
                    ..Default::default()
                }),
            ],
            ..Default::default()
        });
        lber::encode(&tag.into_structure())
    }
}

pub struct PagedSearchState {
    pub base_dn: String,
    pub scope: Scope,
    pub filter_canonical: String,
    pub types_only: bool,
    pub position: usize,
    pub snapshot: Vec<Entry>,
    created_at: Instant,
    last_accessed_at: Instant,
}

pub struct PagedSearchManager {
    states: Mutex<HashMap<String, PagedSearchState>>,
    state_timeout: Duration,
    max_states: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PagedError {
    /// Cookie doesn't key a live state (expired, exhausted, or never existed).
    Invalid,
    /// Continuation request's query shape doesn't match the original.
    Mismatch,
    /// Cursor table is full even after reaping expired entries.
    Busy,
}

impl PagedSearchManager {
    pub fn new(state_timeout: Duration, max_states: usize) -> PagedSearchManager {
        PagedSearchManager {
            states: Mutex::new(HashMap::new()),
            state_timeout,
            max_states,
        }
    }

    fn reap_expired(&self, states: &mut HashMap<String, PagedSearchState>) {
        let timeout = self.state_timeout;
        let now = Instant::now();
        states.retain(|_, s| now.duration_since(s.last_accessed_at) < timeout);
    }

    /// Reap expired cursors outright, for the periodic background sweep.
    /// `begin`/`continue_search` also reap lazily on access, so this mostly
    /// matters for cursors a client abandons without ever paging through.
    pub fn reap_expired_now(&self) {
        let mut states = self.states.lock().expect("paged search manager mutex poisoned");
        self.reap_expired(&mut states);
    }

    /// Half the state timeout, the interval the background reaper runs at.
    pub fn reap_interval(&self) -> Duration {
        self.state_timeout / 2
    }

    /// Begin a new paged search over `snapshot`, returning up to `size`
    /// entries and a cookie for the next page (empty if already exhausted).
    pub fn begin(
        &self,
        base_dn: String,
        scope: Scope,
        filter_canonical: String,
        types_only: bool,
        size: i64,
        snapshot: Vec<Entry>,
    ) -> Result<(Vec<Entry>, Vec<u8>), PagedError> {
        let mut states = self.states.lock().expect("paged search manager mutex poisoned");
        self.reap_expired(&mut states);
        if states.len() >= self.max_states {
            return Err(PagedError::Busy);
        }
        let size = size.max(0) as usize;
        let (page, rest) = split_page(snapshot, size);
        if rest.is_empty() {
            return Ok((page, Vec::new()));
        }
        let id = new_id();
        let now = Instant::now();
        states.insert(
            id.clone(),
            PagedSearchState {
                base_dn,
                scope,
                filter_canonical,
                types_only,
                position: page.len(),
                snapshot: rest,
                created_at: now,
                last_accessed_at: now,
            },
        );
        Ok((page, encode_cookie(&id)))
    }

    /// Continue a paged search bound by `cookie`, validating that the
    /// query shape still matches.
    pub fn continue_search(
        &self,
        cookie: &[u8],
        base_dn: &str,
        scope: Scope,
        filter_canonical: &str,
        types_only: bool,
        size: i64,
    ) -> Result<(Vec<Entry>, Vec<u8>), PagedError> {
        let id = decode_cookie(cookie).ok_or(PagedError::Invalid)?;
        let mut states = self.states.lock().expect("paged search manager mutex poisoned");
        self.reap_expired(&mut states);
        let state = states.get_mut(&id).ok_or(PagedError::Invalid)?;
        if state.base_dn != base_dn
            || state.scope != scope
            || state.filter_canonical != filter_canonical
            || state.types_only != types_only
        {
            states.remove(&id);
            return Err(PagedError::Mismatch);
        }
        state.last_accessed_at = Instant::now();
        let snapshot = std::mem::take(&mut state.snapshot);
        let size = size.max(0) as usize;
        let (page, rest) = split_page(snapshot, size);
        if rest.is_empty() {
            states.remove(&id);
            return Ok((page, Vec::new()));
        }
        state.snapshot = rest;
        state.position += page.len();
        Ok((page, encode_cookie(&id)))
    }

    pub fn state_count(&self) -> usize {
        self.states.lock().expect("paged search manager mutex poisoned").len()
    }
}

fn split_page(mut entries: Vec<Entry>, size: usize) -> (Vec<Entry>, Vec<Entry>) {
    if size >= entries.len() {
        (entries, Vec::new())
    } else {
        let rest = entries.split_off(size);
        (entries, rest)
    }
}

fn new_id() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

fn encode_cookie(id: &str) -> Vec<u8> {
    let id_bytes = id.as_bytes();
    let mut cookie = Vec::with_capacity(3 + id_bytes.len());
    cookie.push(COOKIE_VERSION);
    cookie.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
    cookie.extend_from_slice(id_bytes);
    cookie
}

fn decode_cookie(cookie: &[u8]) -> Option<String> {
    if cookie.len() < 3 || cookie[0] != COOKIE_VERSION {
        return None;
    }
    let id_len = u16::from_be_bytes([cookie[1], cookie[2]]) as usize;
    let id_bytes = cookie.get(3..3 + id_len)?;
    if cookie.len() != 3 + id_len {
        return None;
    }
    String::from_utf8(id_bytes.to_vec()).ok()
}
