//! Search (RFC 4511 §4.5), covering scope, filter evaluation, attribute
//! selection, size/time limits, the Root DSE special case, paged results,
//! server-side sort, and persistent search.

use std::time::{Duration, Instant};

use tokio_stream::StreamExt;

use crate::backend::{ChangeType, Entry, SearchEvent};
use crate::controls::{Control, OID_PAGED_RESULTS, OID_PERSISTENT_SEARCH, OID_SORT_REQUEST};
use crate::controls_impl::paged_results::{PagedError, PagedRequestControl};
use crate::controls_impl::persistent_search::{event_matches, EntryChangeNotification, PersistentSearchControl};
use crate::controls_impl::sort::{sort_entries, SortRequestControl, SortResponseControl, SortResult};
use crate::handlers::{send, HandlerCancellation, HandlerContext, OutboundSender, Session};
use crate::request::{Scope, SearchRequest};
use crate::response::{Response, SearchResultEntry};
use crate::result::{LdapResult, ResultCode};
use crate::root_dse::root_dse;

fn select_attributes(entry: &Entry, requested: &[String], types_only: bool) -> Vec<(String, Vec<Vec<u8>>)> {
    let wants_all = requested.is_empty() || requested.iter().any(|a| a == "*");
    let names: Vec<&str> = if wants_all {
        entry.attributes.iter().map(|(n, _)| n.as_str()).collect()
    } else {
        requested.iter().map(|s| s.as_str()).filter(|s| *s != "+").collect()
    };
    names
        .into_iter()
        .filter_map(|name| entry.get(name).map(|values| (name.to_string(), values.clone())))
        .map(|(name, values)| if types_only { (name, vec![]) } else { (name, values) })
        .collect()
}

fn find_control<'a>(controls: &'a [Control], oid: &str) -> Option<&'a Control> {
    controls.iter().find(|c| c.oid == oid)
}

pub async fn handle(
    ctx: &HandlerContext,
    session: &Session,
    message_id: i64,
    req: SearchRequest,
    controls: Vec<Control>,
    tx: &OutboundSender,
    cancel: HandlerCancellation,
) {
    if let Some(control) = find_control(&controls, OID_PERSISTENT_SEARCH) {
        let parsed = match PersistentSearchControl::decode(&control.value) {
            Ok(p) => p,
            Err(err) => {
                send(
                    tx,
                    message_id,
                    Response::SearchResultDone(LdapResult::new(ResultCode::ProtocolError).with_message(err.to_string())),
                    vec![],
                );
                return;
            }
        };
        run_persistent_search(ctx, message_id, req, parsed, tx, cancel).await;
        return;
    }

    if req.base_object.is_empty() && req.scope == Scope::Base {
        let dse = root_dse(&ctx.naming_contexts);
        if req.filter.matches(&dse) {
            let attrs = select_attributes(&dse, &req.attributes, req.types_only);
            send(
                tx,
                message_id,
                Response::SearchResultEntry(SearchResultEntry {
                    dn: dse.dn.clone(),
                    attributes: attrs,
                }),
                vec![],
            );
        }
        send(tx, message_id, Response::SearchResultDone(LdapResult::success()), vec![]);
        return;
    }

    let time_limit_secs = if req.time_limit <= 0 {
        ctx.config.default_time_limit_secs
    } else {
        req.time_limit.min(ctx.config.max_time_limit_secs)
    };

    let deadline = Instant::now() + Duration::from_secs(time_limit_secs.max(0) as u64);
    let work = run_bounded_search(ctx, &req, &controls, tx, message_id, deadline, &cancel);
    tokio::select! {
        () = work => {}
        () = tokio::time::sleep(Duration::from_secs(time_limit_secs.max(0) as u64)) => {
            send(tx, message_id, Response::SearchResultDone(LdapResult::new(ResultCode::TimeLimitExceeded)), vec![]);
        }
        () = cancel.cancelled() => {}
    }
}

/// Drain `cursor` into a filtered `Vec`, checking `deadline` and `cancel`
/// between entries rather than only before or after the whole fetch.
enum DrainOutcome {
    /// Filtered matches, plus whether the cursor yielded any candidate at
    /// all before filtering (distinguishes "no entry at this DN" from
    /// "entry exists but didn't match the filter").
    Done(Vec<Entry>, bool),
    TimeLimitExceeded,
    Cancelled,
    Error(crate::error::BackendError),
}

async fn drain_filtered(
    mut cursor: Box<dyn crate::backend::SearchCursor>,
    filter: &crate::filter::Filter,
    deadline: Instant,
    cancel: &HandlerCancellation,
) -> DrainOutcome {
    let mut matched = Vec::new();
    let mut saw_candidate = false;
    loop {
        if cancel.is_cancelled() {
            return DrainOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            return DrainOutcome::TimeLimitExceeded;
        }
        match cursor.next().await {
            SearchEvent::Entry(entry) => {
                saw_candidate = true;
                if filter.matches(&entry) {
                    matched.push(entry);
                }
            }
            SearchEvent::Close => return DrainOutcome::Done(matched, saw_candidate),
            SearchEvent::Error(err) => return DrainOutcome::Error(err),
        }
    }
}

async fn run_bounded_search(
    ctx: &HandlerContext,
    req: &SearchRequest,
    controls: &[Control],
    tx: &OutboundSender,
    message_id: i64,
    deadline: Instant,
    cancel: &HandlerCancellation,
) {
    let cursor = ctx.backend.search_by_dn(&req.base_object, req.scope).await;
    let (mut matched, saw_candidate) = match drain_filtered(cursor, &req.filter, deadline, cancel).await {
        DrainOutcome::Done(matched, saw_candidate) => (matched, saw_candidate),
        DrainOutcome::TimeLimitExceeded => {
            send(tx, message_id, Response::SearchResultDone(LdapResult::new(ResultCode::TimeLimitExceeded)), vec![]);
            return;
        }
        DrainOutcome::Cancelled => return,
        DrainOutcome::Error(err) => {
            send(
                tx,
                message_id,
                Response::SearchResultDone(LdapResult::new(crate::handlers::backend_error_code(&err)).with_message(err.to_string())),
                vec![],
            );
            return;
        }
    };

    if req.scope == Scope::Base && !saw_candidate {
        let matched_dn = ctx.backend.longest_existing_ancestor(&req.base_object).await;
        send(
            tx,
            message_id,
            Response::SearchResultDone(LdapResult::new(ResultCode::NoSuchObject).with_matched_dn(matched_dn)),
            vec![],
        );
        return;
    }

    let mut response_controls = Vec::new();
    if let Some(control) = find_control(controls, OID_SORT_REQUEST) {
        match SortRequestControl::decode(&control.value) {
            Ok(sort_req) => {
                sort_entries(&mut matched, &sort_req.keys);
                response_controls.push(Control::new(
                    crate::controls::OID_SORT_RESPONSE,
                    false,
                    SortResponseControl { result: SortResult::Success }.encode(),
                ));
            }
            Err(_) => {
                response_controls.push(Control::new(
                    crate::controls::OID_SORT_RESPONSE,
                    false,
                    SortResponseControl { result: SortResult::OperationsError }.encode(),
                ));
            }
        }
    }

    let effective_size_limit = if req.size_limit <= 0 {
        ctx.config.default_size_limit
    } else {
        req.size_limit.min(ctx.config.max_size_limit)
    };

    if let Some(control) = find_control(controls, OID_PAGED_RESULTS) {
        handle_paged(ctx, req, control, matched, effective_size_limit, tx, message_id, response_controls).await;
        return;
    }

    let truncated = matched.len() as i64 > effective_size_limit;
    let page = if truncated {
        matched.into_iter().take(effective_size_limit.max(0) as usize).collect::<Vec<_>>()
    } else {
        matched
    };
    for entry in &page {
        send(
            tx,
            message_id,
            Response::SearchResultEntry(SearchResultEntry {
                dn: entry.dn.clone(),
                attributes: select_attributes(entry, &req.attributes, req.types_only),
            }),
            vec![],
        );
    }
    let result = if truncated {
        LdapResult::new(ResultCode::SizeLimitExceeded)
    } else {
        LdapResult::success()
    };
    send(tx, message_id, Response::SearchResultDone(result), response_controls);
}

async fn handle_paged(
    ctx: &HandlerContext,
    req: &SearchRequest,
    control: &Control,
    matched: Vec<Entry>,
    effective_size_limit: i64,
    tx: &OutboundSender,
    message_id: i64,
    mut response_controls: Vec<Control>,
) {
    let parsed = match PagedRequestControl::decode(&control.value) {
        Ok(p) => p,
        Err(err) => {
            send(
                tx,
                message_id,
                Response::SearchResultDone(LdapResult::new(ResultCode::ProtocolError).with_message(err.to_string())),
                vec![],
            );
            return;
        }
    };
    let size = if parsed.size <= 0 { effective_size_limit } else { parsed.size.min(effective_size_limit) };
    let filter_canonical = req.filter.canonical_string();

    let outcome = if parsed.cookie.is_empty() {
        ctx.paged.begin(req.base_object.clone(), req.scope, filter_canonical, req.types_only, size, matched)
    } else {
        ctx.paged
            .continue_search(&parsed.cookie, &req.base_object, req.scope, &filter_canonical, req.types_only, size)
    };

    let (page, cookie, result) = match outcome {
        Ok((page, cookie)) => (page, cookie, LdapResult::success()),
        Err(PagedError::Invalid) | Err(PagedError::Mismatch) => {
            (Vec::new(), Vec::new(), LdapResult::new(ResultCode::UnwillingToPerform).with_message("paged search cookie is no longer valid"))
        }
        Err(PagedError::Busy) => (Vec::new(), Vec::new(), LdapResult::new(ResultCode::Busy)),
    };

    for entry in &page {
        send(
            tx,
            message_id,
            Response::SearchResultEntry(SearchResultEntry {
                dn: entry.dn.clone(),
                attributes: select_attributes(entry, &req.attributes, req.types_only),
            }),
            vec![],
        );
    }
    response_controls.push(Control::new(OID_PAGED_RESULTS, false, PagedRequestControl { size: 0, cookie }.encode()));
    send(tx, message_id, Response::SearchResultDone(result), response_controls);
}

async fn run_persistent_search(
    ctx: &HandlerContext,
    message_id: i64,
    req: SearchRequest,
    control: PersistentSearchControl,
    tx: &OutboundSender,
    cancel: HandlerCancellation,
) {
    if !control.changes_only {
        let cursor = ctx.backend.search_by_dn(&req.base_object, req.scope).await;
        let far_future = Instant::now() + Duration::from_secs(3600);
        if let DrainOutcome::Done(candidates, _) = drain_filtered(cursor, &req.filter, far_future, &cancel).await {
            for entry in candidates {
                send(
                    tx,
                    message_id,
                    Response::SearchResultEntry(SearchResultEntry {
                        dn: entry.dn.clone(),
                        attributes: select_attributes(&entry, &req.attributes, req.types_only),
                    }),
                    vec![],
                );
            }
        }
    }

    let stream = match ctx.backend.subscribe() {
        Some(s) => s,
        None => {
            send(tx, message_id, Response::SearchResultDone(LdapResult::new(ResultCode::Unavailable)), vec![]);
            return;
        }
    };
    tokio::pin!(stream);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            next = stream.next() => {
                let Some(Ok(event)) = next else { return };
                if !event_matches(&event, &control, &req.base_object, req.scope) {
                    continue;
                }
                let entry = if event.change_type == ChangeType::Delete {
                    Entry { dn: event.dn.clone(), attributes: vec![] }
                } else {
                    match ctx.backend.get_entry(&event.dn).await {
                        Ok(Some(e)) => e,
                        _ => continue,
                    }
                };
                if event.change_type != ChangeType::Delete && !req.filter.matches(&entry) {
                    continue;
                }
                let mut response_controls = Vec::new();
                if control.return_ecs {
                    response_controls.push(Control::new(
                        crate::controls::OID_ENTRY_CHANGE_NOTIFICATION,
                        false,
                        EntryChangeNotification {
                            change_type: event.change_type,
                            previous_dn: event.previous_dn.clone(),
                            change_number: event.change_number,
                        }
                        .encode(),
                    ));
                }
                send(
                    tx,
                    message_id,
                    Response::SearchResultEntry(SearchResultEntry {
                        dn: entry.dn.clone(),
                        attributes: select_attributes(&entry, &req.attributes, req.types_only),
                    }),
                    response_controls,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Entry as BackendEntry;
    use crate::backend_memory::MemoryBackend;
    use crate::controls_impl::PagedSearchManager;
    use crate::filter::Filter;
    use clap::Parser;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> HandlerContext {
        HandlerContext {
            backend: MemoryBackend::new(),
            config: Arc::new(crate::config::Config::parse_from(["ldapd"])),
            paged: Arc::new(PagedSearchManager::new(Duration::from_secs(300), 10)),
            naming_contexts: vec!["dc=test".to_string()],
        }
    }

    fn req(filter: Filter) -> SearchRequest {
        SearchRequest {
            base_object: "dc=test".to_string(),
            scope: Scope::Subtree,
            deref_aliases: 0,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: vec![],
        }
    }

    #[tokio::test]
    async fn root_dse_search_returns_synthetic_entry() {
        let c = ctx();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut r = req(Filter::present_object_class());
        r.base_object = String::new();
        r.scope = Scope::Base;
        handle(&c, &Session::anonymous(), 1, r, vec![], &tx, CancellationToken::new()).await;
        let entry_msg = rx.recv().await.unwrap();
        matches!(entry_msg.response, Response::SearchResultEntry(_));
        let done_msg = rx.recv().await.unwrap();
        match done_msg.response {
            Response::SearchResultDone(r) => assert!(r.is_success()),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn size_limit_truncates_and_reports_exceeded() {
        let c = ctx();
        c.backend
            .add_entry(BackendEntry {
                dn: "dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        for i in 0..5 {
            c.backend
                .add_entry(BackendEntry {
                    dn: format!("uid={},dc=test", i),
                    attributes: vec![("objectClass".to_string(), vec![b"top".to_vec()])],
                })
                .await
                .unwrap();
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut r = req(Filter::present_object_class());
        r.size_limit = 2;
        handle(&c, &Session::anonymous(), 1, r, vec![], &tx, CancellationToken::new()).await;
        let mut entries = 0;
        loop {
            match rx.recv().await.unwrap().response {
                Response::SearchResultEntry(_) => entries += 1,
                Response::SearchResultDone(result) => {
                    assert_eq!(result.code, ResultCode::SizeLimitExceeded);
                    break;
                }
                _ => panic!(),
            }
        }
        assert_eq!(entries, 2);
    }

    #[tokio::test]
    async fn paged_search_splits_results_across_two_pages() {
        let c = ctx();
        c.backend
            .add_entry(BackendEntry {
                dn: "dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        for i in 0..3 {
            c.backend
                .add_entry(BackendEntry {
                    dn: format!("uid={},dc=test", i),
                    attributes: vec![("objectClass".to_string(), vec![b"top".to_vec()])],
                })
                .await
                .unwrap();
        }
        let control = Control::new(
            OID_PAGED_RESULTS,
            false,
            PagedRequestControl { size: 2, cookie: vec![] }.encode(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &Session::anonymous(),
            1,
            req(Filter::present_object_class()),
            vec![control],
            &tx,
            CancellationToken::new(),
        )
        .await;
        let mut first_page = 0;
        let mut cookie = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                m => match m.response {
                    Response::SearchResultEntry(_) => first_page += 1,
                    Response::SearchResultDone(_) => {
                        cookie = PagedRequestControl::decode(&m.controls[0].value).unwrap().cookie;
                        break;
                    }
                    _ => panic!(),
                },
            }
        }
        assert_eq!(first_page, 2);
        assert!(!cookie.is_empty());

        let control2 = Control::new(OID_PAGED_RESULTS, false, PagedRequestControl { size: 2, cookie }.encode());
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &Session::anonymous(),
            2,
            req(Filter::present_object_class()),
            vec![control2],
            &tx,
            CancellationToken::new(),
        )
        .await;
        let mut second_page = 0;
        loop {
            match rx.recv().await.unwrap().response {
                Response::SearchResultEntry(_) => second_page += 1,
                Response::SearchResultDone(_) => break,
                _ => panic!(),
            }
        }
        assert_eq!(second_page, 1);
    }
}
