//! End-to-end scenarios driven over a real TCP socket against the full
//! connection engine: bind, search, paging, size limiting, abandon, and
//! StartTLS. These exercise the wire codec and the handlers together,
//! rather than calling handler functions directly as the unit tests do.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::SinkExt;
use lber::parse::ber_integer_to_i64;
use lber::structures::{ASNTag, Integer, Sequence, Tag};
use lber::{StructureTag, TagClass};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ldapd::backend::{Backend, Entry};
use ldapd::backend_memory::MemoryBackend;
use ldapd::codec::LdapCodec;
use ldapd::config::Config;
use ldapd::controls::{decode_controls, Control, OID_PAGED_RESULTS, OID_PERSISTENT_SEARCH};
use ldapd::controls_impl::paged_results::PagedRequestControl;
use ldapd::controls_impl::persistent_search::{ChangeTypes, PersistentSearchControl};
use ldapd::controls_impl::PagedSearchManager;
use ldapd::exop_impl::OID_START_TLS;
use ldapd::filter::Filter;
use ldapd::handlers::HandlerContext;
use ldapd::password::{self, Scheme};
use ldapd::request::{AddRequest, Auth, BindRequest, CompareRequest, ExtendedRequest, Scope, SearchRequest};
use ldapd::response::{
    TAG_BIND_RESPONSE, TAG_COMPARE_RESPONSE, TAG_EXTENDED_RESPONSE, TAG_SEARCH_RESULT_DONE, TAG_SEARCH_RESULT_ENTRY,
};

const TAG_ABANDON_REQUEST: u64 = 16;
const TAG_ADD_RESPONSE: u64 = 9;
const ADMIN_DN: &str = "cn=admin,dc=test";
const ADMIN_PW: &str = "adminpw";

fn test_config() -> Config {
    let mut cfg = Config::parse_from(["ldapd"]);
    cfg.naming_contexts = vec!["dc=test".to_string()];
    cfg.read_deadline_secs = 10;
    cfg
}

fn tls_config() -> Config {
    let mut cfg = test_config();
    let dir = format!("{}/tests/fixtures", env!("CARGO_MANIFEST_DIR"));
    cfg.tls_cert_path = Some(format!("{dir}/cert.pem"));
    cfg.tls_key_path = Some(format!("{dir}/key.pem"));
    cfg
}

/// Binds an ephemeral listener and drives it with the same per-connection
/// engine the real binary uses, so these tests see exactly what a client
/// would see on the wire. Seeds one admin entry directly in the backend so
/// tests can exercise bound-only operations without a bootstrapping
/// chicken-and-egg problem.
async fn spawn_server(config: Config) -> (std::net::SocketAddr, CancellationToken) {
    let config = Arc::new(config);
    let acceptor = ldapd::tls::build_acceptor(&config).expect("fixture certificate is well-formed");
    let backend = MemoryBackend::new();
    let mut suffix = Entry {
        dn: "dc=test".to_string(),
        attributes: vec![],
    };
    suffix.set("objectClass", vec![b"top".to_vec()]);
    backend.add_entry(suffix).await.unwrap();

    let mut admin = Entry {
        dn: ADMIN_DN.to_string(),
        attributes: vec![],
    };
    admin.set("objectClass", vec![b"top".to_vec()]);
    admin.set("userPassword", vec![password::encode(Scheme::Ssha, ADMIN_PW.as_bytes()).into_bytes()]);
    backend.add_entry(admin).await.unwrap();

    let ctx = Arc::new(HandlerContext {
        backend,
        config: config.clone(),
        paged: Arc::new(PagedSearchManager::new(Duration::from_secs(300), 100)),
        naming_contexts: config.naming_contexts.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let loop_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = loop_shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let Ok((stream, _peer)) = accepted else { continue };
                    let ctx = ctx.clone();
                    let acceptor = acceptor.clone();
                    let shutdown = loop_shutdown.clone();
                    tokio::spawn(async move {
                        ldapd::conn::run(stream, ctx, acceptor, shutdown).await;
                    });
                }
            }
        }
    });
    (addr, shutdown)
}

async fn connect(addr: std::net::SocketAddr) -> Framed<tokio::net::TcpStream, LdapCodec> {
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, LdapCodec)
}

fn envelope(message_id: i64, op: Tag, controls: &[Control]) -> StructureTag {
    let mut inner = vec![
        Tag::Integer(Integer {
            inner: message_id,
            ..Default::default()
        }),
        op,
    ];
    if !controls.is_empty() {
        inner.push(Tag::StructureTag(ldapd::controls::encode_controls(controls)));
    }
    Tag::Sequence(Sequence {
        inner,
        ..Default::default()
    })
    .into_structure()
}

fn abandon_op(target_id: i64) -> Tag {
    Tag::Integer(Integer {
        id: TAG_ABANDON_REQUEST,
        class: TagClass::Application,
        inner: target_id,
    })
}

/// A decoded LDAPMessage, minus interpreting the application-tagged
/// `protocolOp` — callers match `tag.id` themselves since a client sees
/// response tags the crate's own `Request::decode` never handles.
struct Received {
    #[allow(dead_code)]
    message_id: i64,
    tag: StructureTag,
    controls: Vec<Control>,
}

async fn send<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>, message_id: i64, op: Tag) {
    send_with_controls(framed, message_id, op, &[]).await;
}

async fn send_with_controls<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>, message_id: i64, op: Tag, controls: &[Control]) {
    framed.send(envelope(message_id, op, controls)).await.unwrap();
}

async fn recv<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>) -> Received {
    let raw = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("response within deadline")
        .expect("stream open")
        .expect("well-formed envelope");
    let mut children = raw
        .match_id(lber::universal::Types::Sequence as u64)
        .and_then(|t| t.expect_constructed())
        .expect("envelope is a SEQUENCE");
    let controls = if children.len() == 3 {
        decode_controls(children.pop().unwrap()).expect("valid controls")
    } else {
        Vec::new()
    };
    let tag = children.pop().expect("missing protocolOp");
    let id_tag = children.pop().expect("missing message id");
    let message_id = id_tag
        .match_class(TagClass::Universal)
        .and_then(|t| t.match_id(lber::universal::Types::Integer as u64))
        .and_then(|t| t.expect_primitive())
        .map(|b| ber_integer_to_i64(&b).unwrap())
        .expect("message id is an INTEGER");
    Received { message_id, tag, controls }
}

/// Pulls the `(resultCode, matchedDN, diagnosticMessage)` triple out of a
/// result-bearing response body.
fn ldap_result(tag: &StructureTag) -> (i64, String, String) {
    let children = tag.clone().expect_constructed().expect("result body is constructed");
    let mut iter = children.into_iter();
    let code = ber_integer_to_i64(&iter.next().unwrap().expect_primitive().unwrap()).unwrap();
    let matched_dn = String::from_utf8(iter.next().unwrap().expect_primitive().unwrap()).unwrap();
    let message = String::from_utf8(iter.next().unwrap().expect_primitive().unwrap()).unwrap();
    (code, matched_dn, message)
}

async fn bind_anonymous<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>, message_id: i64) {
    let req = BindRequest {
        version: 3,
        name: String::new(),
        auth: Auth::Simple(vec![]),
    };
    send(framed, message_id, req.encode()).await;
    let resp = recv(framed).await;
    assert_eq!(resp.tag.id, TAG_BIND_RESPONSE);
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, 0, "anonymous bind must succeed");
}

async fn bind_admin<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>, message_id: i64) {
    let req = BindRequest {
        version: 3,
        name: ADMIN_DN.to_string(),
        auth: Auth::Simple(ADMIN_PW.as_bytes().to_vec()),
    };
    send(framed, message_id, req.encode()).await;
    let resp = recv(framed).await;
    assert_eq!(resp.tag.id, TAG_BIND_RESPONSE);
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, 0, "admin bind must succeed");
}

async fn add_entry<T: AsyncRead + AsyncWrite + Unpin>(framed: &mut Framed<T, LdapCodec>, message_id: i64, dn: &str) {
    let req = AddRequest {
        dn: dn.to_string(),
        attributes: vec![
            ("objectClass".to_string(), vec![b"top".to_vec()]),
            ("cn".to_string(), vec![dn.as_bytes().to_vec()]),
        ],
    };
    send(framed, message_id, req.encode()).await;
    let resp = recv(framed).await;
    assert_eq!(resp.tag.id, TAG_ADD_RESPONSE);
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, 0, "seeding entry {dn} must succeed");
}

fn base_search(filter: Filter) -> SearchRequest {
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
async fn anonymous_bind_then_root_dse_search() {
    let (addr, shutdown) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    bind_anonymous(&mut client, 1).await;

    let req = SearchRequest {
        base_object: String::new(),
        scope: Scope::Base,
        deref_aliases: 0,
        size_limit: 0,
        time_limit: 0,
        types_only: false,
        filter: Filter::present_object_class(),
        attributes: vec![],
    };
    send(&mut client, 2, req.encode()).await;

    let entry = recv(&mut client).await;
    assert_eq!(entry.tag.id, TAG_SEARCH_RESULT_ENTRY);
    let done = recv(&mut client).await;
    assert_eq!(done.tag.id, TAG_SEARCH_RESULT_DONE);
    let (code, ..) = ldap_result(&done.tag);
    assert_eq!(code, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn paged_search_splits_results_across_two_pages() {
    let (addr, shutdown) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;
    bind_admin(&mut client, 1).await;

    for i in 0..3 {
        add_entry(&mut client, 10 + i, &format!("uid={i},dc=test")).await;
    }

    let page_control = Control::new(OID_PAGED_RESULTS, false, PagedRequestControl { size: 2, cookie: vec![] }.encode());
    send_with_controls(&mut client, 20, base_search(Filter::present_object_class()).encode(), &[page_control]).await;

    let mut first_page = 0;
    let cookie = loop {
        let msg = recv(&mut client).await;
        match msg.tag.id {
            TAG_SEARCH_RESULT_ENTRY => first_page += 1,
            TAG_SEARCH_RESULT_DONE => {
                let ctrl = msg.controls.iter().find(|c| c.oid == OID_PAGED_RESULTS).expect("cookie control");
                break PagedRequestControl::decode(&ctrl.value).unwrap().cookie;
            }
            other => panic!("unexpected response tag {other}"),
        }
    };
    assert_eq!(first_page, 2);
    assert!(!cookie.is_empty());

    let page_control2 = Control::new(OID_PAGED_RESULTS, false, PagedRequestControl { size: 2, cookie }.encode());
    send_with_controls(&mut client, 21, base_search(Filter::present_object_class()).encode(), &[page_control2]).await;

    let mut second_page = 0;
    loop {
        let msg = recv(&mut client).await;
        match msg.tag.id {
            TAG_SEARCH_RESULT_ENTRY => second_page += 1,
            TAG_SEARCH_RESULT_DONE => break,
            other => panic!("unexpected response tag {other}"),
        }
    }
    assert_eq!(second_page, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn size_limit_truncates_and_reports_exceeded() {
    let mut cfg = test_config();
    cfg.default_size_limit = 100;
    let (addr, shutdown) = spawn_server(cfg).await;
    let mut client = connect(addr).await;
    bind_admin(&mut client, 1).await;

    for i in 0..5 {
        add_entry(&mut client, 10 + i, &format!("uid={i},dc=test")).await;
    }

    let mut req = base_search(Filter::present_object_class());
    req.size_limit = 2;
    send(&mut client, 20, req.encode()).await;

    let mut entries = 0;
    loop {
        let msg = recv(&mut client).await;
        match msg.tag.id {
            TAG_SEARCH_RESULT_ENTRY => entries += 1,
            TAG_SEARCH_RESULT_DONE => {
                let (code, ..) = ldap_result(&msg.tag);
                assert_eq!(code, ldapd::result::ResultCode::SizeLimitExceeded.as_i64());
                break;
            }
            other => panic!("unexpected response tag {other}"),
        }
    }
    assert_eq!(entries, 2);

    shutdown.cancel();
}

#[tokio::test]
async fn abandon_stops_a_persistent_search_without_closing_the_connection() {
    let (addr, shutdown) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;
    bind_admin(&mut client, 1).await;

    let psearch_control = Control::new(
        OID_PERSISTENT_SEARCH,
        true,
        PersistentSearchControl {
            change_types: ChangeTypes(ChangeTypes::ANY),
            changes_only: true,
            return_ecs: false,
        }
        .encode(),
    );
    let search_id = 7;
    send_with_controls(&mut client, search_id, base_search(Filter::present_object_class()).encode(), &[psearch_control]).await;

    // A persistent search never sends SearchResultDone on its own; give the
    // server a moment to register it as a pending operation, then abandon.
    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&mut client, 8, abandon_op(search_id)).await;

    // The connection must stay usable: a subsequent request gets a normal
    // response instead of getting stuck behind the abandoned search.
    let req = CompareRequest {
        dn: "dc=test".to_string(),
        attribute: "objectClass".to_string(),
        value: b"top".to_vec(),
    };
    send(&mut client, 9, req.encode()).await;
    let resp = tokio::time::timeout(Duration::from_secs(2), recv(&mut client)).await.expect("connection still responsive");
    assert_eq!(resp.tag.id, TAG_COMPARE_RESPONSE);

    shutdown.cancel();
}

#[tokio::test]
async fn starttls_upgrade_resets_authentication_and_then_bind_succeeds() {
    let (addr, shutdown) = spawn_server(tls_config()).await;
    let mut client = connect(addr).await;
    bind_admin(&mut client, 1).await;

    let starttls = ExtendedRequest {
        oid: OID_START_TLS.to_string(),
        value: None,
    };
    send(&mut client, 2, starttls.encode()).await;
    let resp = recv(&mut client).await;
    assert_eq!(resp.tag.id, TAG_EXTENDED_RESPONSE);
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, 0, "StartTLS must succeed when a certificate is configured");

    let tcp = client.into_inner();
    let connector = tokio_native_tls::TlsConnector::from(
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .unwrap(),
    );
    let tls_stream = connector.connect("localhost", tcp).await.expect("TLS handshake succeeds against fixture cert");
    let mut secure_client = Framed::new(tls_stream, LdapCodec);

    // RFC 4511 §4.14.2: bound state does not survive StartTLS, so the
    // admin bind from before the upgrade no longer applies here — a Compare
    // over the fresh, still-anonymous session must be refused...
    let compare = CompareRequest {
        dn: ADMIN_DN.to_string(),
        attribute: "objectClass".to_string(),
        value: b"top".to_vec(),
    };
    send(&mut secure_client, 3, compare.encode()).await;
    let resp = recv(&mut secure_client).await;
    assert_eq!(resp.tag.id, TAG_COMPARE_RESPONSE);
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, ldapd::result::ResultCode::InsufficientAccessRights.as_i64());

    // ...until the client re-binds over the now-secure channel.
    bind_admin(&mut secure_client, 4).await;
    send(&mut secure_client, 5, compare.encode()).await;
    let resp = recv(&mut secure_client).await;
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, ldapd::result::ResultCode::CompareTrue.as_i64());

    shutdown.cancel();
}

#[tokio::test]
async fn compare_true_and_false() {
    let (addr, shutdown) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;
    bind_admin(&mut client, 1).await;
    add_entry(&mut client, 2, "uid=alice,dc=test").await;

    let matching = CompareRequest {
        dn: "uid=alice,dc=test".to_string(),
        attribute: "objectClass".to_string(),
        value: b"top".to_vec(),
    };
    send(&mut client, 3, matching.encode()).await;
    let resp = recv(&mut client).await;
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, ldapd::result::ResultCode::CompareTrue.as_i64());

    let mismatching = CompareRequest {
        dn: "uid=alice,dc=test".to_string(),
        attribute: "objectClass".to_string(),
        value: b"nonexistent".to_vec(),
    };
    send(&mut client, 4, mismatching.encode()).await;
    let resp = recv(&mut client).await;
    let (code, ..) = ldap_result(&resp.tag);
    assert_eq!(code, ldapd::result::ResultCode::CompareFalse.as_i64());

    shutdown.cancel();
}
