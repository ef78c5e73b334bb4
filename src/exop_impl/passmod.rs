//! Password Modify (RFC 3062, OID `1.3.6.1.4.1.4203.1.11.1`).
//!
//! `SEQUENCE { userIdentity [0] OCTET STRING OPTIONAL,
//!             oldPasswd    [1] OCTET STRING OPTIONAL,
//!             newPasswd    [2] OCTET STRING OPTIONAL }`
//!
//! An absent `userIdentity` targets the bound identity. An absent
//! `newPasswd` means the server generates one and returns it in the
//! response's `genPasswd [0]`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use lber::parse::parse_tag_complete;
use lber::structures::{ASNTag, OctetString, Sequence, Tag};
use lber::{StructureTag, TagClass};
use rand::RngCore;

use crate::backend::{Backend, ModifyKind};
use crate::error::LdapError;
use crate::handlers::backend_error_code;
use crate::password::{self, Scheme};
use crate::result::ResultCode;

pub const OID: &str = "1.3.6.1.4.1.4203.1.11.1";
const GENERATED_PASSWORD_LEN: usize = 32;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub old_passwd: Option<Vec<u8>>,
    pub new_passwd: Option<Vec<u8>>,
}

impl PasswordModifyRequest {
    pub fn decode(value: &[u8]) -> Result<PasswordModifyRequest, LdapError> {
        if value.is_empty() {
            return Ok(PasswordModifyRequest::default());
        }
        let tag = parse_tag_complete(value).map_err(LdapError::from)?;
        let children = tag
            .expect_constructed()
            .ok_or_else(|| LdapError::Protocol("password modify request value must be a SEQUENCE".to_string()))?;
        let mut req = PasswordModifyRequest::default();
        for t in children {
            let id = t.id;
            let bytes = t
                .expect_primitive()
                .ok_or_else(|| LdapError::Protocol("password modify field must be primitive".to_string()))?;
            match id {
                0 => req.user_identity = Some(String::from_utf8(bytes).map_err(|_| LdapError::Protocol("bad userIdentity".to_string()))?),
                1 => req.old_passwd = Some(bytes),
                2 => req.new_passwd = Some(bytes),
                other => return Err(LdapError::Protocol(format!("unknown password modify field {}", other))),
            }
        }
        Ok(req)
    }
}

fn generate_password() -> Vec<u8> {
    let mut raw = vec![0u8; GENERATED_PASSWORD_LEN];
    rand::thread_rng().fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw).into_bytes()
}

pub struct PasswordModifyOutcome {
    pub result: ResultCode,
    pub message: String,
    pub generated_passwd: Option<Vec<u8>>,
}

/// `bound_dn` resolves an absent `userIdentity`; an empty `bound_dn` with no
/// `userIdentity` is rejected since the operation would otherwise target no
/// one.
pub async fn handle(backend: &dyn Backend, bound_dn: &str, req: PasswordModifyRequest) -> PasswordModifyOutcome {
    let target_identity = req.user_identity.as_deref().unwrap_or(bound_dn);
    let target_dn = strip_dn_prefix(target_identity);
    if target_dn.is_empty() {
        return PasswordModifyOutcome {
            result: ResultCode::InsufficientAccessRights,
            message: "no target identity; bind first or supply userIdentity".to_string(),
            generated_passwd: None,
        };
    }
    let entry = match backend.get_entry(target_dn).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            return PasswordModifyOutcome {
                result: ResultCode::NoSuchObject,
                message: String::new(),
                generated_passwd: None,
            };
        }
        Err(err) => {
            return PasswordModifyOutcome {
                result: backend_error_code(&err),
                message: err.to_string(),
                generated_passwd: None,
            };
        }
    };
    if let Some(old) = &req.old_passwd {
        let stored = entry
            .get("userPassword")
            .and_then(|v| v.first())
            .and_then(|v| std::str::from_utf8(v).ok());
        let verified = match stored {
            Some(s) => password::verify(s, old).unwrap_or(false),
            None => false,
        };
        if !verified {
            return PasswordModifyOutcome {
                result: ResultCode::InvalidCredentials,
                message: "old password does not match".to_string(),
                generated_passwd: None,
            };
        }
    }
    let (new_passwd, generated) = match &req.new_passwd {
        Some(p) => (p.clone(), None),
        None => {
            let p = generate_password();
            (p.clone(), Some(p))
        }
    };
    let encoded = password::encode(Scheme::Ssha, &new_passwd);
    let result = backend
        .modify_entry(
            target_dn,
            vec![("userPassword".to_string(), vec![encoded.into_bytes()], ModifyKind::Replace)],
        )
        .await;
    match result {
        Ok(()) => PasswordModifyOutcome {
            result: ResultCode::Success,
            message: String::new(),
            generated_passwd: generated,
        },
        Err(err) => PasswordModifyOutcome {
            result: backend_error_code(&err),
            message: err.to_string(),
            generated_passwd: None,
        },
    }
}

fn strip_dn_prefix(identity: &str) -> &str {
    identity.strip_prefix("dn:").unwrap_or(identity)
}

pub fn encode_response_value(generated_passwd: &Option<Vec<u8>>) -> Option<Vec<u8>> {
    let passwd = generated_passwd.as_ref()?;
    let tag = Tag::Sequence(Sequence {
        inner: vec![Tag::OctetString(OctetString {
            id: 0,
            class: TagClass::Context,
            inner: passwd.clone(),
        })],
        ..Default::default()
    });
    Some(lber::encode(&tag.into_structure()))
}

#[allow(dead_code)]
fn decode_response_value(value: &[u8]) -> Option<Vec<u8>> {
    let tag: StructureTag = parse_tag_complete(value).ok()?;
    tag.expect_constructed()?.into_iter().next()?.expect_primitive()
}
