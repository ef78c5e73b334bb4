//! The `{SCHEME}payload` password encoding catalogue (RFC 2307 userPassword
//! conventions). Salted schemes append an 8-byte random salt after the
//! digest; the salt travels inside the base64 payload, not as a separate
//! field.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};

const SALT_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Cleartext,
    Sha,
    Ssha,
    Sha256,
    Ssha256,
    Sha512,
    Ssha512,
}

impl Scheme {
    fn tag(self) -> &'static str {
        match self {
            Scheme::Cleartext => "CLEARTEXT",
            Scheme::Sha => "SHA",
            Scheme::Ssha => "SSHA",
            Scheme::Sha256 => "SHA256",
            Scheme::Ssha256 => "SSHA256",
            Scheme::Sha512 => "SHA512",
            Scheme::Ssha512 => "SSHA512",
        }
    }

    fn from_tag(tag: &str) -> Option<Scheme> {
        match tag.to_ascii_uppercase().as_str() {
            "CLEARTEXT" => Some(Scheme::Cleartext),
            "SHA" => Some(Scheme::Sha),
            "SSHA" => Some(Scheme::Ssha),
            "SHA256" => Some(Scheme::Sha256),
            "SSHA256" => Some(Scheme::Ssha256),
            "SHA512" => Some(Scheme::Sha512),
            "SSHA512" => Some(Scheme::Ssha512),
            _ => None,
        }
    }

    fn salted(self) -> bool {
        matches!(self, Scheme::Ssha | Scheme::Ssha256 | Scheme::Ssha512)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnsupportedScheme;

fn digest(scheme: Scheme, password: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut salted_input = Vec::with_capacity(password.len() + salt.len());
    salted_input.extend_from_slice(password);
    salted_input.extend_from_slice(salt);
    match scheme {
        Scheme::Cleartext => password.to_vec(),
        Scheme::Sha | Scheme::Ssha => Sha1::digest(&salted_input).to_vec(),
        Scheme::Sha256 | Scheme::Ssha256 => Sha256::digest(&salted_input).to_vec(),
        Scheme::Sha512 | Scheme::Ssha512 => Sha512::digest(&salted_input).to_vec(),
    }
}

/// Encode `password` under `scheme`, generating a fresh random salt for
/// salted schemes.
pub fn encode(scheme: Scheme, password: &[u8]) -> String {
    let salt = if scheme.salted() {
        let mut s = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut s);
        s
    } else {
        Vec::new()
    };
    let mut payload = digest(scheme, password, &salt);
    payload.extend_from_slice(&salt);
    format!("{{{}}}{}", scheme.tag(), STANDARD.encode(payload))
}

/// Check `candidate` against a stored `{SCHEME}payload` value.
pub fn verify(stored: &str, candidate: &[u8]) -> Result<bool, UnsupportedScheme> {
    let (tag, rest) = split_scheme(stored).ok_or(UnsupportedScheme)?;
    let scheme = Scheme::from_tag(tag).ok_or(UnsupportedScheme)?;
    if scheme == Scheme::Cleartext {
        return Ok(rest.as_bytes() == candidate);
    }
    let raw = STANDARD.decode(rest).map_err(|_| UnsupportedScheme)?;
    let digest_len = match scheme {
        Scheme::Sha | Scheme::Ssha => 20,
        Scheme::Sha256 | Scheme::Ssha256 => 32,
        Scheme::Sha512 | Scheme::Ssha512 => 64,
        Scheme::Cleartext => unreachable!(),
    };
    if raw.len() < digest_len {
        return Err(UnsupportedScheme);
    }
    let (stored_digest, salt) = raw.split_at(digest_len);
    let computed = digest(scheme, candidate, salt);
    Ok(computed == stored_digest)
}

fn split_scheme(stored: &str) -> Option<(&str, &str)> {
    let stored = stored.strip_prefix('{')?;
    let end = stored.find('}')?;
    Some((&stored[..end], &stored[end + 1..]))
}
