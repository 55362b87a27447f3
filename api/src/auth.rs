use std::fmt;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::{event, Level};

use crate::{shared_state::State, Error};

/// Header that carries the nonce for state-changing admin requests.
pub const NONCE_HEADER: &str = "x-pixrefiner-nonce";

const NONCE_KEY_CONTEXT: &str = "pixrefiner 2024-01-01 admin nonce key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Change settings and run admin actions.
    ManageOptions,
    /// Upload new media.
    UploadFiles,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ManageOptions => "manage_options",
            Self::UploadFiles => "upload_files",
        })
    }
}

pub type Hash = blake3::Hash;

fn hash_key(key: &str) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.as_bytes());
    hasher.finalize()
}

struct ApiKey {
    hash: Hash,
    capabilities: Vec<Capability>,
}

/// API keys and the nonce secret. Only hashes of the keys are kept.
pub struct AuthConfig {
    keys: Vec<ApiKey>,
    nonce_key: [u8; 32],
}

impl AuthConfig {
    pub fn new(nonce_secret: &str) -> Self {
        AuthConfig {
            keys: Vec::new(),
            nonce_key: blake3::derive_key(NONCE_KEY_CONTEXT, nonce_secret.as_bytes()),
        }
    }

    pub fn with_key(mut self, key: &str, capabilities: &[Capability]) -> Self {
        self.keys.push(ApiKey {
            hash: hash_key(key),
            capabilities: capabilities.to_vec(),
        });
        self
    }

    pub fn lookup(&self, key: &str) -> Option<UserInfo> {
        let hash = hash_key(key);
        self.keys
            .iter()
            .find(|k| k.hash == hash)
            .map(|k| UserInfo {
                capabilities: k.capabilities.clone(),
            })
    }

    /// The nonce for `action`. Stable for the lifetime of the secret.
    pub fn nonce(&self, action: &str) -> String {
        blake3::keyed_hash(&self.nonce_key, action.as_bytes())
            .to_hex()
            .to_string()
    }

    pub fn verify_nonce(&self, action: &str, nonce: &str) -> bool {
        // Hash equality is constant-time.
        Hash::from_hex(nonce.trim())
            .map(|given| given == blake3::keyed_hash(&self.nonce_key, action.as_bytes()))
            .unwrap_or(false)
    }

    /// Check the capability, then the nonce for `action`.
    pub fn authorize(
        &self,
        user: &UserInfo,
        capability: Capability,
        action: &str,
        nonce: Option<&str>,
    ) -> Result<(), Error> {
        user.require(capability)?;
        match nonce {
            Some(nonce) if self.verify_nonce(action, nonce) => Ok(()),
            _ => {
                event!(Level::WARN, %action, "Rejected request with a bad nonce");
                Err(Error::InvalidNonce(action.to_string()))
            }
        }
    }
}

/// The caller, as identified by its API key.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub capabilities: Vec<Capability>,
}

impl UserInfo {
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), Error> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(Error::MissingCapability(capability))
        }
    }
}

fn api_key_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
}

pub fn nonce_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(NONCE_HEADER)?.to_str().ok()
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserInfo {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = parts
            .extensions
            .get::<State>()
            .ok_or(Error::ObjectNotFound("application state"))?;

        let user = api_key_from_headers(&parts.headers)
            .and_then(|key| state.auth.lookup(key))
            .ok_or(Error::Unauthenticated)?;

        Ok(user)
    }
}

/// The nonce sent with the request, if any.
pub struct Nonce(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Nonce {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Nonce(nonce_from_headers(&parts.headers).map(String::from)))
    }
}
