//! Session module
//!
//! [`SessionRegistry`] holds the named session stores and cookie codecs the
//! server was configured with. It is filled in before the server starts and
//! shared read-only with every request afterwards.

pub mod codec;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hyper::header::HeaderMap;

pub use codec::{CookieCodec, SecureCookie, SessionValues};
pub use store::{CookieOptions, CookieStore, MemoryStore, Session, SessionStore};

use crate::config::SessionConfig;
use crate::error::{ConfigError, CookieError};
use crate::http::cookie::{find_cookie, Cookie};

const DEFAULT_NAME: &str = "default";
const KEY_LEN: usize = 32;

/// Named session stores and cookie codecs
pub struct SessionRegistry {
    default_store: String,
    default_cookie: String,
    stores: HashMap<String, Arc<dyn SessionStore>>,
    cookies: HashMap<String, Arc<dyn CookieCodec>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("default_store", &self.default_store)
            .field("default_cookie", &self.default_cookie)
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Empty registry with both defaults named `default`
    pub fn new() -> Self {
        Self {
            default_store: DEFAULT_NAME.to_string(),
            default_cookie: DEFAULT_NAME.to_string(),
            stores: HashMap::new(),
            cookies: HashMap::new(),
        }
    }

    /// Registry seeded from configured secrets
    ///
    /// `store_key` installs a cookie-backed default store; `cookie_hash_key`
    /// together with `cookie_block_key` installs the default cookie codec.
    /// Setting only one of the cookie keys is rejected.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        let max_age = i64::try_from(config.cookie_max_age).unwrap_or(i64::MAX);

        if let Some(key) = non_empty(&config.store_key) {
            let key = decode_key("session.store_key", key)?;
            let codec = SecureCookie::from_master_key(&key)
                .map_err(|e| invalid_key("session.store_key", &e))?
                .with_max_age(max_age);
            let options = CookieOptions {
                max_age,
                ..CookieOptions::default()
            };
            registry.set_default_store(Arc::new(CookieStore::with_options(
                Arc::new(codec),
                options,
            )));
        }

        match (
            non_empty(&config.cookie_hash_key),
            non_empty(&config.cookie_block_key),
        ) {
            (Some(hash), Some(block)) => {
                let hash = decode_key("session.cookie_hash_key", hash)?;
                let block = decode_key("session.cookie_block_key", block)?;
                let codec = SecureCookie::new(&hash, Some(&block))
                    .map_err(|e| invalid_key("session.cookie_block_key", &e))?
                    .with_max_age(max_age);
                registry.set_default_cookie(Arc::new(codec));
            }
            (Some(_), None) => return Err(ConfigError::IncompleteKeys("session.cookie_hash_key")),
            (None, Some(_)) => return Err(ConfigError::IncompleteKeys("session.cookie_block_key")),
            (None, None) => {}
        }

        Ok(registry)
    }

    pub fn set_default_store_name(&mut self, name: impl Into<String>) {
        self.default_store = name.into();
    }

    pub fn set_default_cookie_name(&mut self, name: impl Into<String>) {
        self.default_cookie = name.into();
    }

    pub fn default_store_name(&self) -> &str {
        &self.default_store
    }

    pub fn default_cookie_name(&self) -> &str {
        &self.default_cookie
    }

    pub const fn stores(&self) -> &HashMap<String, Arc<dyn SessionStore>> {
        &self.stores
    }

    pub fn store(&self, name: &str) -> Option<&Arc<dyn SessionStore>> {
        self.stores.get(name)
    }

    pub fn set_store(&mut self, name: impl Into<String>, store: Arc<dyn SessionStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn delete_store(&mut self, name: &str) {
        self.stores.remove(name);
    }

    pub const fn cookies(&self) -> &HashMap<String, Arc<dyn CookieCodec>> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Arc<dyn CookieCodec>> {
        self.cookies.get(name)
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, codec: Arc<dyn CookieCodec>) {
        self.cookies.insert(name.into(), codec);
    }

    pub fn delete_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    /// Store registered under the default store name
    pub fn default_session(&self) -> Option<&Arc<dyn SessionStore>> {
        self.stores.get(&self.default_store)
    }

    pub fn set_default_store(&mut self, store: Arc<dyn SessionStore>) {
        self.stores.insert(self.default_store.clone(), store);
    }

    /// Codec registered under the default cookie name
    pub fn default_cookie(&self) -> Option<&Arc<dyn CookieCodec>> {
        self.cookies.get(&self.default_cookie)
    }

    pub fn set_default_cookie(&mut self, codec: Arc<dyn CookieCodec>) {
        self.cookies.insert(self.default_cookie.clone(), codec);
    }

    /// Encode `values` with the codec registered under `name` into a cookie
    /// of the same name
    pub fn create_encrypted_cookie(
        &self,
        name: &str,
        values: &SessionValues,
        path: &str,
        max_age: i64,
        http_only: bool,
        secure: bool,
    ) -> Result<Cookie, CookieError> {
        let codec = self.codec_for(name)?;
        let value = codec.encode(name, values)?;
        Ok(Cookie::new(name, value)
            .with_path(path)
            .with_max_age(max_age)
            .http_only(http_only)
            .secure(secure))
    }

    /// [`Self::create_encrypted_cookie`] with path `/`, a 10 hour max age,
    /// `HttpOnly` and `Secure`
    pub fn create_encrypted_cookie_with_defaults(
        &self,
        name: &str,
        values: &SessionValues,
    ) -> Result<Cookie, CookieError> {
        self.create_encrypted_cookie(name, values, "/", 36_000, true, true)
    }

    /// Decode cookie `name` from the request with the codec of the same name
    pub fn read_encrypted_cookie(
        &self,
        headers: &HeaderMap,
        name: &str,
    ) -> Result<SessionValues, CookieError> {
        let codec = self.codec_for(name)?;
        let cookie = find_cookie(headers, name).ok_or_else(|| CookieError::Missing(name.to_string()))?;
        codec.decode(name, &cookie.value)
    }

    fn codec_for(&self, name: &str) -> Result<&Arc<dyn CookieCodec>, CookieError> {
        self.cookies
            .get(name)
            .ok_or_else(|| CookieError::UnknownCodec(name.to_string()))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn decode_key(field: &'static str, value: &str) -> Result<Vec<u8>, ConfigError> {
    let key = hex::decode(value).map_err(|e| ConfigError::InvalidKey {
        field,
        reason: e.to_string(),
    })?;
    if key.len() != KEY_LEN {
        return Err(ConfigError::InvalidKey {
            field,
            reason: format!("expected {KEY_LEN} bytes, got {}", key.len()),
        });
    }
    Ok(key)
}

fn invalid_key(field: &'static str, err: &crate::error::CryptoError) -> ConfigError {
    ConfigError::InvalidKey {
        field,
        reason: err.to_string(),
    }
}
