//! Session stores
//!
//! A store turns the request's cookie into a [`Session`] and a modified session
//! back into the cookie to send. [`CookieStore`] keeps the values in the cookie
//! itself; [`MemoryStore`] keeps them server-side and only sends a signed id.

use std::collections::HashMap;
use std::sync::Arc;

use hyper::header::HeaderMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rand::RngCore;

use super::codec::{CookieCodec, SessionValues};
use crate::error::CookieError;
use crate::http::cookie::{find_cookie, Cookie};

/// Attributes applied to every cookie a store emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    /// Seconds; `<= 0` deletes the session on save
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: 86400 * 30,
            http_only: true,
            secure: false,
        }
    }
}

impl CookieOptions {
    fn cookie(&self, name: &str, value: String, max_age: i64) -> Cookie {
        let mut cookie = Cookie::new(name, value)
            .with_path(self.path.clone())
            .with_max_age(max_age)
            .http_only(self.http_only)
            .secure(self.secure);
        if let Some(domain) = &self.domain {
            cookie = cookie.with_domain(domain.clone());
        }
        cookie
    }
}

/// One named session as seen by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub values: SessionValues,
    /// Server-side id; only used by stores that keep values off the client
    pub id: Option<String>,
    /// Override for the store's max age; `Some(n <= 0)` deletes on save
    pub max_age: Option<i64>,
    is_new: bool,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: SessionValues::new(),
            id: None,
            max_age: None,
            is_new: true,
        }
    }

    /// Whether the session was created for this request rather than loaded
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Mark the session for deletion on the next save
    pub fn invalidate(&mut self) {
        self.max_age = Some(-1);
    }
}

/// Loads and saves named sessions
pub trait SessionStore: Send + Sync {
    /// Session stored under `name`; a fresh session if the request carries none
    ///
    /// A cookie that fails verification is an error so callers can tell a
    /// forged or stale session apart from an absent one.
    fn load(&self, headers: &HeaderMap, name: &str) -> Result<Session, CookieError>;

    /// Persist `session` and return the cookie to send
    fn save(&self, session: &Session) -> Result<Cookie, CookieError>;
}

/// Values live in an authenticated, encrypted cookie
pub struct CookieStore {
    codec: Arc<dyn CookieCodec>,
    options: CookieOptions,
}

impl CookieStore {
    pub fn new(codec: Arc<dyn CookieCodec>) -> Self {
        Self::with_options(codec, CookieOptions::default())
    }

    pub fn with_options(codec: Arc<dyn CookieCodec>, options: CookieOptions) -> Self {
        Self { codec, options }
    }

    pub const fn options(&self) -> &CookieOptions {
        &self.options
    }
}

impl SessionStore for CookieStore {
    fn load(&self, headers: &HeaderMap, name: &str) -> Result<Session, CookieError> {
        let Some(cookie) = find_cookie(headers, name) else {
            return Ok(Session::new(name));
        };
        let values = self.codec.decode(name, &cookie.value)?;
        Ok(Session {
            values,
            is_new: false,
            ..Session::new(name)
        })
    }

    fn save(&self, session: &Session) -> Result<Cookie, CookieError> {
        let max_age = session.max_age.unwrap_or(self.options.max_age);
        if max_age <= 0 {
            return Ok(self.options.cookie(&session.name, String::new(), -1));
        }
        let value = self.codec.encode(&session.name, &session.values)?;
        Ok(self.options.cookie(&session.name, value, max_age))
    }
}

const ID_KEY: &str = "_id";

/// Server-side values with the unix time after which they are dropped
#[derive(Debug, Clone)]
struct Entry {
    values: SessionValues,
    expires_at: i64,
}

/// Values live in process memory keyed by a random id carried in a signed cookie
///
/// Sessions do not survive a restart and are not shared between processes.
/// Each entry lives for the max age it was saved with; expired entries are
/// dropped when read and swept on every save.
pub struct MemoryStore {
    codec: Arc<dyn CookieCodec>,
    options: CookieOptions,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new(codec: Arc<dyn CookieCodec>) -> Self {
        Self::with_options(codec, CookieOptions::default())
    }

    pub fn with_options(codec: Arc<dyn CookieCodec>, options: CookieOptions) -> Self {
        Self {
            codec,
            options,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored sessions, expired ones not yet swept included
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop every expired session; returns how many were removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(now())
    }

    fn sweep_at(&self, now: i64) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    fn new_id() -> String {
        let mut id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id);
        hex::encode(id)
    }

    fn load_at(&self, headers: &HeaderMap, name: &str, now: i64) -> Result<Session, CookieError> {
        let Some(cookie) = find_cookie(headers, name) else {
            return Ok(Session::new(name));
        };
        let signed = self.codec.decode(name, &cookie.value)?;
        let Some(id) = signed.get(ID_KEY) else {
            return Err(CookieError::Decode {
                name: name.to_string(),
                reason: "session id missing".to_string(),
            });
        };

        // An id the server no longer knows starts over with the same id
        let values = {
            let sessions = self.sessions.upgradable_read();
            let stored = sessions
                .get(id)
                .map(|entry| (entry.expires_at > now).then(|| entry.values.clone()));
            match stored {
                Some(None) => {
                    RwLockUpgradableReadGuard::upgrade(sessions).remove(id);
                    None
                }
                Some(values) => values,
                None => None,
            }
        };
        Ok(Session {
            is_new: values.is_none(),
            values: values.unwrap_or_default(),
            id: Some(id.clone()),
            ..Session::new(name)
        })
    }

    fn save_at(&self, session: &Session, now: i64) -> Result<Cookie, CookieError> {
        let max_age = session.max_age.unwrap_or(self.options.max_age);
        if max_age <= 0 {
            if let Some(id) = &session.id {
                self.sessions.write().remove(id);
            }
            return Ok(self.options.cookie(&session.name, String::new(), -1));
        }

        let id = session.id.clone().unwrap_or_else(Self::new_id);
        let signed = SessionValues::from([(ID_KEY.to_string(), id.clone())]);
        let value = self.codec.encode(&session.name, &signed)?;

        self.sweep_at(now);
        self.sessions.write().insert(
            id,
            Entry {
                values: session.values.clone(),
                expires_at: now.saturating_add(max_age),
            },
        );
        Ok(self.options.cookie(&session.name, value, max_age))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SessionStore for MemoryStore {
    fn load(&self, headers: &HeaderMap, name: &str) -> Result<Session, CookieError> {
        self.load_at(headers, name, now())
    }

    fn save(&self, session: &Session) -> Result<Cookie, CookieError> {
        self.save_at(session, now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::codec::SecureCookie;
    use hyper::header::{HeaderValue, COOKIE};

    fn codec() -> Arc<dyn CookieCodec> {
        Arc::new(SecureCookie::new(&[3; 32], Some(&[4; 32])).unwrap())
    }

    fn request_with(cookie: &Cookie) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let line = format!("{}={}", cookie.name, cookie.value);
        headers.insert(COOKIE, HeaderValue::from_str(&line).unwrap());
        headers
    }

    #[test]
    fn test_cookie_store_round_trip() {
        let store = CookieStore::new(codec());
        let mut session = store.load(&HeaderMap::new(), "app").unwrap();
        assert!(session.is_new());
        session.insert("user", "alice");

        let cookie = store.save(&session).unwrap();
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert!(cookie.http_only);

        let loaded = store.load(&request_with(&cookie), "app").unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.get("user"), Some("alice"));
    }

    #[test]
    fn test_cookie_store_rejects_forgery() {
        let store = CookieStore::new(codec());
        let forged = Cookie::new("app", "1.e30.AAAA");
        let err = store.load(&request_with(&forged), "app").unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_invalidate_emits_removal() {
        let store = CookieStore::new(codec());
        let mut session = Session::new("app");
        session.invalidate();
        let cookie = store.save(&session).unwrap();
        assert_eq!(cookie.max_age, Some(-1));
        assert!(cookie.value.is_empty());
    }

    #[test]
    fn test_memory_store_keeps_values_server_side() {
        let store = MemoryStore::new(codec());
        let mut session = Session::new("app");
        session.insert("cart", "3 items");

        let cookie = store.save(&session).unwrap();
        assert_eq!(store.len(), 1);

        let mut loaded = store.load(&request_with(&cookie), "app").unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.get("cart"), Some("3 items"));

        loaded.invalidate();
        store.save(&loaded).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_drops_expired_sessions() {
        let options = CookieOptions {
            max_age: 60,
            ..CookieOptions::default()
        };
        let store = MemoryStore::with_options(codec(), options);

        let mut stale = Session::new("app");
        stale.insert("user", "alice");
        let stale_cookie = store.save_at(&stale, 1_000).unwrap();

        // Read after expiry: values are gone and the entry is removed
        let loaded = store.load_at(&request_with(&stale_cookie), "app", 1_060).unwrap();
        assert!(loaded.is_new());
        assert_eq!(loaded.get("user"), None);
        assert!(store.is_empty());

        // A client that never returns is swept by a later save
        store.save_at(&Session::new("app"), 2_000).unwrap();
        store.save_at(&Session::new("app"), 2_030).unwrap();
        assert_eq!(store.len(), 2);
        store.save_at(&Session::new("app"), 2_061).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.sweep_at(2_200), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_unknown_id_starts_fresh() {
        let writer = MemoryStore::new(codec());
        let cookie = writer.save(&Session::new("app")).unwrap();

        // Same key, different process: id verifies but has no values
        let reader = MemoryStore::new(codec());
        let session = reader.load(&request_with(&cookie), "app").unwrap();
        assert!(session.is_new());
        assert!(session.id.is_some());
    }
}
