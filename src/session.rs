use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use base64::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{metadata::VisitorMetadata, new_id, ID};

type HmacSha256 = Hmac<Sha256>;

pub type SessionId = ID;

/// Name of the cookie that carries the signed session id.
pub const COOKIE_NAME: &str = "sid";

/// Where a visitor stands in the login sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginPhase {
    Anonymous,
    /// Sent to the provider, waiting for it to redirect back with this CSRF state.
    AwaitingCallback { csrf_state: String },
}

impl Default for LoginPhase {
    fn default() -> Self {
        Self::Anonymous
    }
}

/// Per-visitor state correlating the metadata POST with the OAuth callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub visitor_metadata: Option<VisitorMetadata>,
    pub login: LoginPhase,
}

struct Entry {
    record: SessionRecord,
    expires: Instant,
}

/// In-memory session store keyed by session id.
///
/// Entries expire `ttl` after their last access and are dropped lazily on
/// lookup or by [`SessionStore::spawn_sweeper`]. Cloning shares the store.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<SessionId, Entry>>>,
    key: Arc<Vec<u8>>,
    ttl: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(key: &[u8], ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            key: Arc::new(key.to_vec()),
            ttl,
            secure: false,
        }
    }

    /// Marks issued cookies `Secure`.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Generates a random 32 byte signing key.
    pub fn random_key() -> Vec<u8> {
        (0..32).map(|_| rand::random::<u8>()).collect()
    }

    pub async fn create(&self) -> SessionId {
        let mut sessions = self.sessions.lock().await;
        let mut id = new_id();
        while sessions.contains_key(&id) {
            id = new_id();
        }
        sessions.insert(
            id,
            Entry {
                record: SessionRecord::default(),
                expires: Instant::now() + self.ttl,
            },
        );
        id
    }

    /// Returns the live session named by a cookie value, if its signature checks out.
    pub async fn resolve(&self, cookie: Option<&str>) -> Option<SessionId> {
        let id = self.verify_cookie(cookie?)?;
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        match sessions.get_mut(&id) {
            Some(entry) if entry.expires > now => {
                entry.expires = now + self.ttl;
                Some(id)
            }
            Some(_) => {
                sessions.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Like [`SessionStore::resolve`], creating a new session when none is live.
    /// The flag is `true` when the caller must issue a fresh cookie.
    pub async fn resolve_or_create(&self, cookie: Option<&str>) -> (SessionId, bool) {
        match self.resolve(cookie).await {
            Some(id) => (id, false),
            None => (self.create().await, true),
        }
    }

    #[cfg(test)]
    pub async fn get(&self, id: SessionId) -> Option<SessionRecord> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&id)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.record.clone())
    }

    /// Stores metadata for the session, replacing whatever was there.
    pub async fn put_metadata(&self, id: SessionId, metadata: VisitorMetadata) {
        self.update(id, |record| record.visitor_metadata = Some(metadata))
            .await;
    }

    /// Removes and returns the session's metadata.
    pub async fn take_metadata(&self, id: SessionId) -> Option<VisitorMetadata> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .get_mut(&id)
            .filter(|entry| entry.expires > Instant::now())
            .and_then(|entry| entry.record.visitor_metadata.take())
    }

    pub async fn set_pending_state(&self, id: SessionId, csrf_state: String) {
        self.update(id, |record| {
            record.login = LoginPhase::AwaitingCallback { csrf_state }
        })
        .await;
    }

    /// Returns the CSRF state of an in-flight login and resets the session to anonymous.
    pub async fn take_pending_state(&self, id: SessionId) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(&id)
            .filter(|entry| entry.expires > Instant::now())?;
        match std::mem::take(&mut entry.record.login) {
            LoginPhase::AwaitingCallback { csrf_state } => Some(csrf_state),
            LoginPhase::Anonymous => None,
        }
    }

    async fn update<F>(&self, id: SessionId, apply: F)
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let entry = sessions.entry(id).or_insert_with(|| Entry {
            record: SessionRecord::default(),
            expires: now,
        });
        if entry.expires <= now {
            entry.record = SessionRecord::default();
        }
        entry.expires = now + self.ttl;
        apply(&mut entry.record);
    }

    /// Drops expired sessions, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, entry| entry.expires > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Periodically purges expired sessions until the returned task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!("Purged {} expired sessions", purged);
                }
            }
        })
    }

    fn sign(&self, id: &SessionId) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(id.to_string().as_bytes());
        Some(mac)
    }

    /// Cookie value for a session: `<id>.<base64url hmac-sha256 of id>`.
    pub fn cookie_value(&self, id: &SessionId) -> String {
        let signature = self
            .sign(id)
            .map(|mac| base64::encode_config(mac.finalize().into_bytes(), URL_SAFE_NO_PAD))
            .unwrap_or_default();
        format!("{}.{}", id, signature)
    }

    pub fn verify_cookie(&self, value: &str) -> Option<SessionId> {
        let (id, signature) = value.trim().split_once('.')?;
        let id = id.parse::<SessionId>().ok()?;
        let signature = base64::decode_config(signature, URL_SAFE_NO_PAD).ok()?;
        self.sign(&id)?.verify_slice(&signature).ok()?;
        Some(id)
    }

    /// `Set-Cookie` header value that hands `id` to the browser.
    ///
    /// A browser-session cookie: expiry is left to the sliding server-side TTL.
    /// `SameSite=Lax` so the cookie rides along on the provider's top-level redirect back.
    pub fn set_cookie_header(&self, id: &SessionId) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax{}",
            COOKIE_NAME,
            self.cookie_value(id),
            if self.secure { "; Secure" } else { "" }
        )
    }
}
