//! Per-browser session state and its cookie.
//!
//! Sessions live only in memory. A cookie carrying a random id is issued the
//! first time a browser logs in; logging out drops the entry and expires the
//! cookie. Idle sessions are evicted and the table is capped.

use crate::state::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use facemood_auth::{Role, UserRecord};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "facemood_session";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Where a browser is in the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    /// Valid credentials were presented but the account is not approved yet.
    /// Lasts for one response only; it is never stored.
    AwaitingApproval { username: String },
    User { username: String },
    Admin { username: String },
}

impl SessionState {
    /// State entered after a successful, approved login.
    pub fn signed_in(record: &UserRecord) -> Self {
        match record.role {
            Role::Admin => SessionState::Admin { username: record.username.clone() },
            Role::User => SessionState::User { username: record.username.clone() },
        }
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::User { .. } | SessionState::Admin { .. })
    }

    /// Username and role of a logged-in session.
    pub fn account(&self) -> Option<(&str, Role)> {
        match self {
            SessionState::User { username } => Some((username.as_str(), Role::User)),
            SessionState::Admin { username } => Some((username.as_str(), Role::Admin)),
            _ => None,
        }
    }
}

struct Entry {
    state: SessionState,
    last_seen: Instant,
}

/// In-memory session table keyed by cookie id. Only logged-in states are kept.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// State for `id`, refreshing its idle timer. Expired entries are dropped.
    pub fn get(&self, id: &Uuid) -> Option<SessionState> {
        let mut sessions = self.lock();
        let expired = match sessions.get_mut(id) {
            Some(entry) if entry.last_seen.elapsed() < self.idle_timeout => {
                entry.last_seen = Instant::now();
                return Some(entry.state.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.remove(id);
        }
        None
    }

    /// Record `state` for `id`. States other than logged-in remove the entry.
    pub fn put(&self, id: Uuid, state: SessionState) {
        let mut sessions = self.lock();
        if !state.is_logged_in() {
            sessions.remove(&id);
            return;
        }

        let now = Instant::now();
        sessions.retain(|_, e| now.duration_since(e.last_seen) < self.idle_timeout);
        if !sessions.contains_key(&id) && sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                tracing::debug!(session = %oldest, "session table full, evicting oldest");
                sessions.remove(&oldest);
            }
        }
        sessions.insert(id, Entry { state, last_seen: now });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Request-scoped session context, extracted from the cookie.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub state: SessionState,
    /// The browser did not present a known session id.
    pub is_new: bool,
}

impl SessionContext {
    /// Persist the (possibly changed) state and attach the cookie changes to
    /// `response`.
    pub fn commit(self, store: &SessionStore, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        let kept = self.state.is_logged_in();
        store.put(self.id, self.state);

        let cookie = if !kept && !self.is_new {
            Some(format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"))
        } else if kept && self.is_new {
            Some(format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id))
        } else {
            None
        };

        if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
        response
    }
}

/// Find the session id in a `Cookie` header value.
fn parse_session_cookie(header: &str) -> Option<Uuid> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

#[async_trait]
impl FromRequestParts<AppState> for SessionContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let known = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(parse_session_cookie)
            .and_then(|id| state.sessions.get(&id).map(|s| (id, s)));

        Ok(match known {
            Some((id, session)) => SessionContext { id, state: session, is_new: false },
            None => SessionContext {
                id: Uuid::new_v4(),
                state: SessionState::Anonymous,
                is_new: true,
            },
        })
    }
}
