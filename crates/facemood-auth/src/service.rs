//! Registration, credential checks and admin mutations over the user store.

use crate::store::{StoreError, UserStore};
use crate::types::{Role, UserRecord};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyExists,
}

impl RegisterOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RegisterOutcome::Registered)
    }

    pub fn message(&self) -> &'static str {
        match self {
            RegisterOutcome::Registered => "Registration successful. Awaiting admin approval.",
            RegisterOutcome::AlreadyExists => "Username already exists.",
        }
    }
}

/// Account operations used by the web layer and the CLI.
pub struct AuthService {
    store: UserStore,
}

impl AuthService {
    pub fn new(store: UserStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }

    /// Append a new unapproved `user` record unless the name is taken.
    pub fn register(&self, username: &str, password: &str) -> Result<RegisterOutcome, StoreError> {
        self.insert(UserRecord::pending(username, password))
    }

    /// Append an approved admin record unless the name is taken.
    pub fn create_admin(&self, username: &str, password: &str) -> Result<RegisterOutcome, StoreError> {
        self.insert(UserRecord::admin(username, password))
    }

    fn insert(&self, record: UserRecord) -> Result<RegisterOutcome, StoreError> {
        let username = record.username.clone();
        let role = record.role;
        let outcome = self.store.modify(move |records| {
            if records.iter().any(|r| r.username == record.username) {
                RegisterOutcome::AlreadyExists
            } else {
                records.push(record);
                RegisterOutcome::Registered
            }
        })?;

        match outcome {
            RegisterOutcome::Registered => tracing::info!(username, %role, "account created"),
            RegisterOutcome::AlreadyExists => tracing::info!(username, "account creation rejected: name taken"),
        }
        Ok(outcome)
    }

    /// Look up a record by exact username and plaintext password.
    ///
    /// Approval is not checked here; the caller decides what an unapproved
    /// but valid login means.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, StoreError> {
        let records = self.store.load()?;
        let found = records.into_iter().find(|r| r.username == username);

        Ok(found.filter(|r| constant_time_eq(r.password.as_bytes(), password.as_bytes())))
    }

    /// Unapproved ordinary users, in registration order.
    pub fn list_pending(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self
            .store
            .load()?
            .into_iter()
            .filter(|r| r.role == Role::User && !r.approved)
            .collect())
    }

    pub fn list_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.store.load()
    }

    /// Mark `username` approved. Returns whether a record matched.
    pub fn approve(&self, username: &str) -> Result<bool, StoreError> {
        let matched = self.store.modify(|records| {
            let mut matched = false;
            for record in records.iter_mut().filter(|r| r.username == username) {
                record.approved = true;
                matched = true;
            }
            matched
        })?;
        tracing::info!(username, matched, "approve");
        Ok(matched)
    }

    /// Delete `username`. Returns whether a record matched.
    pub fn remove(&self, username: &str) -> Result<bool, StoreError> {
        let matched = self.store.modify(|records| {
            let before = records.len();
            records.retain(|r| r.username != username);
            records.len() != before
        })?;
        tracing::info!(username, matched, "remove");
        Ok(matched)
    }

    pub fn has_admin(&self) -> Result<bool, StoreError> {
        Ok(self.store.load()?.iter().any(UserRecord::is_admin))
    }
}

/// Compare two byte strings without exiting early on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> AuthService {
        AuthService::new(UserStore::new(dir.path().join("users.csv")))
    }

    #[test]
    fn test_register_new_user_is_pending() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);

        let outcome = auth.register("alice", "pw1").unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.message(), "Registration successful. Awaiting admin approval.");

        let all = auth.list_all().unwrap();
        assert_eq!(all, vec![UserRecord::pending("alice", "pw1")]);
    }

    #[test]
    fn test_register_duplicate_keeps_existing_record() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();
        auth.approve("alice").unwrap();

        let outcome = auth.register("alice", "other").unwrap();
        assert_eq!(outcome, RegisterOutcome::AlreadyExists);
        assert_eq!(outcome.message(), "Username already exists.");

        let all = auth.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].password, "pw1");
        assert!(all[0].approved);
    }

    #[test]
    fn test_authenticate_exact_match_ignores_approval() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();

        let record = auth.authenticate("alice", "pw1").unwrap().expect("valid");
        assert!(!record.approved);

        assert!(auth.authenticate("alice", "PW1").unwrap().is_none());
        assert!(auth.authenticate("Alice", "pw1").unwrap().is_none());
        assert!(auth.authenticate("alice", "pw").unwrap().is_none());
        assert!(auth.authenticate("nobody", "pw1").unwrap().is_none());
    }

    #[test]
    fn test_authenticate_empty_store() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        assert!(auth.authenticate("alice", "pw1").unwrap().is_none());
    }

    #[test]
    fn test_approve_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();
        auth.register("bob", "pw2").unwrap();

        assert!(auth.approve("alice").unwrap());
        let once = auth.list_all().unwrap();
        assert!(auth.approve("alice").unwrap());
        let twice = auth.list_all().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_approve_missing_user_is_noop() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();

        assert!(!auth.approve("ghost").unwrap());
        assert_eq!(auth.list_all().unwrap(), vec![UserRecord::pending("alice", "pw1")]);
    }

    #[test]
    fn test_remove_then_authenticate_fails() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();
        auth.approve("alice").unwrap();

        assert!(auth.remove("alice").unwrap());
        assert!(auth.authenticate("alice", "pw1").unwrap().is_none());
        assert!(!auth.remove("alice").unwrap());
    }

    #[test]
    fn test_list_pending_excludes_admins_and_approved() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();
        auth.register("bob", "pw2").unwrap();
        auth.create_admin("root", "toor").unwrap();
        auth.approve("bob").unwrap();

        let pending: Vec<String> = auth
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(pending, vec!["alice".to_string()]);
    }

    #[test]
    fn test_end_to_end_register_approve_authenticate() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);

        assert!(auth.register("alice", "pw1").unwrap().is_success());
        assert!(!auth.authenticate("alice", "pw1").unwrap().unwrap().approved);
        auth.approve("alice").unwrap();
        assert!(auth.authenticate("alice", "pw1").unwrap().unwrap().approved);
    }

    #[test]
    fn test_has_admin() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.register("alice", "pw1").unwrap();
        assert!(!auth.has_admin().unwrap());

        assert!(auth.create_admin("root", "toor").unwrap().is_success());
        assert!(auth.has_admin().unwrap());
        assert_eq!(auth.create_admin("root", "x").unwrap(), RegisterOutcome::AlreadyExists);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
