use std::fmt;
use std::str::FromStr;

/// Coarse permission tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// One row of the user table.
///
/// `password` is stored as plaintext; the persisted layout defines it so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub approved: bool,
}

impl UserRecord {
    /// A freshly registered account: ordinary user, not yet approved.
    pub fn pending(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            role: Role::User,
            approved: false,
        }
    }

    /// An operator-created administrator, approved from the start.
    pub fn admin(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            role: Role::Admin,
            approved: true,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Human-readable approval status shown in the admin table.
    pub fn status_label(&self) -> &'static str {
        if self.approved { "Approved" } else { "Pending" }
    }
}

/// Parse the boolean-like text found in the `approved` column.
///
/// Files written by older tooling use `True`/`False`; numeric and
/// lowercase spellings are accepted as well.
pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

pub(crate) fn format_flag(flag: bool) -> &'static str {
    if flag { "True" } else { "False" }
}
