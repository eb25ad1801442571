//! View descriptors produced by the flow and consumed by the renderer.

use facemood_auth::{Role, UserRecord};
use facemood_core::Detection;

/// Which unauthenticated screen the menu selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Menu {
    #[default]
    Login,
    Register,
}

/// One-shot message shown above the page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flash {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
}

/// Admin table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub username: String,
    pub role: Role,
    pub status: &'static str,
}

impl From<&UserRecord> for UserRow {
    fn from(record: &UserRecord) -> Self {
        Self {
            username: record.username.clone(),
            role: record.role,
            status: record.status_label(),
        }
    }
}

/// Output of one detection run.
#[derive(Debug, Clone)]
pub struct DetectionPanel {
    pub uploaded_png: Vec<u8>,
    pub annotated_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub enum Page {
    Login,
    Register,
    Admin {
        users: Vec<UserRow>,
        pending: Vec<String>,
    },
    Detect {
        result: Option<DetectionPanel>,
    },
}

/// Everything the renderer needs for one full-screen response.
#[derive(Debug, Clone)]
pub struct View {
    pub page: Page,
    pub flash: Vec<Flash>,
    /// Logged-in account shown in the sidebar.
    pub account: Option<(String, Role)>,
}

impl View {
    pub fn new(page: Page) -> Self {
        Self { page, flash: Vec::new(), account: None }
    }

    pub fn with_flash(mut self, flash: Flash) -> Self {
        self.flash.push(flash);
        self
    }

    pub fn with_account(mut self, account: Option<(&str, Role)>) -> Self {
        self.account = account.map(|(name, role)| (name.to_string(), role));
        self
    }
}
