//! Login / register / admin / detect transitions.
//!
//! Every transition takes the current [`SessionState`], may update it, and
//! returns the [`View`] to render. No HTML is produced here.

use crate::engine::DetectOutcome;
use crate::error::AppError;
use crate::session::SessionState;
use crate::view::{DetectionPanel, Flash, Menu, Page, UserRow, View};
use facemood_auth::AuthService;

pub const MSG_BOTH_FIELDS: &str = "Both fields are required.";
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid credentials.";
pub const MSG_AWAITING_APPROVAL: &str = "Awaiting admin approval.";
pub const MSG_NO_USERS: &str = "No users found in the system.";
pub const MSG_NO_PENDING: &str = "No users pending approval.";
pub const MSG_NO_FACES: &str = "No faces detected.";
pub const MSG_UNSUPPORTED_UPLOAD: &str = "Unsupported file type; upload a jpg, jpeg or png image.";
pub const MSG_NO_UPLOAD: &str = "Choose an image to upload.";

pub struct Flow<'a> {
    auth: &'a AuthService,
}

impl<'a> Flow<'a> {
    pub fn new(auth: &'a AuthService) -> Self {
        Self { auth }
    }

    /// The screen for the current state, without any transition.
    pub fn show(&self, session: &SessionState, menu: Menu) -> Result<View, AppError> {
        match session {
            SessionState::Anonymous => Ok(View::new(menu_page(menu))),
            SessionState::AwaitingApproval { .. } => {
                let view = View::new(menu_page(menu));
                Ok(match menu {
                    Menu::Login => view.with_flash(Flash::Warning(MSG_AWAITING_APPROVAL.into())),
                    Menu::Register => view,
                })
            }
            SessionState::Admin { .. } => self.admin_view(session),
            SessionState::User { .. } => {
                Ok(View::new(Page::Detect { result: None }).with_account(session.account()))
            }
        }
    }

    pub fn login(
        &self,
        session: &mut SessionState,
        username: &str,
        password: &str,
    ) -> Result<View, AppError> {
        if session.is_logged_in() {
            return self.show(session, Menu::Login);
        }

        match self.auth.authenticate(username, password)? {
            Some(record) if record.approved => {
                *session = SessionState::signed_in(&record);
                tracing::info!(username, role = %record.role, "login");
                Ok(self
                    .show(session, Menu::Login)?
                    .with_flash(Flash::Success(format!("Welcome, {username}!"))))
            }
            Some(_) => {
                *session = SessionState::AwaitingApproval { username: username.to_string() };
                tracing::info!(username, "login held: awaiting approval");
                self.show(session, Menu::Login)
            }
            None => {
                *session = SessionState::Anonymous;
                tracing::info!(username, "login rejected: invalid credentials");
                Ok(View::new(Page::Login).with_flash(Flash::Error(MSG_INVALID_CREDENTIALS.into())))
            }
        }
    }

    pub fn register(&self, session: &SessionState, username: &str, password: &str) -> Result<View, AppError> {
        if session.is_logged_in() {
            return self.show(session, Menu::Register);
        }

        let view = View::new(Page::Register);
        if username.is_empty() || password.is_empty() {
            return Ok(view.with_flash(Flash::Error(MSG_BOTH_FIELDS.into())));
        }

        let outcome = self.auth.register(username, password)?;
        let message = outcome.message().to_string();
        Ok(view.with_flash(if outcome.is_success() {
            Flash::Success(message)
        } else {
            Flash::Warning(message)
        }))
    }

    pub fn logout(&self, session: &mut SessionState) -> View {
        if let Some((username, _)) = session.account() {
            tracing::info!(username, "logout");
        }
        *session = SessionState::Anonymous;
        View::new(Page::Login)
    }

    pub fn approve(&self, session: &SessionState, target: &str) -> Result<View, AppError> {
        let admin = require_admin(session)?;
        self.auth.approve(target)?;
        tracing::info!(admin, target, "user approved");
        Ok(self
            .admin_view(session)?
            .with_flash(Flash::Success(format!("{target} approved."))))
    }

    pub fn remove(&self, session: &SessionState, target: &str) -> Result<View, AppError> {
        let admin = require_admin(session)?;
        if admin == target {
            return Ok(self
                .admin_view(session)?
                .with_flash(Flash::Error("You cannot remove your own account.".into())));
        }
        self.auth.remove(target)?;
        tracing::info!(admin, target, "user removed");
        Ok(self
            .admin_view(session)?
            .with_flash(Flash::Warning(format!("{target} removed."))))
    }

    /// Detect view showing a finished run.
    pub fn detected(&self, session: &SessionState, outcome: DetectOutcome) -> Result<View, AppError> {
        require_user(session)?;
        let empty = outcome.detections.is_empty();
        let view = View::new(Page::Detect {
            result: Some(DetectionPanel {
                uploaded_png: outcome.uploaded_png,
                annotated_png: outcome.annotated_png,
                width: outcome.width,
                height: outcome.height,
                detections: outcome.detections,
            }),
        })
        .with_account(session.account());

        Ok(if empty {
            view.with_flash(Flash::Info(MSG_NO_FACES.into()))
        } else {
            view
        })
    }

    /// Detect view for an upload that could not be processed.
    pub fn detect_rejected(&self, session: &SessionState, message: String) -> Result<View, AppError> {
        require_user(session)?;
        Ok(View::new(Page::Detect { result: None })
            .with_account(session.account())
            .with_flash(Flash::Error(message)))
    }

    fn admin_view(&self, session: &SessionState) -> Result<View, AppError> {
        let users = self.auth.list_all()?;
        let pending: Vec<String> = self
            .auth
            .list_pending()?
            .into_iter()
            .map(|r| r.username)
            .collect();

        let mut view = View::new(Page::Admin {
            users: users.iter().map(UserRow::from).collect(),
            pending: pending.clone(),
        })
        .with_account(session.account());

        if users.is_empty() {
            view = view.with_flash(Flash::Info(MSG_NO_USERS.into()));
        } else if pending.is_empty() {
            view = view.with_flash(Flash::Success(MSG_NO_PENDING.into()));
        }
        Ok(view)
    }
}

fn menu_page(menu: Menu) -> Page {
    match menu {
        Menu::Login => Page::Login,
        Menu::Register => Page::Register,
    }
}

/// Username of an admin session, or `Forbidden`.
pub fn require_admin(session: &SessionState) -> Result<&str, AppError> {
    match session {
        SessionState::Admin { username } => Ok(username),
        _ => Err(AppError::Forbidden("Admin access required.".into())),
    }
}

/// Username of an ordinary logged-in user, or `Forbidden`.
pub fn require_user(session: &SessionState) -> Result<&str, AppError> {
    match session {
        SessionState::User { username } => Ok(username),
        _ => Err(AppError::Forbidden("Log in as a regular user to run detection.".into())),
    }
}
