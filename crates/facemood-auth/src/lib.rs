//! facemood-auth — User accounts for the facemood web app.
//!
//! A flat CSV user table (`username,password,role,approved`) and the
//! registration / approval / login operations layered over it.

pub mod service;
pub mod store;
pub mod types;

pub use service::{AuthService, RegisterOutcome};
pub use store::{StoreError, UserStore};
pub use types::{Role, UserRecord};
