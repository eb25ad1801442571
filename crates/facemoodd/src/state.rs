use crate::config::Config;
use crate::engine::EngineHandle;
use crate::flow::Flow;
use crate::render::RenderOptions;
use crate::session::SessionStore;
use facemood_auth::AuthService;
use std::sync::Arc;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub engine: EngineHandle,
    pub sessions: Arc<SessionStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(auth: AuthService, engine: EngineHandle, config: Config) -> Self {
        Self {
            auth: Arc::new(auth),
            engine,
            sessions: Arc::new(SessionStore::default()),
            config: Arc::new(config),
        }
    }

    pub fn flow(&self) -> Flow<'_> {
        Flow::new(&self.auth)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            background: self.config.background_image.is_some(),
        }
    }
}
