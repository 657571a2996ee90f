use std::sync::Arc;

use crate::config::Settings;
use crate::core::cache::{KvCache, ResponseCache};
use crate::core::db::Db;
use crate::core::helpers::{Clock, Request, SystemClock};
use crate::models::models::User;

/// Process-wide handles shared by every request.
pub struct AppContext {
    pub db: Db,
    pub cache: Arc<dyn ResponseCache>,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
}

impl AppContext {
    pub fn new(db: Db, settings: Settings) -> Self {
        Self::with_clock(db, settings, Arc::new(SystemClock))
    }

    /// The response cache lives in the same store as everything else.
    pub fn with_clock(db: Db, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(KvCache::new(db.clone(), clock.clone()));
        Self {
            db,
            cache,
            clock,
            settings,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Db::in_memory(), Settings::default())
    }
}

/// Everything a handler may look at for one request.
pub struct RequestContext<'a> {
    pub app: &'a AppContext,
    pub req: &'a Request,
    pub viewer: Option<User>,
}

impl<'a> RequestContext<'a> {
    pub fn db(&self) -> &Db {
        &self.app.db
    }

    pub fn viewer(&self) -> Option<&User> {
        self.viewer.as_ref()
    }

    pub fn is_viewer(&self, user_id: &str) -> bool {
        self.viewer.as_ref().map(|v| v.id == user_id).unwrap_or(false)
    }
}
