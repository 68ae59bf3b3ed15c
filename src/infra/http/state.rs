use std::sync::Arc;

use crate::application::content::ContentService;
use crate::cache::CacheServices;

#[derive(Clone)]
pub struct AppState {
    pub content: Arc<ContentService>,
    pub cache: CacheServices,
    /// Shared secret guarding the admin routes; `None` disables them.
    pub admin_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        content: Arc<ContentService>,
        cache: CacheServices,
        admin_secret: Option<String>,
    ) -> Self {
        Self {
            content,
            cache,
            admin_secret: admin_secret.map(Arc::from),
        }
    }
}
