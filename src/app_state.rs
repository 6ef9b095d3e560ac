use crate::config::Config;
use crate::store::Store;
use crate::upload::MediaStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub media: Arc<dyn MediaStore>,
    pub config: Config,
}
