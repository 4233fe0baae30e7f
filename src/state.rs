//! Shared application state injected into every request handler.

use crate::services::{
    analyzer::Analyzer, cache_service::AnalysisCache, session_service::SessionService,
};
use std::sync::Arc;

/// Constructed once in `main` and cloned into the router. All fields are
/// cheap handles onto shared, process-wide state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub cache: AnalysisCache,
    pub analyzer: Arc<dyn Analyzer>,
}

impl AppState {
    pub fn new(sessions: SessionService, cache: AnalysisCache, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            sessions,
            cache,
            analyzer,
        }
    }
}
