//! Shared application state for the model server.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::budget::PredictionBudget;
use crate::config::{ServerConfig, DEFAULT_MAX_BODY_BYTES};
use crate::dispatch::Predictor;

/// State handed to every request handler.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Validated model and its argument schema
    pub predictor: Arc<Predictor>,

    /// Remaining prediction calls for this process
    pub budget: Arc<PredictionBudget>,

    /// Fired by `GET /shutdown`; `None` when no serve loop is listening.
    pub shutdown: Option<Arc<Notify>>,

    /// Cap on request bodies
    pub max_body_bytes: usize,
}

impl AppState {
    /// Creates a state without a shutdown hook.
    pub fn new(predictor: Predictor, budget: PredictionBudget) -> Self {
        Self {
            predictor: Arc::new(predictor),
            budget: Arc::new(budget),
            shutdown: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Creates a state from the configuration.
    pub fn from_config(predictor: Predictor, config: &ServerConfig) -> Self {
        Self::new(predictor, PredictionBudget::from_config(config))
            .with_max_body_bytes(config.max_body_bytes)
    }

    pub fn with_shutdown(mut self, hook: Arc<Notify>) -> Self {
        self.shutdown = Some(hook);
        self
    }

    pub const fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::IntensityModel;

    fn predictor() -> Predictor {
        Predictor::new(Arc::new(IntensityModel::new(3))).unwrap()
    }

    #[test]
    fn test_from_config() {
        let config = ServerConfig {
            num_of_images: 2,
            max_body_bytes: 1024,
            ..Default::default()
        };
        let state = AppState::from_config(predictor(), &config);

        assert_eq!(state.budget.total(), 2_000);
        assert_eq!(state.max_body_bytes, 1024);
        assert!(state.shutdown.is_none());
    }

    #[test]
    fn test_shutdown_hook() {
        let state = AppState::new(predictor(), PredictionBudget::new(1))
            .with_shutdown(Arc::new(Notify::new()));
        assert!(state.shutdown.is_some());
    }
}
