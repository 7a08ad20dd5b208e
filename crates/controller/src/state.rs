use application::Controller;
use infrastructure::ControllerConfig;
use std::sync::Arc;

pub struct AppState {
    pub controller: Arc<Controller>,
    pub config: ControllerConfig,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, config: ControllerConfig) -> Self {
        Self { controller, config }
    }
}
