use testpilot_core::{Config, SanitizedConfig, TestPilot};

/// Shared application state
pub struct AppState {
    engine: TestPilot,
}

impl AppState {
    pub fn new(engine: TestPilot) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TestPilot {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(self.engine.config())
    }
}
