pub mod config;
pub mod driver;
pub mod engine;
pub mod interpreter;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod stream;
pub mod suite;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use engine::{EngineError, ResultCode, TestPilot};
