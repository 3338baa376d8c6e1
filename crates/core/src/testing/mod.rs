//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of the driver, interpreter and
//! frame seams, allowing end-to-end runs without a browser sidecar.
//!
//! # Example
//!
//! ```rust,ignore
//! use testpilot_core::testing::{fixtures, MockDriver, MockInterpreter};
//!
//! let driver = MockDriver::new();
//! driver.set_action_failure("click Save", "button disabled").await;
//!
//! let catalog = fixtures::catalog(&[fixtures::test_case("login", "open /\nclick Save")]);
//! let engine = TestPilot::new(fixtures::fast_config(), Arc::new(driver), ...);
//! ```

mod mock_driver;
mod mock_interpreter;
mod mock_stream;

pub use mock_driver::MockDriver;
pub use mock_interpreter::MockInterpreter;
pub use mock_stream::{MockFrameSource, RecordingSink};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::Cursor;

    use bytes::Bytes;
    use image::{ImageFormat, Rgb, RgbImage};

    use crate::config::Config;
    use crate::store::{SqliteCaseCatalog, TestCase};

    /// Encode a solid-colour PNG.
    pub fn png_frame(width: u32, height: u32, color: [u8; 3]) -> Bytes {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .expect("encoding an in-memory PNG cannot fail");
        Bytes::from(out.into_inner())
    }

    /// A test case named after its id.
    pub fn test_case(id: &str, steps: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: format!("Case {}", id),
            steps: steps.to_string(),
        }
    }

    /// In-memory catalog holding `cases`.
    pub fn catalog(cases: &[TestCase]) -> SqliteCaseCatalog {
        let catalog = SqliteCaseCatalog::in_memory().expect("in-memory catalog");
        for case in cases {
            catalog.insert_case(case).expect("insert case");
        }
        catalog
    }

    /// Config tuned for tests: no settle delay, fast capture, a fixed
    /// token secret and in-memory friendly defaults.
    pub fn fast_config() -> Config {
        let mut config = Config::default();
        config.orchestrator.step_settle_ms = 0;
        config.orchestrator.evidence_dir = None;
        config.queue.retry_delay_ms = 10;
        config.stream.fps = 20.0;
        config.stream.min_interval_ms = 50;
        config.stream.cooldown_ms = 200;
        config.stream.token_secret = "test-secret".to_string();
        config
    }
}
