use std::path::Path;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> &'static str {
    match name {
        "run_full.log" => include_str!("../fixtures/run_full.log"),
        "run_malformed.log" => include_str!("../fixtures/run_malformed.log"),
        "run_no_cases.log" => include_str!("../fixtures/run_no_cases.log"),
        other => panic!("unknown fixture: {other}"),
    }
}

/// Copy a fixture to `path`.
#[allow(dead_code)]
pub fn write_fixture(name: &str, path: &Path) {
    std::fs::write(path, fixture(name)).expect("write fixture");
}
