use super::logging;

#[test]
fn test_logging_init_accepts_levels() {
    // repeated init must not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("not-a-level");
}
