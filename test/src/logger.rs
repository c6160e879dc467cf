use slog::Drain;
use std::env;

pub fn test_logger() -> slog::Logger {
    match env::var("RUST_LOG") {
        Ok(_) => {}
        Err(_) => env::set_var("RUST_LOG", "info"),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    slog::Logger::root(std::sync::Mutex::new(drain).fuse(), slog::o!())
}
