// Copyright 2022 Oxide Computer Company

use slog::{o, Drain, Logger};

/// Terminal logger on stderr, filtered by `RUST_LOG`.
pub fn stderr_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}
