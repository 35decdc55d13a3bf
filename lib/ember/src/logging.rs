pub use slog::{debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the default terminal logger (stderr, debug level). Endpoints take
/// an optional parent logger instead of calling this directly, so embedding
/// applications can supply their own drain.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Default logging config must parse");

    config.build_logger().expect("Error building default logger")
}

/// Derives a child logger from an optional parent. Objects constructed
/// without a parent log into the void.
#[inline]
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L, values: slog::OwnedKV<impl slog::SendSyncRefUnwindSafeKV + 'static>) -> Logger {
    match log.into() {
        Some(log) => log.new(values),
        _ => Logger::root(Discard, o!()),
    }
}
