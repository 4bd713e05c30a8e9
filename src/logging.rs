use tracing_subscriber::fmt;

/// Installs a `fmt` subscriber logging up to `level` to stderr.
///
/// Returns `false` when a global subscriber was already installed, by this function or
/// anyone else; the existing one is kept.
pub fn init_logging(level: tracing::Level) -> bool {
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// [`init_logging`] at the configured level, when there is one.
pub fn init_logging_from(config: &crate::ContextConfig) -> bool {
    config.log_level.map_or(false, init_logging)
}
