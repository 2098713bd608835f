use tracing_subscriber::EnvFilter;

/// Colored, level-tagged lines on stderr. `RUST_LOG` overrides the default
/// filter; `verbose` raises this crate to debug.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,phoenix_ops=debug,phoenix_provision=debug"
    } else {
        "warn,phoenix_ops=info,phoenix_provision=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
