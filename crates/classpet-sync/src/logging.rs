use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("classpet_sync=debug,classpet_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("ClassPet sync logging initialised");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_twice_is_harmless() {
        super::init();
        super::init();
        tracing::debug!("still logging");
    }
}
