// logging.rs — Global tracing subscriber for demos, benches and hosts.
//
// The library only emits `tracing` events; installing a subscriber is left
// to the binary. `init_tracing` is idempotent so every demo and bench can
// call it unconditionally.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<bool> = OnceLock::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `true` if this crate's subscriber is the active global one,
/// `false` if the host had already installed its own.
pub fn init_tracing() -> bool {
    *INITIALISED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr);
        Registry::default().with(filter).with(fmt_layer).try_init().is_ok()
    })
}
