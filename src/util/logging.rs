//! Standardized logging utility for displaycore
//!
//! Most diagnostics go through `tracing` directly. The `dlog!` macro is kept
//! for lifecycle messages that must reach stderr in the
//! `YYYY-MM-DD HH:MM:SS [MODULE] Message` format even when no subscriber
//! is installed (e.g. inside an embedding host).

use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! dlog {
    ($module:expr, $($arg:tt)*) => {{
        let now = chrono::Local::now();
        eprintln!("{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            $module,
            format!($($arg)*)
        );
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const BUFFER: &str = "BUFFER";
pub const SCREEN: &str = "SCREEN";
pub const DISPLAY: &str = "DISPLAY";
pub const WORKER: &str = "WORKER";
pub const CONFIG: &str = "CONFIG";

/// Timestamp format shared by `dlog!` and the fmt subscriber.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is
/// harmless: the second install fails and is reported through `dlog!`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},displaycore=debug")));

    let result = tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_env_filter(filter)
        .try_init();

    if let Err(err) = result {
        crate::dlog!(MAIN, "tracing subscriber already installed: {}", err);
    }
}
