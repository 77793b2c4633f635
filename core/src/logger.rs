//----------------------------------------------------------------------------------------- std lib
use std::io::Write;
use std::time::Instant;
//--------------------------------------------------------------------------------- other libraries
use once_cell::sync::Lazy;

// This will get initialized below.
/// Returns the init [`Instant`]
pub static INIT_INSTANT: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the seconds since [`INIT_INSTANT`].
#[must_use]
pub fn uptime() -> u64 {
    INIT_INSTANT.elapsed().as_secs()
}

//---------------------------------------------------------------------------------------------------- Logger init function
#[allow(clippy::module_name_repetitions)]
/// Initializes the logger.
///
/// This enables console logging on all the internals of `beatgrid`.
///
/// Functionality is provided by [`log`].
///
/// The levels are:
/// - ERROR
/// - WARN
/// - INFO
/// - DEBUG
/// - TRACE
///
/// # Panics
/// This must only be called _once_.
pub fn init_logger(filter: log::LevelFilter) {
    // Initialize timer.
    let now = Lazy::force(&INIT_INSTANT);

    // If `RUST_LOG` is set it wins; otherwise only beatgrid crates log.
    let filters = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("off,beatgrid={filter},beatgrid_analysis={filter},beatgrid_core={filter}"));

    env_logger::Builder::new()
        .format(move |buf, record| {
            let level = match record.level() {
                log::Level::Debug => "D",
                log::Level::Trace => "T",
                log::Level::Info => "I",
                log::Level::Warn => "W",
                log::Level::Error => "E",
            };
            writeln!(
                buf,
                // Longest PATH in the repo: `core/src/worker/commands.rs` - `28` characters
                //
                //      Longest PATH ---|        |--- line number
                //                      |        |
                //                      v        v
                "| {} | {: >9.3} | {: >28} @ {: <4} | {}",
                level,
                now.elapsed().as_secs_f32(),
                record.file_static().unwrap_or("???"),
                record.line().unwrap_or(0),
                record.args(),
            )
        })
        .parse_filters(&filters)
        .init();

    log::info!("logger initialized at level {filter}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_starts_near_zero() {
        let _ = Lazy::force(&INIT_INSTANT);
        assert!(uptime() < 60 * 60);
    }
}
