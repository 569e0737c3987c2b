use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Maps the number of `-v` flags to a level filter
pub fn level_for(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Initialize the logger with custom formatting showing elapsed time.
///
/// Output format: [HH:MM:SS] LEVEL: message
/// All output goes to stderr.
pub fn init_logger(verbosity: u8) {
    START_TIME.set(Instant::now()).ok();

    env_logger::Builder::from_default_env()
        .filter_level(level_for(verbosity))
        .format(|buf, record| {
            let elapsed = START_TIME
                .get()
                .map(Instant::elapsed)
                .unwrap_or_default()
                .as_secs();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                elapsed / 3600,
                (elapsed % 3600) / 60,
                elapsed % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), log::LevelFilter::Warn);
        assert_eq!(level_for(1), log::LevelFilter::Info);
        assert_eq!(level_for(2), log::LevelFilter::Debug);
        assert_eq!(level_for(9), log::LevelFilter::Trace);
    }
}
