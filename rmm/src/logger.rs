use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Once;

/// Output sink for log records, usually the platform UART.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

struct SimpleLogger {
    console: Once<&'static dyn Console>,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.get() {
            let mut writer = ConsoleWriter(*console);
            let _ = if record.level() <= Level::Warn {
                writeln!(
                    writer,
                    "\x1b[0;31m[{}]{} -- {}\x1b[0m",
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    writer,
                    "[{}]{} -- {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            };
        }
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger {
    console: Once::new(),
};

pub fn register_global_logger(
    console: &'static dyn Console,
    maxlevel: LevelFilter,
) -> Result<(), SetLoggerError> {
    LOGGER.console.call_once(|| console);
    log::set_logger(&LOGGER)?;
    log::set_max_level(maxlevel);
    Ok(())
}
