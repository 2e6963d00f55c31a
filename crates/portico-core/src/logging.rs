use std::{fmt, sync::Arc};

use log::{Level, Log, Metadata, Record};

const DEFAULT_TARGET: &str = "portico";

/// A logger handle passed explicitly into the server and its components.
///
/// `Logger::global()` forwards every record to whatever logger has been installed through the
/// `log` facade (`env_logger` in the CLI). Tests and embedders can pass their own sink with
/// `Logger::new` instead of relying on process-wide state.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

/// Forwards records to the logger installed in the `log` facade.
struct FacadeSink;

impl Log for FacadeSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

impl Logger {
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Logger {
            sink,
            target: DEFAULT_TARGET,
        }
    }

    /// A logger that writes through the global `log` facade.
    pub fn global() -> Self {
        Logger::new(Arc::new(FacadeSink))
    }

    /// Returns a copy of this logger that tags its records with `target`.
    pub fn with_target(&self, target: &'static str) -> Self {
        Logger {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder()
            .level(level)
            .target(self.target)
            .build();

        if !self.sink.enabled(&metadata) {
            return;
        }

        self.sink.log(
            &Record::builder()
                .metadata(metadata)
                .args(args)
                .module_path_static(Some(module_path!()))
                .build(),
        );
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::global()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        records: Mutex<Vec<(Level, String, String)>>,
    }

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Info
        }

        fn log(&self, record: &Record) {
            self.records.lock().unwrap().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_logger_filters_by_sink() {
        let capture = Arc::new(Capture::default());
        let logger = Logger::new(capture.clone());

        log_info!(logger, "listening on {}", 8080);
        log_debug!(logger, "not recorded");

        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Level::Info);
        assert_eq!(records[0].1, "portico");
        assert_eq!(records[0].2, "listening on 8080");
    }

    #[test]
    fn test_logger_with_target() {
        let capture = Arc::new(Capture::default());
        let logger = Logger::new(capture.clone()).with_target("portico::tls");

        log_warn!(logger, "handshake failed");

        let records = capture.records.lock().unwrap();
        assert_eq!(records[0].1, "portico::tls");
    }
}
