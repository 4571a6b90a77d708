use env_logger::Builder;
use log::LevelFilter;
use std::fmt::Display;
use std::io::Write;
use std::time::SystemTime;

/// Installs the global logger: `info` unless `RUST_LOG` says otherwise.
pub fn setup_logging() {
    let colored = atty::is(atty::Stream::Stderr);
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .format(move |buf, record| {
            let timestamp = humantime::format_rfc3339_millis(SystemTime::now());
            let (color, reset) = if colored {
                (level_color(record.level()), "\x1B[0m")
            } else {
                ("", "")
            };
            write!(
                buf,
                "{}{:>5}{} [{}] {}",
                color,
                record.level(),
                reset,
                timestamp,
                record.args()
            )?;
            // Source locations only help when chasing a single request.
            if record.level() > log::Level::Info {
                write!(
                    buf,
                    " - {}:{}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )?;
            }
            writeln!(buf)
        })
        .init();
}

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1B[31m",
        log::Level::Warn => "\x1B[33m",
        log::Level::Info => "\x1B[32m",
        log::Level::Debug => "\x1B[36m",
        log::Level::Trace => "\x1B[35m",
    }
}

#[macro_export]
macro_rules! log_request {
    ($request:expr) => {
        log::debug!("→ {} {}", $request.method, $request.path_lossy())
    };
}

#[macro_export]
macro_rules! log_response {
    ($status:expr, $duration:expr, $size:expr) => {
        log::debug!("← {} ({:?}) - {} bytes", $status, $duration, $size)
    };
}

#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        log::error!("❌ {} - {}", $context, $error)
    };
}

pub trait LoggingExt {
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display;
}

impl<S: ?Sized + Display> LoggingExt for S {
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        log::debug!("Starting {} on {}", operation, self);
        match f() {
            Ok(result) => {
                log::debug!("Completed {} on {}", operation, self);
                Ok(result)
            }
            Err(e) => {
                log::error!("Failed {} on {}: {}", operation, self, e);
                Err(e)
            }
        }
    }
}
