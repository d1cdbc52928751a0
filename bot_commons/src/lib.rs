//! This crate houses common for me functions, because some things
//! are just boilerplate and aaAAAAAAAAA

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    future::Future,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Writes everything both to stderr and to a file.
/// Used to keep a log file around alongside the console output.
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    /// Open `path` for appending, creating it if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> io::Result<TeeWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TeeWriter { file })
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Report how loading `.env` went. Not finding one is fine.
fn log_dotenv_result(result: Result<PathBuf, dotenvy::Error>) {
    match result {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => (),
        Err(e) => log::warn!("Failed to load .env file: {e}"),
    }
}

/// Log filter to use: `RUST_LOG` if it's set (and is valid UTF-8),
/// `default` otherwise.
fn log_filter(rust_log: Option<OsString>, default: &str) -> String {
    rust_log
        .and_then(|filter| filter.into_string().ok())
        .unwrap_or_else(|| default.to_string())
}

/// Initialize logging and start the `closure` in an async runtime.
/// Logging is enabled with filter `default_log_filter` (like `info`) unless
/// overridden by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// If environment variable `LOG_FILE` is set, everything logged is also
/// appended to that file.
///
/// `.env` is loaded before any of that, so it can set these too.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
///
/// # Panics
///
/// Panics if the async runtime can't be built.
pub fn start_everything(default_log_filter: &str, closure: impl Future<Output = ()>) {
    // Variables already present in the environment are not overridden.
    let dotenv_result = dotenvy::dotenv();

    let log_level = log_filter(std::env::var_os("RUST_LOG"), default_log_filter);

    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    let log_file = std::env::var_os("LOG_FILE");
    let mut log_file_error = None;
    if let Some(path) = &log_file {
        match TeeWriter::open(path) {
            Ok(tee) => {
                builder
                    .target(env_logger::Target::Pipe(Box::new(tee)))
                    .write_style(env_logger::WriteStyle::Never);
            }
            Err(e) => log_file_error = Some(e),
        }
    }

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    if let (Some(path), Some(e)) = (log_file, log_file_error) {
        log::error!("Could not open log file {:?}, logging to stderr only: {e}", path);
    }

    log_dotenv_result(dotenv_result);

    log::info!("hi");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the async runtime!")
        .block_on(closure);
}
