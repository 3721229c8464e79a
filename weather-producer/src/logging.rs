use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use weather_core::config::LoggingConfig;

/// Crates whose `info` output is noise for an operator.
const QUIET_DEPENDENCIES: &str = "lapin=warn,hyper=warn,reqwest=warn";

/// Install the global subscriber: stdout plus a dated log file.
///
/// `RUST_LOG` wins over the configured level. When the log file cannot be
/// opened, logging continues on stdout only.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let path = log_file_path(&config.dir);
    let (file, file_error) = match open_log_file(&path) {
        Ok(file) => (Some(file), None),
        Err(err) => (None, Some(err)),
    };
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        warn!(path = %path.display(), error = %err, "Cannot open log file, logging to stdout only");
    }
}

fn default_directive(level: &str) -> String {
    format!("{level},{QUIET_DEPENDENCIES}")
}

fn log_file_path(dir: &Path) -> PathBuf {
    let date = chrono::Local::now().format("%Y%m%d");
    dir.join(format!("weather_producer_{date}.log"))
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
