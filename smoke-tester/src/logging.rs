use indicatif::MultiProgress;
use parking_lot::Mutex;
use std::sync::LazyLock;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Stores the progress bar for the logging facility.
static PROGRESS_BAR: LazyLock<Mutex<Option<MultiProgress>>> = LazyLock::new(|| Mutex::new(None));

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "UPPER")]
pub enum LevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LevelFilter {
    fn into_tracing(self) -> tracing::level_filters::LevelFilter {
        match self {
            Self::Off => tracing::level_filters::LevelFilter::OFF,
            Self::Error => tracing::level_filters::LevelFilter::ERROR,
            Self::Warn => tracing::level_filters::LevelFilter::WARN,
            Self::Info => tracing::level_filters::LevelFilter::INFO,
            Self::Debug => tracing::level_filters::LevelFilter::DEBUG,
            Self::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

// Log lines are printed above the progress bar while one is shown.
struct ProgressBarWriter;

impl std::io::Write for ProgressBarWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let out_str = String::from_utf8_lossy(buf);
        let out_str = out_str
            .strip_suffix("\r\n")
            .or_else(|| out_str.strip_suffix('\n'))
            .unwrap_or(out_str.as_ref());

        match PROGRESS_BAR.lock().as_ref() {
            Some(progress) => {
                let _ = progress.println(out_str);
            }
            None => eprintln!("{out_str}"),
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configures tracing.
///
/// Without an explicit level, `RUST_LOG` is used, falling back to `WARN`.
pub fn setup_logging(default: Option<LevelFilter>) {
    let filter = match default {
        Some(filter) => EnvFilter::builder()
            .with_default_directive(filter.into_tracing().into())
            .parse_lossy(""),
        None => EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
            .from_env_lossy(),
    };

    let stderr_subscriber = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(|| ProgressBarWriter)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(stderr_subscriber)
        .init();
}

/// Sets the currently displayed progress bar.
pub fn set_progress_bar(progress: MultiProgress) {
    *PROGRESS_BAR.lock() = Some(progress);
}

/// Disables the currently displayed progress bar.
pub fn clear_progress_bar() {
    *PROGRESS_BAR.lock() = None;
}
