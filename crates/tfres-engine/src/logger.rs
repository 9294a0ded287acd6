use console::Style;
use tracing::{error, info, warn};

/// User-facing status lines. Colours are ANSI (red 31, green 32, yellow 33,
/// blue 34) and every line goes out through `tracing`, i.e. to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Logger {
    pub fn info(&self, msg: &str) {
        info!("{}", Style::new().for_stderr().blue().apply_to(msg));
    }

    pub fn success(&self, msg: &str) {
        info!("{}", Style::new().for_stderr().green().apply_to(msg));
    }

    pub fn warn(&self, msg: &str) {
        warn!("{}", Style::new().for_stderr().yellow().apply_to(msg));
    }

    pub fn error(&self, msg: &str) {
        error!("{}", Style::new().for_stderr().red().apply_to(msg));
    }

    /// Open a `▼ title ▼` section; the `▲ title ▲` line is logged when the
    /// returned guard drops.
    pub fn section(&self, title: impl Into<String>) -> Section {
        let title = title.into();
        info!("{}", Style::new().for_stderr().blue().apply_to(format!("▼ {} ▼", title)));
        Section { title }
    }
}

#[must_use = "the section closes when dropped"]
pub struct Section {
    title: String,
}

impl Drop for Section {
    fn drop(&mut self) {
        info!("{}", Style::new().for_stderr().blue().apply_to(format!("▲ {} ▲", self.title)));
    }
}
