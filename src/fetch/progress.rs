//! Transfer progress reporting.

use std::path::Path;

/// Receives progress events while a remote file is streamed to disk.
///
/// `downloaded` is cumulative. `total` is the advertised content length, if
/// any.
pub trait Progress {
    fn begin(&self, _url: &str, _total: Option<u64>) {}

    fn advance(&self, downloaded: u64, total: Option<u64>);

    fn finish(&self, _path: &Path) {}
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&self, _downloaded: u64, _total: Option<u64>) {}
}

/// Terminal progress bar backed by `indicatif`.
#[derive(Debug)]
pub struct BarProgress {
    bar: indicatif::ProgressBar,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = indicatif::ProgressBar::hidden();
        Self { bar }
    }
}

impl Progress for BarProgress {
    fn begin(&self, url: &str, total: Option<u64>) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        match total {
            Some(total) => {
                self.bar.set_length(total);
                if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
                    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA: {eta})",
                ) {
                    self.bar.set_style(style.progress_chars("=> "));
                }
            }
            None => {
                if let Ok(style) =
                    indicatif::ProgressStyle::default_spinner().template("{msg} {spinner} {bytes}")
                {
                    self.bar.set_style(style);
                }
            }
        }
        let name = url.rsplit('/').next().unwrap_or(url).to_string();
        self.bar.set_message(name);
    }

    fn advance(&self, downloaded: u64, _total: Option<u64>) {
        self.bar.set_position(downloaded);
    }

    fn finish(&self, _path: &Path) {
        self.bar.finish_and_clear();
    }
}
