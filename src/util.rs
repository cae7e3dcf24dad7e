// lossweep: TLS Handshake Latency under Emulated and Real Network Impairment
// Copyright (C) 2025 The lossweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Utility module collection of functions

use std::path::{Path, PathBuf};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use lazy_static::lazy_static;

/// Configuration file that switches logging to `log4rs`.
pub const LOG4RS_CONFIG: &str = "log4rs.yml";

lazy_static! {
    /// All progress bars are drawn through this handle, such that log lines do not tear them.
    pub static ref PROGRESS: MultiProgress = MultiProgress::new();
}

/// Initialize logging. If a `log4rs.yml` exists in the working directory, it configures the
/// loggers (useful for long, unattended runs). Otherwise, `pretty_env_logger` is used and
/// controlled with `RUST_LOG` (default: `info`).
pub fn init_logging() {
    if Path::new(LOG4RS_CONFIG).exists() {
        match log4rs::init_file(LOG4RS_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Cannot use {LOG4RS_CONFIG}: {e}"),
        }
    }
    let logger = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .build();
    let level = logger.filter();
    if LogWrapper::new(PROGRESS.clone(), logger).try_init().is_ok() {
        log::set_max_level(level);
    }
}

/// Create a progress bar attached to [`PROGRESS`].
pub fn progress_bar(len: u64, msg: &'static str) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{msg}: [{bar:40}] {pos:>4}/{len:4}, elapsed: {elapsed}, eta: {eta}",
    )
    .map(|s| s.progress_chars("##-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    PROGRESS.add(ProgressBar::new(len).with_style(style).with_message(msg))
}

/// Coloured pass/fail glyph for console messages.
pub fn status(ok: bool) -> String {
    if ok {
        format!(
            "{}✅{}",
            termion::color::Fg(termion::color::Green),
            termion::color::Fg(termion::color::Reset)
        )
    } else {
        format!(
            "{}❌{}",
            termion::color::Fg(termion::color::Red),
            termion::color::Fg(termion::color::Reset)
        )
    }
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}
