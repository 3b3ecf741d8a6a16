//! Byte-count progress bar for client transfers

use indicatif::{ProgressBar, ProgressStyle};

pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// A bar sized to `total` bytes; `visible = false` yields a hidden bar for
    /// non-interactive use.
    pub fn new(label: &str, total: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} [{bar:30.green/white}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());

        Self { bar }
    }

    pub fn inc(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Clear the bar; the caller prints its own summary line.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for TransferProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_counts_bytes() {
        let p = TransferProgress::new("a.bin", 100, false);
        p.inc(40);
        p.inc(60);
        assert_eq!(p.position(), 100);
        p.finish();
    }
}
