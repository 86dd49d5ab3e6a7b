use std::io::{self, Write};
use std::time::Instant;

/// User-facing status lines on stderr, prefixed with the elapsed time.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.line("", msg.as_ref());
    }

    /// Shown even when the problem is recovered from; also sent to `log`.
    pub fn warn(&self, msg: impl AsRef<str>) {
        log::warn!("{}", msg.as_ref());
        self.line("WARN ", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        self.line("", &format!("{label} {current}/{total} ({pct:5.1}%)"));
    }

    pub fn summary(&self, label: &str, ok: usize, failed: usize) {
        if failed == 0 {
            self.info(format!("{label}: {ok} done"));
        } else {
            self.warn(format!("{label}: {ok} done, {failed} failed"));
        }
    }

    fn line(&self, level: &str, msg: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {level}{msg}");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
