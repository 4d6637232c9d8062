use std::io::{self, Write};
use std::time::Instant;

/// Timestamped stage logging on stderr. Library callers usually pass a disabled instance.
#[derive(Clone)]
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

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit("", msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit("[warn] ", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        self.emit("", &format!("{label} {current}/{total} ({pct:5.1}%)"));
    }

    fn emit(&self, level: &str, msg: &str) {
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

#[cfg(test)]
mod tests {
    use super::fmt_elapsed;

    #[test]
    fn elapsed_switches_to_hours() {
        assert_eq!(fmt_elapsed(61.9), "01:01");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-3.0), "00:00");
    }
}
