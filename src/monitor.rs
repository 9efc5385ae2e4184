use std::io::Write;

pub const BAR_WIDTH: usize = 40;

/// Counts shown on the progress line. Read-only view of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Log entries held locally, as of the last log scan.
    pub have: u64,
    pub missing: u64,
    pub pub_blobs: u64,
    pub session_blobs: u64,
    pub connected: u64,
}

impl ProgressSnapshot {
    pub fn db_total(&self) -> u64 {
        self.have + self.pub_blobs + self.session_blobs
    }

    pub fn render(&self) -> String {
        render_progress(self.have, self.missing, self.db_total())
    }
}

fn make_bar(have: u64, total: u64) -> String {
    let ratio = if total > 0 { have as f64 / total as f64 } else { 1.0 };
    let filled = ((ratio * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

/// `[####----] have/total missing M | db D`
pub fn render_progress(have: u64, missing: u64, db: u64) -> String {
    let total = have + missing;
    format!("{} {}/{} missing {} | db {}", make_bar(have, total), have, total, missing, db)
}

/// Rewrites one terminal line in place.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    last_len: usize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `\r` + line, padded so a shorter line fully covers the previous one.
    pub fn frame(&mut self, line: &str) -> String {
        let pad = self.last_len.saturating_sub(line.len());
        self.last_len = line.len();
        format!("\r{}{}", line, " ".repeat(pad))
    }

    pub fn render(&mut self, snapshot: &ProgressSnapshot) {
        let frame = self.frame(&snapshot.render());
        let mut out = std::io::stdout();
        let _ = out.write_all(frame.as_bytes());
        let _ = out.flush();
    }
}
