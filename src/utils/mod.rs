use std::io::BufRead;
use std::time::Instant;
use tracing::{info, warn};

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Print `message` and wait for the operator to press Enter.
///
/// Reads stdin on the blocking pool so the runtime keeps driving the
/// browser handlers in the meantime.
pub async fn prompt_enter(message: &str) {
    eprintln!("{message}");
    eprintln!("Press Enter to continue...");
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| ())
    })
    .await;
    match read {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Could not read stdin: {}", e),
        Err(e) => warn!("Prompt task failed: {}", e),
    }
}

/// `n` as a percentage of `total`, for summary lines.
pub fn pct(n: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { n as f64 * 100.0 / total as f64 }
}
