//! Progress bars, conflict prompt and summaries for the command line.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::conflict::{ConflictChoice, ConflictPrompt};
use crate::progress::TransferProgress;
use crate::stats::{FileStats, SessionStats};
use crate::{format_bytes, format_duration, format_speed};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a progress bar for a single file.
fn make_progress_bar(size: u64, name: &str) -> ProgressBar {
    let bar = ProgressBar::new(size);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}",
    )
    .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("━━╌"));
    bar.set_style(style);
    bar.set_message(name.to_string());
    bar
}

/// One indicatif bar per file in flight, drawn under a shared [`MultiProgress`].
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn take(&self, name: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(name)
    }
}

impl TransferProgress for BarProgress {
    fn on_file_start(&self, name: &str, size: u64) {
        let bar = self.multi.add(make_progress_bar(size, name));
        bar.enable_steady_tick(std::time::Duration::from_millis(250));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(name.to_string(), bar);
        }
    }

    fn on_progress(&self, name: &str, cumulative: u64, _speed: u64) {
        if let Ok(bars) = self.bars.lock()
            && let Some(bar) = bars.get(name)
        {
            bar.set_position(cumulative);
        }
    }

    fn on_file_complete(&self, name: &str, stats: &FileStats) {
        if let Some(bar) = self.take(name) {
            bar.finish_and_clear();
        }
        let line = if stats.chunks == 0 {
            format!("  {} - {} (already on the drive)", name, format_bytes(stats.size))
        } else {
            format!(
                "  {} - {} in {} ({} avg, {} peak)",
                name,
                format_bytes(stats.size),
                format_duration(stats.elapsed),
                format_speed(stats.average_speed),
                format_speed(stats.peak_speed),
            )
        };
        let _ = self.multi.println(line);
    }

    fn on_file_error(&self, name: &str, error: &str) {
        if let Some(bar) = self.take(name) {
            bar.abandon();
        }
        let _ = self
            .multi
            .println(format!("  {} {name}: {error}", style("failed").red()));
    }

    fn on_directory_created(&self, path: &str) {
        let _ = self
            .multi
            .println(format!("  {} {path}/", style("dir").dim()));
    }
}

/// Asks on the terminal how to handle a conflicting remote file.
///
/// The read happens on the blocking pool; one question is asked at a time.
pub struct TerminalPrompt {
    multi: MultiProgress,
    asking: tokio::sync::Mutex<()>,
}

impl TerminalPrompt {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            asking: tokio::sync::Mutex::new(()),
        }
    }

    fn ask(name: &str) -> ConflictChoice {
        let term = Term::stderr();
        loop {
            let _ = term.write_str(&format!(
                "{} already exists. [k]eep both, [o]verwrite, [c]ancel? ",
                style(name).bold()
            ));
            match term.read_line() {
                Ok(answer) => match answer.trim().to_ascii_lowercase().as_str() {
                    "k" | "keep" => return ConflictChoice::KeepBoth,
                    "o" | "overwrite" => return ConflictChoice::Overwrite,
                    "c" | "cancel" => return ConflictChoice::Cancel,
                    _ => {}
                },
                Err(_) => return ConflictChoice::Cancel,
            }
        }
    }
}

#[async_trait]
impl ConflictPrompt for TerminalPrompt {
    async fn choose(&self, name: &str) -> ConflictChoice {
        let _guard = self.asking.lock().await;
        let multi = self.multi.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || multi.suspend(|| Self::ask(&name)))
            .await
            .unwrap_or(ConflictChoice::Cancel)
    }
}

/// Prints the summary of a push.
pub fn print_push_summary(stats: &SessionStats) {
    println!("\n{SEPARATOR}");
    println!("Upload Summary");
    println!("{SEPARATOR}");
    println!("  Files uploaded:    {}", stats.files_transferred);
    if stats.files_reused > 0 {
        println!("  Already on drive:  {}", stats.files_reused);
    }
    println!("  Directories:       {}", stats.directories);
    println!("  Total size:        {}", format_bytes(stats.total_bytes));
    println!("  Total time:        {}", format_duration(stats.elapsed));
    println!("  Average speed:     {}", format_speed(stats.average_speed()));
    println!("  Peak speed:        {}", format_speed(stats.peak_speed));
    if stats.files_cancelled > 0 {
        println!("  Cancelled:         {}", stats.files_cancelled);
    }
    if stats.files_failed > 0 {
        println!("  {}           {}", style("Failed:").red(), stats.files_failed);
    }
    if stats.files_skipped > 0 {
        println!("  {}          {}", style("Skipped:").yellow(), stats.files_skipped);
    }
    println!("{SEPARATOR}");
}

/// Prints the summary of a download.
pub fn print_get_summary(path: &std::path::Path, stats: &FileStats) {
    println!("\n{SEPARATOR}");
    println!("Download Summary");
    println!("{SEPARATOR}");
    println!("  Saved to:          {}", path.display());
    println!("  Size:              {}", format_bytes(stats.size));
    println!("  Ranges:            {}", stats.chunks);
    println!("  Total time:        {}", format_duration(stats.elapsed));
    println!("  Average speed:     {}", format_speed(stats.average_speed));
    println!("  Peak speed:        {}", format_speed(stats.peak_speed));
    println!("{SEPARATOR}");
}
