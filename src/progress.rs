use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Per-run task counters shared between workers.
#[derive(Clone)]
pub struct RunProgress {
    pub finished_tasks: Arc<AtomicUsize>,
    pub failed_tasks: Arc<AtomicUsize>,
    pub total_tasks: usize,
}

impl RunProgress {
    pub fn new(total_tasks: usize) -> Self {
        Self {
            finished_tasks: Arc::new(AtomicUsize::new(0)),
            failed_tasks: Arc::new(AtomicUsize::new(0)),
            total_tasks,
        }
    }

    pub fn add_finished(&self, success: bool) {
        if !success {
            self.failed_tasks.fetch_add(1, Ordering::SeqCst);
        }
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn message(&self) -> String {
        let finished = self.finished_tasks.load(Ordering::SeqCst);
        let failed = self.failed_tasks.load(Ordering::SeqCst);
        if failed == 0 {
            format!("{}/{} tasks finished", finished, self.total_tasks)
        } else {
            format!(
                "{}/{} tasks finished, {} failed",
                finished, self.total_tasks, failed
            )
        }
    }
}

/// `round((index + 1) / total * 100)%`
pub fn format_percentage(index: usize, total: usize) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    let percentage = ((index + 1) as f64 / total as f64 * 100.0).round();
    format!("{}%", percentage as u64)
}

pub fn progress_line(index: usize, total: usize, action: &str, key: &str) -> String {
    format!("[{}] {} {}", format_percentage(index, total), action, key)
}

/// Task progress bar; hidden when quiet.
pub fn task_bar(total_tasks: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total_tasks as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA: {eta} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Console output that stays above the progress bar.
#[derive(Clone)]
pub struct Console {
    bar: ProgressBar,
    quiet: bool,
}

impl Console {
    pub fn new(bar: ProgressBar, quiet: bool) -> Self {
        Self { bar, quiet }
    }

    /// Plain console lines, no bar.
    pub fn plain(quiet: bool) -> Self {
        Self::new(ProgressBar::hidden(), quiet)
    }

    pub fn line(&self, line: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        // A hidden bar swallows println, e.g. when stderr is not a terminal
        if self.bar.is_hidden() {
            println!("{}", line.as_ref());
        } else {
            self.bar.println(line.as_ref());
        }
    }
}
