use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use crate::ui::{Icons, theme};

/// Progress bar for bulk node creation; hidden when stdout is not a terminal
pub struct ImportProgress {
    pb: ProgressBar,
    started: Instant,
}

impl ImportProgress {
    pub fn new(total: usize) -> Self {
        let pb = if console::Term::stdout().is_term() {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
                pb.set_style(style);
            }
            pb
        } else {
            ProgressBar::hidden()
        };
        Self {
            pb,
            started: Instant::now(),
        }
    }

    pub fn inc(&self, name: &str) {
        self.pb.set_message(name.to_string());
        self.pb.inc(1);
    }

    pub fn finish(&self, created: usize, skipped: usize) {
        self.pb.finish_and_clear();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success),
            format!(
                "Created {} nodes in {}",
                created,
                HumanDuration(self.started.elapsed())
            )
            .style(theme().success)
        );
        if skipped > 0 {
            println!("  {} skipped", skipped.style(theme().warn));
        }
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        Self { pb }
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}
