//! Progress display for transfer engine tasks
//!
//! Renders task snapshots published by the engine as indicatif bars, one per
//! task. In quiet, JSON or no-progress mode nothing is drawn.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use stow_core::{ProgressUnit, TaskId, TaskStatus, TransferTask};

use super::OutputConfig;

const BYTES_TEMPLATE: &str =
    "{spinner:.green} {msg:20!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const COUNT_TEMPLATE: &str = "{spinner:.green} {msg:20!} [{bar:40.cyan/blue}] {pos}/{len}";

fn style_for(unit: ProgressUnit) -> ProgressStyle {
    let template = match unit {
        ProgressUnit::Bytes => BYTES_TEMPLATE,
        ProgressUnit::Files | ProgressUnit::Objects => COUNT_TEMPLATE,
    };
    ProgressStyle::default_bar()
        .template(template)
        .expect("valid template")
        .progress_chars("#>-")
}

/// Progress bars keyed by task
pub struct TaskProgress {
    multi: Option<MultiProgress>,
    bars: HashMap<TaskId, ProgressBar>,
}

impl TaskProgress {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            multi: config.show_progress().then(MultiProgress::new),
            bars: HashMap::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.multi.is_some()
    }

    /// Apply one engine snapshot
    pub fn update(&mut self, tasks: &[TransferTask]) {
        let Some(multi) = &self.multi else {
            return;
        };

        for task in tasks {
            let bar = self.bars.entry(task.id).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(task.total_units));
                bar.set_style(style_for(task.unit));
                bar.set_message(task.name.clone());
                bar
            });
            if bar.is_finished() {
                continue;
            }

            bar.set_length(task.total_units);
            bar.set_position(task.completed_units);
            match task.status {
                TaskStatus::Pending | TaskStatus::InProgress => {}
                TaskStatus::Completed => bar.finish(),
                TaskStatus::Failed | TaskStatus::Cancelled => bar.abandon(),
            }
        }
    }

    /// Clear all bars from the terminal
    pub fn finish(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        if let Some(multi) = &self.multi {
            let _ = multi.clear();
        }
    }
}
