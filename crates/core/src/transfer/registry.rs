//! Task registry actor
//!
//! A single tokio task owns the task map. Workers send it commands over an
//! unbounded channel; after every change it publishes a full snapshot on a
//! watch channel and, when one is installed, to a [`TaskSink`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::task::{TaskId, TaskStatus, TransferTask};

/// Receiver of task snapshots, called from the registry task
pub trait TaskSink: Send + Sync {
    fn publish(&self, tasks: &[TransferTask]);
}

enum Command {
    Insert(TransferTask),
    Progress {
        id: TaskId,
        completed: u64,
        total: u64,
    },
    Status {
        id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    },
    Remove {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Get {
        id: TaskId,
        reply: oneshot::Sender<Option<TransferTask>>,
    },
}

/// Answer to a query, delivered after the resulting snapshot is published
enum Reply {
    Removed(oneshot::Sender<bool>, bool),
    Task(oneshot::Sender<Option<TransferTask>>, Option<TransferTask>),
}

impl Reply {
    fn deliver(self) {
        // The asker may have given up waiting.
        match self {
            Reply::Removed(tx, removed) => {
                let _ = tx.send(removed);
            }
            Reply::Task(tx, task) => {
                let _ = tx.send(task);
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct Registry {
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Vec<TransferTask>>,
}

impl Registry {
    /// Spawn the registry task on the current runtime
    pub(crate) fn spawn(sink: Option<Arc<dyn TaskSink>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (publish, snapshots) = watch::channel(Vec::new());

        tokio::spawn(async move {
            let mut tasks: BTreeMap<TaskId, TransferTask> = BTreeMap::new();
            while let Some(command) = rx.recv().await {
                let (changed, reply) = apply(&mut tasks, command);
                if changed {
                    let snapshot: Vec<TransferTask> = tasks.values().cloned().collect();
                    if let Some(sink) = &sink {
                        sink.publish(&snapshot);
                    }
                    publish.send_replace(snapshot);
                }
                if let Some(reply) = reply {
                    reply.deliver();
                }
            }
            tracing::trace!("task registry stopped");
        });

        Self { tx, snapshots }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!("task registry is gone; dropping update");
        }
    }

    pub(crate) fn insert(&self, task: TransferTask) {
        self.send(Command::Insert(task));
    }

    pub(crate) fn progress(&self, id: TaskId, completed: u64, total: u64) {
        self.send(Command::Progress {
            id,
            completed,
            total,
        });
    }

    pub(crate) fn status(&self, id: TaskId, status: TaskStatus, error: Option<String>) {
        self.send(Command::Status { id, status, error });
    }

    /// Remove a terminal task; live tasks are kept
    pub(crate) async fn remove(&self, id: TaskId) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove { id, reply });
        rx.await.unwrap_or(false)
    }

    /// Current state of one task, ordered after every command sent so far
    pub(crate) async fn get(&self, id: TaskId) -> Option<TransferTask> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { id, reply });
        rx.await.ok().flatten()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Vec<TransferTask>> {
        self.snapshots.clone()
    }

    pub(crate) fn snapshot(&self) -> Vec<TransferTask> {
        self.snapshots.borrow().clone()
    }
}

/// Apply one command, returning whether the map changed
fn apply(tasks: &mut BTreeMap<TaskId, TransferTask>, command: Command) -> (bool, Option<Reply>) {
    match command {
        Command::Insert(task) => {
            tasks.insert(task.id, task);
            (true, None)
        }
        Command::Progress {
            id,
            completed,
            total,
        } => {
            let changed = tasks
                .get_mut(&id)
                .is_some_and(|t| t.record_progress(completed, total));
            (changed, None)
        }
        Command::Status { id, status, error } => {
            let changed = tasks
                .get_mut(&id)
                .is_some_and(|t| t.transition(status, error));
            (changed, None)
        }
        Command::Remove { id, reply } => {
            let removable = tasks.get(&id).is_some_and(|t| t.status.is_terminal());
            if removable {
                tasks.remove(&id);
            }
            (removable, Some(Reply::Removed(reply, removable)))
        }
        Command::Get { id, reply } => (false, Some(Reply::Task(reply, tasks.get(&id).cloned()))),
    }
}
