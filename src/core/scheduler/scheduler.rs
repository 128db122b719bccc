// Deferred side effects: message auto-deletion, vote conclusion, cleanup.
//
// Each delayed action is an independent detached tokio task keyed so it can
// be cancelled if its target disappears first. Scheduling the same key again
// replaces (cancels) the previous task.

use crate::core::chat::ChatApi;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    DeleteMessage { chat_id: i64, message_id: i64 },
    ConcludeVote { group_id: i64, message_id: i64 },
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Arc<DashMap<TaskKey, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending task under `key`.
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some((_, previous)) = self.tasks.remove(&key) {
            previous.abort();
        }

        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
            tasks.remove(&key);
        });
        self.tasks.insert(key, handle);
    }

    /// Cancel a pending task. Returns whether one was pending.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Delete a chat message after `delay`, tolerating an already-gone target.
    pub fn delete_message_after(
        &self,
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        message_id: i64,
        delay: Duration,
    ) {
        self.schedule(
            TaskKey::DeleteMessage {
                chat_id,
                message_id,
            },
            delay,
            async move {
                if let Err(err) = chat.delete_message(chat_id, message_id).await {
                    tracing::warn!(chat_id, message_id, %err, "delayed delete failed");
                }
            },
        );
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }
}
