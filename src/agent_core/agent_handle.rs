//! Persistent agent handle — the session's long-lived reasoning context.
//!
//! An [`AgentHandle`] is a worker task spawned on the tokio runtime that was
//! current when the handle was created, plus the sending half of its job
//! channel. Reasoning-tier calls are sent to that worker as jobs.
//!
//! The worker's lifetime is the runtime's lifetime: when the runtime shuts
//! down, the task is dropped and the channel closes. A closed channel is the
//! only signal that the handle is unusable; callers see it as
//! `ExecutorError::SessionUnusable` and the controller recreates the handle.
//!
//! The handle also owns the agent's working memory: one-line notes about tool
//! work done in earlier turns. Recreating the handle starts that memory over.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use super::errors::ExecutorError;
use crate::inference::backend::ReasoningBackend;
use crate::inference::errors::InferenceError;
use crate::inference::types::{ChatMessage, Completion, ToolDefinition};

/// Pending jobs a worker will buffer. Turns are sequential, so one in flight
/// plus a little slack is plenty.
const JOB_QUEUE_DEPTH: usize = 4;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// One completion request for the worker.
struct AgentJob {
    messages: Vec<ChatMessage>,
    tools: Option<Vec<ToolDefinition>>,
    reply: oneshot::Sender<Result<Completion, InferenceError>>,
}

// ─── AgentHandle ────────────────────────────────────────────────────────────

/// Owned exclusively by the active `ConversationSession`.
pub struct AgentHandle {
    id: u64,
    tx: mpsc::Sender<AgentJob>,
    notes: VecDeque<String>,
    note_limit: usize,
    created_at: DateTime<Utc>,
}

impl AgentHandle {
    /// Spawn a worker on the current tokio runtime.
    ///
    /// Fails with `SessionUnusable` when called outside a runtime.
    pub fn spawn(
        backend: Arc<dyn ReasoningBackend>,
        note_limit: usize,
    ) -> Result<Self, ExecutorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ExecutorError::SessionUnusable {
                reason: format!("no async runtime to host the agent: {e}"),
            }
        })?;

        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        runtime.spawn(run_worker(id, backend, rx));

        tracing::info!(handle_id = id, "agent handle created");

        Ok(Self {
            id,
            tx,
            notes: VecDeque::new(),
            note_limit: note_limit.max(1),
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `false` once the worker's runtime has been torn down.
    pub fn is_usable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Take a short-lived lease for one turn's calls.
    pub fn lease(&self) -> Result<AgentLease, ExecutorError> {
        if !self.is_usable() {
            return Err(ExecutorError::SessionUnusable {
                reason: format!("agent handle {} lost its runtime", self.id),
            });
        }
        Ok(AgentLease {
            handle_id: self.id,
            tx: self.tx.clone(),
            notes: self.notes.iter().cloned().collect(),
        })
    }

    /// Append working-memory notes, dropping the oldest beyond the limit.
    pub fn remember<I>(&mut self, notes: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.notes.extend(notes);
        while self.notes.len() > self.note_limit {
            self.notes.pop_front();
        }
    }

    pub fn memory_len(&self) -> usize {
        self.notes.len()
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("usable", &self.is_usable())
            .field("notes", &self.notes.len())
            .finish()
    }
}

/// Worker loop. Exits when every sender is gone; is dropped mid-job when its
/// runtime shuts down.
async fn run_worker(
    id: u64,
    backend: Arc<dyn ReasoningBackend>,
    mut rx: mpsc::Receiver<AgentJob>,
) {
    while let Some(job) = rx.recv().await {
        let AgentJob {
            messages,
            tools,
            mut reply,
        } = job;

        let outcome = tokio::select! {
            result = backend.complete(messages, tools) => Some(result),
            _ = reply.closed() => None,
        };

        match outcome {
            Some(result) => {
                let _ = reply.send(result);
            }
            None => {
                tracing::debug!(handle_id = id, "caller abandoned call; backend request cancelled");
            }
        }
    }
    tracing::debug!(handle_id = id, "agent worker stopped");
}

// ─── AgentLease ─────────────────────────────────────────────────────────────

/// Borrowed access to the agent for the duration of one turn.
///
/// Holds no lock: it is a sender clone plus a snapshot of working memory.
#[derive(Debug, Clone)]
pub struct AgentLease {
    handle_id: u64,
    tx: mpsc::Sender<AgentJob>,
    notes: Vec<String>,
}

impl AgentLease {
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    /// Working-memory notes as of lease time.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Run one completion on the agent's worker.
    ///
    /// Dropping the returned future abandons the call; the worker notices and
    /// cancels the backend request.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, ExecutorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AgentJob {
                messages,
                tools,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExecutorError::SessionUnusable {
                reason: format!("agent handle {} worker has stopped", self.handle_id),
            })?;

        match reply_rx.await {
            Ok(result) => result.map_err(ExecutorError::from),
            Err(_) => Err(ExecutorError::SessionUnusable {
                reason: format!("agent handle {} stopped mid-call", self.handle_id),
            }),
        }
    }
}

impl std::fmt::Debug for AgentJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentJob")
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::errors::ErrorKind;
    use crate::agent_core::testing::ScriptedBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lease_round_trip() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(Completion::text("hello"))]));
        let handle = AgentHandle::spawn(backend.clone(), 8).unwrap();
        assert!(handle.is_usable());

        let lease = handle.lease().unwrap();
        assert_eq!(lease.handle_id(), handle.id());
        let completion = lease
            .complete(vec![ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(completion.text.as_deref(), Some("hello"));
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn test_spawn_outside_runtime_is_unusable() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let err = AgentHandle::spawn(backend, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnusable);
    }

    #[test]
    fn test_runtime_teardown_closes_handle() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handle = rt.block_on(async { AgentHandle::spawn(backend, 8).unwrap() });
        // Let the worker start.
        rt.block_on(tokio::task::yield_now());
        assert!(handle.is_usable());

        drop(rt);
        assert!(!handle.is_usable());
        assert_eq!(handle.lease().unwrap_err().kind(), ErrorKind::SessionUnusable);
    }

    #[tokio::test]
    async fn test_abandoned_call_is_cancelled() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![Ok(Completion::text("late"))])
                .with_delay(Duration::from_secs(30)),
        );
        let handle = AgentHandle::spawn(backend.clone(), 8).unwrap();
        let lease = handle.lease().unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            lease.complete(vec![ChatMessage::user("slow")], None),
        )
        .await;
        assert!(result.is_err(), "call should time out");

        // The worker is free again for the next job.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_usable());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_not_unusable() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(InferenceError::Timeout {
            duration_secs: 1,
        })]));
        let handle = AgentHandle::spawn(backend, 8).unwrap();
        let err = handle
            .lease()
            .unwrap()
            .complete(vec![ChatMessage::user("x")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReasoningBackendError);
        assert!(handle.is_usable());
    }

    #[tokio::test]
    async fn test_memory_is_bounded() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let mut handle = AgentHandle::spawn(backend, 3).unwrap();
        handle.remember((0..5).map(|i| format!("note {i}")));
        assert_eq!(handle.memory_len(), 3);
        assert_eq!(handle.lease().unwrap().notes()[0], "note 2");
    }

    #[tokio::test]
    async fn test_handle_ids_are_unique() {
        let backend: Arc<dyn ReasoningBackend> = Arc::new(ScriptedBackend::new(vec![]));
        let a = AgentHandle::spawn(backend.clone(), 1).unwrap();
        let b = AgentHandle::spawn(backend, 1).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
