//! The sub-agent bridge (C9): spawns one or many independent LLM sessions to
//! carry out a delegated task, each with its own per-spawn timeout racing an
//! external [`CancellationToken`], text/tool-use accumulation, output
//! truncation, and optional session-directory persistence.
//!
//! The bridge never talks to a concrete provider itself — it drives whatever
//! [`SessionFactory`] the caller configures, same narrow-interface split as
//! [`crate::runtime::ClientProvider`]. `agentgraph-core` never depends on
//! either.

use agentgraph_core::node::{SpawnOptions, SpawnResult};
use futures::stream::{BoxStream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Output truncation limit per spec §4.8: sub-agent output longer than this
/// is cut and an ellipsis appended.
const MAX_OUTPUT_CHARS: usize = 4000;

/// One chunk of a spawned session's streaming reply.
#[derive(Debug, Clone)]
pub enum SessionChunk {
    Text(String),
    ToolUse { name: String },
}

/// A live sub-agent session, as handed back by a [`SessionFactory`]. The
/// bridge destroys it on every exit path (success, failure, cancellation, or
/// timeout).
pub trait SpawnedSession: Send + Sync {
    /// Sends `task` and streams the reply. Consumed exactly once.
    fn run(&self, task: String) -> futures::future::BoxFuture<'static, crate::error::Result<BoxStream<'static, SessionChunk>>>;

    /// Best-effort cancellation of an in-flight `run`.
    fn cancel(&self) -> futures::future::BoxFuture<'static, ()>;

    /// Tears the session down. Always called, exactly once, regardless of
    /// how `run` ended.
    fn destroy(&self) -> futures::future::BoxFuture<'static, ()>;
}

/// Creates independent sessions for the bridge to drive. `agentgraph-sdk`
/// ships no concrete implementation — a real one wraps whatever provider
/// client the embedding application uses (out of scope per spec §1).
pub trait SessionFactory: Send + Sync {
    fn create(&self, opts: &SpawnOptions) -> futures::future::BoxFuture<'static, crate::error::Result<Arc<dyn SpawnedSession>>>;
}

/// Drives [`SessionFactory`] sessions on behalf of graph nodes.
pub struct SubagentBridge {
    factory: Arc<dyn SessionFactory>,
    persist_dir: Option<PathBuf>,
}

impl SubagentBridge {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory, persist_dir: None }
    }

    /// When set, every spawn result (success or failure) is written as
    /// `<persist_dir>/<agent_id>.json`.
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    /// Spawns one sub-agent. `abort` is raced against the spawn's own
    /// `opts.timeout`; whichever fires first cancels and destroys the
    /// session. Never returns `Err` — failure is reported as
    /// `SpawnResult { success: false, .. }` so a caller driving many spawns
    /// concurrently (see [`Self::spawn_parallel`]) never has to special-case
    /// one failing spawn.
    pub async fn spawn(&self, opts: SpawnOptions, abort: Option<CancellationToken>) -> SpawnResult {
        let agent_id = opts.agent_id.clone();
        tooling::logging::timed(&format!("spawn_subagent:{agent_id}"), self.spawn_inner(opts, abort)).await
    }

    async fn spawn_inner(&self, opts: SpawnOptions, abort: Option<CancellationToken>) -> SpawnResult {
        let started = Instant::now();
        let external = abort.unwrap_or_default();
        let agent_id = opts.agent_id.clone();
        let timeout = opts.timeout;

        let session = match self.factory.create(&opts).await {
            Ok(session) => session,
            Err(err) => {
                return SpawnResult {
                    agent_id,
                    success: false,
                    output: String::new(),
                    error: Some(err.to_string()),
                    tool_uses: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let task = opts.task.clone();
        let run = session.run(task);

        enum Outcome {
            Settled(crate::error::Result<BoxStream<'static, SessionChunk>>),
            Cancelled,
            TimedOut,
        }

        let outcome = match timeout {
            Some(duration) => tokio::select! {
                biased;
                _ = external.cancelled() => Outcome::Cancelled,
                _ = tokio::time::sleep(duration) => Outcome::TimedOut,
                result = run => Outcome::Settled(result),
            },
            None => tokio::select! {
                biased;
                _ = external.cancelled() => Outcome::Cancelled,
                result = run => Outcome::Settled(result),
            },
        };

        let result = match outcome {
            Outcome::Cancelled => {
                session.cancel().await;
                session.destroy().await;
                SpawnResult {
                    agent_id,
                    success: false,
                    output: String::new(),
                    error: Some(crate::error::SdkError::Cancelled.to_string()),
                    tool_uses: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Outcome::TimedOut => {
                session.cancel().await;
                session.destroy().await;
                let ms = timeout.map(|d| d.as_millis() as u64).unwrap_or(0);
                SpawnResult {
                    agent_id,
                    success: false,
                    output: String::new(),
                    error: Some(crate::error::SdkError::TimedOut(ms).to_string()),
                    tool_uses: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Outcome::Settled(Ok(mut chunks)) => {
                let mut output = String::new();
                let mut tool_uses = 0u32;
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        SessionChunk::Text(text) => output.push_str(&text),
                        SessionChunk::ToolUse { .. } => tool_uses += 1,
                    }
                }
                session.destroy().await;
                SpawnResult {
                    agent_id,
                    success: true,
                    output: truncate(output),
                    error: None,
                    tool_uses,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Outcome::Settled(Err(err)) => {
                session.destroy().await;
                SpawnResult {
                    agent_id,
                    success: false,
                    output: String::new(),
                    error: Some(err.to_string()),
                    tool_uses: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        self.persist(&result).await;
        result
    }

    /// Fans `opts` out concurrently. A settled-all join — one spawn failing
    /// does not cancel its siblings. Results map positionally to `opts`.
    pub async fn spawn_parallel(&self, opts: Vec<SpawnOptions>, abort: Option<CancellationToken>) -> Vec<SpawnResult> {
        let abort = abort.unwrap_or_default();
        let spawns = opts.into_iter().map(|o| self.spawn(o, Some(abort.clone())));
        futures::future::join_all(spawns).await
    }

    async fn persist(&self, result: &SpawnResult) {
        let Some(dir) = &self.persist_dir else { return };
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(error = %err, "failed to create sub-agent session directory");
            return;
        }
        let path = dir.join(format!("{}.json", sanitize(&result.agent_id)));
        let payload = serde_json::json!({
            "agentId": result.agent_id,
            "success": result.success,
            "output": result.output,
            "error": result.error,
            "toolUses": result.tool_uses,
            "durationMs": result.duration_ms,
        });
        match serde_json::to_vec_pretty(&payload) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    tracing::warn!(error = %err, path = %path.display(), "failed to persist sub-agent result");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize sub-agent result"),
        }
    }
}

fn truncate(output: String) -> String {
    if output.chars().count() <= MAX_OUTPUT_CHARS {
        return output;
    }
    let mut truncated: String = output.chars().take(MAX_OUTPUT_CHARS).collect();
    truncated.push_str("...");
    truncated
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::time::Duration;

    struct FakeSession {
        chunks: Vec<SessionChunk>,
        delay: Option<Duration>,
    }

    impl SpawnedSession for FakeSession {
        fn run(&self, _task: String) -> BoxFuture<'static, crate::error::Result<BoxStream<'static, SessionChunk>>> {
            let chunks = self.chunks.clone();
            let delay = self.delay;
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(futures::stream::iter(chunks).boxed())
            })
        }

        fn cancel(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }

        fn destroy(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    impl Clone for SessionChunk {
        fn clone(&self) -> Self {
            match self {
                SessionChunk::Text(s) => SessionChunk::Text(s.clone()),
                SessionChunk::ToolUse { name } => SessionChunk::ToolUse { name: name.clone() },
            }
        }
    }

    struct FakeFactory {
        delay: Option<Duration>,
    }

    impl SessionFactory for FakeFactory {
        fn create(&self, _opts: &SpawnOptions) -> BoxFuture<'static, crate::error::Result<Arc<dyn SpawnedSession>>> {
            let delay = self.delay;
            Box::pin(async move {
                Ok(Arc::new(FakeSession {
                    chunks: vec![
                        SessionChunk::Text("hello ".to_string()),
                        SessionChunk::ToolUse { name: "search".to_string() },
                        SessionChunk::Text("world".to_string()),
                    ],
                    delay,
                }) as Arc<dyn SpawnedSession>)
            })
        }
    }

    #[tokio::test]
    async fn spawn_accumulates_text_and_counts_tool_uses() {
        let bridge = SubagentBridge::new(Arc::new(FakeFactory { delay: None }));
        let result = bridge.spawn(SpawnOptions::new("a1", "worker", "do the thing"), None).await;
        assert!(result.success);
        assert_eq!(result.output, "hello world");
        assert_eq!(result.tool_uses, 1);
    }

    #[tokio::test]
    async fn spawn_times_out_when_session_is_slow() {
        let bridge = SubagentBridge::new(Arc::new(FakeFactory { delay: Some(Duration::from_millis(200)) }));
        let mut opts = SpawnOptions::new("a1", "worker", "slow task");
        opts.timeout = Some(Duration::from_millis(20));
        let result = bridge.spawn(opts, None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn spawn_reports_cancellation_distinctly_from_timeout() {
        let bridge = SubagentBridge::new(Arc::new(FakeFactory { delay: Some(Duration::from_millis(200)) }));
        let token = CancellationToken::new();
        token.cancel();
        let result = bridge.spawn(SpawnOptions::new("a1", "worker", "task"), Some(token)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }

    // S6 — mixed success/failure parallel fan-out: one failing spawn does
    // not cancel its siblings, and results map positionally.
    #[tokio::test]
    async fn spawn_parallel_isolates_one_failure_from_the_rest() {
        struct MixedFactory;
        impl SessionFactory for MixedFactory {
            fn create(&self, opts: &SpawnOptions) -> BoxFuture<'static, crate::error::Result<Arc<dyn SpawnedSession>>> {
                let fail = opts.agent_id == "middle";
                Box::pin(async move {
                    if fail {
                        Err(crate::error::SdkError::SpawnFailed { agent_id: "middle".into(), message: "boom".into() })
                    } else {
                        Ok(Arc::new(FakeSession { chunks: vec![SessionChunk::Text("ok".into())], delay: None }) as Arc<dyn SpawnedSession>)
                    }
                })
            }
        }

        let bridge = SubagentBridge::new(Arc::new(MixedFactory));
        let opts = vec![
            SpawnOptions::new("first", "w", "t"),
            SpawnOptions::new("middle", "w", "t"),
            SpawnOptions::new("third", "w", "t"),
        ];
        let results = bridge.spawn_parallel(opts, None).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(results[0].agent_id, "first");
        assert_eq!(results[1].agent_id, "middle");
        assert_eq!(results[2].agent_id, "third");
    }
}
