//! Natural-language questions about the table, answered by an LLM.
//!
//! The inventory only hands over a [`TableSnapshot`]; prompt construction
//! lives here and the completion call sits behind the [`Agent`] trait.

pub mod groq;
pub mod snapshot;

use std::{future::Future, time::Duration};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

pub use groq::GroqAgent;
pub use snapshot::TableSnapshot;

use crate::error::{InventoryError, Result};

/// A text-completion backend: prompt in, answer out.
pub trait Agent {
    fn complete(&self, prompt: String) -> impl Future<Output = anyhow::Result<String>> + Send;
}

pub fn build_prompt(snapshot: &TableSnapshot, question: &str) -> String {
    format!(
        "Answer the following question about this inventory data:\n{}\nQuestion: {}",
        snapshot.render(),
        question.trim()
    )
}

/// Forward `question` about `snapshot` to `agent`, giving up after `limit`.
///
/// Failures here are advisory; they never touch stored data.
pub async fn ask<A: Agent>(
    agent: &A,
    snapshot: &TableSnapshot,
    question: &str,
    limit: Duration,
) -> Result<String> {
    if question.trim().is_empty() {
        return Err(InventoryError::Agent("question is empty".to_string()));
    }
    let prompt = build_prompt(snapshot, question);
    let start = Instant::now();

    match timeout(limit, agent.complete(prompt)).await {
        Ok(Ok(answer)) => {
            info!(elapsed = ?start.elapsed(), rows = snapshot.cells.len(), "agent answered");
            Ok(answer)
        }
        Ok(Err(e)) => {
            warn!(error = %format!("{:#}", e), "agent request failed");
            Err(InventoryError::Agent(format!("{:#}", e)))
        }
        Err(_) => {
            warn!(?limit, "agent timed out");
            Err(InventoryError::AgentTimeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};
    use std::sync::Mutex;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: std::result::Result<&'static str, &'static str>,
        delay: Duration,
    }

    impl Recording {
        fn new(reply: std::result::Result<&'static str, &'static str>) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply,
                delay: Duration::ZERO,
            }
        }
    }

    impl Agent for Recording {
        fn complete(&self, prompt: String) -> impl Future<Output = anyhow::Result<String>> + Send {
            self.prompts.lock().unwrap().push(prompt);
            let reply = self.reply;
            let delay = self.delay;
            async move {
                tokio::time::sleep(delay).await;
                reply.map(str::to_string).map_err(|e| anyhow::anyhow!(e))
            }
        }
    }

    fn snapshot() -> TableSnapshot {
        TableSnapshot::capture(&[ColumnDef::new("item", ColumnType::Text)], &[])
    }

    #[tokio::test]
    async fn test_answer_is_returned_and_prompt_carries_table() {
        let agent = Recording::new(Ok("42 widgets"));
        let answer = ask(&agent, &snapshot(), " how many? ", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(answer, "42 widgets");

        let prompts = agent.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Answer the following question about this inventory data:\nID# item\n\nQuestion: how many?"
        );
    }

    #[tokio::test]
    async fn test_agent_failure_maps_to_agent_error() {
        let agent = Recording::new(Err("401 unauthorized"));
        let err = ask(&agent, &snapshot(), "q", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Agent(m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let mut agent = Recording::new(Ok("late"));
        agent.delay = Duration::from_secs(5);
        let err = ask(&agent, &snapshot(), "q", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::AgentTimeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_empty_question_not_sent() {
        let agent = Recording::new(Ok("unused"));
        assert!(ask(&agent, &snapshot(), "  ", Duration::from_secs(1))
            .await
            .is_err());
        assert!(agent.prompts.lock().unwrap().is_empty());
    }
}
