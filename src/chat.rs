//! Question answering over an analyzed project.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{self, SearchHit};
use crate::llm::LlmClient;
use crate::store;

/// The question was empty or otherwise unusable.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidQuestion(pub &'static str);

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub file_path: String,
    pub file_name: String,
    pub complexity: i64,
}

impl From<&SearchHit> for Source {
    fn from(hit: &SearchHit) -> Self {
        Source {
            file_path: hit.file_path.clone(),
            file_name: hit.file_name.clone(),
            complexity: hit.complexity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub fn build_chat_prompt(question: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|h| h.document.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer this question about the codebase:\n\nQuestion: {question}\n\nRelevant Code Information:\n{context}\n\nProvide a clear, helpful answer with code examples if needed."
    )
}

/// Answer `question` about `project_id` with the configured embedder.
pub async fn ask(
    pool: &SqlitePool,
    config: &Config,
    client: Option<&dyn LlmClient>,
    project_id: &str,
    question: &str,
) -> Result<ChatAnswer> {
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    ask_with(
        pool,
        embedder.as_deref(),
        client,
        project_id,
        question,
        config.retrieval.top_k,
    )
    .await
}

pub async fn ask_with(
    pool: &SqlitePool,
    embedder: Option<&dyn Embedder>,
    client: Option<&dyn LlmClient>,
    project_id: &str,
    question: &str,
    top_k: usize,
) -> Result<ChatAnswer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(InvalidQuestion("question must not be empty").into());
    }

    store::get_project(pool, project_id).await?;

    let hits = index::search_with(pool, embedder, project_id, question, top_k).await?;
    let sources: Vec<Source> = hits.iter().map(Source::from).collect();

    let answer = match client {
        Some(client) => {
            let prompt = build_chat_prompt(question, &hits);
            tracing::info!(model = %client.name(), project_id, hits = hits.len(), "answering question");
            client
                .complete(&prompt, client.max_tokens())
                .await
                .context("chat completion failed")?
        }
        None => format!(
            "Mock answer for: {}\n\nRelevant files found: {}",
            question,
            hits.len()
        ),
    };

    Ok(ChatAnswer { answer, sources })
}
