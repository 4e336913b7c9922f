//! Per-project search index over file summaries.
//!
//! Every analyzed file gets one searchable document (see
//! [`searchable_text`]) stored in `file_index` and mirrored into the
//! `file_index_fts` FTS5 table. When an embedding provider is configured
//! the document's vector is stored alongside it and [`search`] ranks by
//! cosine similarity; otherwise it ranks by BM25 keyword match.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::models::FileFact;

/// One ranked file, best first.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub file_name: String,
    pub complexity: i64,
    pub document: String,
    pub score: f64,
}

/// Flatten a file's facts into the text that gets indexed.
pub fn searchable_text(fact: &FileFact) -> String {
    let mut parts = vec![format!("File: {}", fact.file_name)];

    for class in &fact.classes {
        parts.push(format!(
            "Class {}: {}",
            class.name,
            class.docstring.as_deref().unwrap_or("")
        ));
        for method in &class.methods {
            parts.push(format!(
                "Method {}: {}",
                method.name,
                method.docstring.as_deref().unwrap_or("")
            ));
        }
    }

    for function in &fact.functions {
        parts.push(format!(
            "Function {}: {}",
            function.name,
            function.docstring.as_deref().unwrap_or("")
        ));
    }

    parts.join("\n")
}

/// Index `facts` under `project_id` using the configured embedder.
pub async fn build_index(
    pool: &SqlitePool,
    config: &Config,
    project_id: &str,
    facts: &[FileFact],
) -> Result<usize> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    build_index_with(
        pool,
        embedder.as_deref(),
        config.embedding.batch_size,
        project_id,
        facts,
    )
    .await
}

/// Replace the project's index rows. Returns the number of documents.
pub async fn build_index_with(
    pool: &SqlitePool,
    embedder: Option<&dyn Embedder>,
    batch_size: usize,
    project_id: &str,
    facts: &[FileFact],
) -> Result<usize> {
    let documents: Vec<String> = facts.iter().map(searchable_text).collect();

    let vectors = match embedder {
        Some(embedder) => {
            tracing::info!(
                model = embedder.model_name(),
                documents = documents.len(),
                "embedding file summaries"
            );
            Some(
                embedding::embed_batched(embedder, &documents, batch_size)
                    .await
                    .context("embedding failed")?,
            )
        }
        None => None,
    };

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM file_index_fts WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM file_index WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    for (i, (fact, document)) in facts.iter().zip(&documents).enumerate() {
        let vector = vectors.as_ref().map(|v| &v[i]);
        let result = sqlx::query(
            "INSERT INTO file_index (project_id, file_path, file_name, complexity, document, model, dims, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(&fact.file_path)
        .bind(&fact.file_name)
        .bind(fact.complexity)
        .bind(document)
        .bind(embedder.map(|e| e.model_name().to_string()))
        .bind(vector.map(|v| v.len() as i64))
        .bind(vector.map(|v| embedding::vec_to_blob(v)))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO file_index_fts (entry_id, project_id, document) VALUES (?, ?, ?)")
            .bind(result.last_insert_rowid())
            .bind(project_id)
            .bind(document)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::debug!(project_id, documents = documents.len(), "index built");
    Ok(documents.len())
}

/// Top `k` files for `query` within one project.
pub async fn search(
    pool: &SqlitePool,
    config: &Config,
    project_id: &str,
    query: &str,
    k: usize,
) -> Result<Vec<SearchHit>> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    search_with(pool, embedder.as_deref(), project_id, query, k).await
}

pub async fn search_with(
    pool: &SqlitePool,
    embedder: Option<&dyn Embedder>,
    project_id: &str,
    query: &str,
    k: usize,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    if let Some(embedder) = embedder {
        let hits = semantic_search(pool, embedder, project_id, query, k).await?;
        if let Some(hits) = hits {
            return Ok(hits);
        }
        tracing::debug!(project_id, "no stored vectors; using keyword search");
    }

    keyword_search(pool, project_id, query, k).await
}

/// `None` when the project has no stored vectors.
async fn semantic_search(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    project_id: &str,
    query: &str,
    k: usize,
) -> Result<Option<Vec<SearchHit>>> {
    let rows = sqlx::query(
        "SELECT file_path, file_name, complexity, document, embedding FROM file_index \
         WHERE project_id = ? AND embedding IS NOT NULL ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let query_vec = embedding::embed_query(embedder, query).await?;

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = embedding::blob_to_vec(&blob);
            SearchHit {
                file_path: row.get("file_path"),
                file_name: row.get("file_name"),
                complexity: row.get("complexity"),
                document: row.get("document"),
                score: embedding::cosine_similarity(&query_vec, &vector) as f64,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    Ok(Some(hits))
}

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").unwrap())
}

/// Reduce free text to an FTS5 expression of quoted terms joined by OR,
/// so user punctuation never reaches the query parser.
pub fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = word_pattern()
        .find_iter(text)
        .map(|m| format!("\"{}\"", m.as_str()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

async fn keyword_search(
    pool: &SqlitePool,
    project_id: &str,
    query: &str,
    k: usize,
) -> Result<Vec<SearchHit>> {
    let Some(expr) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT fi.file_path, fi.file_name, fi.complexity, fi.document, file_index_fts.rank AS rank
        FROM file_index_fts
        JOIN file_index fi ON fi.id = file_index_fts.entry_id
        WHERE file_index_fts MATCH ? AND file_index_fts.project_id = ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(&expr)
    .bind(project_id)
    .bind(k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            SearchHit {
                file_path: row.get("file_path"),
                file_name: row.get("file_name"),
                complexity: row.get("complexity"),
                document: row.get("document"),
                score: -rank,
            }
        })
        .collect())
}
