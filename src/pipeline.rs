//! End-to-end analysis of one project directory.
//!
//! scan → extract → documentation → plan → save → index

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::extract::{self, BatchReport};
use crate::llm::LlmClients;
use crate::models::ProjectStatus;
use crate::store::{self, NewProject};
use crate::{docgen, index, plan, scanner};

/// Collaborators shared by the CLI and the HTTP server.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub llm: LlmClients,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Path does not exist: {0}")]
    PathNotFound(String),
    #[error("No supported files found")]
    NoSupportedFiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub project_id: String,
    pub files_analyzed: usize,
    pub parse_failures: usize,
    pub unsupported: usize,
    pub unreadable: usize,
    pub status: String,
}

pub async fn run_analysis(ctx: &AppContext, path: &Path, role: &str) -> Result<AnalysisSummary> {
    if !path.exists() {
        return Err(AnalysisError::PathNotFound(path.display().to_string()).into());
    }

    let files = scanner::scan_project(path, &ctx.config.scan)?;
    if files.is_empty() {
        return Err(AnalysisError::NoSupportedFiles.into());
    }
    tracing::info!(path = %path.display(), candidates = files.len(), role, "analyzing project");

    let outcomes = extract::analyze_batch(files, ctx.config.scan.workers).await?;
    let report = BatchReport::from_outcomes(outcomes);
    let facts = &report.facts;

    let documentation =
        docgen::generate_documentation(ctx.llm.docs.as_deref(), facts, role).await?;
    let kt_plan = plan::generate_plan(ctx.llm.plan.as_deref(), facts, role).await?;

    let project = NewProject {
        path: path.display().to_string(),
        role: role.to_string(),
    };
    let project_id =
        store::save_analysis(&ctx.pool, &project, facts, &documentation, &kt_plan).await?;

    let mut status = ProjectStatus::Completed;
    if let Err(e) = index::build_index(&ctx.pool, &ctx.config, &project_id, facts).await {
        tracing::error!(project_id = %project_id, error = %format!("{:#}", e), "index build failed");
        store::set_status(&ctx.pool, &project_id, ProjectStatus::IndexFailed).await?;
        status = ProjectStatus::IndexFailed;
    }

    Ok(AnalysisSummary {
        project_id,
        files_analyzed: facts.len(),
        parse_failures: report.failures.len(),
        unsupported: report.unsupported.len(),
        unreadable: report.unreadable.len(),
        status: status.as_str().to_string(),
    })
}
