//! Persistence of analysis runs.
//!
//! One call to [`save_analysis`] writes everything a run produces inside a
//! single transaction. The search index rows are written separately by
//! [`crate::index::build_index`].

use chrono::{SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{FileFact, KtPlan, ProgressEntry, ProjectRecord, ProjectStatus, StoredFile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    fn project(id: &str) -> Self {
        StoreError::NotFound {
            kind: "project",
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Header of a run about to be saved.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub path: String,
    pub role: String,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Persist one analysis run and return its generated project id.
pub async fn save_analysis(
    pool: &SqlitePool,
    project: &NewProject,
    facts: &[FileFact],
    documentation: &str,
    plan: &KtPlan,
) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    let created_at = now();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO projects (id, path, role, files_analyzed, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&project.path)
    .bind(&project.role)
    .bind(facts.len() as i64)
    .bind(ProjectStatus::Completed.as_str())
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;

    for fact in facts {
        sqlx::query(
            "INSERT INTO files (project_id, file_path, file_name, complexity, classes, functions, imports) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&fact.file_path)
        .bind(&fact.file_name)
        .bind(fact.complexity)
        .bind(serde_json::to_string(&fact.classes)?)
        .bind(serde_json::to_string(&fact.functions)?)
        .bind(serde_json::to_string(&fact.imports)?)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("INSERT INTO documentation (project_id, content, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(documentation)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO kt_plans (project_id, plan_json, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(serde_json::to_string(plan)?)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

    for day in &plan.plan {
        sqlx::query(
            "INSERT OR IGNORE INTO user_progress (project_id, day, completed) VALUES (?, ?, 0)",
        )
        .bind(&id)
        .bind(day.day)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(project_id = %id, files = facts.len(), "saved analysis");
    Ok(id)
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> ProjectRecord {
    ProjectRecord {
        id: row.get("id"),
        path: row.get("path"),
        role: row.get("role"),
        files_analyzed: row.get("files_analyzed"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

pub async fn get_project(pool: &SqlitePool, id: &str) -> StoreResult<ProjectRecord> {
    let row = sqlx::query(
        "SELECT id, path, role, files_analyzed, status, created_at FROM projects WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref()
        .map(row_to_project)
        .ok_or_else(|| StoreError::project(id))
}

/// All projects, newest first.
pub async fn list_projects(pool: &SqlitePool) -> StoreResult<Vec<ProjectRecord>> {
    let rows = sqlx::query(
        "SELECT id, path, role, files_analyzed, status, created_at FROM projects \
         ORDER BY created_at DESC, rowid DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_project).collect())
}

/// Latest documentation for a project.
pub async fn get_documentation(pool: &SqlitePool, project_id: &str) -> StoreResult<Option<String>> {
    let content: Option<String> = sqlx::query_scalar(
        "SELECT content FROM documentation WHERE project_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(content)
}

/// Latest plan for a project.
pub async fn get_kt_plan(pool: &SqlitePool, project_id: &str) -> StoreResult<Option<KtPlan>> {
    let json: Option<String> = sqlx::query_scalar(
        "SELECT plan_json FROM kt_plans WHERE project_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    match json {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub async fn get_files(pool: &SqlitePool, project_id: &str) -> StoreResult<Vec<StoredFile>> {
    let rows = sqlx::query(
        "SELECT file_path, file_name, complexity, classes, functions, imports FROM files \
         WHERE project_id = ? ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut files = Vec::with_capacity(rows.len());
    for row in rows {
        let classes: String = row.get("classes");
        let functions: String = row.get("functions");
        let imports: String = row.get("imports");
        files.push(StoredFile {
            file_path: row.get("file_path"),
            file_name: row.get("file_name"),
            complexity: row.get("complexity"),
            classes: serde_json::from_str(&classes)?,
            functions: serde_json::from_str(&functions)?,
            imports: serde_json::from_str(&imports)?,
        });
    }
    Ok(files)
}

pub async fn get_progress(pool: &SqlitePool, project_id: &str) -> StoreResult<Vec<ProgressEntry>> {
    let rows = sqlx::query(
        "SELECT day, completed, completed_at, notes FROM user_progress \
         WHERE project_id = ? ORDER BY day",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let completed: i64 = row.get("completed");
            ProgressEntry {
                day: row.get("day"),
                completed: completed != 0,
                completed_at: row.get("completed_at"),
                notes: row.get("notes"),
            }
        })
        .collect())
}

/// Mark one plan day done or not done.
///
/// `completed_at` is stamped when completing and cleared otherwise. Notes
/// are replaced only when given.
pub async fn update_progress(
    pool: &SqlitePool,
    project_id: &str,
    day: i64,
    completed: bool,
    notes: Option<&str>,
) -> StoreResult<()> {
    get_project(pool, project_id).await?;

    let completed_at = if completed { Some(now()) } else { None };
    let result = sqlx::query(
        "UPDATE user_progress SET completed = ?, completed_at = ?, notes = COALESCE(?, notes) \
         WHERE project_id = ? AND day = ?",
    )
    .bind(completed as i64)
    .bind(completed_at)
    .bind(notes)
    .bind(project_id)
    .bind(day)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            kind: "plan day",
            id: format!("{}/{}", project_id, day),
        });
    }
    Ok(())
}

pub async fn set_status(
    pool: &SqlitePool,
    project_id: &str,
    status: ProjectStatus,
) -> StoreResult<()> {
    let result = sqlx::query("UPDATE projects SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(project_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::project(project_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_temp;
    use crate::models::{ClassFact, FunctionFact, PlanDay};

    fn facts() -> Vec<FileFact> {
        vec![FileFact {
            file_path: "/repo/app.py".to_string(),
            file_name: "app.py".to_string(),
            classes: vec![ClassFact {
                name: "App".to_string(),
                docstring: None,
                line_number: 1,
                methods: vec![],
            }],
            functions: vec![FunctionFact {
                name: "main".to_string(),
                docstring: Some("Entry.".to_string()),
                args: vec![],
                line_number: 5,
                returns: Some("int".to_string()),
            }],
            imports: vec!["os".to_string()],
            complexity: 2,
        }]
    }

    fn plan(days: i64) -> KtPlan {
        KtPlan {
            plan: (1..=days)
                .map(|day| PlanDay {
                    day,
                    title: format!("Day {}", day),
                    focus: String::new(),
                    files_to_study: vec![],
                    concepts: vec![],
                    exercise: String::new(),
                    checkpoint_questions: vec![],
                })
                .collect(),
        }
    }

    fn new_project(role: &str) -> NewProject {
        NewProject {
            path: "/repo".to_string(),
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let (_tmp, pool) = open_temp().await;
        let id = save_analysis(&pool, &new_project("backend"), &facts(), "# Docs", &plan(3))
            .await
            .unwrap();

        let project = get_project(&pool, &id).await.unwrap();
        assert_eq!(project.role, "backend");
        assert_eq!(project.files_analyzed, 1);
        assert_eq!(project.status, "completed");

        assert_eq!(get_documentation(&pool, &id).await.unwrap().as_deref(), Some("# Docs"));
        assert_eq!(get_kt_plan(&pool, &id).await.unwrap(), Some(plan(3)));

        let files = get_files(&pool, &id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].functions[0].returns.as_deref(), Some("int"));
        assert_eq!(files[0].imports, vec!["os"]);

        let progress = get_progress(&pool, &id).await.unwrap();
        assert_eq!(progress.iter().map(|p| p.day).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(progress.iter().all(|p| !p.completed && p.completed_at.is_none()));
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let (_tmp, pool) = open_temp().await;
        let err = get_project(&pool, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "project", .. }));
        assert!(get_documentation(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_projects_newest_first() {
        let (_tmp, pool) = open_temp().await;
        let first = save_analysis(&pool, &new_project("a"), &facts(), "", &plan(1))
            .await
            .unwrap();
        let second = save_analysis(&pool, &new_project("b"), &facts(), "", &plan(1))
            .await
            .unwrap();
        let ids: Vec<String> = list_projects(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_update_progress() {
        let (_tmp, pool) = open_temp().await;
        let id = save_analysis(&pool, &new_project("qa"), &facts(), "", &plan(2))
            .await
            .unwrap();

        update_progress(&pool, &id, 2, true, Some("read the router"))
            .await
            .unwrap();
        let progress = get_progress(&pool, &id).await.unwrap();
        assert!(progress[1].completed);
        assert!(progress[1].completed_at.is_some());
        assert_eq!(progress[1].notes.as_deref(), Some("read the router"));

        update_progress(&pool, &id, 2, false, None).await.unwrap();
        let progress = get_progress(&pool, &id).await.unwrap();
        assert!(!progress[1].completed);
        assert!(progress[1].completed_at.is_none());
        assert_eq!(progress[1].notes.as_deref(), Some("read the router"));
    }

    #[tokio::test]
    async fn test_update_progress_missing_day() {
        let (_tmp, pool) = open_temp().await;
        let id = save_analysis(&pool, &new_project("qa"), &facts(), "", &plan(2))
            .await
            .unwrap();
        let err = update_progress(&pool, &id, 9, true, None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "plan day", .. }));

        let err = update_progress(&pool, "nope", 1, true, None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "project", .. }));
    }

    #[tokio::test]
    async fn test_set_status() {
        let (_tmp, pool) = open_temp().await;
        let id = save_analysis(&pool, &new_project("qa"), &facts(), "", &plan(1))
            .await
            .unwrap();
        set_status(&pool, &id, ProjectStatus::IndexFailed).await.unwrap();
        assert_eq!(get_project(&pool, &id).await.unwrap().status, "index_failed");
    }
}
