//! Core data models used throughout codekt.
//!
//! [`FileFact`] and its children are produced by the extractor and flow
//! unchanged into the generators, the store, and the search index. The
//! remaining types mirror rows of the SQLite store.

use serde::{Deserialize, Serialize};

/// Structural facts extracted from one source file.
///
/// `complexity` always equals `classes.len() + functions.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFact {
    pub file_path: String,
    pub file_name: String,
    pub classes: Vec<ClassFact>,
    pub functions: Vec<FunctionFact>,
    pub imports: Vec<String>,
    pub complexity: i64,
}

impl FileFact {
    /// Bucket used by the plan generator.
    pub fn complexity_class(&self) -> Complexity {
        Complexity::of(self.complexity)
    }
}

/// A class definition at any nesting depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFact {
    pub name: String,
    pub docstring: Option<String>,
    pub line_number: usize,
    pub methods: Vec<MethodFact>,
}

/// A function defined directly in a class body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFact {
    pub name: String,
    pub docstring: Option<String>,
    pub args: Vec<String>,
}

/// A function defined at module level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFact {
    pub name: String,
    pub docstring: Option<String>,
    pub args: Vec<String>,
    pub line_number: usize,
    pub returns: Option<String>,
}

/// Coarse size bucket over [`FileFact::complexity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub const MODERATE_FROM: i64 = 5;
    pub const COMPLEX_FROM: i64 = 15;

    pub fn of(score: i64) -> Self {
        if score >= Self::COMPLEX_FROM {
            Complexity::Complex
        } else if score >= Self::MODERATE_FROM {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// Lifecycle flag of a stored project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Completed,
    IndexFailed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Completed => "completed",
            ProjectStatus::IndexFailed => "index_failed",
        }
    }
}

/// One analysis run, as stored in the `projects` table.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    pub id: String,
    pub path: String,
    pub role: String,
    pub files_analyzed: i64,
    pub status: String,
    /// ISO8601
    pub created_at: String,
}

/// A file row with its JSON columns decoded.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub file_path: String,
    pub file_name: String,
    pub complexity: i64,
    pub classes: Vec<ClassFact>,
    pub functions: Vec<FunctionFact>,
    pub imports: Vec<String>,
}

/// A generated knowledge-transfer plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KtPlan {
    pub plan: Vec<PlanDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDay {
    pub day: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub files_to_study: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub exercise: String,
    #[serde(default)]
    pub checkpoint_questions: Vec<String>,
}

/// Completion flag for one plan day.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEntry {
    pub day: i64,
    pub completed: bool,
    pub completed_at: Option<String>,
    pub notes: Option<String>,
}
