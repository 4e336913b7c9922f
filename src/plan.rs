//! Knowledge-transfer plan generator.
//!
//! The plan model receives file statistics and the most complex files and
//! answers with a JSON day-by-day schedule, usually wrapped in prose or a
//! fenced block. [`extract_plan_json`] digs the object out of the reply.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::llm::LlmClient;
use crate::models::{Complexity, FileFact, KtPlan, PlanDay};

pub const PLAN_DAYS: usize = 10;
const KEY_FILES: usize = 10;
const EXCERPT_CHARS: usize = 500;

/// The model's reply did not contain a usable plan.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse KT plan JSON: {message}")]
pub struct PlanParseError {
    pub message: String,
    /// Start of the text that was handed to the JSON parser.
    pub excerpt: String,
}

pub fn build_plan_context(facts: &[FileFact], role: &str) -> String {
    let count = |bucket: Complexity| {
        facts
            .iter()
            .filter(|f| f.complexity_class() == bucket)
            .count()
    };

    format!(
        "\nRole: {role}\n\nFile Statistics:\n- Total files: {}\n- Simple files: {}\n- Moderate files: {}\n- Complex files: {}\n\nKey Files:\n{}\n",
        facts.len(),
        count(Complexity::Simple),
        count(Complexity::Moderate),
        count(Complexity::Complex),
        list_key_files(facts),
    )
}

/// Top files by complexity, most complex first. Ties keep input order.
fn list_key_files(facts: &[FileFact]) -> String {
    let mut sorted: Vec<&FileFact> = facts.iter().collect();
    sorted.sort_by(|a, b| b.complexity.cmp(&a.complexity));

    sorted
        .iter()
        .take(KEY_FILES)
        .map(|f| format!("- {} (complexity: {})", f.file_name, f.complexity))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_plan_prompt(context: &str, role: &str) -> String {
    format!(
        r#"You are an expert engineering onboarding specialist. Create a detailed {PLAN_DAYS}-day Knowledge Transfer plan for a new {role} developer joining this project.

Project Information:
{context}

Create a day-by-day learning plan with:
- Day number and focus area
- Key files to study
- Concepts to understand
- Hands-on exercises
- Knowledge checkpoints (questions to validate understanding)

Format as JSON:
{{
  "plan": [
    {{
      "day": 1,
      "title": "...",
      "focus": "...",
      "files_to_study": ["..."],
      "concepts": ["..."],
      "exercise": "...",
      "checkpoint_questions": ["..."]
    }}
  ]
}}
"#
    )
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

fn outer_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

/// Parse a plan out of a model reply.
///
/// A fenced JSON block wins; otherwise the span from the first `{` to the
/// last `}` is tried.
pub fn extract_plan_json(reply: &str) -> Result<KtPlan, PlanParseError> {
    let candidate = if let Some(caps) = fenced_json().captures(reply) {
        caps.get(1).map_or(reply, |m| m.as_str())
    } else if let Some(m) = outer_object().find(reply) {
        m.as_str()
    } else {
        reply
    };

    serde_json::from_str(candidate).map_err(|e| PlanParseError {
        message: e.to_string(),
        excerpt: candidate.chars().take(EXCERPT_CHARS).collect(),
    })
}

/// Produce the KT plan with the plan model, or offline.
pub async fn generate_plan(
    client: Option<&dyn LlmClient>,
    facts: &[FileFact],
    role: &str,
) -> Result<KtPlan> {
    let Some(client) = client else {
        tracing::info!(files = facts.len(), "no plan model configured; building schedule");
        return Ok(offline_plan(facts, role));
    };

    let prompt = build_plan_prompt(&build_plan_context(facts, role), role);
    tracing::info!(model = %client.name(), "generating KT plan");
    let reply = client
        .complete(&prompt, client.max_tokens())
        .await
        .context("KT plan generation failed")?;

    match extract_plan_json(&reply) {
        Ok(plan) => Ok(plan),
        Err(e) => {
            tracing::warn!(excerpt = %e.excerpt, "unparseable KT plan reply");
            Err(e.into())
        }
    }
}

/// Deterministic schedule: files from simplest to most complex, spread
/// over at most [`PLAN_DAYS`] days.
fn offline_plan(facts: &[FileFact], role: &str) -> KtPlan {
    let mut ordered: Vec<&FileFact> = facts.iter().collect();
    ordered.sort_by(|a, b| {
        a.complexity
            .cmp(&b.complexity)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });

    if ordered.is_empty() {
        return KtPlan {
            plan: vec![PlanDay {
                day: 1,
                title: "Orientation".to_string(),
                focus: format!("Explore the repository layout as a {} developer", role),
                files_to_study: Vec::new(),
                concepts: Vec::new(),
                exercise: "Run the project locally and list its entry points.".to_string(),
                checkpoint_questions: vec!["Where does execution start?".to_string()],
            }],
        };
    }

    let days = ordered.len().min(PLAN_DAYS);
    let per_day = ordered.len().div_ceil(days);

    let plan = ordered
        .chunks(per_day)
        .enumerate()
        .map(|(i, files)| {
            let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
            let mut concepts: Vec<String> = Vec::new();
            for file in files {
                for class in &file.classes {
                    if !concepts.contains(&class.name) {
                        concepts.push(class.name.clone());
                    }
                }
            }
            for file in files {
                for import in &file.imports {
                    if !concepts.contains(import) {
                        concepts.push(import.clone());
                    }
                }
            }
            concepts.truncate(8);

            let mut questions: Vec<String> = files
                .iter()
                .flat_map(|f| f.classes.iter())
                .take(2)
                .map(|c| format!("What responsibility does `{}` own?", c.name))
                .collect();
            let remaining = 3 - questions.len();
            questions.extend(
                files
                    .iter()
                    .flat_map(|f| f.functions.iter())
                    .take(remaining)
                    .map(|func| format!("Who calls `{}` and with what arguments?", func.name)),
            );
            if questions.is_empty() {
                questions.push(format!("What role does {} play in the project?", names[0]));
            }

            let bucket = files
                .iter()
                .map(|f| f.complexity_class())
                .max()
                .unwrap_or(Complexity::Simple);

            PlanDay {
                day: i as i64 + 1,
                title: format!("Day {}: {}", i + 1, names.join(", ")),
                focus: format!("{} files for a {} developer", bucket.as_str(), role),
                files_to_study: names.clone(),
                concepts,
                exercise: format!(
                    "Read {} and write a short summary of each definition.",
                    names.join(", ")
                ),
                checkpoint_questions: questions,
            }
        })
        .collect();

    KtPlan { plan }
}
