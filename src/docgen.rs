//! Documentation generator.
//!
//! Renders the extracted facts into a prompt context and asks the docs
//! model for a beginner-oriented document. Without a model, a Markdown
//! outline is rendered directly from the facts.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::llm::LlmClient;
use crate::models::FileFact;

const NO_DESCRIPTION: &str = "No description";

/// Plain-text summary of every file, fed to the model.
pub fn build_doc_context(facts: &[FileFact]) -> String {
    let mut sections = Vec::with_capacity(facts.len());

    for fact in facts {
        let mut summary = format!("\n### File: {}\n", fact.file_name);

        if !fact.classes.is_empty() {
            summary.push_str("Classes:\n");
            for class in &fact.classes {
                summary.push_str(&format!(
                    "  - {}: {}\n",
                    class.name,
                    class.docstring.as_deref().unwrap_or(NO_DESCRIPTION)
                ));
                if !class.methods.is_empty() {
                    let names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
                    summary.push_str(&format!("    Methods: {}\n", names.join(", ")));
                }
            }
        }

        if !fact.functions.is_empty() {
            summary.push_str("Functions:\n");
            for function in &fact.functions {
                summary.push_str(&format!(
                    "  - {}({}): {}\n",
                    function.name,
                    function.args.join(", "),
                    function.docstring.as_deref().unwrap_or(NO_DESCRIPTION)
                ));
            }
        }

        sections.push(summary);
    }

    sections.join("\n")
}

pub fn build_doc_prompt(context: &str, role: &str) -> String {
    format!(
        r#"You are a technical documentation expert. Generate comprehensive, beginner-friendly documentation for this codebase.

Project Analysis:
{context}

Generate documentation with these sections:
1. **Project Overview** - What does this project do?
2. **Architecture** - High-level structure and key components
3. **Key Modules** - Detailed explanation of main files/classes
4. **API Endpoints** (if applicable)
5. **Data Flow** - How data moves through the system
6. **Setup Instructions** - How to run this project

Focus on: {role} perspective
Make it clear for someone new to this codebase.
"#
    )
}

/// Produce the project documentation with the docs model, or offline.
pub async fn generate_documentation(
    client: Option<&dyn LlmClient>,
    facts: &[FileFact],
    role: &str,
) -> Result<String> {
    match client {
        Some(client) => {
            let prompt = build_doc_prompt(&build_doc_context(facts), role);
            tracing::info!(model = %client.name(), files = facts.len(), "generating documentation");
            client
                .complete(&prompt, client.max_tokens())
                .await
                .context("documentation generation failed")
        }
        None => {
            tracing::info!(files = facts.len(), "no docs model configured; rendering outline");
            Ok(render_outline(facts, role))
        }
    }
}

fn first_line(doc: &Option<String>) -> &str {
    doc.as_deref()
        .and_then(|d| d.lines().next())
        .filter(|l| !l.is_empty())
        .unwrap_or(NO_DESCRIPTION)
}

/// Deterministic Markdown outline with the same six sections the model is
/// asked for.
fn render_outline(facts: &[FileFact], role: &str) -> String {
    let classes: usize = facts.iter().map(|f| f.classes.len()).sum();
    let functions: usize = facts.iter().map(|f| f.functions.len()).sum();

    let mut out = String::from("# Project Documentation\n\n");

    out.push_str("## Project Overview\n\n");
    out.push_str(&format!(
        "Outline generated for a {} developer from {} analyzed files ({} classes, {} top-level functions).\n\n",
        role,
        facts.len(),
        classes,
        functions
    ));

    out.push_str("## Architecture\n\n");
    let mut by_dir: BTreeMap<String, Vec<&FileFact>> = BTreeMap::new();
    for fact in facts {
        let dir = std::path::Path::new(&fact.file_path)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        by_dir.entry(dir).or_default().push(fact);
    }
    for (dir, files) in &by_dir {
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        out.push_str(&format!("- `{}`: {}\n", dir, names.join(", ")));
    }
    out.push('\n');

    out.push_str("## Key Modules\n\n");
    let mut ranked: Vec<&FileFact> = facts.iter().collect();
    ranked.sort_by(|a, b| {
        b.complexity
            .cmp(&a.complexity)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    for fact in &ranked {
        out.push_str(&format!(
            "### {} (complexity {})\n\n",
            fact.file_name, fact.complexity
        ));
        for class in &fact.classes {
            out.push_str(&format!("- class `{}`: {}\n", class.name, first_line(&class.docstring)));
            for method in &class.methods {
                out.push_str(&format!(
                    "  - `{}({})`: {}\n",
                    method.name,
                    method.args.join(", "),
                    first_line(&method.docstring)
                ));
            }
        }
        for function in &fact.functions {
            let returns = function
                .returns
                .as_deref()
                .map(|r| format!(" -> {}", r))
                .unwrap_or_default();
            out.push_str(&format!(
                "- `{}({}){}`: {}\n",
                function.name,
                function.args.join(", "),
                returns,
                first_line(&function.docstring)
            ));
        }
        out.push('\n');
    }

    out.push_str("## API Endpoints\n\n");
    out.push_str("Not determined from structure alone.\n\n");

    out.push_str("## Data Flow\n\n");
    let mut imports: BTreeMap<&str, usize> = BTreeMap::new();
    for fact in facts {
        for import in &fact.imports {
            *imports.entry(import.as_str()).or_default() += 1;
        }
    }
    let mut imports: Vec<(&str, usize)> = imports.into_iter().collect();
    imports.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if imports.is_empty() {
        out.push_str("No imports recorded.\n\n");
    } else {
        out.push_str("Most imported modules:\n\n");
        for (module, count) in imports.iter().take(10) {
            out.push_str(&format!("- `{}` ({} files)\n", module, count));
        }
        out.push('\n');
    }

    out.push_str("## Setup Instructions\n\n");
    out.push_str("Configure `[llm.docs]` to replace this outline with generated prose.\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassFact, FunctionFact, MethodFact};

    fn fact() -> FileFact {
        FileFact {
            file_path: "/repo/app/service.py".to_string(),
            file_name: "service.py".to_string(),
            classes: vec![ClassFact {
                name: "Service".to_string(),
                docstring: Some("Does work.".to_string()),
                line_number: 1,
                methods: vec![
                    MethodFact {
                        name: "__init__".to_string(),
                        docstring: None,
                        args: vec!["self".to_string()],
                    },
                    MethodFact {
                        name: "run".to_string(),
                        docstring: None,
                        args: vec!["self".to_string()],
                    },
                ],
            }],
            functions: vec![FunctionFact {
                name: "helper".to_string(),
                docstring: None,
                args: vec!["a".to_string(), "b".to_string()],
                line_number: 9,
                returns: None,
            }],
            imports: vec!["os".to_string()],
            complexity: 2,
        }
    }

    #[test]
    fn test_context_format() {
        let ctx = build_doc_context(&[fact()]);
        assert_eq!(
            ctx,
            "\n### File: service.py\n\
             Classes:\n  - Service: Does work.\n    Methods: __init__, run\n\
             Functions:\n  - helper(a, b): No description\n"
        );
    }

    #[test]
    fn test_prompt_mentions_role_and_sections() {
        let prompt = build_doc_prompt("CTX", "backend");
        assert!(prompt.contains("Focus on: backend perspective"));
        assert!(prompt.contains("CTX"));
        for section in ["Project Overview", "Architecture", "Key Modules", "API Endpoints", "Data Flow", "Setup Instructions"] {
            assert!(prompt.contains(section), "missing {}", section);
        }
    }

    #[tokio::test]
    async fn test_offline_outline_is_deterministic() {
        let a = generate_documentation(None, &[fact()], "qa").await.unwrap();
        let b = generate_documentation(None, &[fact()], "qa").await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("## Key Modules"));
        assert!(a.contains("- class `Service`: Does work."));
        assert!(a.contains("`helper(a, b)`: No description"));
        assert!(a.contains("`os` (1 files)"));
    }
}
