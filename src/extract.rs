//! Structural extractor.
//!
//! Turns one Python source text into a [`FileFact`]: every class (with its
//! direct methods), every module-level function, and every imported module
//! path. The extractor is a pure function of its input; reading files and
//! fanning out over a project is done by [`analyze_file`] and
//! [`analyze_batch`].

use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{ClassFact, FileFact, FunctionFact, MethodFact};
use crate::syntax::{self, ClassDef, FunctionDef, Stmt, Visitor};

/// The input text is not valid Python.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{path}:{line}:{column}: {message}")]
pub struct ParseFailure {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Extract the structural facts of one Python file.
///
/// `path` only labels the result; `content` is never read from disk here.
/// Malformed input yields [`ParseFailure`], never a partial record. An
/// empty file is valid and yields an empty fact with complexity 0.
pub fn analyze(path: &str, content: &str) -> Result<FileFact, ParseFailure> {
    let module = syntax::parse_module(content).map_err(|err| ParseFailure {
        path: path.to_string(),
        line: err.line,
        column: err.column,
        message: err.message,
    })?;

    let mut collector = FactCollector::default();
    syntax::walk(&mut collector, &module.body, 0);

    let complexity = (collector.classes.len() + collector.functions.len()) as i64;
    Ok(FileFact {
        file_path: path.to_string(),
        file_name: file_name_of(path),
        classes: collector.classes,
        functions: collector.functions,
        imports: collector.imports,
        complexity,
    })
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[derive(Default)]
struct FactCollector {
    classes: Vec<ClassFact>,
    functions: Vec<FunctionFact>,
    imports: Vec<String>,
}

impl Visitor for FactCollector {
    fn visit_class(&mut self, class: &ClassDef, _depth: usize) {
        let methods = class
            .body
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::FunctionDef(method) => Some(MethodFact {
                    name: method.name.clone(),
                    docstring: method.docstring.clone(),
                    args: method.params.clone(),
                }),
                _ => None,
            })
            .collect();

        self.classes.push(ClassFact {
            name: class.name.clone(),
            docstring: class.docstring.clone(),
            line_number: class.line,
            methods,
        });
    }

    fn visit_function(&mut self, function: &FunctionDef, depth: usize) {
        if depth != 0 {
            return;
        }
        self.functions.push(FunctionFact {
            name: function.name.clone(),
            docstring: function.docstring.clone(),
            args: function.params.clone(),
            line_number: function.line,
            returns: function.returns.clone(),
        });
    }

    fn visit_import(&mut self, names: &[String], _depth: usize) {
        self.imports.extend(names.iter().cloned());
    }

    fn visit_import_from(&mut self, module: Option<&str>, _depth: usize) {
        if let Some(module) = module {
            self.imports.push(module.to_string());
        }
    }
}

/// Result of handing one scanned file to the extractor.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Parsed(FileFact),
    Failed(ParseFailure),
    /// The scanner picked the file up but no extractor exists for its type.
    Unsupported { path: PathBuf, extension: String },
    /// The file could not be read as UTF-8 text.
    Unreadable { path: PathBuf, reason: String },
}

impl FileOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FileOutcome::Parsed(fact) => Path::new(&fact.file_path),
            FileOutcome::Failed(failure) => Path::new(&failure.path),
            FileOutcome::Unsupported { path, .. } | FileOutcome::Unreadable { path, .. } => path,
        }
    }
}

/// Read and analyze a single file, dispatching on its extension.
pub fn analyze_file(path: &Path) -> FileOutcome {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    if extension != "py" {
        return FileOutcome::Unsupported {
            path: path.to_path_buf(),
            extension,
        };
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return FileOutcome::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    };

    match analyze(&path.to_string_lossy(), &content) {
        Ok(fact) => FileOutcome::Parsed(fact),
        Err(failure) => FileOutcome::Failed(failure),
    }
}

/// Analyze many files in parallel.
///
/// Returns exactly one outcome per input path, sorted by path. `workers`
/// of 0 lets rayon pick the thread count.
pub async fn analyze_batch(paths: Vec<PathBuf>, workers: usize) -> Result<Vec<FileOutcome>> {
    tokio::task::spawn_blocking(move || {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()?;
        let mut outcomes: Vec<FileOutcome> =
            pool.install(|| paths.par_iter().map(|p| analyze_file(p)).collect());
        outcomes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok::<_, anyhow::Error>(outcomes)
    })
    .await?
}

/// Outcomes of a batch split by kind.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub facts: Vec<FileFact>,
    pub failures: Vec<ParseFailure>,
    pub unsupported: Vec<PathBuf>,
    pub unreadable: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<FileOutcome>) -> Self {
        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Parsed(fact) => report.facts.push(fact),
                FileOutcome::Failed(failure) => {
                    tracing::warn!(path = %failure.path, line = failure.line, "skipping unparseable file");
                    report.failures.push(failure);
                }
                FileOutcome::Unsupported { path, extension } => {
                    tracing::debug!(path = %path.display(), %extension, "no extractor for file type");
                    report.unsupported.push(path);
                }
                FileOutcome::Unreadable { path, reason } => {
                    tracing::warn!(path = %path.display(), %reason, "skipping unreadable file");
                    report.unreadable.push((path, reason));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_class_and_function_scenario() {
        let src = "class Foo:\n    '''doc'''\n    def bar(self, x):\n        pass\n\ndef baz() -> int:\n    return 1\n";
        let fact = analyze("/proj/foo.py", src).unwrap();

        assert_eq!(fact.file_name, "foo.py");
        assert_eq!(fact.classes.len(), 1);
        let foo = &fact.classes[0];
        assert_eq!(foo.name, "Foo");
        assert_eq!(foo.docstring.as_deref(), Some("doc"));
        assert_eq!(foo.line_number, 1);
        assert_eq!(foo.methods.len(), 1);
        assert_eq!(foo.methods[0].name, "bar");
        assert_eq!(foo.methods[0].args, vec!["self", "x"]);

        assert_eq!(fact.functions.len(), 1);
        let baz = &fact.functions[0];
        assert_eq!(baz.name, "baz");
        assert!(baz.args.is_empty());
        assert_eq!(baz.returns.as_deref(), Some("int"));
        assert_eq!(baz.line_number, 6);
        assert_eq!(fact.complexity, 2);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let fact = analyze("/proj/empty.py", "").unwrap();
        assert!(fact.classes.is_empty());
        assert!(fact.functions.is_empty());
        assert!(fact.imports.is_empty());
        assert_eq!(fact.complexity, 0);
    }

    #[test]
    fn test_broken_source_is_parse_failure() {
        let failure = analyze("/proj/broken.py", "def f(:\n    return [1, 2\n").unwrap_err();
        assert_eq!(failure.path, "/proj/broken.py");
        assert!(failure.line >= 1);
    }

    #[test]
    fn test_unmatched_bracket_is_parse_failure() {
        assert!(analyze("/proj/b.py", "x = [1, 2\n").is_err());
        assert!(analyze("/proj/b.py", "print(1))\n").is_err());
    }

    #[test]
    fn test_grammar_tolerated_invalid_python_is_parse_failure() {
        let sources = [
            "print \"hello\"\n",
            "exec \"x = 1\"\n",
            "del f()\n",
            "f(x for x in y, 1)\n",
            "def f(a=1, b):\n    pass\n",
            "a, b += 1\n",
            "def f():\n  x = 1\n    y = 2\n",
        ];
        for src in sources {
            match analyze("/proj/x.py", src) {
                Ok(fact) => panic!("expected parse failure for {:?}, got {:?}", src, fact),
                Err(failure) => assert_eq!(failure.path, "/proj/x.py"),
            }
        }
    }

    #[test]
    fn test_from_import_keeps_module_only() {
        let fact = analyze("/proj/i.py", "from pkg.sub import A, B\nimport os\n").unwrap();
        assert!(fact.imports.contains(&"pkg.sub".to_string()));
        assert!(fact.imports.contains(&"os".to_string()));
        assert!(!fact.imports.iter().any(|i| i == "A" || i == "B"));
        assert_eq!(fact.imports.len(), 2);
    }

    #[test]
    fn test_nested_function_is_not_top_level_or_method() {
        let src = "def outer():\n    def inner():\n        pass\n    return inner\n\nclass C:\n    def m(self):\n        def helper():\n            pass\n";
        let fact = analyze("/proj/n.py", src).unwrap();
        let names: Vec<&str> = fact.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["outer"]);
        let methods: Vec<&str> = fact.classes[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["m"]);
    }

    #[test]
    fn test_methods_in_source_order_with_interleaved_statements() {
        let src = "class K:\n    x = 1\n    def a(self):\n        pass\n    y = 2\n    @property\n    def b(self):\n        pass\n    if True:\n        def hidden(self):\n            pass\n    async def c(self, n):\n        pass\n";
        let fact = analyze("/proj/k.py", src).unwrap();
        let methods: Vec<&str> = fact.classes[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["a", "b", "c"]);
        assert!(fact.functions.is_empty());
    }

    #[test]
    fn test_same_named_method_and_function() {
        let src = "class A:\n    def run(self):\n        pass\n\ndef run():\n    pass\n";
        let fact = analyze("/proj/r.py", src).unwrap();
        assert_eq!(fact.functions.len(), 1);
        assert_eq!(fact.functions[0].line_number, 5);
        assert_eq!(fact.classes[0].methods[0].name, "run");
    }

    #[test]
    fn test_nested_classes_are_collected_in_document_order() {
        let src = "class Outer:\n    class Inner:\n        def m(self):\n            pass\n\ndef factory():\n    class Local:\n        pass\n    return Local\n";
        let fact = analyze("/proj/c.py", src).unwrap();
        let names: Vec<&str> = fact.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Outer", "Inner", "Local"]);
        assert!(fact.classes[0].methods.is_empty());
        assert_eq!(fact.complexity, 4);
    }

    #[test]
    fn test_guarded_definitions_are_not_top_level() {
        let src = "import sys\nif sys.version_info >= (3, 8):\n    def compat():\n        pass\n    import typing\n";
        let fact = analyze("/proj/g.py", src).unwrap();
        assert!(fact.functions.is_empty());
        assert_eq!(fact.imports, vec!["sys", "typing"]);
    }

    #[test]
    fn test_absent_return_annotation_is_none() {
        let fact = analyze("/proj/n.py", "def f(a, b=2):\n    \"\"\"Add.\"\"\"\n    return a + b\n").unwrap();
        let f = &fact.functions[0];
        assert_eq!(f.returns, None);
        assert_eq!(f.docstring.as_deref(), Some("Add."));
        assert_eq!(f.args, vec!["a", "b"]);
    }

    #[test]
    fn test_generic_return_annotation() {
        let fact = analyze("/proj/n.py", "def names() -> List[ str ]:\n    return []\n").unwrap();
        assert_eq!(fact.functions[0].returns.as_deref(), Some("List[str]"));
    }

    #[test]
    fn test_complexity_invariant() {
        let sources = [
            "",
            "x = 1\n",
            "class A:\n    pass\nclass B:\n    pass\ndef f():\n    pass\n",
            "def a():\n    def b():\n        class C:\n            pass\n",
        ];
        for src in sources {
            let fact = analyze("/proj/x.py", src).unwrap();
            assert_eq!(
                fact.complexity,
                (fact.classes.len() + fact.functions.len()) as i64
            );
        }
    }

    #[test]
    fn test_serialized_shape_roundtrips() {
        let src = "class Foo:\n    '''doc'''\n    def bar(self, x):\n        pass\n\ndef baz() -> int:\n    return 1\n";
        let fact = analyze("/proj/foo.py", src).unwrap();
        let json = serde_json::to_string(&fact).unwrap();
        let back: FileFact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fact);
    }

    #[test]
    fn test_analyze_file_dispatch() {
        let tmp = TempDir::new().unwrap();
        let py = tmp.path().join("ok.py");
        let bad = tmp.path().join("bad.py");
        let js = tmp.path().join("app.js");
        fs::write(&py, "def f():\n    pass\n").unwrap();
        fs::write(&bad, "def (\n").unwrap();
        fs::write(&js, "function f() {}\n").unwrap();

        assert!(matches!(analyze_file(&py), FileOutcome::Parsed(_)));
        assert!(matches!(analyze_file(&bad), FileOutcome::Failed(_)));
        match analyze_file(&js) {
            FileOutcome::Unsupported { extension, .. } => assert_eq!(extension, "js"),
            other => panic!("expected unsupported, got {:?}", other),
        }
        let missing = tmp.path().join("missing.py");
        assert!(matches!(analyze_file(&missing), FileOutcome::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_batch_yields_one_outcome_per_file() {
        let tmp = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..12 {
            let path = tmp.path().join(format!("m{:02}.py", i));
            let body = if i % 4 == 0 {
                "def broken(:\n".to_string()
            } else {
                format!("def f{}():\n    pass\n", i)
            };
            fs::write(&path, body).unwrap();
            paths.push(path);
        }
        paths.push(tmp.path().join("ui.tsx"));
        fs::write(tmp.path().join("ui.tsx"), "export {}\n").unwrap();

        let outcomes = analyze_batch(paths.clone(), 4).await.unwrap();
        assert_eq!(outcomes.len(), paths.len());

        let report = BatchReport::from_outcomes(outcomes);
        assert_eq!(report.facts.len(), 9);
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.unsupported.len(), 1);
        assert!(report.unreadable.is_empty());
    }
}
