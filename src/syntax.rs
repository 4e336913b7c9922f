//! Tagged-variant Python syntax tree.
//!
//! Source text is parsed with tree-sitter and lowered into a small AST that
//! keeps only what the extractor needs: class and function definitions,
//! both import forms, and compound statements (as [`Stmt::Block`]) so that
//! definitions nested under `if`/`try`/`with` stay reachable. Everything
//! else collapses into [`Stmt::Other`].
//!
//! Traversal goes through the [`Visitor`] trait and [`walk`], which hand
//! every node its lexical nesting depth. Depth 0 is the module body; it
//! increases by one on entering any class body, function body, or compound
//! statement suite.

use std::cell::RefCell;
use tree_sitter::{Node, Parser};

/// A parsed module body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    ClassDef(ClassDef),
    FunctionDef(FunctionDef),
    /// `import a.b, c as d` → `["a.b", "c"]`
    Import(Vec<String>),
    /// `from a.b import c` → `Some("a.b")`; `from . import c` → `None`
    ImportFrom(Option<String>),
    /// Suites of a compound statement (`if`, `for`, `while`, `try`, `with`, `match`).
    Block(Vec<Vec<Stmt>>),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    /// 1-based line of the `class` keyword.
    pub line: usize,
    pub docstring: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    /// 1-based line of the `def` keyword.
    pub line: usize,
    pub is_async: bool,
    pub docstring: Option<String>,
    /// Positional parameter names, receiver included.
    pub params: Vec<String>,
    /// Return annotation rendered as source text.
    pub returns: Option<String>,
    pub body: Vec<Stmt>,
}

/// Location of the first syntax error in a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Callbacks for [`walk`]. Every hook has an empty default.
pub trait Visitor {
    fn visit_class(&mut self, _class: &ClassDef, _depth: usize) {}
    fn visit_function(&mut self, _function: &FunctionDef, _depth: usize) {}
    fn visit_import(&mut self, _names: &[String], _depth: usize) {}
    fn visit_import_from(&mut self, _module: Option<&str>, _depth: usize) {}
}

/// Visit `body` in document order, descending into nested bodies.
pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt], depth: usize) {
    for stmt in body {
        match stmt {
            Stmt::ClassDef(class) => {
                visitor.visit_class(class, depth);
                walk(visitor, &class.body, depth + 1);
            }
            Stmt::FunctionDef(function) => {
                visitor.visit_function(function, depth);
                walk(visitor, &function.body, depth + 1);
            }
            Stmt::Import(names) => visitor.visit_import(names, depth),
            Stmt::ImportFrom(module) => visitor.visit_import_from(module.as_deref(), depth),
            Stmt::Block(suites) => {
                for suite in suites {
                    walk(visitor, suite, depth + 1);
                }
            }
            Stmt::Other => {}
        }
    }
}

thread_local! {
    static PARSER: RefCell<Parser> = RefCell::new(new_parser());
}

fn new_parser() -> Parser {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        panic!("failed to load Python grammar: {err}");
    }
    parser
}

/// Parse Python source into a [`Module`].
///
/// Any error or missing node anywhere in the tree rejects the whole input;
/// a partially recovered tree is never lowered. Constructs the grammar
/// tolerates but Python 3 rejects (see [`check_python3`]) are errors too.
pub fn parse_module(source: &str) -> Result<Module, SyntaxError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let tree = PARSER
        .with(|parser| parser.borrow_mut().parse(source, None))
        .ok_or_else(|| SyntaxError {
            line: 1,
            column: 1,
            message: "parser produced no tree".to_string(),
        })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(first_error(root));
    }

    let src = source.as_bytes();
    check_python3(root, src)?;
    Ok(Module {
        body: lower_statements(root, src),
    })
}

fn first_error(root: Node) -> SyntaxError {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            let message = if node.is_missing() {
                format!("missing `{}`", node.kind())
            } else {
                "invalid syntax".to_string()
            };
            return SyntaxError {
                line: pos.row + 1,
                column: pos.column + 1,
                message,
            };
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node
            .children(&mut cursor)
            .filter(|c| c.has_error())
            .collect();
        // Reverse so the leftmost child is popped first.
        stack.extend(children.into_iter().rev());
    }
    let pos = root.start_position();
    SyntaxError {
        line: pos.row + 1,
        column: pos.column + 1,
        message: "invalid syntax".to_string(),
    }
}

// ============ Python 3 checks ============

/// Walk the whole tree and reject what tree-sitter-python accepts but the
/// Python 3 compiler does not: Python 2 statements and literals, stray
/// indentation, and a few target/parameter rules the grammar leaves open.
fn check_python3(root: Node, src: &[u8]) -> Result<(), SyntaxError> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some((at, message)) = violation(node, src) {
            let pos = at.start_position();
            return Err(SyntaxError {
                line: pos.row + 1,
                column: pos.column + 1,
                message,
            });
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    Ok(())
}

fn violation<'t>(node: Node<'t>, src: &[u8]) -> Option<(Node<'t>, String)> {
    match node.kind() {
        "print_statement" => Some((node, "Missing parentheses in call to 'print'".to_string())),
        "exec_statement" => Some((node, "Missing parentheses in call to 'exec'".to_string())),
        "module" | "block" => {
            misindented_statement(node, src).map(|stmt| (stmt, "unexpected indent".to_string()))
        }
        "parameters" | "lambda_parameters" => non_default_after_default(node).map(|param| {
            (
                param,
                "non-default argument follows default argument".to_string(),
            )
        }),
        "augmented_assignment" => {
            let left = node.child_by_field_name("left")?;
            match left.kind() {
                "identifier" | "attribute" | "subscript" => None,
                kind => Some((
                    left,
                    format!("'{}' is an illegal expression for augmented assignment", kind),
                )),
            }
        }
        "delete_statement" => {
            let mut cursor = node.walk();
            let targets: Vec<Node<'t>> = node
                .named_children(&mut cursor)
                .filter(|c| !c.is_extra())
                .collect();
            let bad = targets.into_iter().find_map(invalid_del_target)?;
            let what = if bad.kind() == "call" { "function call" } else { "expression" };
            Some((bad, format!("cannot delete {}", what)))
        }
        // `[x for x in a, b]`: the iterable of a comprehension is one expression
        "for_in_clause" => {
            let mut cursor = node.walk();
            let comma = node.children(&mut cursor).find(|c| c.kind() == ",")?;
            Some((comma, "invalid syntax".to_string()))
        }
        // `raise E, "message"`
        "raise_statement" => {
            let mut cursor = node.walk();
            let list = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "expression_list")?;
            Some((list, "invalid syntax".to_string()))
        }
        "comparison_operator" => {
            let mut cursor = node.walk();
            let op = node.children(&mut cursor).find(|c| c.kind() == "<>")?;
            Some((op, "invalid syntax".to_string()))
        }
        "integer" => {
            let text = node.utf8_text(src).ok()?;
            integer_literal_error(text).map(|message| (node, message.to_string()))
        }
        _ => None,
    }
}

/// First statement of a `module` or `block` that starts a line at a
/// different column than its siblings. Module statements sit at column 0.
fn misindented_statement<'t>(container: Node<'t>, src: &[u8]) -> Option<Node<'t>> {
    let mut expected = (container.kind() == "module").then_some(0);
    let mut cursor = container.walk();
    let statements: Vec<Node<'t>> = container
        .named_children(&mut cursor)
        .filter(|c| !c.is_extra())
        .collect();

    for stmt in statements {
        let start = stmt.start_position();
        let line_start = stmt.start_byte() - start.column;
        let begins_line = src[line_start..stmt.start_byte()]
            .iter()
            .all(|b| matches!(b, b' ' | b'\t' | b'\x0c'));
        if !begins_line {
            continue;
        }
        match expected {
            None => expected = Some(start.column),
            Some(column) if column != start.column => return Some(stmt),
            Some(_) => {}
        }
    }
    None
}

/// A positional parameter without a default after one with a default.
/// Anything after `*`, `*args` or `**kwargs` is keyword-only and exempt.
fn non_default_after_default<'t>(params: Node<'t>) -> Option<Node<'t>> {
    let mut seen_default = false;
    let mut cursor = params.walk();
    let children: Vec<Node<'t>> = params.named_children(&mut cursor).collect();
    for param in children {
        match param.kind() {
            "default_parameter" | "typed_default_parameter" => seen_default = true,
            "identifier" if seen_default => return Some(param),
            "typed_parameter" => {
                let starred = param
                    .named_child(0)
                    .is_some_and(|n| n.kind() != "identifier");
                if starred {
                    return None;
                }
                if seen_default {
                    return Some(param);
                }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" | "keyword_separator" => {
                return None
            }
            _ => {}
        }
    }
    None
}

fn invalid_del_target(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" | "attribute" | "subscript" => None,
        "expression_list" | "tuple" | "list" | "parenthesized_expression" | "pattern_list"
        | "tuple_pattern" | "list_pattern" => {
            let mut cursor = node.walk();
            let items: Vec<Node> = node
                .named_children(&mut cursor)
                .filter(|c| !c.is_extra())
                .collect();
            items.into_iter().find_map(invalid_del_target)
        }
        _ => Some(node),
    }
}

/// `10L` and `0777` are Python 2 literals.
fn integer_literal_error(text: &str) -> Option<&'static str> {
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    if digits.ends_with(['l', 'L']) {
        return Some("invalid decimal literal");
    }
    let leading_zero = digits.len() > 1
        && digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
        && digits.bytes().any(|b| b != b'0');
    leading_zero.then_some("leading zeros in decimal integer literals are not permitted")
}

/// Lower the statements of a `module` or `block` node.
fn lower_statements(node: Node, src: &[u8]) -> Vec<Stmt> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| !child.is_extra())
        .map(|child| lower_statement(child, src))
        .collect()
}

fn lower_statement(node: Node, src: &[u8]) -> Stmt {
    match node.kind() {
        "class_definition" => Stmt::ClassDef(lower_class(node, src)),
        "function_definition" => Stmt::FunctionDef(lower_function(node, src)),
        "decorated_definition" => match node.child_by_field_name("definition") {
            Some(definition) => lower_statement(definition, src),
            None => Stmt::Other,
        },
        "import_statement" => Stmt::Import(import_names(node, src)),
        "import_from_statement" => Stmt::ImportFrom(import_module(node, src)),
        "future_import_statement" => Stmt::ImportFrom(Some("__future__".to_string())),
        "if_statement" | "for_statement" | "while_statement" | "try_statement"
        | "with_statement" | "match_statement" | "case_clause" => Stmt::Block(
            collect_suites(node)
                .into_iter()
                .map(|block| lower_statements(block, src))
                .collect(),
        ),
        _ => Stmt::Other,
    }
}

fn lower_class(node: Node, src: &[u8]) -> ClassDef {
    let body = node.child_by_field_name("body");
    ClassDef {
        name: field_text(node, "name", src).unwrap_or_default(),
        line: node.start_position().row + 1,
        docstring: body.and_then(|b| docstring(b, src)),
        body: body.map(|b| lower_statements(b, src)).unwrap_or_default(),
    }
}

fn lower_function(node: Node, src: &[u8]) -> FunctionDef {
    let body = node.child_by_field_name("body");
    let mut cursor = node.walk();
    let is_async = node.children(&mut cursor).any(|c| c.kind() == "async");
    FunctionDef {
        name: field_text(node, "name", src).unwrap_or_default(),
        line: node.start_position().row + 1,
        is_async,
        docstring: body.and_then(|b| docstring(b, src)),
        params: node
            .child_by_field_name("parameters")
            .map(|p| positional_params(p, src))
            .unwrap_or_default(),
        returns: node
            .child_by_field_name("return_type")
            .map(|t| render_annotation(t, src)),
        body: body.map(|b| lower_statements(b, src)).unwrap_or_default(),
    }
}

/// Every `block` reachable from a compound statement without crossing
/// another block. Expressions never contain blocks, so a plain descent is
/// enough.
fn collect_suites(node: Node) -> Vec<Node> {
    let mut suites = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            if child.kind() == "block" {
                suites.push(child);
            } else {
                stack.push(child);
            }
        }
    }
    suites.sort_by_key(|b| b.start_byte());
    suites
}

fn field_text(node: Node, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(src).ok())
        .map(|s| s.to_string())
}

fn dotted(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace() && *c != '\\').collect()
}

fn import_names(node: Node, src: &[u8]) -> Vec<String> {
    let mut cursor = node.walk();
    node.children_by_field_name("name", &mut cursor)
        .filter_map(|name| {
            let target = match name.kind() {
                "aliased_import" => name.child_by_field_name("name")?,
                _ => name,
            };
            target.utf8_text(src).ok().map(dotted)
        })
        .collect()
}

fn import_module(node: Node, src: &[u8]) -> Option<String> {
    let module = node.child_by_field_name("module_name")?;
    match module.kind() {
        "relative_import" => {
            let mut cursor = module.walk();
            let name = module
                .named_children(&mut cursor)
                .find(|c| c.kind() == "dotted_name")?;
            name.utf8_text(src).ok().map(dotted)
        }
        _ => module.utf8_text(src).ok().map(dotted),
    }
}

/// Names of positional parameters, stopping at the first `*`, `*args` or
/// `**kwargs`.
fn positional_params(node: Node, src: &[u8]) -> Vec<String> {
    let mut params = Vec::new();
    let mut cursor = node.walk();
    for param in node.named_children(&mut cursor) {
        let name_node = match param.kind() {
            "identifier" => Some(param),
            "default_parameter" | "typed_default_parameter" => param.child_by_field_name("name"),
            "typed_parameter" => {
                let mut inner = param.walk();
                let first = param.named_children(&mut inner).next();
                match first {
                    Some(n) if n.kind() == "identifier" => Some(n),
                    // `*args: int` / `**kw: str`
                    Some(_) => break,
                    None => None,
                }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" | "keyword_separator" => break,
            _ => None,
        };
        if let Some(text) = name_node.and_then(|n| n.utf8_text(src).ok()) {
            params.push(text.to_string());
        }
    }
    params
}

/// Docstring of a body: its first statement, when that statement is a
/// plain string literal.
fn docstring(block: Node, src: &[u8]) -> Option<String> {
    let mut cursor = block.walk();
    let first = block
        .named_children(&mut cursor)
        .find(|c| !c.is_extra())?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let mut inner = first.walk();
    let exprs: Vec<Node> = first
        .named_children(&mut inner)
        .filter(|c| !c.is_extra())
        .collect();
    let [expr] = exprs.as_slice() else {
        return None;
    };
    let expr = *expr;
    let raw = match expr.kind() {
        "string" => decode_string_literal(expr.utf8_text(src).ok()?)?,
        "concatenated_string" => {
            let mut parts = String::new();
            let mut inner = expr.walk();
            for piece in expr.named_children(&mut inner) {
                if piece.kind() != "string" {
                    continue;
                }
                parts.push_str(&decode_string_literal(piece.utf8_text(src).ok()?)?);
            }
            parts
        }
        _ => return None,
    };
    Some(clean_docstring(&raw))
}

/// Decode one string literal token. Returns `None` for f-strings and
/// bytes, which never count as docstrings.
pub fn decode_string_literal(token: &str) -> Option<String> {
    let prefix_len = token
        .find(|c: char| c == '\'' || c == '"')
        .unwrap_or(token.len());
    let prefix = token[..prefix_len].to_ascii_lowercase();
    if prefix.contains('f') || prefix.contains('b') || prefix.contains('t') {
        return None;
    }
    let rest = &token[prefix_len..];
    let quote_len = if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
        3
    } else {
        1
    };
    if rest.len() < quote_len * 2 {
        return None;
    }
    let body = &rest[quote_len..rest.len() - quote_len];
    if prefix.contains('r') {
        Some(body.to_string())
    } else {
        Some(unescape(body))
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut digits = String::from(next);
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('\\');
                        out.push_str(&digits);
                    }
                }
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.clone().take(width).collect();
                match (hex.len() == width)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                {
                    Some(ch) => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    None => {
                        out.push('\\');
                        out.push(next);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

/// Normalize docstring indentation: tabs expanded, leading whitespace of
/// the first line stripped, the common indentation of the remaining lines
/// removed, and leading/trailing blank lines dropped.
pub fn clean_docstring(doc: &str) -> String {
    let mut lines: Vec<String> = doc.split('\n').map(expand_tabs).collect();

    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim_start().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start().to_string();
    }
    if let Some(margin) = margin {
        for line in lines.iter_mut().skip(1) {
            *line = line.chars().skip(margin).collect();
        }
    }
    for line in lines.iter_mut() {
        if line.trim().is_empty() {
            line.clear();
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| l.is_empty()).count();
    lines.drain(..leading);
    lines.join("\n")
}

fn expand_tabs(line: &str) -> String {
    const TAB: usize = 8;
    let mut out = String::with_capacity(line.len());
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = TAB - (col % TAB);
            out.push_str(&" ".repeat(pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

// ============ Annotations ============

/// Render a return annotation back to compact source text.
///
/// Built from the annotation's tokens, so comments and line continuations
/// inside it never leak into the result. Redundant outer parentheses and a
/// trailing comma in a multi-element bracket are dropped, and string
/// literals are re-quoted the way Python's `repr` does.
pub fn render_annotation(node: Node, src: &[u8]) -> String {
    let mut node = node;
    while matches!(node.kind(), "type" | "parenthesized_expression") {
        let mut cursor = node.walk();
        let inner = node.named_children(&mut cursor).find(|c| !c.is_extra());
        match inner {
            Some(inner) => node = inner,
            None => break,
        }
    }

    let mut tokens = Vec::new();
    annotation_tokens(node, src, &mut tokens);
    normalize_annotation(&join_tokens(&drop_trailing_commas(tokens)))
}

struct Token {
    text: String,
    start: usize,
    end: usize,
}

fn annotation_tokens(node: Node, src: &[u8], out: &mut Vec<Token>) {
    if node.is_extra() {
        return;
    }
    let atomic = matches!(node.kind(), "string" | "concatenated_string");
    if atomic || node.child_count() == 0 {
        let text = if atomic {
            string_constant(node, src)
        } else {
            node.utf8_text(src).unwrap_or_default().to_string()
        };
        if !text.is_empty() {
            out.push(Token {
                text,
                start: node.start_byte(),
                end: node.end_byte(),
            });
        }
        return;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        annotation_tokens(child, src, out);
    }
}

/// `Tuple[int, str,]` → `Tuple[int, str]`; `Tuple[int,]` keeps its comma.
fn drop_trailing_commas(tokens: Vec<Token>) -> Vec<Token> {
    let mut kept: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut commas: Vec<usize> = Vec::new();
    for token in tokens {
        match token.text.as_str() {
            "[" | "(" | "{" => commas.push(0),
            "," => {
                if let Some(count) = commas.last_mut() {
                    *count += 1;
                }
            }
            "]" | ")" | "}" => {
                let count = commas.pop().unwrap_or(0);
                if count >= 2 && kept.last().is_some_and(|t| t.text == ",") {
                    kept.pop();
                }
            }
            _ => {}
        }
        kept.push(token);
    }
    kept
}

/// Concatenate tokens, keeping one space wherever the source had a gap.
fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_end = None;
    for token in tokens {
        if prev_end.is_some_and(|end| token.start > end) {
            out.push(' ');
        }
        out.push_str(&token.text);
        prev_end = Some(token.end);
    }
    out
}

/// The value of a plain (or implicitly concatenated) string literal in
/// `repr` form. f-strings and bytes are kept as written.
fn string_constant(node: Node, src: &[u8]) -> String {
    let raw = node.utf8_text(src).unwrap_or_default();
    let pieces: Vec<Node> = if node.kind() == "concatenated_string" {
        let mut cursor = node.walk();
        node.named_children(&mut cursor)
            .filter(|c| c.kind() == "string")
            .collect()
    } else {
        vec![node]
    };

    let mut value = String::new();
    for piece in pieces {
        match piece.utf8_text(src).ok().and_then(decode_string_literal) {
            Some(text) => value.push_str(&text),
            None => return raw.to_string(),
        }
    }
    python_repr(&value)
}

/// Quote `value` like Python's `repr(str)`: single quotes unless the text
/// contains a single quote and no double quote.
pub fn python_repr(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Collapse whitespace in annotation text: nothing padded inside brackets,
/// `", "` after commas and `" | "` around unions. Quoted text is copied
/// verbatim.
pub fn normalize_annotation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\\' && chars.peek() == Some(&'\n') {
            chars.next();
            pending_space = true;
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        let opens = out.ends_with(['[', '(', '.']) || out.is_empty();
        let closes = matches!(c, ']' | ')' | ',' | '.' | '[' | '(');
        if c == '|' {
            if !out.ends_with(' ') {
                out.push(' ');
            }
            out.push_str("| ");
            pending_space = false;
            continue;
        }
        if pending_space && !opens && !closes && !out.ends_with(' ') {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
        match c {
            ',' => pending_space = true,
            '\'' | '"' => quote = Some(c),
            _ => {}
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(source: &str) -> Vec<Stmt> {
        parse_module(source).expect("valid source").body
    }

    #[test]
    fn test_empty_module() {
        assert!(body("").is_empty());
    }

    #[test]
    fn test_decorated_definition_keeps_def_line() {
        let stmts = body("@dataclass\nclass Point:\n    x: int\n");
        match &stmts[0] {
            Stmt::ClassDef(class) => {
                assert_eq!(class.name, "Point");
                assert_eq!(class.line, 2);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_statements_become_blocks() {
        let stmts = body("if True:\n    import a\nelse:\n    import b\n");
        match &stmts[0] {
            Stmt::Block(suites) => {
                assert_eq!(suites.len(), 2);
                assert_eq!(suites[0], vec![Stmt::Import(vec!["a".to_string()])]);
                assert_eq!(suites[1], vec![Stmt::Import(vec!["b".to_string()])]);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_try_suites_in_source_order() {
        let src = "try:\n    import a\nexcept ImportError:\n    import b\nfinally:\n    import c\n";
        match &body(src)[0] {
            Stmt::Block(suites) => {
                let names: Vec<Stmt> = suites.iter().flatten().cloned().collect();
                assert_eq!(
                    names,
                    vec![
                        Stmt::Import(vec!["a".to_string()]),
                        Stmt::Import(vec!["b".to_string()]),
                        Stmt::Import(vec!["c".to_string()]),
                    ]
                );
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_import_forms() {
        let stmts = body(
            "import os.path as p, sys\nfrom .rel import x\nfrom . import y\nfrom __future__ import annotations\n",
        );
        assert_eq!(
            stmts,
            vec![
                Stmt::Import(vec!["os.path".to_string(), "sys".to_string()]),
                Stmt::ImportFrom(Some("rel".to_string())),
                Stmt::ImportFrom(None),
                Stmt::ImportFrom(Some("__future__".to_string())),
            ]
        );
    }

    #[test]
    fn test_positional_params_stop_at_star() {
        let stmts = body("def f(a, b: int, c=1, d: str = 'x', *args, e, **kw):\n    pass\n");
        match &stmts[0] {
            Stmt::FunctionDef(f) => assert_eq!(f.params, vec!["a", "b", "c", "d"]),
            other => panic!("expected function, got {:?}", other),
        }

        // Positional-only parameters are positional too, so `a` is kept.
        let stmts = body("def g(a, /, b, *, c):\n    pass\n");
        match &stmts[0] {
            Stmt::FunctionDef(f) => assert_eq!(f.params, vec!["a", "b"]),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_async_function_flag() {
        match &body("async def fetch(url):\n    pass\n")[0] {
            Stmt::FunctionDef(f) => {
                assert!(f.is_async);
                assert_eq!(f.params, vec!["url"]);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_docstring_must_be_first_statement() {
        match &body("def f():\n    x = 1\n    '''not a docstring'''\n")[0] {
            Stmt::FunctionDef(f) => assert_eq!(f.docstring, None),
            other => panic!("expected function, got {:?}", other),
        }
        match &body("def f():\n    # comment\n    \"\"\"Doc.\"\"\"\n")[0] {
            Stmt::FunctionDef(f) => assert_eq!(f.docstring.as_deref(), Some("Doc.")),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_fstring_and_bytes_are_not_docstrings() {
        assert_eq!(decode_string_literal("f'x'"), None);
        assert_eq!(decode_string_literal("b'x'"), None);
        assert_eq!(decode_string_literal("r'a\\n'").as_deref(), Some("a\\n"));
        assert_eq!(decode_string_literal("'a\\tb'").as_deref(), Some("a\tb"));
        assert_eq!(decode_string_literal("\"\\x41\\u00e9\"").as_deref(), Some("Aé"));
    }

    #[test]
    fn test_clean_docstring_dedents() {
        let raw = "\n    Summary line.\n\n        Indented detail.\n    Back.\n    ";
        assert_eq!(
            clean_docstring(raw),
            "Summary line.\n\n    Indented detail.\nBack."
        );
        assert_eq!(clean_docstring("  one line  "), "one line  ");
    }

    fn returns_of(source: &str) -> Option<String> {
        match &body(source)[0] {
            Stmt::FunctionDef(f) => f.returns.clone(),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_render_annotation() {
        assert_eq!(returns_of("def f() -> int: pass\n").as_deref(), Some("int"));
        assert_eq!(returns_of("def f() -> List[ str ]: pass\n").as_deref(), Some("List[str]"));
        assert_eq!(returns_of("def f() -> Dict[str,int]: pass\n").as_deref(), Some("Dict[str, int]"));
        assert_eq!(returns_of("def f() -> int|None: pass\n").as_deref(), Some("int | None"));
        assert_eq!(returns_of("def f() -> Literal[-1]: pass\n").as_deref(), Some("Literal[-1]"));
        assert_eq!(
            returns_of("def f() -> Callable[..., int]: pass\n").as_deref(),
            Some("Callable[..., int]")
        );
        assert_eq!(
            returns_of("def f() -> typing.Optional[ 'A  B' ]: pass\n").as_deref(),
            Some("typing.Optional['A  B']")
        );
    }

    #[test]
    fn test_render_annotation_drops_comments_and_trailing_commas() {
        let src = "def f() -> Tuple[\n    int,  # count\n    str,\n]:\n    pass\n";
        assert_eq!(returns_of(src).as_deref(), Some("Tuple[int, str]"));

        let src = "def f() -> Tuple[\n    int,\n]:\n    pass\n";
        assert_eq!(returns_of(src).as_deref(), Some("Tuple[int,]"));

        let src = "def f() -> Dict[str, \\\n        int]:\n    pass\n";
        assert_eq!(returns_of(src).as_deref(), Some("Dict[str, int]"));
    }

    #[test]
    fn test_render_annotation_unwraps_parentheses() {
        assert_eq!(returns_of("def f() -> (int): pass\n").as_deref(), Some("int"));
        assert_eq!(returns_of("def f() -> ((List[int])): pass\n").as_deref(), Some("List[int]"));
    }

    #[test]
    fn test_render_annotation_requotes_strings() {
        assert_eq!(returns_of("def f() -> \"Foo\": pass\n").as_deref(), Some("'Foo'"));
        assert_eq!(
            returns_of("def f() -> List[\"Node\"]: pass\n").as_deref(),
            Some("List['Node']")
        );
        assert_eq!(returns_of("def f() -> \"it's\": pass\n").as_deref(), Some("\"it's\""));
    }

    #[test]
    fn test_python_repr() {
        assert_eq!(python_repr("a"), "'a'");
        assert_eq!(python_repr("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(python_repr("tab\there"), "'tab\\there'");
    }

    fn rejects(source: &str) -> SyntaxError {
        match parse_module(source) {
            Ok(module) => panic!("accepted invalid source {:?}: {:?}", source, module),
            Err(err) => err,
        }
    }

    #[test]
    fn test_python2_statements_rejected() {
        let err = rejects("print \"hello\"\n");
        assert_eq!(err.line, 1);
        assert!(err.message.contains("print"));
        assert!(rejects("exec \"x = 1\"\n").message.contains("exec"));
        rejects("raise ValueError, \"bad\"\n");
        rejects("if a <> b:\n    pass\n");
        rejects("x = 0777\n");
        rejects("x = 10L\n");

        assert!(parse_module("print(\"hello\")\nexec(\"x = 1\")\nx = 00 + 0o777 + 10j\n").is_ok());
    }

    #[test]
    fn test_unexpected_indent_rejected() {
        let err = rejects("def f():\n  x = 1\n    y = 2\n");
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "unexpected indent");
        assert_eq!(rejects("  x = 1\n").line, 1);
        rejects("if x:\n        a = 1\n    b = 2\n");

        let ok = "def f():\n    x = 1; y = 2\n    # comment\n    return [\n            x,\n        y]\n";
        assert!(parse_module(ok).is_ok());
        assert!(parse_module("\u{feff}import os\n").is_ok());
    }

    #[test]
    fn test_parameter_order_rejected() {
        let err = rejects("def f(a=1, b):\n    pass\n");
        assert!(err.message.contains("non-default argument"));
        rejects("f = lambda a=1, b: a\n");
        rejects("def f(a: int = 1, b: str):\n    pass\n");

        assert!(parse_module("def f(a, b=1, *args, c, d=2, **kw):\n    pass\n").is_ok());
        assert!(parse_module("def f(a=1, *, b):\n    pass\n").is_ok());
    }

    #[test]
    fn test_invalid_targets_rejected() {
        assert!(rejects("a, b += 1\n").message.contains("augmented assignment"));
        assert_eq!(rejects("del f()\n").message, "cannot delete function call");
        rejects("del a, (b, f())\n");
        rejects("f(x for x in y, 1)\n");
        rejects("[x for x in a, b]\n");

        let ok = "a += 1\nself.n += 1\nd['k'] -= 1\ndel a, b.c, d[0], (e, f)\nf(x for x in y)\nf((x for x in y), 1)\n";
        assert!(parse_module(ok).is_ok());
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse_module("def f(:\n    pass\n").unwrap_err();
        assert_eq!(err.line, 1);
        let err = parse_module("x = (1,\n").unwrap_err();
        assert!(err.line >= 1);
    }

    #[derive(Default)]
    struct DepthRecorder {
        seen: Vec<(String, usize)>,
    }

    impl Visitor for DepthRecorder {
        fn visit_class(&mut self, class: &ClassDef, depth: usize) {
            self.seen.push((class.name.clone(), depth));
        }
        fn visit_function(&mut self, function: &FunctionDef, depth: usize) {
            self.seen.push((function.name.clone(), depth));
        }
    }

    #[test]
    fn test_walk_reports_depth_in_document_order() {
        let src = "class A:\n    def m(self):\n        def inner():\n            pass\n\nif X:\n    def guarded():\n        pass\n\ndef top():\n    pass\n";
        let module = parse_module(src).unwrap();
        let mut recorder = DepthRecorder::default();
        walk(&mut recorder, &module.body, 0);
        assert_eq!(
            recorder.seen,
            vec![
                ("A".to_string(), 0),
                ("m".to_string(), 1),
                ("inner".to_string(), 2),
                ("guarded".to_string(), 1),
                ("top".to_string(), 0),
            ]
        );
    }
}
