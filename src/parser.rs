//! AST parsing and semantic node extraction.
//!
//! Wraps tree-sitter behind the language strategy records in [`crate::lang`].
//! Extraction is pure: given the same `(source, language)` the node and call
//! lists are identical across runs. A grammar that fails to load disables
//! only its own language for the session.

use crate::lang::{classify_node, spec_for, DocstringStyle, LanguageSpec};
use crate::types::{ChunkKind, Language};
use parking_lot::Mutex;
use std::collections::HashSet;
use tree_sitter::{Node, Parser, Tree};

/// An extractable semantic node: a function, method, class, interface, type,
/// struct, enum, or module definition.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub kind: ChunkKind,
    /// Exact source identifier, when one could be resolved.
    pub name: Option<String>,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub start_col: usize,
    pub end_col: usize,
    /// Names of enclosing extractable ancestors, innermost last.
    pub scope: Vec<String>,
    pub docstring: Option<String>,
    /// One-line display signature, body stripped.
    pub signature: Option<String>,
}

impl ParsedNode {
    /// Scope chain plus own name, joined with `.`.
    pub fn fqn(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        if self.scope.is_empty() {
            Some(name.to_string())
        } else {
            Some(format!("{}.{}", self.scope.join("."), name))
        }
    }
}

/// A call site observed in a file.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Trailing identifier of the callee expression.
    pub callee: String,
    /// 1-based line of the call.
    pub line: usize,
    /// FQN of the enclosing definition, or `<toplevel>`.
    pub caller_fqn: String,
}

/// Parser facade over the fixed language set.
pub struct AstParser {
    disabled: Mutex<HashSet<Language>>,
}

impl Default for AstParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AstParser {
    pub fn new() -> Self {
        Self {
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// Parse source, returning `None` if the language is disabled or the
    /// grammar rejects initialisation.
    pub fn parse(&self, source: &str, language: Language) -> Option<Tree> {
        if self.disabled.lock().contains(&language) {
            return None;
        }

        let spec = spec_for(language);
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&(spec.grammar)()) {
            tracing::warn!(language = language.as_str(), error = %e, "grammar unavailable; language disabled");
            self.disabled.lock().insert(language);
            return None;
        }
        parser.parse(source, None)
    }

    /// Extract semantic nodes in source order.
    pub fn extract_nodes(&self, tree: &Tree, source: &str, language: Language) -> Vec<ParsedNode> {
        let spec = spec_for(language);
        let mut nodes = Vec::new();
        let mut scope = Vec::new();
        let mut containers = Vec::new();
        walk_nodes(
            tree.root_node(),
            source.as_bytes(),
            spec,
            &mut scope,
            &mut containers,
            &mut nodes,
        );
        nodes
    }

    /// Extract call sites with their enclosing definition FQN.
    pub fn extract_calls(&self, tree: &Tree, source: &str, language: Language) -> Vec<CallSite> {
        let spec = spec_for(language);
        let mut calls = Vec::new();
        let mut scope = Vec::new();
        walk_calls(tree.root_node(), source.as_bytes(), spec, &mut scope, &mut calls);
        calls
    }
}

// ----------------------------------------------------------------------------
// Node extraction
// ----------------------------------------------------------------------------

fn walk_nodes(
    node: Node,
    bytes: &[u8],
    spec: &LanguageSpec,
    scope: &mut Vec<String>,
    containers: &mut Vec<ChunkKind>,
    out: &mut Vec<ParsedNode>,
) {
    if let Some(raw_kind) = classify_node(spec, node.kind()) {
        let name = resolve_name(node, bytes, spec);
        let kind = reclassify(raw_kind, containers);
        let start = node.start_position();
        let end = node.end_position();

        out.push(ParsedNode {
            kind,
            name: name.clone(),
            start_line: start.row + 1,
            end_line: end.row + 1,
            start_col: start.column,
            end_col: end.column,
            scope: scope.clone(),
            docstring: extract_docstring(node, bytes, spec),
            signature: extract_signature(node, bytes, spec),
        });

        match name {
            Some(name) => {
                scope.push(name);
                containers.push(kind);
                recurse_nodes(node, bytes, spec, scope, containers, out);
                containers.pop();
                scope.pop();
            }
            None => recurse_nodes(node, bytes, spec, scope, containers, out),
        }
    } else {
        recurse_nodes(node, bytes, spec, scope, containers, out);
    }
}

fn recurse_nodes(
    node: Node,
    bytes: &[u8],
    spec: &LanguageSpec,
    scope: &mut Vec<String>,
    containers: &mut Vec<ChunkKind>,
    out: &mut Vec<ParsedNode>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_nodes(child, bytes, spec, scope, containers, out);
    }
}

/// A function whose innermost container is class-like is a method; functions
/// nested in plain modules keep their kind.
fn reclassify(kind: ChunkKind, containers: &[ChunkKind]) -> ChunkKind {
    if kind != ChunkKind::Function {
        return kind;
    }
    match containers.last() {
        Some(ChunkKind::Class | ChunkKind::Interface | ChunkKind::Struct | ChunkKind::Enum) => {
            ChunkKind::Method
        }
        _ => kind,
    }
}

/// Resolve a node's name: declared fields first, then the first
/// identifier-like child.
fn resolve_name(node: Node, bytes: &[u8], spec: &LanguageSpec) -> Option<String> {
    for field in spec.name_fields {
        if let Some(name_node) = node.child_by_field_name(field) {
            if let Some(name) = first_ident(node_text(name_node, bytes)) {
                return Some(name);
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind().contains("identifier") {
            if let Some(name) = first_ident(node_text(child, bytes)) {
                return Some(name);
            }
        }
    }
    None
}

fn node_text<'a>(node: Node, bytes: &'a [u8]) -> &'a str {
    node.utf8_text(bytes).unwrap_or("")
}

/// First identifier token in a text, e.g. `Foo` from `Foo<T>`.
fn first_ident(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Last identifier token in a text, e.g. `bar` from `foo.bar` or `a::bar`.
fn last_ident(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .next_back()
        .map(|s| s.to_string())
}

/// One-line signature: the declaration's first line with the body opener
/// stripped, capped at 200 chars.
fn extract_signature(node: Node, bytes: &[u8], spec: &LanguageSpec) -> Option<String> {
    let text = node_text(node, bytes);
    let first_line = text.lines().next()?.trim();

    let sig = if spec.docstring == DocstringStyle::BodyStringLiteral {
        // Python: up to and including the block colon. Last colon on the
        // line, so parameter annotations survive.
        match first_line.rfind(':') {
            Some(colon) => &first_line[..=colon],
            None => first_line,
        }
    } else {
        match first_line.find('{') {
            Some(brace) => first_line[..brace].trim_end(),
            None => first_line,
        }
    };

    if sig.is_empty() {
        return None;
    }
    let mut sig = sig.to_string();
    if sig.len() > 200 {
        let cut = (0..=200).rev().find(|&i| sig.is_char_boundary(i))?;
        sig.truncate(cut);
        sig.push_str("...");
    }
    Some(sig)
}

// ----------------------------------------------------------------------------
// Docstrings
// ----------------------------------------------------------------------------

fn extract_docstring(node: Node, bytes: &[u8], spec: &LanguageSpec) -> Option<String> {
    match spec.docstring {
        DocstringStyle::PrecedingComment => preceding_comment(node, bytes),
        DocstringStyle::BodyStringLiteral => body_string_literal(node, bytes),
    }
}

/// Contiguous comment lines immediately above the declaration, with comment
/// markers stripped. Attribute/decorator lines between comment and
/// declaration are skipped.
fn preceding_comment(node: Node, bytes: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut cur = node.prev_sibling();

    while let Some(sibling) = cur {
        match sibling.kind() {
            "comment" | "line_comment" | "block_comment" => {
                let text = node_text(sibling, bytes);
                for line in text.lines().rev() {
                    let cleaned = clean_comment_line(line);
                    if !cleaned.is_empty() {
                        lines.push(cleaned.to_string());
                    }
                }
                cur = sibling.prev_sibling();
            }
            "attribute_item" | "decorator" => cur = sibling.prev_sibling(),
            _ => break,
        }
    }

    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn clean_comment_line(line: &str) -> &str {
    line.trim()
        .trim_start_matches("///")
        .trim_start_matches("//!")
        .trim_start_matches("//")
        .trim_start_matches("/**")
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .trim_start_matches('*')
        .trim_start_matches('#')
        .trim()
}

/// Python-style docstring: first string literal of the body.
fn body_string_literal(node: Node, bytes: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }

    let raw = node_text(string, bytes);
    let trimmed = raw
        .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'f' || c == 'u')
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ----------------------------------------------------------------------------
// Call extraction
// ----------------------------------------------------------------------------

fn walk_calls(
    node: Node,
    bytes: &[u8],
    spec: &LanguageSpec,
    scope: &mut Vec<String>,
    out: &mut Vec<CallSite>,
) {
    let mut pushed = false;
    if classify_node(spec, node.kind()).is_some() {
        if let Some(name) = resolve_name(node, bytes, spec) {
            scope.push(name);
            pushed = true;
        }
    }

    if spec.call_nodes.contains(&node.kind()) {
        let callee_node = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("constructor"));
        if let Some(callee_node) = callee_node {
            if let Some(callee) = last_ident(node_text(callee_node, bytes)) {
                let caller_fqn = if scope.is_empty() {
                    "<toplevel>".to_string()
                } else {
                    scope.join(".")
                };
                out.push(CallSite {
                    callee,
                    line: node.start_position().row + 1,
                    caller_fqn,
                });
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_calls(child, bytes, spec, scope, out);
    }

    if pushed {
        scope.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes_of(source: &str, language: Language) -> Vec<ParsedNode> {
        let parser = AstParser::new();
        let tree = parser.parse(source, language).expect("parse");
        parser.extract_nodes(&tree, source, language)
    }

    fn calls_of(source: &str, language: Language) -> Vec<CallSite> {
        let parser = AstParser::new();
        let tree = parser.parse(source, language).expect("parse");
        parser.extract_calls(&tree, source, language)
    }

    #[test]
    fn rust_symbols_with_scopes() {
        let src = r#"
/// Adds two numbers.
pub fn add(a: i32, b: i32) -> i32 { a + b }

pub struct Counter { n: u64 }

impl Counter {
    pub fn bump(&mut self) { self.n += 1; }
}
"#;
        let nodes = nodes_of(src, Language::Rust);

        let add = nodes.iter().find(|n| n.name.as_deref() == Some("add")).unwrap();
        assert_eq!(add.kind, ChunkKind::Function);
        assert!(add.scope.is_empty());
        assert_eq!(add.docstring.as_deref(), Some("Adds two numbers."));

        let bump = nodes.iter().find(|n| n.name.as_deref() == Some("bump")).unwrap();
        assert_eq!(bump.kind, ChunkKind::Method);
        assert_eq!(bump.scope, vec!["Counter".to_string()]);
    }

    #[test]
    fn typescript_class_and_method() {
        let src = r#"
export function greet(name: string) { return `hi ${name}`; }
export class A { run() { greet("x"); } }
"#;
        let nodes = nodes_of(src, Language::TypeScript);

        assert!(nodes.iter().any(|n| {
            n.name.as_deref() == Some("greet") && n.kind == ChunkKind::Function
        }));
        assert!(nodes.iter().any(|n| {
            n.name.as_deref() == Some("A") && n.kind == ChunkKind::Class
        }));
        let run = nodes.iter().find(|n| n.name.as_deref() == Some("run")).unwrap();
        assert_eq!(run.kind, ChunkKind::Method);
        assert_eq!(run.scope, vec!["A".to_string()]);
        assert_eq!(run.fqn().as_deref(), Some("A.run"));
    }

    #[test]
    fn typescript_calls_record_caller_fqn() {
        let src = r#"
export function greet(name: string) { return `hi ${name}`; }
export class A { run() { greet("x"); } }
"#;
        let calls = calls_of(src, Language::TypeScript);
        let call = calls.iter().find(|c| c.callee == "greet").unwrap();
        assert_eq!(call.caller_fqn, "A.run");
        assert_eq!(call.line, 3);
    }

    #[test]
    fn python_docstring_from_body() {
        let src = r#"
def fetch(url):
    """Fetch a URL and return the body."""
    return get(url)

class Client:
    def close(self):
        pass
"#;
        let nodes = nodes_of(src, Language::Python);
        let fetch = nodes.iter().find(|n| n.name.as_deref() == Some("fetch")).unwrap();
        assert_eq!(
            fetch.docstring.as_deref(),
            Some("Fetch a URL and return the body.")
        );

        let close = nodes.iter().find(|n| n.name.as_deref() == Some("close")).unwrap();
        assert_eq!(close.kind, ChunkKind::Method);
        assert_eq!(close.scope, vec!["Client".to_string()]);
    }

    #[test]
    fn go_method_declaration() {
        let src = r#"
package server

// Serve runs the loop.
func (s *Server) Serve() error {
    return s.loop()
}
"#;
        let nodes = nodes_of(src, Language::Go);
        let serve = nodes.iter().find(|n| n.name.as_deref() == Some("Serve")).unwrap();
        assert_eq!(serve.kind, ChunkKind::Method);
        assert_eq!(serve.docstring.as_deref(), Some("Serve runs the loop."));
    }

    #[test]
    fn spans_are_one_based_inclusive() {
        let src = "fn foo() {\n    1 + 1;\n}\n\nfn bar() {\n    2 + 2;\n}\n";
        let nodes = nodes_of(src, Language::Rust);
        let foo = nodes.iter().find(|n| n.name.as_deref() == Some("foo")).unwrap();
        assert_eq!((foo.start_line, foo.end_line), (1, 3));
        let bar = nodes.iter().find(|n| n.name.as_deref() == Some("bar")).unwrap();
        assert_eq!((bar.start_line, bar.end_line), (5, 7));
    }

    #[test]
    fn signatures_strip_bodies() {
        let src = "pub fn process(config: &Config, verbose: bool) -> Result<String, Error> {\n    todo!()\n}\n";
        let nodes = nodes_of(src, Language::Rust);
        let sig = nodes[0].signature.as_deref().unwrap();
        assert!(sig.contains("pub fn process"));
        assert!(sig.contains("Result<String, Error>"));
        assert!(!sig.contains('{'));

        let py = "def greet(name: str) -> str:\n    return name\n";
        let nodes = nodes_of(py, Language::Python);
        assert_eq!(
            nodes[0].signature.as_deref(),
            Some("def greet(name: str) -> str:")
        );
    }

    #[test]
    fn function_in_module_is_not_a_method() {
        let src = "mod util {\n    pub fn helper() {}\n}\n";
        let nodes = nodes_of(src, Language::Rust);
        let helper = nodes.iter().find(|n| n.name.as_deref() == Some("helper")).unwrap();
        assert_eq!(helper.kind, ChunkKind::Function);
        assert_eq!(helper.scope, vec!["util".to_string()]);
    }

    #[test]
    fn extraction_is_idempotent() {
        let src = "pub fn stable() {}\n";
        let a = nodes_of(src, Language::Rust);
        let b = nodes_of(src, Language::Rust);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].name, b[0].name);
        assert_eq!(a[0].start_line, b[0].start_line);
    }
}
