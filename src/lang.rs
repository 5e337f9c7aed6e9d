//! Language strategy records.
//!
//! Each supported language is described by pure data: its tree-sitter
//! grammar, the node kinds worth extracting, how symbol names are resolved,
//! where docstrings live, and what a top-level export looks like. The parser
//! and ranker select a record by [`Language`]; nothing here holds state.

use crate::types::{ChunkKind, Language};
use regex::Regex;
use std::sync::OnceLock;

/// Where a symbol's documentation is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocstringStyle {
    /// Comment lines immediately preceding the declaration.
    PrecedingComment,
    /// First string literal of the body (Python convention).
    BodyStringLiteral,
}

/// Static description of one language's extraction strategy.
pub struct LanguageSpec {
    pub language: Language,
    pub grammar: fn() -> tree_sitter::Language,
    /// Extractable node kind -> chunk kind.
    pub extractable: &'static [(&'static str, ChunkKind)],
    /// Field names tried, in order, to resolve a node's name.
    pub name_fields: &'static [&'static str],
    /// Node kinds that represent a call site; the callee is the `function`
    /// (or `constructor`) field.
    pub call_nodes: &'static [&'static str],
    pub docstring: DocstringStyle,
    /// Regex marking a chunk as exported / publicly visible.
    pub export_pattern: &'static str,
}

static RUST: LanguageSpec = LanguageSpec {
    language: Language::Rust,
    grammar: grammar_rust,
    extractable: &[
        ("function_item", ChunkKind::Function),
        ("struct_item", ChunkKind::Struct),
        ("enum_item", ChunkKind::Enum),
        ("trait_item", ChunkKind::Interface),
        ("impl_item", ChunkKind::Class),
        ("type_item", ChunkKind::Type),
        ("mod_item", ChunkKind::Module),
    ],
    name_fields: &["name", "type"],
    call_nodes: &["call_expression"],
    docstring: DocstringStyle::PrecedingComment,
    export_pattern: r"(?m)^\s*pub[\s(]",
};

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    language: Language::TypeScript,
    grammar: grammar_typescript,
    extractable: TS_EXTRACTABLE,
    name_fields: &["name"],
    call_nodes: &["call_expression", "new_expression"],
    docstring: DocstringStyle::PrecedingComment,
    export_pattern: r"(?m)^\s*export\s",
};

static TSX: LanguageSpec = LanguageSpec {
    language: Language::Tsx,
    grammar: grammar_tsx,
    extractable: TS_EXTRACTABLE,
    name_fields: &["name"],
    call_nodes: &["call_expression", "new_expression"],
    docstring: DocstringStyle::PrecedingComment,
    export_pattern: r"(?m)^\s*export\s",
};

const TS_EXTRACTABLE: &[(&str, ChunkKind)] = &[
    ("function_declaration", ChunkKind::Function),
    ("generator_function_declaration", ChunkKind::Function),
    ("class_declaration", ChunkKind::Class),
    ("abstract_class_declaration", ChunkKind::Class),
    ("interface_declaration", ChunkKind::Interface),
    ("type_alias_declaration", ChunkKind::Type),
    ("enum_declaration", ChunkKind::Enum),
    ("method_definition", ChunkKind::Method),
    ("internal_module", ChunkKind::Module),
];

static JAVASCRIPT: LanguageSpec = LanguageSpec {
    language: Language::JavaScript,
    grammar: grammar_javascript,
    extractable: &[
        ("function_declaration", ChunkKind::Function),
        ("generator_function_declaration", ChunkKind::Function),
        ("class_declaration", ChunkKind::Class),
        ("method_definition", ChunkKind::Method),
    ],
    name_fields: &["name"],
    call_nodes: &["call_expression", "new_expression"],
    docstring: DocstringStyle::PrecedingComment,
    export_pattern: r"(?m)^\s*(export\s|module\.exports)",
};

static PYTHON: LanguageSpec = LanguageSpec {
    language: Language::Python,
    grammar: grammar_python,
    extractable: &[
        ("function_definition", ChunkKind::Function),
        ("class_definition", ChunkKind::Class),
    ],
    name_fields: &["name"],
    call_nodes: &["call"],
    docstring: DocstringStyle::BodyStringLiteral,
    export_pattern: r"(?m)^__all__\s*=",
};

static GO: LanguageSpec = LanguageSpec {
    language: Language::Go,
    grammar: grammar_go,
    extractable: &[
        ("function_declaration", ChunkKind::Function),
        ("method_declaration", ChunkKind::Method),
        ("type_spec", ChunkKind::Type),
    ],
    name_fields: &["name"],
    call_nodes: &["call_expression"],
    docstring: DocstringStyle::PrecedingComment,
    // Go exports by capitalisation of the top-level identifier.
    export_pattern: r"(?m)^(func|type|const|var)\s+(\([^)]*\)\s*)?[A-Z]",
};

fn grammar_rust() -> tree_sitter::Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn grammar_typescript() -> tree_sitter::Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn grammar_tsx() -> tree_sitter::Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}
fn grammar_javascript() -> tree_sitter::Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn grammar_python() -> tree_sitter::Language {
    tree_sitter_python::LANGUAGE.into()
}
fn grammar_go() -> tree_sitter::Language {
    tree_sitter_go::LANGUAGE.into()
}

/// Strategy record for a language.
pub fn spec_for(language: Language) -> &'static LanguageSpec {
    match language {
        Language::Rust => &RUST,
        Language::TypeScript => &TYPESCRIPT,
        Language::Tsx => &TSX,
        Language::JavaScript => &JAVASCRIPT,
        Language::Python => &PYTHON,
        Language::Go => &GO,
    }
}

/// Chunk kind for an extractable node kind, if any.
pub fn classify_node(spec: &LanguageSpec, node_kind: &str) -> Option<ChunkKind> {
    spec.extractable
        .iter()
        .find(|(kind, _)| *kind == node_kind)
        .map(|(_, chunk_kind)| *chunk_kind)
}

/// Compiled export-marker regex for a language.
pub fn export_regex(language: Language) -> &'static Regex {
    static REGEXES: OnceLock<[Regex; 6]> = OnceLock::new();
    let all = REGEXES.get_or_init(|| {
        [
            Regex::new(RUST.export_pattern).expect("rust export pattern"),
            Regex::new(TYPESCRIPT.export_pattern).expect("ts export pattern"),
            Regex::new(TSX.export_pattern).expect("tsx export pattern"),
            Regex::new(JAVASCRIPT.export_pattern).expect("js export pattern"),
            Regex::new(PYTHON.export_pattern).expect("py export pattern"),
            Regex::new(GO.export_pattern).expect("go export pattern"),
        ]
    });
    match language {
        Language::Rust => &all[0],
        Language::TypeScript => &all[1],
        Language::Tsx => &all[2],
        Language::JavaScript => &all[3],
        Language::Python => &all[4],
        Language::Go => &all[5],
    }
}

/// File stems treated as entry points by the ranker.
const ENTRY_POINT_STEMS: &[&str] = &["index", "main", "app", "server", "mod", "lib", "__init__"];

/// Whether a relative path names an entry-point file.
pub fn is_entry_point(relative_path: &str) -> bool {
    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    ENTRY_POINT_STEMS.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rust_nodes() {
        let spec = spec_for(Language::Rust);
        assert_eq!(classify_node(spec, "function_item"), Some(ChunkKind::Function));
        assert_eq!(classify_node(spec, "trait_item"), Some(ChunkKind::Interface));
        assert_eq!(classify_node(spec, "let_declaration"), None);
    }

    #[test]
    fn export_markers() {
        assert!(export_regex(Language::Rust).is_match("pub fn run() {}"));
        assert!(export_regex(Language::Rust).is_match("pub(crate) struct S;"));
        assert!(!export_regex(Language::Rust).is_match("fn run() {}"));

        assert!(export_regex(Language::TypeScript).is_match("export function f() {}"));
        assert!(!export_regex(Language::TypeScript).is_match("function f() {}"));

        assert!(export_regex(Language::Go).is_match("func Public() {}"));
        assert!(export_regex(Language::Go).is_match("func (s *Server) Serve() {}"));
        assert!(!export_regex(Language::Go).is_match("func private() {}"));
    }

    #[test]
    fn entry_points() {
        assert!(is_entry_point("src/index.ts"));
        assert!(is_entry_point("src/main.rs"));
        assert!(is_entry_point("pkg/__init__.py"));
        assert!(is_entry_point("src/nested/mod.rs"));
        assert!(!is_entry_point("src/util.rs"));
    }
}
