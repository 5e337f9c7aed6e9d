//! Per-language extraction and chunking, end to end through the parser.

use quarry_index::chunker::{ChunkPolicy, SemanticChunker};
use quarry_index::{AstParser, ChunkKind, Language};
use std::path::Path;

fn chunk(source: &str, language: Language, rel: &str) -> Vec<quarry_index::Chunk> {
    let parser = AstParser::new();
    let chunker = SemanticChunker::new(ChunkPolicy::default());
    match parser.parse(source, language) {
        Some(tree) => {
            let nodes = parser.extract_nodes(&tree, source, language);
            chunker.chunk_file(source, language, rel, Path::new("/p").join(rel).as_path(), &nodes)
        }
        None => chunker.chunk_unparsed(source, language, rel, Path::new("/p").join(rel).as_path()),
    }
}

fn names(chunks: &[quarry_index::Chunk]) -> Vec<&str> {
    chunks.iter().filter_map(|c| c.name.as_deref()).collect()
}

#[test]
fn rust_definitions() {
    let src = r#"
use std::fmt;

/// A counter.
pub struct Counter {
    n: u64,
}

impl Counter {
    pub fn bump(&mut self) {
        self.n += 1;
    }
}

pub trait Render {
    fn render(&self) -> String;
}

pub enum Mode {
    Fast,
    Slow,
}

pub type Shared = std::sync::Arc<Counter>;

mod inner {
    pub fn helper() {}
}
"#;
    let chunks = chunk(src, Language::Rust, "src/lib.rs");
    let names = names(&chunks);

    for expected in ["Counter", "bump", "Render", "render", "Mode", "Shared", "inner", "helper"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }

    let counter = chunks
        .iter()
        .find(|c| c.name.as_deref() == Some("Counter") && c.kind == ChunkKind::Struct)
        .unwrap();
    assert_eq!(counter.docstring.as_deref(), Some("A counter."));

    let bump = chunks.iter().find(|c| c.name.as_deref() == Some("bump")).unwrap();
    assert_eq!(bump.kind, ChunkKind::Method);
    assert_eq!(bump.scope, vec!["Counter".to_string()]);
}

#[test]
fn typescript_definitions() {
    let src = r#"
import { db } from "./db";

export interface User {
    id: string;
}

export type UserMap = Record<string, User>;

export enum Role { Admin, Member }

export class UserStore {
    async fetch(id: string): Promise<User> {
        return db.get(id);
    }
}

export function getUserById(id: string) {
    return new UserStore().fetch(id);
}
"#;
    let chunks = chunk(src, Language::TypeScript, "src/users.ts");
    let names = names(&chunks);

    for expected in ["User", "UserMap", "Role", "UserStore", "fetch", "getUserById"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }

    let interface = chunks.iter().find(|c| c.name.as_deref() == Some("User")).unwrap();
    assert_eq!(interface.kind, ChunkKind::Interface);

    let fetch = chunks.iter().find(|c| c.name.as_deref() == Some("fetch")).unwrap();
    assert_eq!(fetch.kind, ChunkKind::Method);
    assert_eq!(fetch.scope, vec!["UserStore".to_string()]);

    // The import line becomes no chunk on its own (below the block
    // minimum), and every named chunk spans real source.
    let lines: Vec<&str> = src.lines().collect();
    for c in &chunks {
        assert_eq!(c.code, lines[c.start_line - 1..c.end_line].join("\n"));
    }
}

#[test]
fn python_definitions() {
    let src = r#"
import os


def load_config(path):
    """Read a config file."""
    return os.environ.get(path)


class Client:
    def __init__(self, base):
        self.base = base

    def close(self):
        pass
"#;
    let chunks = chunk(src, Language::Python, "pkg/client.py");
    let names = names(&chunks);

    for expected in ["load_config", "Client", "__init__", "close"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }

    let load = chunks
        .iter()
        .find(|c| c.name.as_deref() == Some("load_config"))
        .unwrap();
    assert_eq!(load.kind, ChunkKind::Function);
    assert_eq!(load.docstring.as_deref(), Some("Read a config file."));

    let close = chunks.iter().find(|c| c.name.as_deref() == Some("close")).unwrap();
    assert_eq!(close.kind, ChunkKind::Method);
}

#[test]
fn go_definitions() {
    let src = r#"
package server

import "net/http"

type Server struct {
	addr string
}

// Serve runs the accept loop.
func (s *Server) Serve() error {
	return http.ListenAndServe(s.addr, nil)
}

func NewServer(addr string) *Server {
	return &Server{addr: addr}
}
"#;
    let chunks = chunk(src, Language::Go, "server/server.go");
    let names = names(&chunks);

    for expected in ["Server", "Serve", "NewServer"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }

    let serve = chunks.iter().find(|c| c.name.as_deref() == Some("Serve")).unwrap();
    assert_eq!(serve.kind, ChunkKind::Method);
    assert_eq!(serve.docstring.as_deref(), Some("Serve runs the accept loop."));
}

#[test]
fn javascript_definitions() {
    let src = r#"
const registry = new Map();

export class Widget {
    render() {
        return "<div/>";
    }
}

export function register(widget) {
    registry.set(widget.name, widget);
}
"#;
    let chunks = chunk(src, Language::JavaScript, "web/widget.js");
    let names = names(&chunks);

    for expected in ["Widget", "render", "register"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[test]
fn unparsed_language_falls_back_to_blocks() {
    // Feed TSX source through the unparsed path directly: one block chunk.
    let src = "line one\nline two\nline three\n";
    let chunker = SemanticChunker::new(ChunkPolicy::default());
    let chunks = chunker.chunk_unparsed(src, Language::Tsx, "notes/raw.tsx", Path::new("/p/raw.tsx"));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Block);
    assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
}
