//! AST-aware semantic chunking.
//!
//! Turns a parsed file into the ordered chunk list the indices consume:
//! one chunk per top-level definition, nested methods emitted separately,
//! oversize symbols split into overlapping windows carrying a grounding
//! prefix, and uncovered top-level spans coalesced into `block` chunks.
//! Output is deterministic for identical `(source, language, policy)`.

use crate::config::Config;
use crate::parser::ParsedNode;
use crate::types::{chunk_id, content_hash, Chunk, ChunkKind, Language};
use std::collections::BTreeMap;
use std::path::Path;

/// Metadata key carrying the grounding prefix of split chunks.
pub const GROUNDING_KEY: &str = "grounding";

/// Metadata key carrying a symbol's one-line signature.
pub const SIGNATURE_KEY: &str = "signature";

#[derive(Debug, Clone)]
pub struct ChunkPolicy {
    pub max_chunk_tokens: usize,
    pub overlap_ratio: f32,
    pub grounding_lines: usize,
    pub min_block_lines: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 400,
            overlap_ratio: 0.15,
            grounding_lines: 5,
            min_block_lines: 3,
        }
    }
}

impl From<&Config> for ChunkPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_chunk_tokens: config.max_chunk_tokens,
            overlap_ratio: config.overlap_ratio,
            grounding_lines: config.grounding_lines,
            min_block_lines: config.min_block_lines,
        }
    }
}

/// Rough token estimate, ~4 chars per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// The text handed to the embedding engine for a chunk: symbol identity and
/// docstring up front, grounding prefix restored for split windows.
pub fn embedding_text(chunk: &Chunk) -> String {
    let mut parts = Vec::new();
    if let Some(name) = &chunk.name {
        parts.push(format!("{} {}", chunk.kind.as_str(), name));
    }
    if let Some(signature) = chunk.metadata.get(SIGNATURE_KEY) {
        parts.push(signature.clone());
    }
    if let Some(doc) = &chunk.docstring {
        parts.push(doc.clone());
    }
    if let Some(grounding) = chunk.metadata.get(GROUNDING_KEY) {
        if !chunk.code.starts_with(grounding.as_str()) {
            parts.push(grounding.clone());
        }
    }
    parts.push(chunk.code.clone());
    parts.join("\n")
}

pub struct SemanticChunker {
    policy: ChunkPolicy,
}

impl SemanticChunker {
    pub fn new(policy: ChunkPolicy) -> Self {
        Self { policy }
    }

    /// Chunk a file with a usable parse: definitions first, gaps after.
    pub fn chunk_file(
        &self,
        source: &str,
        language: Language,
        relative_path: &str,
        file_path: &Path,
        nodes: &[ParsedNode],
    ) -> Vec<Chunk> {
        let lines: Vec<&str> = source.lines().collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Vec::new();
        }

        let ctx = FileCtx {
            lines: &lines,
            language,
            relative_path,
            file_path,
        };

        let mut chunks = Vec::new();
        for node in nodes.iter().filter(|n| should_emit(n)) {
            self.emit_symbol(&ctx, node, &mut chunks);
        }

        let top_level_spans: Vec<(usize, usize)> = nodes
            .iter()
            .filter(|n| n.scope.is_empty())
            .map(|n| (n.start_line, n.end_line))
            .collect();
        self.emit_blocks(&ctx, &top_level_spans, &mut chunks);

        // A file with content but no qualifying chunks still gets one chunk.
        if chunks.is_empty() {
            self.emit_whole_file(&ctx, &mut chunks);
        }

        // Source order, outer chunks before the chunks they contain.
        chunks.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then(b.end_line.cmp(&a.end_line))
        });
        chunks
    }

    /// Fallback for files without a parse tree: the whole file as size-split
    /// block chunks.
    pub fn chunk_unparsed(
        &self,
        source: &str,
        language: Language,
        relative_path: &str,
        file_path: &Path,
    ) -> Vec<Chunk> {
        let lines: Vec<&str> = source.lines().collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Vec::new();
        }
        let ctx = FileCtx {
            lines: &lines,
            language,
            relative_path,
            file_path,
        };
        let mut chunks = Vec::new();
        self.emit_whole_file(&ctx, &mut chunks);
        chunks
    }

    fn emit_whole_file(&self, ctx: &FileCtx, out: &mut Vec<Chunk>) {
        let Some((start, end)) = trim_blank(ctx.lines, 1, ctx.lines.len()) else {
            return;
        };
        self.emit_span(ctx, start, end, ChunkKind::Block, None, &[], None, out);
    }

    fn emit_symbol(&self, ctx: &FileCtx, node: &ParsedNode, out: &mut Vec<Chunk>) {
        let end = node.end_line.min(ctx.lines.len());
        if node.start_line > end {
            return;
        }
        let code = slice_lines(ctx.lines, node.start_line, end);

        let mut base_metadata = BTreeMap::new();
        if let Some(signature) = &node.signature {
            base_metadata.insert(SIGNATURE_KEY.to_string(), signature.clone());
        }

        if estimate_tokens(&code) <= self.policy.max_chunk_tokens {
            out.push(self.build_chunk(
                ctx,
                node.start_line,
                end,
                node.kind,
                node.name.clone(),
                node.scope.clone(),
                node.docstring.clone(),
                base_metadata,
            ));
            return;
        }

        // Oversize: overlapping windows, each carrying the symbol's opening
        // lines so every part keeps its identity in embeddings.
        let grounding = slice_lines(
            ctx.lines,
            node.start_line,
            (node.start_line + self.policy.grounding_lines.max(1) - 1).min(end),
        );
        let windows = self.split_windows(ctx.lines, node.start_line, end);
        for (part, (win_start, win_end)) in windows.into_iter().enumerate() {
            let mut scope = node.scope.clone();
            scope.push(format!("#{part}"));
            let mut metadata = base_metadata.clone();
            metadata.insert(GROUNDING_KEY.to_string(), grounding.clone());

            out.push(self.build_chunk(
                ctx,
                win_start,
                win_end,
                node.kind,
                node.name.clone(),
                scope,
                node.docstring.clone(),
                metadata,
            ));
        }
    }

    /// Emit `block` chunks for top-level spans no extractable node covers.
    /// Within one gap, non-blank runs shorter than the minimum coalesce into
    /// their nearest neighbour run.
    fn emit_blocks(&self, ctx: &FileCtx, covered: &[(usize, usize)], out: &mut Vec<Chunk>) {
        for (gap_start, gap_end) in uncovered_gaps(ctx.lines.len(), covered) {
            let runs = nonblank_runs(ctx.lines, gap_start, gap_end);
            for (start, end) in coalesce_runs(runs, self.policy.min_block_lines) {
                self.emit_span(ctx, start, end, ChunkKind::Block, None, &[], None, out);
            }
        }
    }

    /// Emit one logical span, size-splitting when oversize.
    #[allow(clippy::too_many_arguments)]
    fn emit_span(
        &self,
        ctx: &FileCtx,
        start: usize,
        end: usize,
        kind: ChunkKind,
        name: Option<String>,
        scope: &[String],
        docstring: Option<String>,
        out: &mut Vec<Chunk>,
    ) {
        let code = slice_lines(ctx.lines, start, end);
        if estimate_tokens(&code) <= self.policy.max_chunk_tokens {
            out.push(self.build_chunk(
                ctx,
                start,
                end,
                kind,
                name,
                scope.to_vec(),
                docstring,
                BTreeMap::new(),
            ));
            return;
        }

        for (part, (win_start, win_end)) in
            self.split_windows(ctx.lines, start, end).into_iter().enumerate()
        {
            let mut part_scope = scope.to_vec();
            part_scope.push(format!("#{part}"));
            out.push(self.build_chunk(
                ctx,
                win_start,
                win_end,
                kind,
                name.clone(),
                part_scope,
                docstring.clone(),
                BTreeMap::new(),
            ));
        }
    }

    /// Split `[start, end]` into windows capped at the token budget, each
    /// overlapping its predecessor by `ceil(overlap_ratio * window_lines)`.
    fn split_windows(&self, lines: &[&str], start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        let mut cursor = start;

        while cursor <= end {
            let mut win_end = cursor;
            let mut budget = 0usize;
            while win_end <= end {
                let cost = estimate_tokens(lines[win_end - 1]) + 1;
                if budget + cost > self.policy.max_chunk_tokens && win_end > cursor {
                    break;
                }
                budget += cost;
                win_end += 1;
            }
            let win_last = win_end - 1;
            windows.push((cursor, win_last));
            if win_last >= end {
                break;
            }

            let window_lines = win_last - cursor + 1;
            let overlap = ((window_lines as f32 * self.policy.overlap_ratio).ceil() as usize)
                .clamp(1, window_lines - 1);
            cursor = win_end - overlap;
        }

        windows
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        ctx: &FileCtx,
        start: usize,
        end: usize,
        kind: ChunkKind,
        name: Option<String>,
        scope: Vec<String>,
        docstring: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Chunk {
        let code = slice_lines(ctx.lines, start, end);
        let hash = content_hash(code.as_bytes());
        // The id hash covers symbol identity too: a one-line class and its
        // method share a span and slice but must not share an id.
        let identity = content_hash(
            format!("{}|{}|{}", scope.join("."), name.as_deref().unwrap_or(""), code).as_bytes(),
        );
        Chunk {
            id: chunk_id(ctx.relative_path, start, end, &identity),
            relative_path: ctx.relative_path.to_string(),
            file_path: ctx.file_path.to_path_buf(),
            language: ctx.language,
            start_line: start,
            end_line: end,
            kind,
            name,
            scope,
            code,
            docstring,
            content_hash: hash,
            metadata,
        }
    }
}

struct FileCtx<'a> {
    lines: &'a [&'a str],
    language: Language,
    relative_path: &'a str,
    file_path: &'a Path,
}

/// Which parsed nodes become chunks: everything top-level, plus nested
/// callables so each method stands alone.
fn should_emit(node: &ParsedNode) -> bool {
    node.scope.is_empty() || matches!(node.kind, ChunkKind::Function | ChunkKind::Method)
}

/// Exact source slice for 1-based inclusive lines.
fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    lines[start - 1..end.min(lines.len())].join("\n")
}

/// Trim leading and trailing blank lines off a span; `None` if fully blank.
fn trim_blank(lines: &[&str], start: usize, end: usize) -> Option<(usize, usize)> {
    let mut s = start;
    let mut e = end.min(lines.len());
    while s <= e && lines[s - 1].trim().is_empty() {
        s += 1;
    }
    while e >= s && lines[e - 1].trim().is_empty() {
        e -= 1;
    }
    (s <= e).then_some((s, e))
}

/// Maximal line ranges not covered by any of `covered` (1-based inclusive).
fn uncovered_gaps(total_lines: usize, covered: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut spans: Vec<_> = covered.to_vec();
    spans.sort_unstable();

    let mut gaps = Vec::new();
    let mut cursor = 1usize;
    for (start, end) in spans {
        if start > cursor {
            gaps.push((cursor, start - 1));
        }
        cursor = cursor.max(end + 1);
    }
    if cursor <= total_lines {
        gaps.push((cursor, total_lines));
    }
    gaps
}

/// Runs of consecutive non-blank lines within a gap.
fn nonblank_runs(lines: &[&str], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut run_start = None;
    for line_no in start..=end.min(lines.len()) {
        let blank = lines[line_no - 1].trim().is_empty();
        match (blank, run_start) {
            (false, None) => run_start = Some(line_no),
            (true, Some(s)) => {
                runs.push((s, line_no - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = run_start {
        runs.push((s, end.min(lines.len())));
    }
    runs
}

/// Merge runs shorter than `min_lines` into their nearest neighbour within
/// the same gap; a lone short run with no neighbour is dropped.
fn coalesce_runs(runs: Vec<(usize, usize)>, min_lines: usize) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::new();
    let mut pending: Option<(usize, usize)> = None;

    for (start, end) in runs {
        let run = match pending.take() {
            Some((ps, _)) => (ps, end),
            None => (start, end),
        };
        if run.1 - run.0 + 1 >= min_lines {
            merged.push(run);
        } else {
            pending = Some(run);
        }
    }

    if let Some(run) = pending {
        match merged.last_mut() {
            Some(last) => last.1 = run.1,
            None if run.1 - run.0 + 1 >= min_lines => merged.push(run),
            None => {}
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::AstParser;

    fn chunk(source: &str, language: Language) -> Vec<Chunk> {
        chunk_with(source, language, ChunkPolicy::default())
    }

    fn chunk_with(source: &str, language: Language, policy: ChunkPolicy) -> Vec<Chunk> {
        let parser = AstParser::new();
        let chunker = SemanticChunker::new(policy);
        match parser.parse(source, language) {
            Some(tree) => {
                let nodes = parser.extract_nodes(&tree, source, language);
                chunker.chunk_file(source, language, "src/t.rs", Path::new("/p/src/t.rs"), &nodes)
            }
            None => chunker.chunk_unparsed(source, language, "src/t.rs", Path::new("/p/src/t.rs")),
        }
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        assert!(chunk("", Language::Rust).is_empty());
        assert!(chunk("\n\n\n", Language::Rust).is_empty());
    }

    #[test]
    fn one_chunk_per_definition_plus_methods() {
        let src = r#"export function greet(name: string) { return `hi ${name}`; }
export class A { run() { greet("x"); } }
"#;
        let chunks = chunk(src, Language::TypeScript);

        // The free function, the class, and the method.
        assert_eq!(chunks.len(), 3);
        let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChunkKind::Function));
        assert!(kinds.contains(&ChunkKind::Class));
        assert!(kinds.contains(&ChunkKind::Method));

        // Method span is contained in the class span.
        let class = chunks.iter().find(|c| c.kind == ChunkKind::Class).unwrap();
        let method = chunks.iter().find(|c| c.kind == ChunkKind::Method).unwrap();
        assert!(class.start_line <= method.start_line && method.end_line <= class.end_line);
    }

    #[test]
    fn code_matches_source_slice() {
        let src = "fn a() {\n    1;\n}\n\nfn b() {\n    2;\n}\n";
        let chunks = chunk(src, Language::Rust);
        let lines: Vec<&str> = src.lines().collect();
        for c in &chunks {
            let expected = lines[c.start_line - 1..c.end_line].join("\n");
            assert_eq!(c.code, expected, "chunk {} span mismatch", c.id);
            assert!(c.start_line <= c.end_line);
        }
    }

    #[test]
    fn single_expression_file_is_one_chunk() {
        let src = "console.log('hello');\n";
        let chunks = chunk(src, Language::JavaScript);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Block);
    }

    #[test]
    fn uncovered_statements_become_block_chunks() {
        let src = "import { a } from './a';\nimport { b } from './b';\nconst conf = load();\n\nexport function run() {\n    return a(conf);\n}\n";
        let chunks = chunk(src, Language::TypeScript);

        let block = chunks.iter().find(|c| c.kind == ChunkKind::Block).unwrap();
        assert_eq!((block.start_line, block.end_line), (1, 3));
        assert!(block.name.is_none());

        let func = chunks.iter().find(|c| c.kind == ChunkKind::Function).unwrap();
        assert_eq!(func.name.as_deref(), Some("run"));
    }

    #[test]
    fn oversize_symbol_splits_with_overlap_and_grounding() {
        let mut src = String::from("/// Big routine.\nfn big() {\n");
        for i in 0..200 {
            src.push_str(&format!("    let value_{i} = compute_step_number_{i}();\n"));
        }
        src.push_str("}\n");

        let policy = ChunkPolicy {
            max_chunk_tokens: 200,
            ..ChunkPolicy::default()
        };
        let chunks = chunk_with(&src, Language::Rust, policy.clone());
        let parts: Vec<_> = chunks
            .iter()
            .filter(|c| c.name.as_deref() == Some("big"))
            .collect();
        assert!(parts.len() >= 2, "expected split, got {} parts", parts.len());

        // Consecutive windows overlap by at least ratio * window.
        for pair in parts.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let window = a.end_line - a.start_line + 1;
            let min_overlap = (window as f32 * policy.overlap_ratio).ceil() as usize;
            let overlap = a.end_line.saturating_sub(b.start_line) + 1;
            assert!(
                overlap >= min_overlap,
                "overlap {overlap} below minimum {min_overlap}"
            );
        }

        // Every part carries the grounding prefix and a part-marked scope,
        // and its embedding text keeps the symbol identity.
        for (i, part) in parts.iter().enumerate() {
            let grounding = part.metadata.get(GROUNDING_KEY).expect("grounding");
            assert!(grounding.starts_with("fn big() {"));
            assert_eq!(part.scope.last().map(|s| s.as_str()), Some(format!("#{i}").as_str()));
            let text = embedding_text(part);
            assert!(text.contains("Big routine."));
            assert!(text.contains("fn big() {"));
        }

        // Exact-slice invariant holds for split parts too.
        let lines: Vec<&str> = src.lines().collect();
        for part in &parts {
            assert_eq!(part.code, lines[part.start_line - 1..part.end_line].join("\n"));
        }
    }

    #[test]
    fn deterministic_output() {
        let src = "pub fn a() {}\n\npub struct S;\n\nimpl S { pub fn m(&self) {} }\n";
        let a = chunk(src, Language::Rust);
        let b = chunk(src, Language::Rust);
        let ids_a: Vec<_> = a.iter().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn coalesce_short_runs() {
        // Two short runs in one gap merge; lone short run with no
        // neighbour is dropped.
        let merged = coalesce_runs(vec![(1, 1), (3, 4)], 3);
        assert_eq!(merged, vec![(1, 4)]);

        let dropped = coalesce_runs(vec![(5, 5)], 3);
        assert!(dropped.is_empty());

        let kept = coalesce_runs(vec![(1, 5)], 3);
        assert_eq!(kept, vec![(1, 5)]);
    }
}
