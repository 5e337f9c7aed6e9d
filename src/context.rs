//! Context reader: symbol- or range-addressed code windows.
//!
//! Given `(file, symbol?, range?)`, returns the code widened by the
//! containing symbol plus the other definitions in the same file, so a
//! caller can orient without a second round trip.

use crate::error::{QuarryError, Result};
use crate::types::ChunkKind;
use crate::vector::VectorStore;
use serde::Serialize;
use std::path::Path;

/// Fallback window when a symbol is located by text scan instead of chunk
/// metadata.
const SCAN_WINDOW_LINES: usize = 50;

#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub file: String,
    pub symbol: Option<String>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub context_lines: usize,
}

impl ContextRequest {
    pub fn for_file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            symbol: None,
            start_line: None,
            end_line: None,
            context_lines: 5,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_range(mut self, start: usize, end: usize) -> Self {
        self.start_line = Some(start);
        self.end_line = Some(end);
        self
    }
}

/// Another definition in the requested file.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub code: String,
    pub start_line: usize,
    pub end_line: usize,
    pub related_chunks: Vec<RelatedDefinition>,
}

/// Read-side context extraction over the vector store's chunk metadata.
pub struct ContextReader<'a> {
    project_root: &'a Path,
    vector: &'a VectorStore,
}

impl<'a> ContextReader<'a> {
    pub fn new(project_root: &'a Path, vector: &'a VectorStore) -> Self {
        Self {
            project_root,
            vector,
        }
    }

    pub fn read(&self, request: &ContextRequest) -> Result<ContextResponse> {
        let absolute = self.project_root.join(&request.file);
        let source = std::fs::read_to_string(&absolute)
            .map_err(|e| QuarryError::storage(&absolute, e))?;
        let total_lines = source.lines().count().max(1);

        let chunks = self.vector.get_by_file(&request.file);

        let (span_start, span_end) = match &request.symbol {
            Some(symbol) => self
                .symbol_span(&chunks, symbol)
                .or_else(|| scan_for_identifier(&source, symbol))
                .ok_or_else(|| {
                    QuarryError::InvalidQuery(format!(
                        "symbol {symbol} not found in {}",
                        request.file
                    ))
                })?,
            None => (
                request.start_line.unwrap_or(1),
                request.end_line.unwrap_or(total_lines),
            ),
        };

        // Widen and clip.
        let start = span_start.saturating_sub(request.context_lines).max(1);
        let end = (span_end + request.context_lines).min(total_lines);

        let code = source
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n");

        let related_chunks = chunks
            .iter()
            .filter(|c| c.kind.is_declaration() && c.name.is_some())
            .filter(|c| !(c.start_line == span_start && c.end_line == span_end))
            .map(|c| RelatedDefinition {
                name: c.name.clone().unwrap_or_default(),
                kind: c.kind,
                start_line: c.start_line,
                end_line: c.end_line,
            })
            .collect();

        Ok(ContextResponse {
            code,
            start_line: start,
            end_line: end,
            related_chunks,
        })
    }

    /// Span of the chunk whose name matches, or whose scope ends with the
    /// symbol (methods addressed by a bare name).
    fn symbol_span(
        &self,
        chunks: &[crate::types::Chunk],
        symbol: &str,
    ) -> Option<(usize, usize)> {
        let simple = symbol.rsplit('.').next().unwrap_or(symbol);
        chunks
            .iter()
            .find(|c| {
                c.name.as_deref() == Some(simple)
                    || c.scope.last().map(|s| s.as_str()) == Some(simple)
            })
            .map(|c| (c.start_line, c.end_line))
    }
}

/// Last-resort symbol location: first line containing the identifier opens a
/// fixed window.
fn scan_for_identifier(source: &str, symbol: &str) -> Option<(usize, usize)> {
    let line = source
        .lines()
        .position(|l| l.contains(symbol))
        .map(|i| i + 1)?;
    Some((line, line + SCAN_WINDOW_LINES - 1))
}
