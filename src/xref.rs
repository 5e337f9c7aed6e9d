//! Cross-reference graph: definitions and call sites.
//!
//! The graph is deliberately name-addressed, not type-resolved: a call site
//! matches every definition sharing the callee's simple name, and consumers
//! present all matches. In memory the graph keys by interned strings; the
//! durable form is a single JSON document of two plain-string maps.

use crate::error::Result;
use crate::parser::{CallSite, ParsedNode};
use crate::storage;
use crate::types::{ChunkKind, InternedString};
use dashmap::DashMap;
use lasso::ThreadedRodeo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A symbol definition in the graph.
#[derive(Debug, Clone)]
pub struct Definition {
    pub fqn: InternedString,
    pub name: InternedString,
    pub kind: ChunkKind,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Callee names observed in this definition's body.
    pub calls: Vec<String>,
    /// Caller FQNs, rebuilt by [`XrefGraph::build_reverse_references`].
    pub called_by: Vec<String>,
}

/// One observed call site for a callee name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub file: String,
    pub line: usize,
    pub caller_fqn: String,
}

/// Durable form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XrefDocument {
    pub definitions: BTreeMap<String, DefRecord>,
    pub call_sites: BTreeMap<String, Vec<SiteRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub calls: Vec<String>,
    pub called_by: Vec<String>,
}

/// Graph statistics for the stats surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct XrefStats {
    pub definitions: usize,
    pub call_relationships: usize,
    pub call_sites: usize,
    pub most_called: Vec<(String, usize)>,
    pub most_dependencies: Vec<(String, usize)>,
}

/// In-memory cross-reference graph.
pub struct XrefGraph {
    interner: ThreadedRodeo,
    definitions: DashMap<InternedString, Definition>,
    /// Simple name -> FQNs sharing it.
    name_to_fqns: DashMap<InternedString, Vec<InternedString>>,
    /// Callee name -> observed sites.
    call_sites: DashMap<InternedString, Vec<SiteRecord>>,
    /// File -> FQNs defined there.
    file_defs: DashMap<String, Vec<InternedString>>,
}

impl Default for XrefGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl XrefGraph {
    pub fn new() -> Self {
        Self {
            interner: ThreadedRodeo::default(),
            definitions: DashMap::new(),
            name_to_fqns: DashMap::new(),
            call_sites: DashMap::new(),
            file_defs: DashMap::new(),
        }
    }

    pub fn resolve(&self, key: InternedString) -> &str {
        self.interner.resolve(&key)
    }

    /// Register one file's definitions and call sites. Re-adding a file must
    /// be preceded by [`Self::remove_file`].
    pub fn add_to_graph(&self, relative_path: &str, nodes: &[ParsedNode], calls: &[CallSite]) {
        let mut fqns = Vec::new();

        for node in nodes {
            let Some(name) = node.name.as_deref() else { continue };
            let Some(fqn_str) = node.fqn() else { continue };

            let fqn = self.interner.get_or_intern(&fqn_str);
            let name_key = self.interner.get_or_intern(name);

            let own_calls: Vec<String> = calls
                .iter()
                .filter(|c| c.caller_fqn == fqn_str)
                .map(|c| c.callee.clone())
                .collect();

            let def = Definition {
                fqn,
                name: name_key,
                kind: node.kind,
                file: relative_path.to_string(),
                start_line: node.start_line,
                end_line: node.end_line,
                calls: own_calls,
                called_by: Vec::new(),
            };

            if self.definitions.insert(fqn, def).is_none() {
                self.name_to_fqns.entry(name_key).or_default().push(fqn);
            }
            fqns.push(fqn);
        }

        for call in calls {
            let callee = self.interner.get_or_intern(&call.callee);
            self.call_sites.entry(callee).or_default().push(SiteRecord {
                file: relative_path.to_string(),
                line: call.line,
                caller_fqn: call.caller_fqn.clone(),
            });
        }

        if !fqns.is_empty() {
            self.file_defs.insert(relative_path.to_string(), fqns);
        }
    }

    /// Drop everything a file contributed.
    pub fn remove_file(&self, relative_path: &str) {
        if let Some((_, fqns)) = self.file_defs.remove(relative_path) {
            for fqn in fqns {
                if let Some((_, def)) = self.definitions.remove(&fqn) {
                    if let Some(mut entry) = self.name_to_fqns.get_mut(&def.name) {
                        entry.retain(|f| *f != fqn);
                    }
                }
            }
        }

        self.call_sites.retain(|_, sites| {
            sites.retain(|s| s.file != relative_path);
            !sites.is_empty()
        });
    }

    /// Rebuild every definition's `called_by` from the call-site table.
    /// One batch pass after all files are added.
    pub fn build_reverse_references(&self) {
        for mut entry in self.definitions.iter_mut() {
            entry.called_by.clear();
        }

        for sites in self.call_sites.iter() {
            let Some(fqns) = self.name_to_fqns.get(sites.key()) else {
                continue;
            };
            for fqn in fqns.iter() {
                if let Some(mut def) = self.definitions.get_mut(fqn) {
                    for site in sites.value() {
                        if !def.called_by.contains(&site.caller_fqn) {
                            def.called_by.push(site.caller_fqn.clone());
                        }
                    }
                }
            }
        }

        // Deterministic order regardless of map iteration.
        for mut entry in self.definitions.iter_mut() {
            entry.called_by.sort();
        }
    }

    /// All call sites whose callee matches the simple name.
    pub fn get_callers(&self, name: &str) -> Vec<SiteRecord> {
        let Some(key) = self.interner.get(name) else {
            return Vec::new();
        };
        self.call_sites
            .get(&key)
            .map(|sites| sites.clone())
            .unwrap_or_default()
    }

    /// Callee names of a definition addressed by FQN.
    pub fn get_callees(&self, fqn: &str) -> Vec<String> {
        let Some(key) = self.interner.get(fqn) else {
            return Vec::new();
        };
        self.definitions
            .get(&key)
            .map(|def| def.calls.clone())
            .unwrap_or_default()
    }

    /// Definitions whose simple name matches exactly.
    pub fn find_by_name(&self, name: &str) -> Vec<Definition> {
        let Some(key) = self.interner.get(name) else {
            return Vec::new();
        };
        self.name_to_fqns
            .get(&key)
            .map(|fqns| {
                fqns.iter()
                    .filter_map(|fqn| self.definitions.get(fqn).map(|d| d.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Definition names containing `fragment`, case-insensitively.
    pub fn find_by_prefix(&self, fragment: &str, limit: usize) -> Vec<String> {
        let needle = fragment.to_lowercase();
        let mut matches: Vec<String> = self
            .definitions
            .iter()
            .map(|entry| self.resolve(entry.name).to_string())
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect();
        matches.sort();
        matches.dedup();
        matches.truncate(limit);
        matches
    }

    /// All definitions in a file with their in/out degree.
    pub fn file_symbols(&self, relative_path: &str) -> Vec<(Definition, usize, usize)> {
        let Some(fqns) = self.file_defs.get(relative_path) else {
            return Vec::new();
        };
        let mut defs: Vec<(Definition, usize, usize)> = fqns
            .iter()
            .filter_map(|fqn| self.definitions.get(fqn).map(|d| d.clone()))
            .map(|d| {
                let out_degree = d.calls.len();
                let in_degree = d.called_by.len();
                (d, in_degree, out_degree)
            })
            .collect();
        defs.sort_by_key(|(d, _, _)| d.start_line);
        defs
    }

    pub fn stats(&self) -> XrefStats {
        let mut most_called: Vec<(String, usize)> = self
            .definitions
            .iter()
            .filter(|e| !e.called_by.is_empty())
            .map(|e| (self.resolve(e.fqn).to_string(), e.called_by.len()))
            .collect();
        most_called.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_called.truncate(10);

        let mut most_dependencies: Vec<(String, usize)> = self
            .definitions
            .iter()
            .filter(|e| !e.calls.is_empty())
            .map(|e| (self.resolve(e.fqn).to_string(), e.calls.len()))
            .collect();
        most_dependencies.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_dependencies.truncate(10);

        XrefStats {
            definitions: self.definitions.len(),
            call_relationships: self.definitions.iter().map(|e| e.called_by.len()).sum(),
            call_sites: self.call_sites.iter().map(|e| e.value().len()).sum(),
            most_called,
            most_dependencies,
        }
    }

    pub fn clear(&self) {
        self.definitions.clear();
        self.name_to_fqns.clear();
        self.call_sites.clear();
        self.file_defs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.call_sites.is_empty()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn to_document(&self) -> XrefDocument {
        let definitions = self
            .definitions
            .iter()
            .map(|entry| {
                let def = entry.value();
                (
                    self.resolve(def.fqn).to_string(),
                    DefRecord {
                        name: self.resolve(def.name).to_string(),
                        kind: def.kind,
                        file_path: def.file.clone(),
                        start_line: def.start_line,
                        end_line: def.end_line,
                        calls: def.calls.clone(),
                        called_by: def.called_by.clone(),
                    },
                )
            })
            .collect();

        let call_sites = self
            .call_sites
            .iter()
            .map(|entry| {
                let mut sites = entry.value().clone();
                sites.sort_by(|a, b| {
                    (&a.file, a.line, &a.caller_fqn).cmp(&(&b.file, b.line, &b.caller_fqn))
                });
                (self.resolve(*entry.key()).to_string(), sites)
            })
            .collect();

        XrefDocument {
            definitions,
            call_sites,
        }
    }

    pub fn load_document(&self, doc: XrefDocument) {
        self.clear();

        for (fqn_str, record) in doc.definitions {
            let fqn = self.interner.get_or_intern(&fqn_str);
            let name = self.interner.get_or_intern(&record.name);
            let def = Definition {
                fqn,
                name,
                kind: record.kind,
                file: record.file_path.clone(),
                start_line: record.start_line,
                end_line: record.end_line,
                calls: record.calls,
                called_by: record.called_by,
            };
            self.file_defs
                .entry(record.file_path)
                .or_default()
                .push(fqn);
            self.name_to_fqns.entry(name).or_default().push(fqn);
            self.definitions.insert(fqn, def);
        }

        for (name, sites) in doc.call_sites {
            let key = self.interner.get_or_intern(&name);
            self.call_sites.insert(key, sites);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::save_json(path, &self.to_document())
    }

    /// Load from disk; missing or corrupt files leave the graph empty.
    pub fn load(&self, path: &Path) -> Result<bool> {
        match storage::load_json::<XrefDocument>(path)? {
            Some(doc) => {
                self.load_document(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ----------------------------------------------------------------------------
// Query surface
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XrefDirection {
    Callers,
    Callees,
    #[default]
    Both,
}

impl std::str::FromStr for XrefDirection {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "callers" => Ok(Self::Callers),
            "callees" => Ok(Self::Callees),
            "both" => Ok(Self::Both),
            _ => Err(()),
        }
    }
}

/// Structured answer to a callers/callees lookup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct XrefResponse {
    pub callers: Vec<SiteRecord>,
    pub callees: Vec<String>,
    /// Close names offered when the symbol is unknown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl XrefGraph {
    /// Callers and/or callees of `symbol` (simple name or FQN). An unknown
    /// symbol returns up to 10 suggestions instead.
    pub fn lookup(
        &self,
        symbol: &str,
        direction: XrefDirection,
        max_results: usize,
    ) -> XrefResponse {
        let simple = symbol.rsplit('.').next().unwrap_or(symbol);
        let mut response = XrefResponse::default();

        if matches!(direction, XrefDirection::Callers | XrefDirection::Both) {
            response.callers = self.get_callers(simple);
            response.callers.truncate(max_results);
        }

        if matches!(direction, XrefDirection::Callees | XrefDirection::Both) {
            let mut callees = self.get_callees(symbol);
            if callees.is_empty() {
                for def in self.find_by_name(simple) {
                    callees.extend(def.calls.clone());
                }
            }
            callees.dedup();
            callees.truncate(max_results);
            response.callees = callees;
        }

        if response.callers.is_empty()
            && response.callees.is_empty()
            && self.find_by_name(simple).is_empty()
        {
            response.suggestions = self.find_by_prefix(simple, 10);
        }

        response
    }
}
