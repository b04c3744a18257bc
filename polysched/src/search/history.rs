//! Search-history log.
//!
//! Every candidate a strategy creates is recorded as a branch of the node it
//! was derived from, with the rewrite that produced it and its measured
//! runtime. The log is written as
//!
//! ```text
//! {"Tree": {"Id": "0", "Perf": 1.5, "Operation": "Root", "Children": [...]},
//!  "Nodes": {"0": "<kernel text>", ...}}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ir::Program;
use crate::printer::render_kernel;

/// Identifier of a recorded search node.
pub type SearchNodeId = u64;

#[derive(Clone, Debug)]
struct Entry {
    operation: String,
    performance: Option<f64>,
    children: Vec<SearchNodeId>,
    text: String,
}

/// Serialized form of one tree node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryTree {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Perf")]
    pub perf: Option<f64>,
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "Children")]
    pub children: Vec<HistoryTree>,
}

/// Serialized form of the whole log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    #[serde(rename = "Tree")]
    pub tree: HistoryTree,
    #[serde(rename = "Nodes")]
    pub nodes: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct SearchHistory {
    entries: Vec<Entry>,
    kernel_name: String,
}

impl SearchHistory {
    /// Starts a history whose root (id 0) is `seed`.
    pub fn new(seed: &Program, kernel_name: impl Into<String>) -> Self {
        let kernel_name = kernel_name.into();
        let root = Entry {
            operation: "Root".to_string(),
            performance: None,
            children: Vec::new(),
            text: render_kernel(seed, &kernel_name),
        };
        SearchHistory {
            entries: vec![root],
            kernel_name,
        }
    }

    pub fn root(&self) -> SearchNodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `program` as a child of `parent` and returns its id.
    pub fn branch(&mut self, parent: SearchNodeId, program: &Program, operation: impl Into<String>) -> SearchNodeId {
        let id = self.entries.len() as SearchNodeId;
        self.entries.push(Entry {
            operation: operation.into(),
            performance: None,
            children: Vec::new(),
            text: render_kernel(program, &self.kernel_name),
        });
        if let Some(p) = self.entries.get_mut(parent as usize) {
            p.children.push(id);
        }
        id
    }

    pub fn record_perf(&mut self, node: SearchNodeId, performance: f64) {
        if let Some(e) = self.entries.get_mut(node as usize) {
            e.performance = Some(performance);
        }
    }

    pub fn operation(&self, node: SearchNodeId) -> Option<&str> {
        self.entries.get(node as usize).map(|e| e.operation.as_str())
    }

    pub fn performance(&self, node: SearchNodeId) -> Option<f64> {
        self.entries.get(node as usize).and_then(|e| e.performance)
    }

    pub fn children(&self, node: SearchNodeId) -> &[SearchNodeId] {
        self.entries
            .get(node as usize)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    fn tree(&self, node: SearchNodeId) -> HistoryTree {
        let entry = &self.entries[node as usize];
        HistoryTree {
            id: node.to_string(),
            perf: entry.performance,
            operation: entry.operation.clone(),
            children: entry.children.iter().map(|&c| self.tree(c)).collect(),
        }
    }

    pub fn to_log(&self) -> HistoryLog {
        HistoryLog {
            tree: self.tree(self.root()),
            nodes: self
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| (i.to_string(), e.text.clone()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_log())?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn program() -> Program {
        let spec = ProgramBuilder::spec("h").tensor("A", &[4]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::assign("A", vec![Expr::var("i")], Expr::int(1))],
        ));
        ProgramBuilder::build(&spec).expect("build")
    }

    #[test]
    fn log_nests_children_under_their_parent() {
        let p = program();
        let mut history = SearchHistory::new(&p, "kernel");
        let a = history.branch(history.root(), &p, "Split(n1, 4)");
        let b = history.branch(a, &p, "Parallelize(n1)");
        history.record_perf(b, 2.5);

        let json = history.to_json().expect("json");
        let log: HistoryLog = serde_json::from_str(&json).expect("parse");
        assert_eq!(log.tree.operation, "Root");
        assert_eq!(log.tree.perf, None);
        assert_eq!(log.tree.children[0].operation, "Split(n1, 4)");
        assert_eq!(log.tree.children[0].children[0].perf, Some(2.5));
        assert_eq!(log.nodes.len(), 3);
        assert!(log.nodes["0"].starts_with("void kernel("));
    }

    #[test]
    fn write_creates_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.json");
        SearchHistory::new(&program(), "kernel").write(&path).expect("write");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"Tree\""));
        assert!(text.contains("\"Nodes\""));
    }
}
