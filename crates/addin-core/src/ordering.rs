//! Final codon order for one node.
//!
//! Each codon depends on the codon declared before it, so declaration order
//! is the default. `insertbefore="x,y"` makes the referenced codons depend on
//! the current one; `insertafter="x"` makes the current codon depend on `x`.
//! Explicit directives win: a predecessor edge is dropped when keeping it
//! would contradict them. The order is a depth-first post-order over the
//! resulting graph, visiting roots in declaration order.
//!
//! Unknown references are logged and skipped. A cycle formed by explicit
//! directives is an [`AddInError::OrderingCycle`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{AddInError, Result};
use crate::tree::Codon;

/// Ordering-relevant view of one codon.
#[derive(Debug, Clone)]
pub struct OrderEntry<'a> {
    pub id: &'a str,
    pub insert_before: Vec<&'a str>,
    pub insert_after: Vec<&'a str>,
}

impl<'a> OrderEntry<'a> {
    /// Entry with no directives.
    pub fn new(id: &'a str) -> Self {
        Self {
            id,
            insert_before: Vec::new(),
            insert_after: Vec::new(),
        }
    }

    /// Sets `insertbefore` from a comma-separated list.
    pub fn before(mut self, references: &'a str) -> Self {
        self.insert_before = split_references(Some(references));
        self
    }

    /// Sets `insertafter` from a comma-separated list.
    pub fn after(mut self, references: &'a str) -> Self {
        self.insert_after = split_references(Some(references));
        self
    }

    fn from_codon(codon: &'a Codon) -> Self {
        Self {
            id: codon.id(),
            insert_before: split_references(codon.insert_before()),
            insert_after: split_references(codon.insert_after()),
        }
    }
}

/// Splits a comma-separated id list, trimming blanks.
pub fn split_references(value: Option<&str>) -> Vec<&str> {
    value
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Returns entry indices in final order. `path` only labels diagnostics.
///
/// Fails with [`AddInError::OrderingCycle`] when explicit directives form a
/// cycle; the error lists the ids on it.
pub fn order(path: &str, entries: &[OrderEntry<'_>]) -> Result<Vec<usize>> {
    let n = entries.len();
    // Later declarations shadow earlier ones with the same id.
    let index: HashMap<&str, usize> = entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

    // deps[i]: entries that must be emitted before entry i.
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, entry) in entries.iter().enumerate() {
        for reference in &entry.insert_before {
            match index.get(reference) {
                Some(&target) => push_unique(&mut deps[target], i),
                None => warn!(
                    path = %path,
                    codon = %entry.id,
                    reference = %reference,
                    "codon named in insertbefore does not exist"
                ),
            }
        }
        for reference in &entry.insert_after {
            match index.get(reference) {
                Some(&target) => push_unique(&mut deps[i], target),
                None => warn!(
                    path = %path,
                    codon = %entry.id,
                    reference = %reference,
                    "codon named in insertafter does not exist"
                ),
            }
        }
    }

    if let Some(cycle) = find_cycle(&deps) {
        return Err(AddInError::OrderingCycle {
            path: path.to_string(),
            codons: cycle.into_iter().map(|i| entries[i].id.to_string()).collect(),
        });
    }

    for i in 1..n {
        if !depends_on(&deps, i - 1, i) {
            deps[i].insert(0, i - 1);
        }
    }

    let mut visited = vec![false; n];
    let mut out = Vec::with_capacity(n);
    for root in 0..n {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            match deps[node].get(top.1) {
                Some(&dep) => {
                    top.1 += 1;
                    if !visited[dep] {
                        visited[dep] = true;
                        stack.push((dep, 0));
                    }
                }
                None => {
                    out.push(node);
                    stack.pop();
                }
            }
        }
    }
    Ok(out)
}

/// Orders a node's codons. Returns shared handles, leaving the node untouched.
pub fn sort_codons(path: &str, codons: &[Arc<Codon>]) -> Result<Vec<Arc<Codon>>> {
    let entries: Vec<OrderEntry<'_>> = codons.iter().map(|c| OrderEntry::from_codon(c)).collect();
    let indices = order(path, &entries)?;
    Ok(indices.into_iter().map(|i| Arc::clone(&codons[i])).collect())
}

fn push_unique(list: &mut Vec<usize>, value: usize) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// True when `from` transitively depends on `target`.
fn depends_on(deps: &[Vec<usize>], from: usize, target: usize) -> bool {
    let mut seen = vec![false; deps.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        stack.extend(deps[node].iter().copied());
    }
    false
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Returns the members of one dependency cycle, if any.
fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; deps.len()];
    for root in 0..deps.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            match deps[node].get(top.1) {
                Some(&dep) => {
                    top.1 += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnStack;
                            stack.push((dep, 0));
                        }
                        Mark::OnStack => {
                            let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                            return Some(stack[start..].iter().map(|&(n, _)| n).collect());
                        }
                        Mark::Done => {}
                    }
                }
                None => {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
    }
    None
}
