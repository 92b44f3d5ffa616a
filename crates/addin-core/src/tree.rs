//! The extension tree: nodes addressed by slash-delimited paths, each owning
//! an ordered list of codons and a map of named child nodes.
//!
//! Nodes are created on first lookup and live as long as the tree. Every
//! codon gets a child node keyed by its id, which is where its sub-items are
//! declared.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::condition::Condition;
use crate::declaration::{DeclarationReader, ElementKind};
use crate::error::{AddInError, Result};
use crate::ordering;
use crate::paths;
use crate::properties::Properties;

/// One typed declaration at an extension point.
#[derive(Debug, Clone)]
pub struct Codon {
    name: String,
    id: String,
    properties: Properties,
    conditions: Vec<Arc<Condition>>,
    content: Option<String>,
    add_in: Option<String>,
}

impl Codon {
    /// Creates a codon of type `name`; its id comes from the `id` property.
    pub fn new(name: impl Into<String>, properties: Properties) -> Self {
        let id = properties.non_empty("id").unwrap_or_default().to_string();
        Self {
            name: name.into(),
            id,
            properties,
            conditions: Vec::new(),
            content: None,
            add_in: None,
        }
    }

    /// Replaces the guard list.
    pub fn with_conditions(mut self, conditions: Vec<Arc<Condition>>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the inner text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Records the contributing add-in; runtimes named by this codon are
    /// looked up there first.
    pub fn with_add_in(mut self, add_in: impl Into<String>) -> Self {
        self.add_in = Some(add_in.into());
        self
    }

    /// Type name, which selects the doozer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared or synthesized id, unique within the node. Also the name of
    /// the child node holding the sub-items.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attributes of the declaring element.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Attribute `name`, or `default` when absent.
    pub fn get<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.properties.get_or(name, default)
    }

    /// Guards captured when the codon was declared.
    pub fn conditions(&self) -> &[Arc<Condition>] {
        &self.conditions
    }

    /// Inner text of a declaration with no child elements.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Name of the contributing add-in.
    pub fn add_in(&self) -> Option<&str> {
        self.add_in.as_deref()
    }

    /// Comma-separated ids this codon is placed before.
    pub fn insert_before(&self) -> Option<&str> {
        self.properties.get("insertbefore")
    }

    /// Comma-separated ids this codon is placed after.
    pub fn insert_after(&self) -> Option<&str> {
        self.properties.get("insertafter")
    }
}

impl fmt::Display for Codon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Codon: name = {}, id = {}]", self.name, self.id)
    }
}

#[derive(Default)]
struct NodeState {
    codons: Vec<Arc<Codon>>,
    children: BTreeMap<String, Arc<Node>>,
    declared: usize,
    /// Final order, computed on first build and dropped when codons change.
    ordered: Option<Vec<Arc<Codon>>>,
}

/// An addressable extension point.
pub struct Node {
    name: String,
    path: String,
    state: RwLock<NodeState>,
}

impl Node {
    /// Creates a detached root. Its name and path are empty.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::with_path(String::new(), String::new()))
    }

    fn with_path(name: String, path: String) -> Self {
        Self {
            name,
            path,
            state: RwLock::new(NodeState::default()),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last path segment. Empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path from the root, e.g. `/workbench/menu`. Empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Codons in declaration order.
    pub fn codons(&self) -> Vec<Arc<Codon>> {
        self.state().codons.clone()
    }

    /// Codons in final order (see [`crate::ordering`]).
    ///
    /// The order is cached until codons are added, so unresolved
    /// `insertbefore`/`insertafter` references are reported once.
    pub fn ordered_codons(&self) -> Result<Vec<Arc<Codon>>> {
        let cached = self.state().ordered.clone();
        if let Some(ordered) = cached {
            return Ok(ordered);
        }
        let codons = self.codons();
        let ordered = ordering::sort_codons(&self.path, &codons)?;
        let mut state = self.state_mut();
        if state.ordered.is_none() && state.codons.len() == codons.len() {
            state.ordered = Some(ordered.clone());
        }
        Ok(ordered)
    }

    /// Codon with the given id.
    pub fn codon(&self, id: &str) -> Option<Arc<Codon>> {
        self.state().codons.iter().find(|c| c.id() == id).cloned()
    }

    /// Direct child named `name`, if it exists.
    pub fn child(&self, name: &str) -> Option<Arc<Node>> {
        self.state().children.get(name).cloned()
    }

    /// Child nodes sorted by name.
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.state().children.values().cloned().collect()
    }

    fn child_or_insert(&self, name: &str) -> Arc<Node> {
        let mut state = self.state_mut();
        let path = format!("{}/{}", self.path, name);
        Arc::clone(
            state
                .children
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Node::with_path(name.to_string(), path))),
        )
    }

    /// Resolves a path relative to this node; empty segments are ignored.
    /// Missing nodes are created when `create` is true.
    pub fn get(self: &Arc<Self>, path: &str, create: bool) -> Option<Arc<Node>> {
        let mut current = Arc::clone(self);
        for segment in paths::segments(path) {
            current = match current.child(segment) {
                Some(child) => child,
                None if create => current.child_or_insert(segment),
                None => return None,
            };
        }
        Some(current)
    }

    /// Resolves an absolute path such as `/workbench/menu`.
    pub fn locate(self: &Arc<Self>, path: &str, create: bool) -> Result<Option<Arc<Node>>> {
        if !path.starts_with('/') {
            return Err(AddInError::InvalidPath {
                path: path.to_string(),
                reason: "paths must begin with '/'".to_string(),
            });
        }
        Ok(self.get(path, create))
    }

    /// Like [`Node::locate`] with creation, recording every node that gains a
    /// child in `journal`.
    pub(crate) fn locate_recorded(self: &Arc<Self>, path: &str, journal: &mut TreeJournal) -> Result<Arc<Node>> {
        if !path.starts_with('/') {
            return Err(AddInError::InvalidPath {
                path: path.to_string(),
                reason: "paths must begin with '/'".to_string(),
            });
        }
        let mut current = Arc::clone(self);
        for segment in paths::segments(path) {
            current = match current.child(segment) {
                Some(child) => child,
                None => {
                    journal.record(&current);
                    current.child_or_insert(segment)
                }
            };
        }
        Ok(current)
    }

    /// Appends codons, synthesizing `node_<n>` ids where none were declared.
    pub fn add_codons(&self, codons: impl IntoIterator<Item = Codon>) {
        for codon in codons {
            self.push_codon(codon);
        }
    }

    fn push_codon(&self, mut codon: Codon) -> Arc<Codon> {
        let mut state = self.state_mut();
        state.declared += 1;
        state.ordered = None;
        if codon.id.is_empty() {
            codon.id = format!("node_{}", state.declared);
        }
        let codon = Arc::new(codon);
        state.codons.push(Arc::clone(&codon));
        codon
    }

    /// Reads codons declared at this level until the end event of
    /// `end_element`.
    ///
    /// `<Condition>` and `<ComplexCondition>` open a guard scope that lasts
    /// until their end event. Every other element becomes a codon carrying a
    /// snapshot of the open guards; its child elements are read into the
    /// child node named after the codon id.
    ///
    /// On error every node touched by this call is restored.
    pub fn read(
        self: &Arc<Self>,
        reader: &mut dyn DeclarationReader,
        end_element: &str,
        add_in: Option<&str>,
    ) -> Result<()> {
        let mut journal = TreeJournal::default();
        let result = self.read_recorded(reader, end_element, add_in, &mut journal);
        if result.is_err() {
            journal.rollback();
        }
        result
    }

    pub(crate) fn read_recorded(
        self: &Arc<Self>,
        reader: &mut dyn DeclarationReader,
        end_element: &str,
        add_in: Option<&str>,
        journal: &mut TreeJournal,
    ) -> Result<()> {
        journal.record(self);
        let mut guards: Vec<Arc<Condition>> = Vec::new();

        while reader.advance() {
            match reader.kind() {
                Some(ElementKind::End) => match reader.name() {
                    "Condition" | "ComplexCondition" => {
                        guards.pop();
                    }
                    name if name == end_element => return Ok(()),
                    _ => {}
                },
                Some(ElementKind::Start) => match reader.name() {
                    "Condition" => guards.push(Arc::new(Condition::read(reader, add_in)?)),
                    "ComplexCondition" => {
                        guards.push(Arc::new(Condition::read_complex(reader, add_in)?))
                    }
                    element => {
                        let element = element.to_string();
                        let mut codon = Codon::new(element.as_str(), Properties::read(reader))
                            .with_conditions(guards.clone());
                        if let Some(add_in) = add_in {
                            codon = codon.with_add_in(add_in);
                        }

                        if reader.is_empty() {
                            if let Some(text) = reader.inner_text().filter(|t| !t.trim().is_empty()) {
                                codon = codon.with_content(text);
                            }
                            let codon = self.push_codon(codon);
                            self.child_or_insert(codon.id());
                            reader.advance();
                        } else {
                            let codon = self.push_codon(codon);
                            let sub_node = self.child_or_insert(codon.id());
                            sub_node.read_recorded(reader, &element, add_in, journal)?;
                        }
                    }
                },
                None => {}
            }
        }
        Ok(())
    }
}

/// Node states captured before a document first writes into them.
#[derive(Default)]
pub(crate) struct TreeJournal {
    entries: Vec<JournalEntry>,
}

struct JournalEntry {
    node: Arc<Node>,
    codons: usize,
    declared: usize,
    /// Sorted, as taken from the `BTreeMap`.
    children: Vec<String>,
}

impl TreeJournal {
    fn record(&mut self, node: &Arc<Node>) {
        if self.entries.iter().any(|e| Arc::ptr_eq(&e.node, node)) {
            return;
        }
        let state = node.state();
        let entry = JournalEntry {
            node: Arc::clone(node),
            codons: state.codons.len(),
            declared: state.declared,
            children: state.children.keys().cloned().collect(),
        };
        drop(state);
        self.entries.push(entry);
    }

    /// Drops the codons and child nodes added since each node was recorded.
    pub(crate) fn rollback(self) {
        for entry in self.entries.into_iter().rev() {
            let mut state = entry.node.state_mut();
            state.codons.truncate(entry.codons);
            state.declared = entry.declared;
            state.ordered = None;
            state
                .children
                .retain(|name, _| entry.children.binary_search(name).is_ok());
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("codons", &state.codons.len())
            .field("children", &state.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.path)
    }
}
