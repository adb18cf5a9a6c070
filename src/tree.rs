//! Path-keyed aggregation tree
//!
//! Accumulates fixed-width measurement vectors along hierarchical paths
//! (process, then call-stack frames), merges trees, computes three-way
//! diffs, and round-trips through a compact nested JSON form:
//!
//! ```json
//! {
//!   "columnNames": ["Count", "Size"],
//!   "treeData": [
//!     { "n": "app.exe", "c": [ { "n": "[Root]", "0": 2, "1": 150 } ] }
//!   ]
//! }
//! ```
//!
//! Nodes live in an arena addressed by stable indices; a node never needs a
//! back-reference to its parent, so merge/diff/serialize stay allocation
//! cheap and ownership stays flat.

use std::collections::HashMap;

use serde::de::Deserialize;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Tree-depth bound for JSON import; deeper input fails cleanly instead of
/// exhausting the stack.
pub const MAX_IMPORT_DEPTH: usize = 4096;

/// Raw JSON nesting bound applied before parsing. A tree level costs two
/// nesting levels (its object and its `"c"` array), plus slack for the
/// document envelope; anything past this cannot be a tree within
/// [`MAX_IMPORT_DEPTH`].
const MAX_JSON_NESTING: usize = 2 * MAX_IMPORT_DEPTH + 8;

type NodeId = usize;

const ROOT: NodeId = 0;

/// Errors for aggregation tree operations
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("expected {expected} values, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    #[error("column schema mismatch: {left:?} vs {right:?}")]
    SchemaMismatch { left: Vec<String>, right: Vec<String> },

    #[error("malformed tree data: {0}")]
    Malformed(String),

    #[error("tree nesting exceeds {MAX_IMPORT_DEPTH} levels")]
    DepthExceeded,

    #[error("invalid tree JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    values: Vec<i64>,
    /// Child ids in insertion order; export order follows this
    children: Vec<NodeId>,
    /// Name lookup for the children above
    index: HashMap<String, NodeId>,
}

impl Node {
    fn new(name: String, width: usize) -> Self {
        Self {
            name,
            values: vec![0; width],
            children: Vec::new(),
            index: HashMap::new(),
        }
    }
}

/// A tree of accumulated measurement vectors keyed by hierarchical paths.
///
/// The column schema is fixed at construction. Every `add` accumulates its
/// vector into the root and every node along the path, so any internal
/// node's vector is always the sum over the adds that passed through it.
#[derive(Debug, Clone)]
pub struct AggregationTree {
    column_names: Vec<String>,
    nodes: Vec<Node>,
}

impl AggregationTree {
    /// Create an empty tree with the given column schema.
    pub fn new<I, S>(column_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column_names: Vec<String> = column_names.into_iter().map(Into::into).collect();
        let root = Node::new(String::new(), column_names.len());
        Self {
            column_names,
            nodes: vec![root],
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// The root's accumulated vector: per column, the sum over every add.
    pub fn root_values(&self) -> &[i64] {
        &self.nodes[ROOT].values
    }

    /// Accumulated vector of the node at `path`, if the path exists.
    pub fn values_at<'a, I>(&self, path: I) -> Option<&[i64]>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = ROOT;
        for name in path {
            current = self.child(current, name)?;
        }
        Some(&self.nodes[current].values)
    }

    /// Child names of the node at `path` in insertion order.
    pub fn child_names_at<'a, I>(&self, path: I) -> Option<Vec<&str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = ROOT;
        for name in path {
            current = self.child(current, name)?;
        }
        Some(
            self.nodes[current]
                .children
                .iter()
                .map(|&id| self.nodes[id].name.as_str())
                .collect(),
        )
    }

    fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent].index.get(name).copied()
    }

    fn find_or_create(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(id) = self.child(parent, name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes
            .push(Node::new(name.to_string(), self.column_names.len()));
        let parent = &mut self.nodes[parent];
        parent.children.push(id);
        parent.index.insert(name.to_string(), id);
        id
    }

    fn accumulate(&mut self, id: NodeId, values: &[i64]) {
        for (slot, v) in self.nodes[id].values.iter_mut().zip(values) {
            *slot += *v;
        }
    }

    /// Accumulate `values` into the root and every node along `path`,
    /// creating missing nodes on demand.
    pub fn add<I, S>(&mut self, path: I, values: &[i64]) -> Result<(), TreeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if values.len() != self.column_names.len() {
            return Err(TreeError::ColumnCount {
                expected: self.column_names.len(),
                actual: values.len(),
            });
        }

        let mut current = ROOT;
        self.accumulate(current, values);
        for name in path {
            current = self.find_or_create(current, name.as_ref());
            self.accumulate(current, values);
        }
        Ok(())
    }

    /// Accumulate every node of `other` into this tree, matching nodes by
    /// path. Equivalent to replaying every add ever issued to `other`.
    pub fn merge(&mut self, other: &AggregationTree) -> Result<(), TreeError> {
        if self.column_names != other.column_names {
            return Err(TreeError::SchemaMismatch {
                left: self.column_names.clone(),
                right: other.column_names.clone(),
            });
        }
        self.merge_node(ROOT, other, ROOT);
        Ok(())
    }

    fn merge_node(&mut self, into: NodeId, other: &AggregationTree, from: NodeId) {
        self.accumulate(into, &other.nodes[from].values);
        for i in 0..other.nodes[from].children.len() {
            let from_child = other.nodes[from].children[i];
            let into_child = self.find_or_create(into, &other.nodes[from_child].name);
            self.merge_node(into_child, other, from_child);
        }
    }

    /// Three-way diff: a new tree with tripled columns (`Test`, `Base`,
    /// `Diff` suffixes) over the union of both trees' paths. A path missing
    /// on one side contributes zeros for that side.
    pub fn diff(test: &AggregationTree, base: &AggregationTree) -> Result<AggregationTree, TreeError> {
        if test.column_names != base.column_names {
            return Err(TreeError::SchemaMismatch {
                left: test.column_names.clone(),
                right: base.column_names.clone(),
            });
        }

        let columns: Vec<String> = test
            .column_names
            .iter()
            .map(|c| format!("{c}Test"))
            .chain(test.column_names.iter().map(|c| format!("{c}Base")))
            .chain(test.column_names.iter().map(|c| format!("{c}Diff")))
            .collect();
        let mut out = AggregationTree::new(columns);
        out.diff_node(ROOT, test, Some(ROOT), base, Some(ROOT));
        Ok(out)
    }

    fn diff_node(
        &mut self,
        into: NodeId,
        test: &AggregationTree,
        test_id: Option<NodeId>,
        base: &AggregationTree,
        base_id: Option<NodeId>,
    ) {
        let width = test.column_names.len();
        let zeros = vec![0i64; width];
        let test_values = test_id.map_or(zeros.as_slice(), |id| test.nodes[id].values.as_slice());
        let base_values = base_id.map_or(zeros.as_slice(), |id| base.nodes[id].values.as_slice());

        let mut values = Vec::with_capacity(width * 3);
        values.extend_from_slice(test_values);
        values.extend_from_slice(base_values);
        values.extend(test_values.iter().zip(base_values).map(|(t, b)| t - b));
        self.nodes[into].values = values;

        // Union of child names: test side first in its order, then names
        // only the base side has, in base order
        if let Some(tid) = test_id {
            for i in 0..test.nodes[tid].children.len() {
                let test_child = test.nodes[tid].children[i];
                let name = &test.nodes[test_child].name;
                let base_child = base_id.and_then(|bid| base.child(bid, name));
                let into_child = self.find_or_create(into, name);
                self.diff_node(into_child, test, Some(test_child), base, base_child);
            }
        }
        if let Some(bid) = base_id {
            for i in 0..base.nodes[bid].children.len() {
                let base_child = base.nodes[bid].children[i];
                let name = &base.nodes[base_child].name;
                if test_id.is_some_and(|tid| test.child(tid, name).is_some()) {
                    continue;
                }
                let into_child = self.find_or_create(into, name);
                self.diff_node(into_child, test, None, base, Some(base_child));
            }
        }
    }

    /// Rename every childless node to `new_name` within its parent.
    ///
    /// Sibling leaves colliding on `new_name` accumulate: their vectors are
    /// summed into the surviving sibling rather than overwriting it. A leaf
    /// whose colliding sibling is an internal node keeps its old name, since
    /// export only emits leaf vectors and the folded values would vanish.
    pub fn rename_leaves(&mut self, new_name: &str) {
        self.rename_leaves_under(ROOT, new_name);
    }

    fn rename_leaves_under(&mut self, id: NodeId, new_name: &str) {
        if self.nodes[id].children.is_empty() {
            return;
        }

        let mut leaves = Vec::new();
        for i in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[i];
            if self.nodes[child].children.is_empty() {
                leaves.push(child);
            } else {
                self.rename_leaves_under(child, new_name);
            }
        }

        for leaf in leaves {
            let old_name = self.nodes[leaf].name.clone();
            if old_name == new_name {
                continue;
            }
            if let Some(existing) = self.child(id, new_name) {
                // Only merge into a childless sibling; an internal node has
                // no leaf vector of its own on export
                if !self.nodes[existing].children.is_empty() {
                    continue;
                }
                let values = self.nodes[leaf].values.clone();
                self.accumulate(existing, &values);
                self.nodes[id].index.remove(&old_name);
                self.nodes[id].children.retain(|&c| c != leaf);
            } else {
                self.nodes[id].index.remove(&old_name);
                self.nodes[id].index.insert(new_name.to_string(), leaf);
                self.nodes[leaf].name = new_name.to_string();
            }
        }
    }

    /// Serialize to the nested JSON wire form. The root's own vector is not
    /// emitted; it is always the sum of the top-level entries.
    pub fn to_json(&self) -> Result<String, TreeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rebuild a tree from its JSON wire form.
    ///
    /// Every ancestor total, root included, is recomputed from the leaf
    /// vectors rather than trusted from the file, so a hand-edited or
    /// inconsistent input reloads internally consistent.
    pub fn from_json(text: &str) -> Result<AggregationTree, TreeError> {
        if json_nesting(text) > MAX_JSON_NESTING {
            return Err(TreeError::DepthExceeded);
        }

        // Call-stack paths routinely run past the parser's default
        // recursion limit; the pre-scan above bounds nesting instead, and
        // serde_stacker keeps stack use bounded while parsing
        let mut parser = serde_json::Deserializer::from_str(text);
        parser.disable_recursion_limit();
        let doc = Value::deserialize(serde_stacker::Deserializer::new(&mut parser))?;

        let top = doc
            .as_object()
            .ok_or_else(|| TreeError::Malformed("top level is not an object".into()))?;

        let column_names = top
            .get("columnNames")
            .and_then(Value::as_array)
            .ok_or_else(|| TreeError::Malformed("missing columnNames array".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| TreeError::Malformed("columnNames entry is not a string".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = AggregationTree::new(column_names);
        let data = top
            .get("treeData")
            .and_then(Value::as_array)
            .ok_or_else(|| TreeError::Malformed("missing treeData array".into()))?;
        tree.import_children(data)?;
        Ok(tree)
    }

    /// Walk `treeData` with an explicit level stack whose depth is the tree
    /// depth, bounded by [`MAX_IMPORT_DEPTH`]. Leaf vectors accumulate into
    /// their node, and every completed level folds its total into the level
    /// above, so ancestor totals (root included) come from the leaves.
    fn import_children(&mut self, top: &[Value]) -> Result<(), TreeError> {
        struct Level<'a> {
            elements: &'a [Value],
            next: usize,
            node: NodeId,
            total: Vec<i64>,
        }

        let width = self.column_names.len();
        let mut stack = vec![Level {
            elements: top,
            next: 0,
            node: ROOT,
            total: vec![0; width],
        }];

        while let Some(level) = stack.last_mut() {
            if level.next >= level.elements.len() {
                let node = level.node;
                let total = std::mem::take(&mut level.total);
                stack.pop();
                self.accumulate(node, &total);
                if let Some(parent) = stack.last_mut() {
                    for (slot, v) in parent.total.iter_mut().zip(&total) {
                        *slot += *v;
                    }
                }
                continue;
            }

            let elements = level.elements;
            let index = level.next;
            level.next += 1;
            let parent_node = level.node;

            let obj = elements[index]
                .as_object()
                .ok_or_else(|| TreeError::Malformed("tree node is not an object".into()))?;
            let name = obj
                .get("n")
                .and_then(Value::as_str)
                .ok_or_else(|| TreeError::Malformed("tree node missing \"n\"".into()))?;
            let node = self.find_or_create(parent_node, name);

            if let Some(children) = obj.get("c") {
                let children = children
                    .as_array()
                    .ok_or_else(|| TreeError::Malformed("\"c\" is not an array".into()))?;
                if stack.len() >= MAX_IMPORT_DEPTH {
                    return Err(TreeError::DepthExceeded);
                }
                stack.push(Level {
                    elements: children.as_slice(),
                    next: 0,
                    node,
                    total: vec![0; width],
                });
            } else {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    let value = obj.get(i.to_string().as_str()).ok_or_else(|| {
                        TreeError::Malformed(format!("leaf \"{name}\" missing column {i}"))
                    })?;
                    // as_i64 rejects floats and anything past i64::MAX
                    let value = value.as_i64().ok_or_else(|| {
                        TreeError::Malformed(format!(
                            "leaf \"{name}\" column {i} is not a signed 64-bit integer"
                        ))
                    })?;
                    values.push(value);
                }

                self.accumulate(node, &values);
                if let Some(level) = stack.last_mut() {
                    for (slot, v) in level.total.iter_mut().zip(&values) {
                        *slot += *v;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Maximum brace/bracket nesting of `text`, ignoring brackets inside string
/// literals. Stops counting once past [`MAX_JSON_NESTING`].
fn json_nesting(text: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for byte in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > deepest {
                    deepest = depth;
                    if deepest > MAX_JSON_NESTING {
                        return deepest;
                    }
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

impl Serialize for AggregationTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("columnNames", &self.column_names)?;
        map.serialize_entry(
            "treeData",
            &SerChildren {
                tree: self,
                parent: ROOT,
            },
        )?;
        map.end()
    }
}

struct SerChildren<'a> {
    tree: &'a AggregationTree,
    parent: NodeId,
}

impl Serialize for SerChildren<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let children = &self.tree.nodes[self.parent].children;
        let mut seq = serializer.serialize_seq(Some(children.len()))?;
        for &child in children {
            seq.serialize_element(&SerNode {
                tree: self.tree,
                id: child,
            })?;
        }
        seq.end()
    }
}

struct SerNode<'a> {
    tree: &'a AggregationTree,
    id: NodeId,
}

impl Serialize for SerNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = &self.tree.nodes[self.id];
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("n", &node.name)?;
        if node.children.is_empty() {
            // A childless node writes its vector as one property per column
            for (i, value) in node.values.iter().enumerate() {
                map.serialize_entry(&i.to_string(), value)?;
            }
        } else {
            // An internal node writes children only; its own vector is
            // recoverable as their sum
            map.serialize_entry(
                "c",
                &SerChildren {
                    tree: self.tree,
                    parent: self.id,
                },
            )?;
        }
        map.end()
    }
}
