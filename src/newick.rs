//! Rooted, ordered trees read from and written to bracket (Newick) notation.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; every node carries
//! a [`NodeStyle`] with the display annotations the explorer mutates.

use crate::color::Color;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub color: Color,
    /// `false` hides everything below this node without deleting it.
    pub draw_descendants: bool,
}

impl Default for NodeStyle {
    fn default() -> Self {
        Self {
            color: Color::white(),
            draw_descendants: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub branch_length: Option<f64>,
    pub style: NodeStyle,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TreeNode {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            name: String::new(),
            branch_length: None,
            style: NodeStyle::default(),
            parent,
            children: vec![],
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl Tree {
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        Parser::new(text).parse()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order traversal starting at `start`.
    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        out
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    /// Leaves below `start` (or `start` itself when it is a leaf), left to right.
    pub fn leaves_under(&self, start: NodeId) -> Vec<NodeId> {
        self.preorder_from(start)
            .into_iter()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.leaves_under(self.root)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .map(|id| self.nodes[id].name.as_str())
            .collect()
    }

    pub fn find_leaf(&self, name: &str) -> Option<NodeId> {
        self.leaves()
            .into_iter()
            .find(|&id| self.nodes[id].name == name)
    }

    /// Number of edges between `id` and the root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            depth += 1;
            cur = self.nodes[p].parent;
        }
        depth
    }

    /// A node is hidden when any proper ancestor does not draw its descendants.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            if !self.nodes[p].style.draw_descendants {
                return false;
            }
            cur = self.nodes[p].parent;
        }
        true
    }

    /// Renames every leaf whose name exactly equals a key of `names`.
    /// Returns the number of leaves renamed.
    pub fn rename_leaves(&mut self, names: &HashMap<String, String>) -> usize {
        let mut renamed = 0;
        for id in self.leaves() {
            if let Some(new_name) = names.get(&self.nodes[id].name) {
                self.nodes[id].name = new_name.clone();
                renamed += 1;
            }
        }
        renamed
    }

    /// Copy of the tree restricted to leaves named in `keep`. Internal nodes
    /// left with a single child are removed and their branch length is added
    /// to the child's, so no unary node survives (the root included).
    pub fn pruned(&self, keep: &HashSet<String>) -> Result<Tree, EngineError> {
        let mut retained = vec![false; self.nodes.len()];
        for id in self.preorder().into_iter().rev() {
            let node = &self.nodes[id];
            retained[id] = if node.is_leaf() {
                keep.contains(&node.name)
            } else {
                node.children.iter().any(|&c| retained[c])
            };
        }
        if !retained[self.root] {
            return Err(EngineError::structural(
                "None of the leaves to keep are present in the tree",
            ));
        }

        let mut out = Tree {
            nodes: vec![],
            root: 0,
        };
        self.copy_retained(self.root, None, None, &retained, &mut out);
        Ok(out)
    }

    fn copy_retained(
        &self,
        id: NodeId,
        new_parent: Option<NodeId>,
        carried_length: Option<f64>,
        retained: &[bool],
        out: &mut Tree,
    ) {
        let node = &self.nodes[id];
        let length = sum_lengths(node.branch_length, carried_length);
        let kept_children: Vec<NodeId> = node
            .children
            .iter()
            .copied()
            .filter(|&c| retained[c])
            .collect();
        if kept_children.len() == 1 {
            self.copy_retained(kept_children[0], new_parent, length, retained, out);
            return;
        }
        let new_id = out.nodes.len();
        let mut copy = TreeNode::new(new_parent);
        copy.name = node.name.clone();
        copy.branch_length = length;
        copy.style = node.style.clone();
        out.nodes.push(copy);
        match new_parent {
            Some(p) => out.nodes[p].children.push(new_id),
            None => out.root = new_id,
        }
        for child in kept_children {
            self.copy_retained(child, Some(new_id), None, retained, out);
        }
    }

    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        if !node.is_leaf() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_node(child, out);
            }
            out.push(')');
        }
        out.push_str(&quote_name(&node.name));
        if let Some(length) = node.branch_length {
            out.push(':');
            out.push_str(&length.to_string());
        }
    }
}

fn sum_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

const RESERVED: &[char] = &['(', ')', '[', ']', '\'', ':', ';', ','];

fn quote_name(name: &str) -> String {
    if name.chars().any(|c| RESERVED.contains(&c) || c.is_whitespace()) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    tree: Tree,
    has_root: bool,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            tree: Tree {
                nodes: vec![],
                root: 0,
            },
            has_root: false,
        }
    }

    fn error(&self, what: &str) -> EngineError {
        EngineError::structural(format!(
            "Tree text could not be parsed at character {}: {what}",
            self.pos + 1
        ))
    }

    fn add_node(&mut self, parent: Option<NodeId>) -> Result<NodeId, EngineError> {
        if parent.is_none() {
            if self.has_root {
                return Err(self.error("more than one root"));
            }
            self.has_root = true;
        }
        let id = self.tree.nodes.len();
        self.tree.nodes.push(TreeNode::new(parent));
        match parent {
            Some(p) => self.tree.nodes[p].children.push(id),
            None => self.tree.root = id,
        }
        Ok(id)
    }

    fn parse(mut self) -> Result<Tree, EngineError> {
        // Open internal nodes, innermost last.
        let mut open: Vec<NodeId> = vec![];
        // Node that may still receive a name or branch length.
        let mut current: Option<NodeId> = None;

        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                '(' => {
                    if current.is_some() {
                        return Err(self.error("'(' after a complete node"));
                    }
                    let id = self.add_node(open.last().copied())?;
                    open.push(id);
                    self.pos += 1;
                }
                ',' => {
                    if open.is_empty() {
                        return Err(self.error("',' outside of parentheses"));
                    }
                    if current.is_none() {
                        self.add_node(open.last().copied())?;
                    }
                    current = None;
                    self.pos += 1;
                }
                ')' => {
                    if current.is_none() {
                        if open.is_empty() {
                            return Err(self.error("unbalanced ')'"));
                        }
                        self.add_node(open.last().copied())?;
                    }
                    let Some(closed) = open.pop() else {
                        return Err(self.error("unbalanced ')'"));
                    };
                    current = Some(closed);
                    self.pos += 1;
                }
                ':' => {
                    let id = match current {
                        Some(id) => id,
                        None => self.add_node(open.last().copied())?,
                    };
                    self.pos += 1;
                    let length = self.read_branch_length()?;
                    self.tree.nodes[id].branch_length = Some(length);
                    current = Some(id);
                }
                ';' => break,
                '[' => self.skip_comment()?,
                c if c.is_whitespace() => self.pos += 1,
                _ => {
                    let name = if c == '\'' {
                        self.read_quoted()?
                    } else {
                        self.read_unquoted()
                    };
                    let id = match current {
                        Some(id) => id,
                        None => self.add_node(open.last().copied())?,
                    };
                    if !self.tree.nodes[id].name.is_empty() {
                        return Err(self.error("node has two names"));
                    }
                    self.tree.nodes[id].name = name;
                    current = Some(id);
                }
            }
        }

        if !open.is_empty() {
            return Err(self.error("unbalanced '('"));
        }
        if self.tree.nodes.is_empty() {
            return Err(EngineError::structural("Tree text is empty"));
        }
        Ok(self.tree)
    }

    fn read_branch_length(&mut self) -> Result<f64, EngineError> {
        let start = self.pos;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if matches!(c, ',' | ')' | ';' | '[') || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| self.error(&format!("invalid branch length '{text}'")))
    }

    fn read_quoted(&mut self) -> Result<String, EngineError> {
        self.pos += 1;
        let mut name = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            self.pos += 1;
            if c == '\'' {
                if self.chars.get(self.pos) == Some(&'\'') {
                    name.push('\'');
                    self.pos += 1;
                } else {
                    return Ok(name);
                }
            } else {
                name.push(c);
            }
        }
        Err(self.error("unterminated quoted name"))
    }

    /// Unquoted names may contain spaces (composite labels do); they end at
    /// the next structural character.
    fn read_unquoted(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.chars.len() && !matches!(self.chars[self.pos], '(' | ')' | ',' | ':' | ';' | '[') {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        raw.trim().to_string()
    }

    fn skip_comment(&mut self) -> Result<(), EngineError> {
        while self.pos < self.chars.len() {
            if self.chars[self.pos] == ']' {
                self.pos += 1;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(self.error("unterminated comment"))
    }
}
