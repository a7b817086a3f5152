//! Prompt tree location, mutation and flattening.
//!
//! The locator returns handles onto the owning sibling list so callers can
//! splice at the located position without searching again.
//!
//! # Flattening
//!
//! ```text
//! roots ──▶ enabled? ──no──▶ skip
//!              │yes
//!              ▼
//!   own text + children's text (recursive, role-blind)
//!              │
//!              ▼
//!   blank after trim? ──yes──▶ skip
//!              │no
//!              ▼
//!   { role: role ?? system, content }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agent::{Position, PositionParameter};
use crate::types::{FlatPrompt, PromptNode};

// ============================================================================
// Locator
// ============================================================================

/// A node found by [`find_prompt_by_id`], with the list it lives in.
#[derive(Debug, Clone, Copy)]
pub struct PromptMatch<'a> {
    pub node: &'a PromptNode,
    /// Parent node, `None` for roots.
    pub parent: Option<&'a PromptNode>,
    /// The sibling list containing `node`.
    pub siblings: &'a [PromptNode],
    /// Index of `node` within `siblings`.
    pub index: usize,
}

/// Depth-first, pre-order search for the first node with `id`.
pub fn find_prompt_by_id<'a>(roots: &'a [PromptNode], id: &str) -> Option<PromptMatch<'a>> {
    find_in(roots, None, id)
}

fn find_in<'a>(
    siblings: &'a [PromptNode],
    parent: Option<&'a PromptNode>,
    id: &str,
) -> Option<PromptMatch<'a>> {
    for (index, node) in siblings.iter().enumerate() {
        if node.id == id {
            return Some(PromptMatch {
                node,
                parent,
                siblings,
                index,
            });
        }
        if let Some(found) = find_in(&node.children, Some(node), id) {
            return Some(found);
        }
    }
    None
}

/// Index path from the roots to the first node with `id`.
fn path_to(nodes: &[PromptNode], id: &str) -> Option<Vec<usize>> {
    for (index, node) in nodes.iter().enumerate() {
        if node.id == id {
            return Some(vec![index]);
        }
        if let Some(mut rest) = path_to(&node.children, id) {
            rest.insert(0, index);
            return Some(rest);
        }
    }
    None
}

/// Locate a node for in-place editing.
pub fn locate_prompt_mut<'a>(roots: &'a mut Vec<PromptNode>, id: &str) -> Option<PromptSlot<'a>> {
    let path = path_to(roots, id)?;
    let (&index, parents) = path.split_last()?;
    let mut siblings = roots;
    for &i in parents {
        let node = &mut siblings[i];
        siblings = &mut node.children;
    }
    Some(PromptSlot { siblings, index })
}

/// Mutable handle on a located node: its owning list and index.
#[derive(Debug)]
pub struct PromptSlot<'a> {
    siblings: &'a mut Vec<PromptNode>,
    index: usize,
}

impl<'a> PromptSlot<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn node(&self) -> &PromptNode {
        &self.siblings[self.index]
    }

    pub fn node_mut(&mut self) -> &mut PromptNode {
        &mut self.siblings[self.index]
    }

    /// Splice `node` in as the previous sibling.
    pub fn insert_before(self, node: PromptNode) {
        self.siblings.insert(self.index, node);
    }

    /// Splice `node` in as the next sibling.
    pub fn insert_after(self, node: PromptNode) {
        self.siblings.insert(self.index + 1, node);
    }

    /// Append `node` to the located node's children.
    pub fn push_child(mut self, node: PromptNode) {
        self.node_mut().children.push(node);
    }

    /// Insert `node` into the located node's children, clamping `at`.
    pub fn insert_child(mut self, at: usize, node: PromptNode) {
        let children = &mut self.node_mut().children;
        let at = at.min(children.len());
        children.insert(at, node);
    }

    /// Swap the located node for `node`, returning the old one.
    pub fn replace(mut self, node: PromptNode) -> PromptNode {
        std::mem::replace(self.node_mut(), node)
    }

    pub fn remove(self) -> PromptNode {
        self.siblings.remove(self.index)
    }
}

/// Insert `node` relative to the target named by `param`.
///
/// Returns false when the target does not exist.
pub fn insert_at_position(
    roots: &mut Vec<PromptNode>,
    param: &PositionParameter,
    node: PromptNode,
) -> bool {
    let Some(slot) = locate_prompt_mut(roots, &param.target_id) else {
        return false;
    };
    match param.position {
        Position::Before => slot.insert_before(node),
        Position::After => slot.insert_after(node),
        Position::Relative => slot.push_child(node),
        Position::Absolute => {
            let len = slot.node().children.len();
            let at = match (param.top, param.bottom) {
                (Some(top), _) => top,
                (None, Some(bottom)) => len.saturating_sub(bottom),
                (None, None) => len,
            };
            slot.insert_child(at, node);
        }
    }
    true
}

// ============================================================================
// Flattener
// ============================================================================

/// Reduce a prompt tree to one role-tagged message per enabled root.
pub fn flatten_prompts(roots: &[PromptNode]) -> Vec<FlatPrompt> {
    roots
        .iter()
        .filter(|node| node.enabled)
        .filter_map(|node| {
            let content = node.full_text();
            if content.trim().is_empty() {
                return None;
            }
            Some(FlatPrompt {
                role: node.role.unwrap_or_default(),
                content,
            })
        })
        .collect()
}

// ============================================================================
// Shared Tree
// ============================================================================

/// The working prompt tree of one pipeline invocation.
///
/// Cloning the handle shares the tree. Deferred handler tasks keep a clone and
/// may land their mutation after the pipeline has already flattened.
#[derive(Debug, Clone, Default)]
pub struct PromptTree {
    roots: Arc<Mutex<Vec<PromptNode>>>,
}

impl PromptTree {
    pub fn new(roots: Vec<PromptNode>) -> Self {
        Self {
            roots: Arc::new(Mutex::new(roots)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PromptNode>> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current roots.
    pub fn snapshot(&self) -> Vec<PromptNode> {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&[PromptNode]) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<PromptNode>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Swap in a different set of roots, returning the previous ones.
    pub fn replace(&self, roots: Vec<PromptNode>) -> Vec<PromptNode> {
        std::mem::replace(&mut *self.lock(), roots)
    }

    /// Clone of the first node with `id`.
    pub fn find(&self, id: &str) -> Option<PromptNode> {
        self.read(|roots| find_prompt_by_id(roots, id).map(|m| m.node.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read(|roots| find_prompt_by_id(roots, id).is_some())
    }

    pub fn flatten(&self) -> Vec<FlatPrompt> {
        self.read(flatten_prompts)
    }
}
