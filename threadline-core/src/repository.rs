//! Branching message history
//!
//! Messages are stored in an arena keyed by id. Each node records its parent,
//! its children in creation order and which child is currently selected. The
//! current path runs from the selected root down the selected children to the
//! head, which is always a leaf.
//!
//! ```text
//!            u1
//!           /  \
//!         a1    a1'     ← siblings (branches) of the same user message
//!         |
//!         u2            ← head when a1 is selected
//! ```
//!
//! Appending under a node that already has children creates a new branch and
//! selects it. Nothing is rewritten in place except the payload of a node
//! that is still being streamed into.
//!
//! Every mutation recomputes the current path as a whole and publishes it as
//! a [`PathSnapshot`], so readers never observe a half-switched path.

use crate::error::{Error, Result};
use crate::types::ThreadMessage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;

/// One stored message and its position in the tree
#[derive(Debug, Clone)]
pub struct MessageNode {
    pub id: String,
    pub message: ThreadMessage,
    pub parent_id: Option<String>,
    /// Child ids in creation order
    pub children: Vec<String>,
    /// Child on the current (or last visited) path
    pub selected_child: Option<String>,
}

/// Branch selection for [`MessageRepository::switch_to_branch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    Next,
    Previous,
    /// A specific sibling
    Id(String),
}

/// Consistent view of the current path
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSnapshot {
    /// Incremented on every mutation
    pub revision: u64,
    pub leaf_id: Option<String>,
    /// Root to leaf
    pub messages: Vec<ThreadMessage>,
}

impl PathSnapshot {
    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }
}

/// Lookup result for [`MessageRepository::get_message`]
#[derive(Debug, Clone, Copy)]
pub struct MessageEntry<'a> {
    pub parent_id: Option<&'a str>,
    pub message: &'a ThreadMessage,
    /// Zero for roots
    pub depth: usize,
}

/// Serializable copy of a repository, parents before children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedRepository {
    #[serde(default)]
    pub head_id: Option<String>,
    pub messages: Vec<ExportedMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMessage {
    pub message: ThreadMessage,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// In-memory message tree with a selected path
#[derive(Debug)]
pub struct MessageRepository {
    nodes: HashMap<String, MessageNode>,
    /// Root ids in creation order
    roots: Vec<String>,
    selected_root: Option<String>,
    head: Option<String>,
    revision: u64,
    sender: watch::Sender<PathSnapshot>,
}

impl Default for MessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRepository {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PathSnapshot::default());
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            selected_root: None,
            head: None,
            revision: 0,
            sender,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&MessageNode> {
        self.nodes.get(id)
    }

    /// Id of the last message on the current path
    pub fn head_id(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn current_leaf_id(&self) -> Option<&str> {
        self.head_id()
    }

    /// Receive a [`PathSnapshot`] after every mutation. Drop the receiver to
    /// unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<PathSnapshot> {
        self.sender.subscribe()
    }

    /// Latest published path
    pub fn snapshot(&self) -> PathSnapshot {
        self.sender.borrow().clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_message(&self, id: &str) -> Result<MessageEntry<'_>> {
        let node = self.require(id)?;
        Ok(MessageEntry {
            parent_id: node.parent_id.as_deref(),
            message: &node.message,
            depth: self.ancestors(id).count() - 1,
        })
    }

    /// Messages from the root to the head
    pub fn get_current_path(&self) -> Vec<ThreadMessage> {
        self.current_path_ids()
            .into_iter()
            .filter_map(|id| self.nodes.get(id).map(|n| n.message.clone()))
            .collect()
    }

    /// Ids of the node and its siblings, in creation order
    pub fn get_branches(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.siblings(id)?.to_vec())
    }

    /// `(index, count)` of the node among its siblings
    pub fn branch_position(&self, id: &str) -> Result<(usize, usize)> {
        let siblings = self.siblings(id)?;
        let index = siblings
            .iter()
            .position(|s| s == id)
            .ok_or_else(|| Error::InvariantViolation(format!("{} missing from its siblings", id)))?;
        Ok((index, siblings.len()))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Store `message` under `parent_id` (or as a root) and make it the head.
    ///
    /// If the parent already has children the message becomes a new branch;
    /// the existing branches stay stored.
    pub fn append(&mut self, message: ThreadMessage, parent_id: Option<&str>) -> Result<()> {
        let id = message.id.clone();
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateMessage(id));
        }

        match parent_id {
            Some(parent) => {
                let parent_node = self
                    .nodes
                    .get_mut(parent)
                    .ok_or_else(|| Error::ParentNotFound(parent.to_string()))?;
                parent_node.children.push(id.clone());
            }
            None => self.roots.push(id.clone()),
        }

        self.nodes.insert(
            id.clone(),
            MessageNode {
                id: id.clone(),
                message,
                parent_id: parent_id.map(str::to_string),
                children: Vec::new(),
                selected_child: None,
            },
        );

        self.select_path_to(&id);
        self.head = Some(id.clone());

        tracing::debug!(message_id = %id, parent_id = ?parent_id, "Appended message");
        self.commit()
    }

    /// Select a sibling of `id` and move the head to the leaf of its branch.
    ///
    /// Switching away from a message that is still streaming does not stop
    /// the stream; its node keeps receiving updates off-path.
    pub fn switch_to_branch(&mut self, id: &str, target: BranchTarget) -> Result<()> {
        let siblings = self.siblings(id)?;
        let index = siblings.iter().position(|s| s == id).unwrap_or_default();

        let chosen = match &target {
            BranchTarget::Next => siblings.get(index + 1),
            BranchTarget::Previous => index.checked_sub(1).and_then(|i| siblings.get(i)),
            BranchTarget::Id(other) => {
                if !self.nodes.contains_key(other) {
                    return Err(Error::MessageNotFound(other.clone()));
                }
                siblings.iter().find(|s| *s == other)
            }
        }
        .cloned()
        .ok_or_else(|| Error::BranchOutOfRange {
            node_id: id.to_string(),
            position: match &target {
                BranchTarget::Next => "next".to_string(),
                BranchTarget::Previous => "previous".to_string(),
                BranchTarget::Id(other) => format!("sibling {}", other),
            },
        })?;

        self.select_path_to(&chosen);
        let leaf = self.selected_leaf(&chosen);
        self.head = Some(leaf);

        tracing::debug!(from = %id, to = %chosen, head = ?self.head, "Switched branch");
        self.commit()
    }

    /// Replace a node's payload with the final streamed message
    pub fn merge_stream_result(&mut self, id: &str, message: ThreadMessage) -> Result<()> {
        let node = self.require_payload_target(id, &message)?;
        node.message = message;

        tracing::debug!(message_id = %id, "Merged stream result");
        self.commit_payload(id)
    }

    /// Replace the payload of a node that is still streaming.
    ///
    /// Refused once the stored message is terminal; use
    /// [`merge_stream_result`](Self::merge_stream_result) for the final write.
    pub fn update_streaming_message(&mut self, id: &str, message: ThreadMessage) -> Result<()> {
        let node = self.require_payload_target(id, &message)?;
        if node.message.status.is_terminal() {
            return Err(Error::MessageFinalized(id.to_string()));
        }
        node.message = message;

        tracing::trace!(message_id = %id, "Updated streaming message");
        self.commit_payload(id)
    }

    /// Remove a node and all of its descendants.
    ///
    /// The parent falls back to its most recent remaining child. If the head
    /// was removed it moves to the leaf of that fallback branch.
    pub fn delete_subtree(&mut self, id: &str) -> Result<()> {
        let parent_id = self.require(id)?.parent_id.clone();

        let removed = self.remove_subtree(id);
        let siblings = match &parent_id {
            Some(parent) => {
                let node = self.require_mut(parent)?;
                node.children.retain(|c| c != id);
                if node.selected_child.as_deref() == Some(id) {
                    node.selected_child = node.children.last().cloned();
                }
                node.children.clone()
            }
            None => {
                self.roots.retain(|r| r != id);
                if self.selected_root.as_deref() == Some(id) {
                    self.selected_root = self.roots.last().cloned();
                }
                self.roots.clone()
            }
        };

        if self.head.as_ref().is_some_and(|h| removed.contains(h)) {
            self.head = match (&parent_id, siblings.is_empty()) {
                (Some(parent), true) => Some(parent.clone()),
                (Some(parent), false) => self
                    .nodes
                    .get(parent)
                    .and_then(|n| n.selected_child.clone())
                    .map(|c| self.selected_leaf(&c)),
                (None, _) => self.selected_root.clone().map(|r| self.selected_leaf(&r)),
            };
            if let Some(head) = self.head.clone() {
                self.select_path_to(&head);
            }
        }

        tracing::debug!(message_id = %id, removed = removed.len(), "Deleted subtree");
        self.commit()
    }

    /// Make `id` the head, deleting everything below it. `None` clears the
    /// repository.
    pub fn reset_head(&mut self, id: Option<&str>) -> Result<()> {
        let Some(id) = id else {
            self.clear();
            return Ok(());
        };

        let children = self.require(id)?.children.clone();
        for child in &children {
            self.remove_subtree(child);
        }
        let node = self.require_mut(id)?;
        node.children.clear();
        node.selected_child = None;

        self.select_path_to(id);
        self.head = Some(id.to_string());

        tracing::debug!(message_id = %id, "Reset head");
        self.commit()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.selected_root = None;
        self.head = None;
        self.publish();
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Copy every message, parents before children, siblings in creation order
    pub fn export(&self) -> ExportedRepository {
        let mut messages = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&str> = self.roots.iter().rev().map(String::as_str).collect();

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            messages.push(ExportedMessage {
                message: node.message.clone(),
                parent_id: node.parent_id.clone(),
            });
            stack.extend(node.children.iter().rev().map(String::as_str));
        }

        ExportedRepository {
            head_id: self.head.clone(),
            messages,
        }
    }

    /// Replace the contents with an exported repository.
    ///
    /// Messages are appended in order, then the head is restored. Branch
    /// selections off the head path end up on the most recent child.
    pub fn import(&mut self, data: ExportedRepository) -> Result<()> {
        let mut staged = MessageRepository::new();
        for entry in data.messages {
            staged.append(entry.message, entry.parent_id.as_deref())?;
        }

        if let Some(head) = data.head_id {
            staged.require(&head)?;
            staged.select_path_to(&head);
            staged.head = Some(staged.selected_leaf(&head));
        }

        self.nodes = staged.nodes;
        self.roots = staged.roots;
        self.selected_root = staged.selected_root;
        self.head = staged.head;

        tracing::info!(messages = self.nodes.len(), head = ?self.head, "Imported repository");
        self.commit()
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check every structural invariant
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| Err(Error::InvariantViolation(msg));

        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, Option<&str>)> =
            self.roots.iter().map(|r| (r.as_str(), None)).collect();

        while let Some((id, expected_parent)) = stack.pop() {
            if !seen.insert(id) {
                return violation(format!("{} is reachable twice", id));
            }
            let Some(node) = self.nodes.get(id) else {
                return violation(format!("{} is linked but not stored", id));
            };
            if node.parent_id.as_deref() != expected_parent {
                return violation(format!("{} has an inconsistent parent link", id));
            }
            match &node.selected_child {
                Some(child) if !node.children.contains(child) => {
                    return violation(format!("{} selects {} which is not its child", id, child));
                }
                None if !node.children.is_empty() => {
                    return violation(format!("{} has children but none selected", id));
                }
                _ => {}
            }
            stack.extend(node.children.iter().map(|c| (c.as_str(), Some(id))));
        }

        if seen.len() != self.nodes.len() {
            return violation(format!(
                "{} stored nodes are unreachable",
                self.nodes.len() - seen.len()
            ));
        }

        match (&self.selected_root, self.roots.is_empty()) {
            (None, false) => return violation("roots exist but none selected".to_string()),
            (Some(root), _) if !self.roots.contains(root) => {
                return violation(format!("selected root {} is not a root", root));
            }
            _ => {}
        }

        let walked = self.selected_root.clone().map(|r| self.selected_leaf(&r));
        if walked != self.head {
            return violation(format!(
                "head {:?} differs from the selected path leaf {:?}",
                self.head, walked
            ));
        }

        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require(&self, id: &str) -> Result<&MessageNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut MessageNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))
    }

    fn require_payload_target(
        &mut self,
        id: &str,
        message: &ThreadMessage,
    ) -> Result<&mut MessageNode> {
        if message.id != id {
            return Err(Error::MessageIdMismatch {
                node_id: id.to_string(),
                message_id: message.id.clone(),
            });
        }
        self.require_mut(id)
    }

    fn siblings(&self, id: &str) -> Result<&[String]> {
        match &self.require(id)?.parent_id {
            Some(parent) => Ok(&self.require(parent)?.children),
            None => Ok(&self.roots),
        }
    }

    /// `id` and its ancestors, nearest first
    fn ancestors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        std::iter::successors(Some(id), move |current| {
            self.nodes.get(*current).and_then(|n| n.parent_id.as_deref())
        })
    }

    /// Point every ancestor's selection at the path leading to `id`
    fn select_path_to(&mut self, id: &str) {
        let path: Vec<String> = self.ancestors(id).map(str::to_string).collect();
        for pair in path.windows(2) {
            if let Some(parent) = self.nodes.get_mut(&pair[1]) {
                parent.selected_child = Some(pair[0].clone());
            }
        }
        self.selected_root = path.last().cloned();
    }

    /// Follow selected children from `id` down to a leaf
    fn selected_leaf(&self, id: &str) -> String {
        let mut current = id;
        let mut steps = 0;
        while let Some(next) = self
            .nodes
            .get(current)
            .and_then(|n| n.selected_child.as_deref())
        {
            current = next;
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
        }
        current.to_string()
    }

    fn current_path_ids(&self) -> Vec<&str> {
        let mut path: Vec<&str> = match &self.head {
            Some(head) => self.ancestors(head).collect(),
            None => Vec::new(),
        };
        path.reverse();
        path
    }

    /// Drop `id` and its descendants from the arena, returning the removed ids
    fn remove_subtree(&mut self, id: &str) -> HashSet<String> {
        let mut removed = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed.insert(current);
            }
        }
        removed
    }

    /// O(depth) check of the current path: every step has a stored parent
    /// that lists and selects it, and the walk ends at the selected root.
    fn check_path(&self) -> Result<()> {
        let violation = |msg: String| Err(Error::InvariantViolation(msg));

        let Some(head) = self.head.as_deref() else {
            if self.roots.is_empty() {
                return Ok(());
            }
            return violation("roots exist but there is no head".to_string());
        };

        let mut current = head;
        for _ in 0..=self.nodes.len() {
            let Some(node) = self.nodes.get(current) else {
                return violation(format!("path gap: {} is not stored", current));
            };
            if current == head && node.selected_child.is_some() {
                return violation(format!("head {} is not a leaf", head));
            }
            let Some(parent_id) = node.parent_id.as_deref() else {
                if self.selected_root.as_deref() != Some(current) {
                    return violation(format!("path root {} is not the selected root", current));
                }
                return Ok(());
            };
            let Some(parent) = self.nodes.get(parent_id) else {
                return violation(format!("path gap: parent {} of {} is not stored", parent_id, current));
            };
            if !parent.children.iter().any(|c| c == current)
                || parent.selected_child.as_deref() != Some(current)
            {
                return violation(format!("{} is not the selected child of {}", current, parent_id));
            }
            current = parent_id;
        }

        violation(format!("parent cycle above {}", head))
    }

    /// Check invariants and publish the recomputed path. The full structural
    /// check runs in debug builds only.
    fn commit(&mut self) -> Result<()> {
        self.check_path()?;
        if cfg!(debug_assertions) {
            self.validate()?;
        }
        self.publish();
        Ok(())
    }

    /// Commit a payload-only change to `id`: the tree is unchanged, so the
    /// published path is patched in place instead of rebuilt.
    fn commit_payload(&mut self, id: &str) -> Result<()> {
        self.check_path()?;
        self.revision += 1;

        let revision = self.revision;
        let nodes = &self.nodes;
        self.sender.send_modify(|snapshot| {
            snapshot.revision = revision;
            let slot = snapshot.messages.iter_mut().find(|m| m.id == id);
            if let (Some(slot), Some(node)) = (slot, nodes.get(id)) {
                *slot = node.message.clone();
            }
        });
        Ok(())
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = PathSnapshot {
            revision: self.revision,
            leaf_id: self.head.clone(),
            messages: self.get_current_path(),
        };
        self.sender.send_replace(snapshot);
    }
}
