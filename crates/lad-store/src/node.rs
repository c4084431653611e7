use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use lad_types::{ContainerLevel, KeyComponent, TelemetryKey};

use crate::leaf::{LeafBuffer, Retired};
use crate::matcher::ContainerMatcher;
use crate::policy::{effective_ttl, ContainerPolicy, ReapSettings};
use crate::stats::{BranchStats, ContainerSummary, NodeMetadata, ReapReport, SummaryChild};

/// Parameters shared by every node visited in one reap pass.
pub(crate) struct ReapContext<'a> {
    pub settings: &'a ReapSettings,
    pub policy: &'a ContainerPolicy,
    pub check_time_ms: i64,
}

/// A child slot: either an interior branch or a leaf buffer.
#[derive(Clone)]
pub(crate) enum Node {
    Branch(Arc<BranchNode>),
    Leaf(Arc<LeafBuffer>),
}

impl Node {
    fn create(level: ContainerLevel, component: KeyComponent, key: &TelemetryKey, policy: &ContainerPolicy) -> Self {
        if level.is_leaf() {
            let depth = policy.depth_for(key.user_data_type);
            Node::Leaf(Arc::new(LeafBuffer::new(component, depth)))
        } else {
            Node::Branch(Arc::new(BranchNode::new(level, Some(component))))
        }
    }

    fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Branch(a), Node::Branch(b)) => Arc::ptr_eq(a, b),
            (Node::Leaf(a), Node::Leaf(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn records(&self) -> usize {
        match self {
            Node::Branch(b) => b.stats().records,
            Node::Leaf(l) => l.len(),
        }
    }

    fn try_retire(&self) -> bool {
        match self {
            Node::Branch(b) => b.try_retire(),
            Node::Leaf(l) => l.try_retire(),
        }
    }

    /// Retire this node and everything below it. Returns the number of
    /// records dropped.
    fn retire(&self) -> usize {
        match self {
            Node::Leaf(l) => l.retire(),
            Node::Branch(b) => {
                let drained: Vec<Node> = {
                    let mut state = b.state.write();
                    state.retired = true;
                    state.children.drain().map(|(_, child)| child).collect()
                };
                drained.iter().map(Node::retire).sum()
            }
        }
    }

    fn reap(
        &self,
        ctx: &ReapContext<'_>,
        parent_reapable: bool,
        parent_ttl: Option<Duration>,
        report: &mut ReapReport,
    ) -> bool {
        match self {
            Node::Branch(b) => b.reap(ctx, parent_reapable, parent_ttl, report),
            Node::Leaf(leaf) => {
                let own = ctx
                    .policy
                    .own_ttl(ContainerLevel::Identifier, Some(leaf.identifier()));
                let reapable = parent_reapable || own.is_some() || ctx.settings.forces_reapable();
                let ttl = effective_ttl(parent_ttl, own).map(|t| ctx.settings.adjust_ttl(t));
                let (empty, trimmed, evicted) = leaf.reap(
                    ctx.settings,
                    ctx.policy.reap_time_type,
                    ctx.check_time_ms,
                    reapable,
                    ttl,
                );
                report.records_trimmed += trimmed;
                report.records_evicted += evicted;
                empty
            }
        }
    }

    pub(crate) fn summary(&self) -> ContainerSummary {
        match self {
            Node::Branch(b) => b.summary(),
            Node::Leaf(l) => ContainerSummary {
                level: ContainerLevel::Identifier,
                identifier: Some(l.identifier().to_string()),
                records: l.len(),
                children: Vec::new(),
            },
        }
    }

    pub(crate) fn metadata(&self) -> NodeMetadata {
        match self {
            Node::Branch(b) => NodeMetadata::Branch(b.stats()),
            Node::Leaf(l) => NodeMetadata::Leaf(l.stats()),
        }
    }
}

struct BranchState {
    children: HashMap<KeyComponent, Node>,
    /// Set once the branch has been detached from its parent.
    retired: bool,
}

/// Interior node of the container hierarchy.
///
/// Locking: a thread holds at most one branch lock at a time, except that
/// a parent holding its write lock may take a child's write lock to retire
/// it. Locks are never taken child first.
pub(crate) struct BranchNode {
    level: ContainerLevel,
    child_level: ContainerLevel,
    identifier: Option<KeyComponent>,
    state: RwLock<BranchState>,
}

impl BranchNode {
    pub(crate) fn new(level: ContainerLevel, identifier: Option<KeyComponent>) -> Self {
        Self {
            level,
            child_level: level.child().unwrap_or(ContainerLevel::Identifier),
            identifier,
            state: RwLock::new(BranchState {
                children: HashMap::new(),
                retired: false,
            }),
        }
    }

    pub(crate) fn child_level(&self) -> ContainerLevel {
        self.child_level
    }

    /// Find or create the child on the path of `key`.
    pub(crate) fn child_for(&self, key: &TelemetryKey, policy: &ContainerPolicy) -> Result<Node, Retired> {
        // Child levels are never the master level, so a component always exists.
        let Some(component) = key.component(self.child_level) else {
            return Err(Retired);
        };

        {
            let state = self.state.read();
            if state.retired {
                return Err(Retired);
            }
            if let Some(child) = state.children.get(&component) {
                return Ok(child.clone());
            }
        }

        let mut state = self.state.write();
        if state.retired {
            return Err(Retired);
        }
        let child_level = self.child_level;
        let child = state
            .children
            .entry(component.clone())
            .or_insert_with(|| Node::create(child_level, component, key, policy));
        Ok(child.clone())
    }

    /// Children accepted by `matcher`, ordered by component.
    pub(crate) fn matched_children(&self, matcher: &dyn ContainerMatcher) -> Vec<(KeyComponent, Node)> {
        let state = self.state.read();
        let mut matched: Vec<(KeyComponent, Node)> = state
            .children
            .iter()
            .filter(|(component, _)| matcher.matches_child(self.child_level, component))
            .map(|(component, child)| (component.clone(), child.clone()))
            .collect();
        drop(state);
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }

    fn snapshot(&self) -> Vec<(KeyComponent, Node)> {
        let state = self.state.read();
        let mut children: Vec<(KeyComponent, Node)> = state
            .children
            .iter()
            .map(|(component, child)| (component.clone(), child.clone()))
            .collect();
        drop(state);
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    /// Visit every leaf below this branch on a path accepted by `matcher`.
    pub(crate) fn for_each_leaf(&self, matcher: &dyn ContainerMatcher, visit: &mut dyn FnMut(&LeafBuffer)) {
        for (_, child) in self.matched_children(matcher) {
            match child {
                Node::Branch(b) => b.for_each_leaf(matcher, visit),
                Node::Leaf(l) => visit(&l),
            }
        }
    }

    /// Reap this subtree. Returns `true` when the branch has no children
    /// left and may be detached by its parent.
    ///
    /// Children are reaped from a snapshot taken under the read lock; the
    /// write lock is only held while detaching children that are still empty.
    pub(crate) fn reap(
        &self,
        ctx: &ReapContext<'_>,
        parent_reapable: bool,
        parent_ttl: Option<Duration>,
        report: &mut ReapReport,
    ) -> bool {
        let own = ctx.policy.own_ttl(self.level, self.identifier.as_ref());
        let reapable = parent_reapable || own.is_some() || ctx.settings.forces_reapable();
        let ttl = effective_ttl(parent_ttl, own);

        let removable: Vec<(KeyComponent, Node)> = self
            .snapshot()
            .into_iter()
            .filter(|(_, child)| child.reap(ctx, reapable, ttl, report))
            .collect();

        let mut state = self.state.write();
        for (component, child) in removable {
            let current = state
                .children
                .get(&component)
                .is_some_and(|c| c.ptr_eq(&child));
            if current && child.try_retire() {
                state.children.remove(&component);
                match child {
                    Node::Branch(_) => report.branches_removed += 1,
                    Node::Leaf(_) => report.leaves_removed += 1,
                }
                debug!(level = %self.child_level, identifier = %component, "reaped container");
            }
        }
        state.children.is_empty()
    }

    /// Detach every leaf below this branch on a path accepted by `matcher`,
    /// then any branch left empty. Returns `true` when this branch is empty.
    pub(crate) fn remove(&self, matcher: &dyn ContainerMatcher, removed: &mut usize) -> bool {
        let mut detach = Vec::new();
        for (component, child) in self.matched_children(matcher) {
            let emptied = match &child {
                Node::Leaf(_) => true,
                Node::Branch(b) => b.remove(matcher, removed),
            };
            if emptied {
                detach.push((component, child));
            }
        }

        let mut state = self.state.write();
        for (component, child) in detach {
            let current = state
                .children
                .get(&component)
                .is_some_and(|c| c.ptr_eq(&child));
            if !current {
                continue;
            }
            let retired = match &child {
                Node::Leaf(l) => {
                    *removed += l.retire();
                    true
                }
                Node::Branch(b) => b.try_retire(),
            };
            if retired {
                state.children.remove(&component);
            }
        }
        state.children.is_empty()
    }

    /// Detach and retire every child. Returns the number of records dropped.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<Node> = {
            let mut state = self.state.write();
            state.children.drain().map(|(_, child)| child).collect()
        };
        drained.iter().map(Node::retire).sum()
    }

    fn try_retire(&self) -> bool {
        let mut state = self.state.write();
        if state.children.is_empty() {
            state.retired = true;
        }
        state.retired
    }

    pub(crate) fn stats(&self) -> BranchStats {
        let children = self.snapshot();
        let mut stats = BranchStats {
            level: Some(self.level),
            identifier: self.identifier.as_ref().map(ToString::to_string),
            children: children.len(),
            ..BranchStats::default()
        };
        for (_, child) in children {
            match child {
                Node::Branch(b) => {
                    let sub = b.stats();
                    stats.branches += 1 + sub.branches;
                    stats.leaves += sub.leaves;
                    stats.records += sub.records;
                }
                Node::Leaf(l) => {
                    stats.leaves += 1;
                    stats.records += l.len();
                }
            }
        }
        stats
    }

    pub(crate) fn summary(&self) -> ContainerSummary {
        let children: Vec<SummaryChild> = self
            .snapshot()
            .into_iter()
            .map(|(component, child)| SummaryChild {
                level: self.child_level,
                identifier: component.to_string(),
                records: child.records(),
            })
            .collect();
        ContainerSummary {
            level: self.level,
            identifier: self.identifier.as_ref().map(ToString::to_string),
            records: children.iter().map(|c| c.records).sum(),
            children,
        }
    }
}
