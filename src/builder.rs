//! Incremental construction of filter trees.
//!
//! [`FilterStack`] holds the groups that are still open. Leaves are added
//! to the innermost open group; closing a group seals it into a
//! [`Predicate`] and attaches it to its parent. Both the expression parser
//! and the option surface drive the same stack.

use crate::predicate::{Filter, Predicate};

/// Which aggregator an open group becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    And,
    Or,
    Not,
}

impl GroupKind {
    pub fn keyword(self) -> &'static str {
        match self {
            GroupKind::And => "and",
            GroupKind::Or => "or",
            GroupKind::Not => "not",
        }
    }
}

/// An aggregator that is still accepting children.
#[derive(Debug, Clone)]
pub struct Group {
    kind: GroupKind,
    children: Vec<Predicate>,
}

impl Group {
    pub fn new(kind: GroupKind) -> Self {
        Group {
            kind,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn add_filter(&mut self, predicate: Predicate) {
        self.children.push(predicate);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Freeze the group into an immutable predicate.
    pub fn seal(self) -> Predicate {
        match self.kind {
            GroupKind::And => Predicate::And(self.children),
            GroupKind::Or => Predicate::Or(self.children),
            GroupKind::Not => Predicate::Not(self.children),
        }
    }
}

/// Stack of open groups over a root conjunction.
#[derive(Debug, Default)]
pub struct FilterStack {
    root: Vec<Predicate>,
    open: Vec<Group>,
}

impl FilterStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `group` inside the current innermost group, or at the root.
    pub fn push(&mut self, group: Group) {
        self.open.push(group);
    }

    /// Close the innermost group and attach it to its parent. Returns the
    /// closed group's kind, or `None` when no group is open.
    pub fn pop(&mut self) -> Option<GroupKind> {
        let group = self.open.pop()?;
        let kind = group.kind();
        self.add_filter(group.seal());
        Some(kind)
    }

    /// Append a predicate to the innermost open group, or to the root.
    pub fn add_filter(&mut self, predicate: Predicate) {
        match self.open.last_mut() {
            Some(group) => group.add_filter(predicate),
            None => self.root.push(predicate),
        }
    }

    /// Number of open groups.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Close whatever is still open and seal the result.
    pub fn finish(mut self) -> Filter {
        while self.pop().is_some() {}
        Filter::new(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{CompareOp, Comparison};

    fn leaf(field: &str) -> Predicate {
        Predicate::Compare(Comparison::new(CompareOp::Eq, field, "1"))
    }

    #[test]
    fn test_leaves_attach_to_root() {
        let mut stack = FilterStack::new();
        stack.add_filter(leaf("a"));
        stack.add_filter(leaf("b"));
        let filter = stack.finish();
        assert_eq!(filter.predicates().len(), 2);
        assert_eq!(filter.to_string(), "(and (a = 1) (b = 1))");
    }

    #[test]
    fn test_nested_groups() {
        let mut stack = FilterStack::new();
        stack.add_filter(leaf("a"));
        stack.push(Group::new(GroupKind::Or));
        stack.add_filter(leaf("b"));
        stack.push(Group::new(GroupKind::Not));
        stack.add_filter(leaf("c"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop(), Some(GroupKind::Not));
        stack.add_filter(leaf("d"));
        assert_eq!(stack.pop(), Some(GroupKind::Or));
        assert_eq!(stack.pop(), None);
        assert_eq!(
            stack.finish().to_string(),
            "(and (a = 1) (or (b = 1) (not (c = 1)) (d = 1)))"
        );
    }

    #[test]
    fn test_finish_closes_open_groups() {
        let mut stack = FilterStack::new();
        stack.push(Group::new(GroupKind::And));
        stack.add_filter(leaf("a"));
        stack.push(Group::new(GroupKind::Or));
        let filter = stack.finish();
        assert_eq!(filter.to_string(), "(and (a = 1) (or))");
    }

    #[test]
    fn test_group_seal() {
        let mut group = Group::new(GroupKind::Not);
        assert!(group.is_empty());
        group.add_filter(leaf("a"));
        assert_eq!(group.len(), 1);
        assert!(matches!(group.seal(), Predicate::Not(children) if children.len() == 1));
    }
}
