/*
 * An editable filter tree for the advanced filter builder. Nodes live in an
 * arena and are addressed by `NodeId`; each node knows its parent, so
 * ancestry checks (for cut and paste) walk the parent chain instead of
 * comparing node contents.
 *
 * Top-level nodes are implicitly combined with AND when the tree is turned
 * back into a `FilterExpression`.
 */
use super::filters::{
    Condition, FilterError, FilterExpression, LogicalOperation, LogicalOperator, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Group(LogicalOperator),
    Condition(Condition),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Clipboard {
    snapshot: FilterExpression,
    cut_source: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterTree {
    nodes: Vec<Option<Node>>,
    roots: Vec<NodeId>,
    clipboard: Option<Clipboard>,
}

impl FilterTree {
    pub fn new() -> Self {
        Self::default()
    }

    /* A tree holding `expression` as its single top-level node. */
    pub fn from_expression(expression: &FilterExpression) -> Self {
        let mut tree = FilterTree::new();
        let root = tree.build(expression, None);
        tree.roots.push(root);
        tree
    }

    /*
     * The expression the tree represents: an empty AND for an empty tree, the
     * single top-level node as-is, or the AND of all top-level nodes.
     */
    pub fn to_expression(&self) -> FilterExpression {
        let mut expressions: Vec<FilterExpression> = self
            .roots
            .iter()
            .filter_map(|id| self.expression_of(*id).ok())
            .collect();
        if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            FilterExpression::and(expressions)
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).ok().map(|n| &n.kind)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn has_clipboard(&self) -> bool {
        self.clipboard.is_some()
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FilterError::InvalidNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(FilterError::InvalidNode(id))
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            kind,
            parent,
            children: Vec::new(),
        }));
        id
    }

    /* Instantiates an expression below `parent` without attaching its root. */
    fn build(&mut self, expression: &FilterExpression, parent: Option<NodeId>) -> NodeId {
        match expression {
            FilterExpression::Condition(c) => self.alloc(NodeKind::Condition(c.clone()), parent),
            FilterExpression::Logical(op) => {
                let id = self.alloc(NodeKind::Group(op.operator), parent);
                for child in &op.conditions {
                    let child_id = self.build(child, Some(id));
                    if let Ok(node) = self.node_mut(id) {
                        node.children.push(child_id);
                    }
                }
                id
            }
        }
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> Result<&mut Vec<NodeId>> {
        match parent {
            Some(p) => Ok(&mut self.node_mut(p)?.children),
            None => Ok(&mut self.roots),
        }
    }

    fn ensure_group(&self, id: NodeId) -> Result<()> {
        match self.node(id)?.kind {
            NodeKind::Group(_) => Ok(()),
            NodeKind::Condition(_) => Err(FilterError::NotAGroup(id)),
        }
    }

    fn insert_expression(
        &mut self,
        parent: Option<NodeId>,
        index: Option<usize>,
        expression: &FilterExpression,
    ) -> Result<NodeId> {
        if let Some(p) = parent {
            self.ensure_group(p)?;
        }
        let id = self.build(expression, parent);
        let siblings = self.siblings_mut(parent)?;
        let index = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(index, id);
        Ok(id)
    }

    /* Adds a condition under a group, or at the top level when `parent` is `None`. */
    pub fn add_condition(&mut self, parent: Option<NodeId>, condition: Condition) -> Result<NodeId> {
        self.insert_expression(parent, None, &FilterExpression::Condition(condition))
    }

    pub fn add_group(
        &mut self,
        parent: Option<NodeId>,
        operator: LogicalOperator,
    ) -> Result<NodeId> {
        self.insert_expression(parent, None, &FilterExpression::group(operator, Vec::new()))
    }

    pub fn set_operator(&mut self, id: NodeId, operator: LogicalOperator) -> Result<()> {
        self.ensure_group(id)?;
        self.node_mut(id)?.kind = NodeKind::Group(operator);
        Ok(())
    }

    pub fn replace_condition(&mut self, id: NodeId, condition: Condition) -> Result<()> {
        let node = self.node_mut(id)?;
        match node.kind {
            NodeKind::Condition(_) => {
                node.kind = NodeKind::Condition(condition);
                Ok(())
            }
            NodeKind::Group(_) => Err(FilterError::InvalidExpression(format!(
                "node {id:?} is a group, not a condition"
            ))),
        }
    }

    /* The subtree rooted at `id` as an expression. */
    pub fn expression_of(&self, id: NodeId) -> Result<FilterExpression> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Condition(c) => Ok(FilterExpression::Condition(c.clone())),
            NodeKind::Group(operator) => {
                let conditions = node
                    .children
                    .iter()
                    .map(|child| self.expression_of(*child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(FilterExpression::Logical(LogicalOperation {
                    operator: *operator,
                    conditions,
                }))
            }
        }
    }

    /* True if `node` is `ancestor` or lies below it. */
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children = match self.nodes.get_mut(id.0).and_then(Option::take) {
            Some(node) => node.children,
            None => return,
        };
        for child in children {
            self.free_subtree(child);
        }
    }

    /* Removes a node and its subtree, returning what was removed. */
    pub fn remove(&mut self, id: NodeId) -> Result<FilterExpression> {
        let removed = self.expression_of(id)?;
        let parent = self.node(id)?.parent;
        self.siblings_mut(parent)?.retain(|sibling| *sibling != id);

        let cut_source_removed = self
            .clipboard
            .as_ref()
            .and_then(|c| c.cut_source)
            .is_some_and(|source| self.is_within(source, id));
        if cut_source_removed && let Some(clipboard) = self.clipboard.as_mut() {
            clipboard.cut_source = None;
        }
        self.free_subtree(id);
        log::trace!("FilterTree: Removed node {id:?}");
        Ok(removed)
    }

    fn move_by(&mut self, id: NodeId, up: bool) -> Result<bool> {
        let parent = self.node(id)?.parent;
        let siblings = self.siblings_mut(parent)?;
        let Some(pos) = siblings.iter().position(|s| *s == id) else {
            return Err(FilterError::InvalidNode(id));
        };
        let target = if up {
            match pos.checked_sub(1) {
                Some(t) => t,
                None => return Ok(false),
            }
        } else {
            if pos + 1 >= siblings.len() {
                return Ok(false);
            }
            pos + 1
        };
        siblings.swap(pos, target);
        Ok(true)
    }

    /* Swaps a node with its previous sibling. Returns false at the first position. */
    pub fn move_up(&mut self, id: NodeId) -> Result<bool> {
        self.move_by(id, true)
    }

    pub fn move_down(&mut self, id: NodeId) -> Result<bool> {
        self.move_by(id, false)
    }

    pub fn copy(&mut self, id: NodeId) -> Result<()> {
        self.clipboard = Some(Clipboard {
            snapshot: self.expression_of(id)?,
            cut_source: None,
        });
        Ok(())
    }

    /* Like `copy`, but the source node is removed when the clipboard is pasted. */
    pub fn cut(&mut self, id: NodeId) -> Result<()> {
        self.clipboard = Some(Clipboard {
            snapshot: self.expression_of(id)?,
            cut_source: Some(id),
        });
        Ok(())
    }

    /*
     * Where pasted content lands: inside a target group (appended), right
     * after a target condition, or at the end of the top level.
     */
    fn paste_position(&self, target: Option<NodeId>) -> Result<(Option<NodeId>, Option<usize>)> {
        let Some(target) = target else {
            return Ok((None, None));
        };
        let node = self.node(target)?;
        match node.kind {
            NodeKind::Group(_) => Ok((Some(target), None)),
            NodeKind::Condition(_) => {
                let siblings = match node.parent {
                    Some(p) => &self.node(p)?.children,
                    None => &self.roots,
                };
                let index = siblings.iter().position(|s| *s == target).map(|i| i + 1);
                Ok((node.parent, index))
            }
        }
    }

    pub fn paste(&mut self, target: Option<NodeId>) -> Result<NodeId> {
        let clipboard = self.clipboard.clone().ok_or(FilterError::EmptyClipboard)?;
        if let (Some(source), Some(target)) = (clipboard.cut_source, target)
            && self.is_within(target, source)
        {
            return Err(FilterError::CannotPasteIntoSelf);
        }

        let (parent, index) = self.paste_position(target)?;
        let new_id = self.insert_expression(parent, index, &clipboard.snapshot)?;

        if clipboard.cut_source.is_some() {
            if let Some(source) = clipboard.cut_source
                && self.contains(source)
            {
                self.remove(source)?;
            }
            self.clipboard = None;
        }
        log::trace!("FilterTree: Pasted clipboard as node {new_id:?}");
        Ok(new_id)
    }

    /* Inserts a copy of the node right after it. The clipboard is left alone. */
    pub fn duplicate(&mut self, id: NodeId) -> Result<NodeId> {
        let expression = self.expression_of(id)?;
        let parent = self.node(id)?.parent;
        let index = match parent {
            Some(p) => self.node(p)?.children.iter().position(|s| *s == id),
            None => self.roots.iter().position(|s| *s == id),
        }
        .map(|i| i + 1);
        self.insert_expression(parent, index, &expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filters::CompareOperator;

    fn task(value: &str) -> Condition {
        Condition::entity("task", CompareOperator::Equals, value)
    }

    #[test]
    fn test_build_tree_and_convert_to_expression() -> Result<()> {
        // Arrange
        let mut tree = FilterTree::new();
        let or = tree.add_group(None, LogicalOperator::Or)?;
        tree.add_condition(Some(or), task("rest"))?;
        tree.add_condition(Some(or), task("motor"))?;
        tree.add_condition(None, Condition::modality("func"))?;

        // Act
        let expression = tree.to_expression();

        // Assert
        assert_eq!(
            expression,
            FilterExpression::and(vec![
                FilterExpression::or(vec![task("rest").into(), task("motor").into()]),
                Condition::modality("func").into(),
            ])
        );
        assert_eq!(tree.len(), 4);
        Ok(())
    }

    #[test]
    fn test_empty_tree_is_empty_and() {
        let tree = FilterTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.to_expression(), FilterExpression::and(vec![]));
    }

    #[test]
    fn test_from_expression_round_trip() {
        let expression = FilterExpression::not(vec![
            FilterExpression::or(vec![task("a").into(), task("b").into()]),
            Condition::subject_id("01").into(),
        ]);
        let tree = FilterTree::from_expression(&expression);
        assert_eq!(tree.to_expression(), expression);
    }

    #[test]
    fn test_condition_cannot_have_children() -> Result<()> {
        let mut tree = FilterTree::new();
        let leaf = tree.add_condition(None, task("rest"))?;
        assert!(matches!(
            tree.add_condition(Some(leaf), task("x")),
            Err(FilterError::NotAGroup(_))
        ));
        assert!(matches!(
            tree.set_operator(leaf, LogicalOperator::Or),
            Err(FilterError::NotAGroup(_))
        ));
        Ok(())
    }

    #[test]
    fn test_move_up_and_down() -> Result<()> {
        let mut tree = FilterTree::new();
        let a = tree.add_condition(None, task("a"))?;
        let b = tree.add_condition(None, task("b"))?;

        assert!(!tree.move_up(a)?);
        assert!(tree.move_up(b)?);
        assert_eq!(tree.roots(), &[b, a]);
        assert!(!tree.move_down(a)?);
        assert!(tree.move_down(b)?);
        assert_eq!(tree.roots(), &[a, b]);
        Ok(())
    }

    #[test]
    fn test_remove_subtree() -> Result<()> {
        let mut tree = FilterTree::new();
        let group = tree.add_group(None, LogicalOperator::And)?;
        let child = tree.add_condition(Some(group), task("a"))?;

        let removed = tree.remove(group)?;

        assert_eq!(removed, FilterExpression::and(vec![task("a").into()]));
        assert!(tree.is_empty());
        assert!(!tree.contains(child));
        assert!(matches!(tree.remove(group), Err(FilterError::InvalidNode(_))));
        Ok(())
    }

    #[test]
    fn test_copy_paste_onto_group_appends_and_onto_condition_inserts_after() -> Result<()> {
        let mut tree = FilterTree::new();
        let group = tree.add_group(None, LogicalOperator::Or)?;
        let first = tree.add_condition(Some(group), task("a"))?;
        let second = tree.add_condition(Some(group), task("b"))?;

        tree.copy(second)?;
        let into_group = tree.paste(Some(group))?;
        let after_first = tree.paste(Some(first))?;

        assert_eq!(
            tree.children(group),
            &[first, after_first, second, into_group]
        );
        assert_eq!(
            tree.kind(after_first),
            Some(&NodeKind::Condition(task("b")))
        );
        assert!(tree.has_clipboard());
        Ok(())
    }

    #[test]
    fn test_cut_paste_moves_node() -> Result<()> {
        let mut tree = FilterTree::new();
        let left = tree.add_group(None, LogicalOperator::And)?;
        let right = tree.add_group(None, LogicalOperator::Or)?;
        let moved = tree.add_condition(Some(left), task("a"))?;

        tree.cut(moved)?;
        let pasted = tree.paste(Some(right))?;

        assert!(tree.children(left).is_empty());
        assert_eq!(tree.children(right), &[pasted]);
        assert!(!tree.contains(moved));
        assert!(!tree.has_clipboard());
        Ok(())
    }

    #[test]
    fn test_cut_cannot_paste_into_itself_or_descendant() -> Result<()> {
        let mut tree = FilterTree::new();
        let outer = tree.add_group(None, LogicalOperator::And)?;
        let inner = tree.add_group(Some(outer), LogicalOperator::Or)?;
        let leaf = tree.add_condition(Some(inner), task("a"))?;

        tree.cut(outer)?;

        assert!(matches!(
            tree.paste(Some(outer)),
            Err(FilterError::CannotPasteIntoSelf)
        ));
        assert!(matches!(
            tree.paste(Some(inner)),
            Err(FilterError::CannotPasteIntoSelf)
        ));
        assert!(matches!(
            tree.paste(Some(leaf)),
            Err(FilterError::CannotPasteIntoSelf)
        ));
        assert_eq!(tree.len(), 3);
        Ok(())
    }

    #[test]
    fn test_identical_content_elsewhere_is_a_valid_paste_target() -> Result<()> {
        let mut tree = FilterTree::new();
        let original = tree.add_group(None, LogicalOperator::And)?;
        let twin = tree.add_group(None, LogicalOperator::And)?;

        tree.cut(original)?;
        let pasted = tree.paste(Some(twin))?;

        assert_eq!(tree.roots(), &[twin]);
        assert_eq!(tree.children(twin), &[pasted]);
        Ok(())
    }

    #[test]
    fn test_paste_with_empty_clipboard() {
        let mut tree = FilterTree::new();
        assert!(matches!(tree.paste(None), Err(FilterError::EmptyClipboard)));
    }

    #[test]
    fn test_duplicate_inserts_copy_after_node() -> Result<()> {
        let mut tree = FilterTree::new();
        let a = tree.add_condition(None, task("a"))?;
        let b = tree.add_condition(None, task("b"))?;

        let copy = tree.duplicate(a)?;

        assert_eq!(tree.roots(), &[a, copy, b]);
        assert_eq!(tree.kind(copy), tree.kind(a));
        assert!(!tree.has_clipboard());
        Ok(())
    }

    #[test]
    fn test_replace_condition_and_set_operator() -> Result<()> {
        let mut tree = FilterTree::new();
        let group = tree.add_group(None, LogicalOperator::And)?;
        let leaf = tree.add_condition(Some(group), task("a"))?;

        tree.replace_condition(leaf, Condition::modality("anat"))?;
        tree.set_operator(group, LogicalOperator::Not)?;

        assert_eq!(
            tree.to_expression(),
            FilterExpression::not(vec![Condition::modality("anat").into()])
        );
        assert!(tree.replace_condition(group, task("x")).is_err());
        Ok(())
    }
}
