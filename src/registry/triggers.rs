// ============================================================================
// Trigger trees
// ============================================================================
//
// The triggers of a field F form a tree of the fields depending on F, with
// the relations to inverse to find the records to recompute. If G depends
// on F, H on X.F, I on W.X.F and J on Y.F:
//
//                  [G]
//                X/   \Y
//              [H]     [J]
//            W/
//          [I]
//
// When F is modified on some records: recompute G on them, H on
// inverse(X, records), I on inverse(W, inverse(X, records)) and J on
// inverse(Y, records).
//
// ============================================================================

use super::Registry;
use super::dependencies::{self, FieldInverses, FieldTriggers};
use super::field::{FieldId, FieldType};
use super::setup::ModelGraph;
use crate::core::Result;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerTree {
    pub root: IndexSet<FieldId>,
    pub children: IndexMap<FieldId, TriggerTree>,
}

impl TriggerTree {
    pub fn new(root: impl IntoIterator<Item = FieldId>) -> Self {
        Self {
            root: root.into_iter().collect(),
            children: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.children.is_empty()
    }

    /// The subtree under `label`, created empty when missing.
    pub fn increase(&mut self, label: FieldId) -> &mut TriggerTree {
        self.children.entry(label).or_default()
    }

    pub fn child(&self, label: &FieldId) -> Option<&TriggerTree> {
        self.children.get(label)
    }

    /// This node, then its subtrees depth-first.
    pub fn depth_first(&self) -> Vec<&TriggerTree> {
        let mut nodes = vec![self];
        for subtree in self.children.values() {
            nodes.extend(subtree.depth_first());
        }
        nodes
    }

    /// Merges `trees` into one. Only the fields for which `select` holds
    /// are kept in the nodes; empty subtrees are dropped.
    pub fn merge(trees: &[&TriggerTree], select: &dyn Fn(&FieldId) -> bool) -> TriggerTree {
        let mut root = IndexSet::new();
        let mut to_merge: IndexMap<&FieldId, Vec<&TriggerTree>> = IndexMap::new();
        for tree in trees {
            root.extend(tree.root.iter());
            for (label, subtree) in &tree.children {
                to_merge.entry(label).or_default().push(subtree);
            }
        }

        let mut result = TriggerTree::new(root.into_iter().filter(|f| select(*f)).cloned());
        for (label, subtrees) in to_merge {
            let subtree = Self::merge(&subtrees, select);
            if !subtree.is_empty() {
                result.children.insert(label.clone(), subtree);
            }
        }
        result
    }
}

/// Values derived from one model graph, dropped whenever the graph changes.
#[derive(Default)]
pub(crate) struct TriggerMemo {
    generation: u64,
    triggers: Option<Arc<FieldTriggers>>,
    inverses: Option<Arc<FieldInverses>>,
    computed: Option<Arc<IndexMap<FieldId, Vec<FieldId>>>>,
    trees: HashMap<FieldId, Arc<TriggerTree>>,
    modifying: HashMap<FieldId, bool>,
}

/// Concatenates two inverse paths, removing a many2one immediately followed
/// by its own one2many inverse.
fn concat(graph: &ModelGraph, seq1: &[FieldId], seq2: &[FieldId]) -> Vec<FieldId> {
    if let (Some(id1), Some(id2)) = (seq1.last(), seq2.first())
        && let (Some(f1), Some(f2)) = (graph.field(id1), graph.field(id2))
        && f1.ftype == FieldType::Many2one
        && f2.ftype == FieldType::One2many
        && f2.inverse_name.as_deref() == Some(f1.name.as_str())
        && f2.comodel_name.as_deref() == Some(f1.model_name.as_str())
        && f1.comodel_name.as_deref() == Some(f2.model_name.as_str())
    {
        return concat(graph, &seq1[..seq1.len() - 1], &seq2[1..]);
    }
    seq1.iter().chain(seq2).cloned().collect()
}

fn collect_triggers(
    graph: &ModelGraph,
    triggers: &FieldTriggers,
    field: &FieldId,
    prefix: &[FieldId],
    seen: &mut Vec<FieldId>,
    tree: &mut TriggerTree,
) {
    if seen.contains(field) {
        return;
    }
    let Some(paths) = triggers.get(field) else {
        return;
    };
    seen.push(field.clone());
    for (path, targets) in paths {
        let full_path = concat(graph, prefix, path);
        let mut node = &mut *tree;
        for label in &full_path {
            node = node.increase(label.clone());
        }
        node.root.extend(targets.iter().cloned());
        for target in targets {
            collect_triggers(graph, triggers, target, &full_path, seen, tree);
        }
    }
    seen.pop();
}

impl Registry {
    fn with_memo<T>(&self, graph: &ModelGraph, f: impl FnOnce(&mut TriggerMemo) -> T) -> T {
        let mut memo = self.memo.lock();
        if memo.generation != graph.generation {
            *memo = TriggerMemo {
                generation: graph.generation,
                ..TriggerMemo::default()
            };
        }
        f(&mut memo)
    }

    /// The inverse of the field dependencies.
    pub fn field_triggers(&self) -> Arc<FieldTriggers> {
        let graph = self.graph();
        if let Some(triggers) = self.with_memo(&graph, |m| m.triggers.clone()) {
            return triggers;
        }
        let triggers = Arc::new(dependencies::field_triggers(&graph));
        self.with_memo(&graph, |m| Arc::clone(m.triggers.get_or_insert(triggers)))
    }

    pub fn field_inverses(&self) -> Arc<FieldInverses> {
        let graph = self.graph();
        if let Some(inverses) = self.with_memo(&graph, |m| m.inverses.clone()) {
            return inverses;
        }
        let inverses = Arc::new(dependencies::field_inverses(&graph));
        self.with_memo(&graph, |m| Arc::clone(m.inverses.get_or_insert(inverses)))
    }

    /// For each computed field, the fields computed by the same method.
    pub fn field_computed(&self) -> Arc<IndexMap<FieldId, Vec<FieldId>>> {
        let graph = self.graph();
        if let Some(computed) = self.with_memo(&graph, |m| m.computed.clone()) {
            return computed;
        }
        let computed = Arc::new(dependencies::field_computed(&graph));
        self.with_memo(&graph, |m| Arc::clone(m.computed.get_or_insert(computed)))
    }

    /// Transitive closure of the triggers of `field`.
    pub fn get_field_trigger_tree(&self, field: &FieldId) -> Arc<TriggerTree> {
        let graph = self.graph();
        if let Some(tree) = self.with_memo(&graph, |m| m.trees.get(field).cloned()) {
            return tree;
        }
        let triggers = self.field_triggers();
        let mut tree = TriggerTree::default();
        collect_triggers(&graph, &triggers, field, &[], &mut Vec::new(), &mut tree);
        let tree = Arc::new(tree);
        self.with_memo(&graph, |m| {
            Arc::clone(m.trees.entry(field.clone()).or_insert(tree))
        })
    }

    /// The tree to traverse when `fields` are modified, keeping only the
    /// fields for which `select` holds.
    pub fn get_trigger_tree(
        &self,
        fields: &[FieldId],
        select: &dyn Fn(&FieldId) -> bool,
    ) -> TriggerTree {
        let triggers = self.field_triggers();
        let trees: Vec<Arc<TriggerTree>> = fields
            .iter()
            .filter(|f| triggers.contains_key(*f))
            .map(|f| self.get_field_trigger_tree(f))
            .collect();
        let refs: Vec<&TriggerTree> = trees.iter().map(Arc::as_ref).collect();
        TriggerTree::merge(&refs, select)
    }

    /// Fields depending on `field`, directly or not.
    pub fn get_dependent_fields(&self, field: &FieldId) -> Vec<FieldId> {
        if !self.field_triggers().contains_key(field) {
            return Vec::new();
        }
        let tree = self.get_field_trigger_tree(field);
        tree.depth_first()
            .into_iter()
            .flat_map(|node| node.root.iter().cloned())
            .collect()
    }

    /// Whether modifying `field` may change which records its dependents
    /// must be recomputed on.
    pub fn is_modifying_relations(&self, field: &FieldId) -> bool {
        let graph = self.graph();
        if let Some(result) = self.with_memo(&graph, |m| m.modifying.get(field).copied()) {
            return result;
        }
        let inverses = self.field_inverses();
        let relational = |id: &FieldId| {
            graph.field(id).is_some_and(|f| f.is_relational())
                || inverses.get(id).is_some_and(|set| !set.is_empty())
        };
        let result = self.field_triggers().contains_key(field)
            && (relational(field) || self.get_dependent_fields(field).iter().any(relational));
        self.with_memo(&graph, |m| {
            m.modifying.insert(field.clone(), result);
        });
        result
    }

    /// Forgets `fields` without a new setup: they are removed from their
    /// models and dependencies, and every derived structure is recomputed
    /// on next use.
    pub fn discard_fields(&self, fields: &[FieldId]) -> Result<()> {
        let _setup = self.setup_lock.lock();
        let mut graph = (*self.graph()).clone();
        graph.generation += 1;
        for field in fields {
            graph.field_depends.shift_remove(field);
            graph.field_depends_context.shift_remove(field);
            if let Some(model) = graph.models.get_mut(&field.model) {
                model.fields.shift_remove(&field.name);
            }
        }
        *self.graph.write() = Arc::new(graph);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(model: &str, name: &str) -> FieldId {
        FieldId::new(model, name)
    }

    #[test]
    fn test_merge_filters_and_prunes() {
        let mut t1 = TriggerTree::new([id("a", "g")]);
        t1.increase(id("a", "x")).root.insert(id("b", "h"));
        let mut t2 = TriggerTree::new([id("a", "k")]);
        t2.increase(id("a", "x")).root.insert(id("b", "i"));
        t2.increase(id("a", "y")).root.insert(id("c", "skip"));

        let merged = TriggerTree::merge(&[&t1, &t2], &|f: &FieldId| f.name != "skip");
        assert_eq!(merged.root.len(), 2);
        let x = merged.child(&id("a", "x")).unwrap();
        assert_eq!(x.root.iter().cloned().collect::<Vec<_>>(), vec![id("b", "h"), id("b", "i")]);
        assert!(merged.child(&id("a", "y")).is_none());
    }

    #[test]
    fn test_depth_first_order() {
        let mut tree = TriggerTree::new([id("m", "g")]);
        tree.increase(id("m", "x")).increase(id("m", "w")).root.insert(id("m", "i"));
        tree.increase(id("m", "y")).root.insert(id("m", "j"));
        let roots: Vec<usize> = tree.depth_first().iter().map(|n| n.root.len()).collect();
        assert_eq!(roots, vec![1, 0, 1, 1]);
        assert!(!tree.is_empty());
        assert!(TriggerTree::default().is_empty());
    }
}
