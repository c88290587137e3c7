//! Prune and collapse. Pruning rebuilds the tree without the unselected
//! leaves; collapsing only hides subtrees.

use crate::error::EngineError;
use crate::label_codec::IdentifierMap;
use crate::newick::{NodeId, Tree};
use std::collections::HashSet;

pub const DEFAULT_COLLAPSE_DEPTH: usize = 2;

fn labels_for(
    map: &IdentifierMap,
    selected_identifiers: &[String],
) -> Result<HashSet<String>, EngineError> {
    let missing: Vec<&str> = selected_identifiers
        .iter()
        .filter(|id| map.get(id).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::structural(format!(
            "Selected strains not found among the labelled identifiers: {}",
            missing.join(", ")
        )));
    }
    Ok(selected_identifiers
        .iter()
        .filter_map(|id| map.get(id))
        .map(str::to_string)
        .collect())
}

/// Labels of the leaves to keep when pruning.
pub fn compute_prune_set(
    map: &IdentifierMap,
    selected_identifiers: &[String],
) -> Result<HashSet<String>, EngineError> {
    labels_for(map, selected_identifiers)
}

/// Labels whose enclosing branches get collapsed.
pub fn compute_collapse_set(
    map: &IdentifierMap,
    selected_identifiers: &[String],
) -> Result<HashSet<String>, EngineError> {
    labels_for(map, selected_identifiers)
}

/// Restricts `tree` to the leaves named in `keep`. On error `tree` is left
/// untouched.
pub fn prune(tree: &mut Tree, keep: &HashSet<String>) -> Result<(), EngineError> {
    let pruned = tree.pruned(keep)?;
    log::info!(
        "Pruned tree from {} to {} leaves",
        tree.leaf_count(),
        pruned.leaf_count()
    );
    *tree = pruned;
    Ok(())
}

/// Walks down from `node` spending one unit of `depth` per level. Where the
/// budget runs out, a node is collapsed if any leaf below it is in `labels`.
/// Returns the number of collapsed nodes.
pub fn collapse_branches(
    tree: &mut Tree,
    node: NodeId,
    labels: &HashSet<String>,
    depth: usize,
) -> usize {
    if depth == 0 {
        let hit = tree
            .leaves_under(node)
            .into_iter()
            .any(|leaf| labels.contains(&tree.node(leaf).name));
        if hit {
            tree.node_mut(node).style.draw_descendants = false;
            return 1;
        }
        return 0;
    }
    let children = tree.node(node).children().to_vec();
    children
        .into_iter()
        .map(|child| collapse_branches(tree, child, labels, depth - 1))
        .sum()
}

/// Makes every node draw its descendants again.
pub fn clear(tree: &mut Tree) {
    for id in tree.preorder() {
        tree.node_mut(id).style.draw_descendants = true;
    }
}
