//! Leaf coloring. Colors are only ever set on leaves.

use crate::color::Color;
use crate::newick::{NodeId, Tree};
use crate::query::{Query, evaluate_leaf};

/// Colors every leaf with the query's target color or white. Returns the
/// number of matching leaves.
pub fn color_by_query(tree: &mut Tree, query: &Query) -> usize {
    let mut matched = 0;
    for id in tree.leaves() {
        let color = evaluate_leaf(&tree.node(id).name, query);
        if !color.is_white() {
            matched += 1;
        }
        tree.node_mut(id).style.color = color;
    }
    log::debug!("Query colored {matched} of {} leaves", tree.leaf_count());
    matched
}

/// Highlights leaves whose name contains any of `selected`. Other leaves keep
/// whatever color they had. Returns the number of highlighted leaves.
pub fn color_by_selection(tree: &mut Tree, selected: &[String], highlight: &Color) -> usize {
    let mut highlighted = 0;
    for id in tree.leaves() {
        if selected.iter().any(|s| tree.node(id).name.contains(s.as_str())) {
            tree.node_mut(id).style.color = highlight.clone();
            highlighted += 1;
        }
    }
    highlighted
}

pub fn clear_colors(tree: &mut Tree) {
    for id in tree.leaves() {
        tree.node_mut(id).style.color = Color::white();
    }
}

pub fn colored_leaves(tree: &Tree) -> Vec<NodeId> {
    tree.leaves()
        .into_iter()
        .filter(|&id| !tree.node(id).style.color.is_white())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Tree {
        Tree::parse("((S1 // prtS_1 // pH_4.2,S2 // prtS_0 // pH_6.1),S3 // prtS_1 // pH_7.9);")
            .unwrap()
    }

    fn colors(tree: &Tree) -> Vec<String> {
        tree.leaves()
            .into_iter()
            .map(|id| tree.node(id).style.color.to_string())
            .collect()
    }

    #[test]
    fn test_color_by_query_resets_non_matches() {
        let mut t = tree();
        let (q, _) = Query::parse("prtS=1 AND pH=(L,5) AND colour=red").unwrap();
        assert_eq!(color_by_query(&mut t, &q), 1);
        assert_eq!(colors(&t), vec!["red", "#FFFFFF", "#FFFFFF"]);

        let (q, _) = Query::parse("prtS_1 AND blue").unwrap();
        assert_eq!(color_by_query(&mut t, &q), 2);
        assert_eq!(colors(&t), vec!["blue", "#FFFFFF", "blue"]);
    }

    #[test]
    fn test_internal_nodes_untouched() {
        let mut t = tree();
        let (q, _) = Query::parse("prtS_1 AND blue").unwrap();
        color_by_query(&mut t, &q);
        assert!(t.node(t.root()).style.color.is_white());
    }

    #[test]
    fn test_selection_is_additive() {
        let mut t = tree();
        let (q, _) = Query::parse("prtS_0 AND red").unwrap();
        color_by_query(&mut t, &q);
        let n = color_by_selection(&mut t, &["S3".to_string()], &Color::new("#FEE715"));
        assert_eq!(n, 1);
        assert_eq!(colors(&t), vec!["#FFFFFF", "red", "#FEE715"]);
        assert_eq!(colored_leaves(&t).len(), 2);
    }

    #[test]
    fn test_clear_colors_is_idempotent() {
        let mut t = tree();
        let (q, _) = Query::parse("prtS_1 AND blue").unwrap();
        color_by_query(&mut t, &q);
        clear_colors(&mut t);
        let once = t.clone();
        clear_colors(&mut t);
        assert_eq!(t, once);
        assert!(colored_leaves(&t).is_empty());
    }
}
