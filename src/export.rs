//! What leaves the engine: the colored-leaf listing and the per-leaf view a
//! renderer draws from.

use crate::annotate::colored_leaves;
use crate::color::Color;
use crate::heatmap::{Heatmap, HeatmapFace, HeatmapRow, HeatmapSettings, faces_for};
use crate::label_codec::{IdentifierMap, LABEL_SEPARATOR};
use crate::newick::Tree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One line per colored leaf, label segments separated by commas.
pub fn export_listing(tree: &Tree) -> Vec<String> {
    colored_leaves(tree)
        .into_iter()
        .map(|id| tree.node(id).name.replace(LABEL_SEPARATOR, ","))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafView {
    pub name: String,
    pub color: Color,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heatmap: Vec<HeatmapFace>,
}

/// Heatmap rows keyed by every leaf name they may appear under: the raw
/// identifier and, when known, its encoded label.
pub fn rows_by_leaf_name<'a>(
    heatmap: &'a Heatmap,
    map: &IdentifierMap,
) -> HashMap<String, &'a HeatmapRow> {
    let mut out = HashMap::new();
    for row in &heatmap.rows {
        if let Some(label) = map.get(&row.name) {
            out.insert(label.to_string(), row);
        }
        out.insert(row.name.clone(), row);
    }
    out
}

/// Heatmap row names that do not attach to any leaf of `tree`.
pub fn unattached_rows<'a>(heatmap: &'a Heatmap, map: &IdentifierMap, tree: &Tree) -> Vec<&'a str> {
    let names: std::collections::HashSet<&str> = tree.leaf_names().into_iter().collect();
    heatmap
        .rows
        .iter()
        .filter(|row| {
            !names.contains(row.name.as_str())
                && !map.get(&row.name).is_some_and(|label| names.contains(label))
        })
        .map(|row| row.name.as_str())
        .collect()
}

pub fn leaf_views(
    tree: &Tree,
    heatmap: Option<&Heatmap>,
    map: &IdentifierMap,
    settings: &HeatmapSettings,
) -> Vec<LeafView> {
    let rows = match heatmap {
        Some(h) if settings.active => Some((h, rows_by_leaf_name(h, map))),
        _ => None,
    };
    tree.leaves()
        .into_iter()
        .map(|id| {
            let node = tree.node(id);
            let faces = rows
                .as_ref()
                .and_then(|(h, by_name)| {
                    by_name
                        .get(&node.name)
                        .map(|row| faces_for(row, &h.columns, settings))
                })
                .unwrap_or_default();
            LeafView {
                name: node.name.clone(),
                color: node.style.color.clone(),
                visible: tree.is_visible(id),
                heatmap: faces,
            }
        })
        .collect()
}

/// Column names shown above the heatmap, if any are to be shown.
pub fn heatmap_header(heatmap: Option<&Heatmap>, settings: &HeatmapSettings) -> Vec<String> {
    match heatmap {
        Some(h) if settings.active && settings.show_labels => h.columns.clone(),
        _ => vec![],
    }
}
