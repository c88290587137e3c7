//! Composite leaf labels: `identifier // field_value // field_value ...`.

use crate::error::EngineError;
use crate::newick::Tree;
use crate::table::{MetadataRow, MetadataTable};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const LABEL_SEPARATOR: &str = " // ";
pub const FIELD_SEPARATOR: char = '_';

/// Original identifier to encoded label, in table order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct IdentifierMap {
    entries: Vec<(String, String)>,
    /// Position of each identifier in `entries`.
    index: HashMap<String, usize>,
}

impl From<Vec<(String, String)>> for IdentifierMap {
    fn from(pairs: Vec<(String, String)>) -> Self {
        let mut map = Self::default();
        for (identifier, label) in &pairs {
            map.insert(identifier, label);
        }
        map
    }
}

impl From<IdentifierMap> for Vec<(String, String)> {
    fn from(map: IdentifierMap) -> Self {
        map.entries
    }
}

impl IdentifierMap {
    pub fn insert(&mut self, identifier: &str, label: &str) {
        match self.index.get(identifier) {
            Some(&pos) => self.entries[pos].1 = label.to_string(),
            None => {
                self.index.insert(identifier.to_string(), self.entries.len());
                self.entries
                    .push((identifier.to_string(), label.to_string()));
            }
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.index
            .get(identifier)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(id, label)| (id.as_str(), label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn as_lookup(&self) -> HashMap<String, String> {
        self.entries.iter().cloned().collect()
    }

    /// Identifiers whose label does not name any leaf of `tree`.
    pub fn missing_from(&self, tree: &Tree) -> Vec<&str> {
        let names: HashSet<&str> = tree.leaf_names().into_iter().collect();
        self.entries
            .iter()
            .filter(|(_, label)| !names.contains(label.as_str()))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub identifier: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedLabel {
    pub identifier: String,
    pub fields: Vec<(String, String)>,
}

pub fn segment(field: &str, value: &str) -> String {
    format!("{field}{FIELD_SEPARATOR}{value}")
}

pub fn encode_row(row: &MetadataRow, selected_fields: &[String]) -> String {
    std::iter::once(row.identifier.clone())
        .chain(selected_fields.iter().map(|field| {
            let value = row
                .get(field)
                .map(|v| v.to_string())
                .unwrap_or_else(|| crate::table::MISSING_TEXT.to_string());
            segment(field, &value)
        }))
        .join(LABEL_SEPARATOR)
}

/// Labels every row of `table` with the selected fields, in selection order.
pub fn encode(
    table: &MetadataTable,
    selected_fields: &[String],
) -> Result<(Vec<LabeledRow>, IdentifierMap), EngineError> {
    if let Some(unknown) = selected_fields.iter().find(|f| !table.has_field(f)) {
        return Err(EngineError::not_found(format!(
            "Field '{unknown}' is not a column of the metadata table"
        )));
    }
    let mut map = IdentifierMap::default();
    let rows: Vec<LabeledRow> = table
        .rows()
        .iter()
        .map(|row| {
            let label = encode_row(row, selected_fields);
            map.insert(&row.identifier, &label);
            LabeledRow {
                identifier: row.identifier.clone(),
                label,
            }
        })
        .collect();
    Ok((rows, map))
}

/// Splits a label into its identifier and `(field, value)` pairs. Segments
/// without a field separator carry no field and are skipped.
pub fn decode(label: &str) -> DecodedLabel {
    let mut segments = label.split(LABEL_SEPARATOR);
    let identifier = segments.next().unwrap_or_default().to_string();
    let fields = segments
        .filter_map(|seg| seg.split_once(FIELD_SEPARATOR))
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect();
    DecodedLabel { identifier, fields }
}

/// Parses the tree text and renames each leaf whose name is exactly an
/// identifier of `map` to that identifier's label.
pub fn apply_to_tree(tree_text: &str, map: &IdentifierMap) -> Result<Tree, EngineError> {
    let mut tree = Tree::parse(tree_text)?;
    let renamed = tree.rename_leaves(&map.as_lookup());
    log::info!(
        "Relabelled {renamed} of {} leaves from {} identifiers",
        tree.leaf_count(),
        map.len()
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MetadataValue;
    use proptest::collection::{hash_set, vec};
    use proptest::prelude::*;

    fn table() -> MetadataTable {
        MetadataTable::new(
            "id",
            vec!["prtS".to_string(), "pH".to_string(), "Lysotype".to_string()],
            vec![
                MetadataRow::new("S1")
                    .with("prtS", "1")
                    .with("pH", "4.2")
                    .with("Lysotype", "SoS-ST0234-SX"),
                MetadataRow::new("S2")
                    .with("prtS", "0")
                    .with("pH", "")
                    .with("Lysotype", "SoS-ST0001"),
            ],
        )
        .unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_in_selection_order() {
        let (rows, map) = encode(&table(), &fields(&["prtS", "pH"])).unwrap();
        assert_eq!(rows[0].label, "S1 // prtS_1 // pH_4.2");
        assert_eq!(map.get("S2"), Some("S2 // prtS_0 // pH_NONE"));
        let (_, map) = encode(&table(), &fields(&["pH", "prtS"])).unwrap();
        assert_eq!(map.get("S1"), Some("S1 // pH_4.2 // prtS_1"));
    }

    #[test]
    fn test_encode_without_fields_is_identifier() {
        let (rows, _) = encode(&table(), &[]).unwrap();
        assert_eq!(rows[1].label, "S2");
    }

    #[test]
    fn test_encode_unknown_field() {
        let err = encode(&table(), &fields(&["colour"])).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotFound);
    }

    #[test]
    fn test_decode_recovers_fields_in_order() {
        let selected = fields(&["Lysotype", "prtS", "pH"]);
        let t = table();
        for row in t.rows() {
            let decoded = decode(&encode_row(row, &selected));
            assert_eq!(decoded.identifier, row.identifier);
            let names: Vec<&str> = decoded.fields.iter().map(|(f, _)| f.as_str()).collect();
            assert_eq!(names, vec!["Lysotype", "prtS", "pH"]);
            let values: Vec<String> = selected
                .iter()
                .map(|f| row.get(f).unwrap().to_string())
                .collect();
            let decoded_values: Vec<String> =
                decoded.fields.iter().map(|(_, v)| v.clone()).collect();
            assert_eq!(decoded_values, values);
        }
    }

    #[test]
    fn test_apply_to_tree_renames_structurally() {
        let (_, map) = encode(&table(), &fields(&["prtS"])).unwrap();
        // "S1" must not be substituted inside "S10" or inside the S2 label.
        let tree = apply_to_tree("((S1:1,S10:1):1,S2:2);", &map).unwrap();
        assert_eq!(tree.leaf_names(), vec!["S1 // prtS_1", "S10", "S2 // prtS_0"]);
        assert!(map.missing_from(&tree).is_empty());
    }

    #[test]
    fn test_identifier_map_last_writer_wins() {
        let mut map = IdentifierMap::default();
        map.insert("S1", "S1 // a_1");
        map.insert("S1", "S1 // a_2");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("S1"), Some("S1 // a_2"));
    }

    #[test]
    fn test_identifier_map_survives_serde() {
        let (_, map) = encode(&table(), &fields(&["prtS"])).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        let back: IdentifierMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.get("S2"), Some("S2 // prtS_0"));
        assert_eq!(back.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec!["S1", "S2"]);
    }

    /// Field names, rows of separator-free values, and a shuffled subset of
    /// the fields to select.
    fn rows_and_selection() -> impl Strategy<Value = (Vec<String>, Vec<(String, Vec<String>)>, Vec<String>)> {
        hash_set("[A-Za-z][A-Za-z0-9]{0,6}", 1..6).prop_flat_map(|names| {
            let names: Vec<String> = names.into_iter().collect();
            let width = names.len();
            (
                Just(names.clone()),
                vec(("[A-Za-z0-9.-]{1,10}", vec("[A-Za-z0-9._+-]{0,8}", width)), 1..8),
                proptest::sample::subsequence(names, 0..=width).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_test_decode_inverts_encode(
            (names, rows, selected) in rows_and_selection(),
        ) {
            for (identifier, values) in &rows {
                let row = names
                    .iter()
                    .zip(values)
                    .fold(MetadataRow::new(identifier), |row, (field, value)| {
                        row.with(field, MetadataValue::Text(value.clone()))
                    });
                let decoded = decode(&encode_row(&row, &selected));
                prop_assert_eq!(&decoded.identifier, identifier);
                let expected: Vec<(String, String)> = selected
                    .iter()
                    .map(|field| (field.clone(), row.get(field).map(|v| v.to_string()).unwrap_or_default()))
                    .collect();
                prop_assert_eq!(decoded.fields, expected);
            }
        }
    }
}
