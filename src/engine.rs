use crate::{
    annotate,
    color::Color,
    error::{EngineError, ErrorCode},
    export::{self, LeafView},
    heatmap::{self, Heatmap, HeatmapSettings, HeatmapTable, Palette},
    label_codec::{self, IdentifierMap},
    newick::Tree,
    query::{DEFAULT_QUERY_COLOR, Query},
    subset::{self, DEFAULT_COLLAPSE_DEPTH},
    table::MetadataTable,
};
use serde::{Deserialize, Serialize};
use std::fs;

pub type OpId = String;
pub type RunId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerParameters {
    pub collapse_depth: usize,
    pub highlight_color: String,
    pub default_query_color: String,
}

impl Default for ExplorerParameters {
    fn default() -> Self {
        Self {
            collapse_depth: DEFAULT_COLLAPSE_DEPTH,
            highlight_color: "#FEE715".to_string(),
            default_query_color: DEFAULT_QUERY_COLOR.to_string(),
        }
    }
}

/// Everything a session knows. `base_tree` is the labelled tree as loaded and
/// never changes until the next load; `tree` is the working copy that gets
/// pruned, collapsed and colored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerState {
    pub metadata: Option<MetadataTable>,
    pub selected_fields: Vec<String>,
    pub selected_strains: Vec<String>,
    pub identifier_map: IdentifierMap,
    pub tree_text: Option<String>,
    pub base_tree: Option<Tree>,
    pub tree: Option<Tree>,
    pub active_query: Option<Query>,
    pub color_selection: bool,
    pub pruned: bool,
    pub collapsed: bool,
    pub subset_labels: Vec<String>,
    pub heatmap: Option<Heatmap>,
    pub heatmap_settings: HeatmapSettings,
    pub parameters: ExplorerParameters,
}

impl ExplorerState {
    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            EngineError::new(ErrorCode::Io, format!("Could not read state file '{path}': {e}"))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            EngineError::invalid_input(format!("Could not parse state JSON '{path}': {e}"))
        })
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| {
            EngineError::new(ErrorCode::Internal, format!("Could not serialize state: {e}"))
        })?;
        fs::write(path, text).map_err(|e| {
            EngineError::new(ErrorCode::Io, format!("Could not write state file '{path}': {e}"))
        })
    }

    /// Labels used to highlight the selected strains. Identifiers without a
    /// label are matched as they are.
    fn selection_labels(&self) -> Vec<String> {
        self.selected_strains
            .iter()
            .map(|id| {
                self.identifier_map
                    .get(id)
                    .map(str::to_string)
                    .unwrap_or_else(|| id.clone())
            })
            .collect()
    }

    /// Repaints the working tree from the active query and selection.
    /// Returns the number of leaves matched by the query.
    fn recolor(&mut self) -> usize {
        let labels = self.selection_labels();
        let highlight = Color::new(&self.parameters.highlight_color);
        let Some(tree) = self.tree.as_mut() else {
            return 0;
        };
        annotate::clear_colors(tree);
        let matched = self
            .active_query
            .as_ref()
            .map(|q| annotate::color_by_query(tree, q))
            .unwrap_or(0);
        if self.color_selection {
            annotate::color_by_selection(tree, &labels, &highlight);
        }
        matched
    }

    fn working_tree(&self) -> Result<&Tree, EngineError> {
        self.tree
            .as_ref()
            .ok_or_else(|| EngineError::invalid_input("No tree loaded; load a tree first"))
    }

    fn require_strains(&self, action: &str) -> Result<(), EngineError> {
        if self.selected_strains.is_empty() {
            return Err(EngineError::invalid_input(format!(
                "Cannot {action} as no strains have been selected"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    LoadMetadata {
        path: String,
    },
    SelectFields {
        fields: Vec<String>,
        #[serde(default)]
        replace: bool,
    },
    SelectStrains {
        identifiers: Vec<String>,
        #[serde(default)]
        replace: bool,
    },
    LoadTree {
        path: String,
    },
    LoadTreeText {
        text: String,
    },
    LoadHeatmap {
        path: String,
    },
    ColorByQuery {
        query: String,
    },
    ColorSelection,
    ClearColors,
    Prune,
    Collapse {
        #[serde(default)]
        depth: Option<usize>,
    },
    ClearSubset,
    SetHeatmapDisplay {
        settings: HeatmapSettings,
    },
    ExportLabelled {
        path: String,
    },
    ExportNewick {
        path: String,
    },
    SetParameter {
        name: String,
        value: serde_json::Value,
    },
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub changed: bool,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub supported_palettes: Vec<String>,
    pub deterministic_operation_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub metadata_rows: usize,
    pub available_fields: Vec<String>,
    pub selected_fields: Vec<String>,
    pub selected_strains: Vec<String>,
    pub leaves: usize,
    pub visible_leaves: usize,
    pub colored_leaves: usize,
    pub active_query_predicates: Option<usize>,
    pub color_selection: bool,
    pub pruned: bool,
    pub collapsed: bool,
    pub heatmap_rows: usize,
    pub heatmap: HeatmapSettings,
    pub parameters: ExplorerParameters,
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError>;
    fn snapshot(&self) -> &ExplorerState;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorerEngine {
    state: ExplorerState,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl ExplorerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ExplorerState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &ExplorerState {
        &self.state
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_operations: [
                "LoadMetadata",
                "SelectFields",
                "SelectStrains",
                "LoadTree",
                "LoadTreeText",
                "LoadHeatmap",
                "ColorByQuery",
                "ColorSelection",
                "ClearColors",
                "Prune",
                "Collapse",
                "ClearSubset",
                "SetHeatmapDisplay",
                "ExportLabelled",
                "ExportNewick",
                "SetParameter",
                "Reset",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            supported_palettes: [Palette::Grayscale, Palette::RedGreen, Palette::OrangeRed]
                .iter()
                .map(|p| p.display_name().to_string())
                .collect(),
            deterministic_operation_log: true,
        }
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    pub fn summarize_state(&self) -> StateSummary {
        let state = &self.state;
        let (leaves, visible_leaves, colored_leaves) = match &state.tree {
            Some(tree) => {
                let ids = tree.leaves();
                (
                    ids.len(),
                    ids.iter().filter(|&&id| tree.is_visible(id)).count(),
                    annotate::colored_leaves(tree).len(),
                )
            }
            None => (0, 0, 0),
        };
        StateSummary {
            metadata_rows: state.metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            available_fields: state
                .metadata
                .as_ref()
                .map(|m| m.fields().to_vec())
                .unwrap_or_default(),
            selected_fields: state.selected_fields.clone(),
            selected_strains: state.selected_strains.clone(),
            leaves,
            visible_leaves,
            colored_leaves,
            active_query_predicates: state.active_query.as_ref().map(|q| q.predicates.len()),
            color_selection: state.color_selection,
            pruned: state.pruned,
            collapsed: state.collapsed,
            heatmap_rows: state.heatmap.as_ref().map(|h| h.rows.len()).unwrap_or(0),
            heatmap: state.heatmap_settings.clone(),
            parameters: state.parameters.clone(),
        }
    }

    pub fn leaf_views(&self) -> Vec<LeafView> {
        match &self.state.tree {
            Some(tree) => export::leaf_views(
                tree,
                self.state.heatmap.as_ref(),
                &self.state.identifier_map,
                &self.state.heatmap_settings,
            ),
            None => vec![],
        }
    }

    pub fn heatmap_header(&self) -> Vec<String> {
        export::heatmap_header(self.state.heatmap.as_ref(), &self.state.heatmap_settings)
    }

    pub fn export_listing(&self) -> Vec<String> {
        self.state
            .tree
            .as_ref()
            .map(export::export_listing)
            .unwrap_or_default()
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    /// Parses and labels `text` with the current table and field selection.
    fn label_tree(&self, text: &str) -> Result<(Tree, IdentifierMap, Vec<String>), EngineError> {
        let mut warnings = vec![];
        let Some(metadata) = &self.state.metadata else {
            warnings.push("No metadata table loaded; leaves keep their original names".to_string());
            return Ok((Tree::parse(text)?, IdentifierMap::default(), warnings));
        };
        if self.state.selected_fields.is_empty() {
            warnings.push("No fields selected; leaves are labelled with identifiers only".to_string());
        }
        let (_, map) = label_codec::encode(metadata, &self.state.selected_fields)?;
        let tree = label_codec::apply_to_tree(text, &map)?;
        let missing = map.missing_from(&tree);
        if !missing.is_empty() {
            warnings.push(format!(
                "{} of {} metadata identifiers have no leaf in the tree",
                missing.len(),
                map.len()
            ));
        }
        Ok((tree, map, warnings))
    }

    fn install_tree(&mut self, text: String, tree: Tree, map: IdentifierMap) {
        self.state.tree_text = Some(text);
        self.state.tree = Some(tree.clone());
        self.state.base_tree = Some(tree);
        self.state.identifier_map = map;
        self.state.pruned = false;
        self.state.collapsed = false;
        self.state.subset_labels.clear();
        self.state.recolor();
    }

    /// Relabels the loaded tree after the table or field selection changed.
    fn relabel(&mut self, result: &mut OpResult) -> Result<(), EngineError> {
        let Some(text) = self.state.tree_text.clone() else {
            return Ok(());
        };
        let (tree, map, warnings) = self.label_tree(&text)?;
        if self.state.pruned || self.state.collapsed {
            result
                .warnings
                .push("Prune/collapse options were cleared by relabelling".to_string());
        }
        result.warnings.extend(warnings);
        self.install_tree(text, tree, map);
        result.messages.push("Relabelled tree".to_string());
        Ok(())
    }

    fn parse_color_parameter(name: &str, value: &serde_json::Value) -> Result<String, EngineError> {
        value
            .as_str()
            .and_then(Color::parse_token)
            .map(|c| c.to_string())
            .ok_or_else(|| {
                EngineError::invalid_input(format!(
                    "SetParameter {name} requires a color word or #RRGGBB string"
                ))
            })
    }

    fn apply_internal(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let op_id = self.next_op_id();
        let mut result = OpResult {
            op_id,
            changed: true,
            warnings: vec![],
            messages: vec![],
        };

        match op {
            Operation::LoadMetadata { path } => {
                let table = MetadataTable::from_path(&path)?;
                let rows = table.len();
                let fields = table.fields().len();
                let previous = std::mem::replace(&mut self.state.metadata, Some(table));
                let previous_fields = std::mem::take(&mut self.state.selected_fields);
                let previous_strains = std::mem::take(&mut self.state.selected_strains);
                if let Err(e) = self.relabel(&mut result) {
                    self.state.metadata = previous;
                    self.state.selected_fields = previous_fields;
                    self.state.selected_strains = previous_strains;
                    return Err(e);
                }
                result.messages.push(format!(
                    "Loaded metadata table '{path}' with {rows} rows and {fields} fields"
                ));
            }
            Operation::SelectFields { fields, replace } => {
                let metadata = self.state.metadata.as_ref().ok_or_else(|| {
                    EngineError::invalid_input("No metadata table loaded; load one first")
                })?;
                if let Some(unknown) = fields.iter().find(|f| !metadata.has_field(f)) {
                    return Err(EngineError::not_found(format!(
                        "Field '{unknown}' is not a column of the metadata table"
                    )));
                }
                let previous = self.state.selected_fields.clone();
                if replace {
                    self.state.selected_fields.clear();
                }
                for field in fields {
                    if self.state.selected_fields.contains(&field) {
                        result.warnings.push(format!("Field '{field}' already selected"));
                    } else {
                        self.state.selected_fields.push(field);
                    }
                }
                if let Err(e) = self.relabel(&mut result) {
                    self.state.selected_fields = previous;
                    return Err(e);
                }
                result.messages.push(format!(
                    "Selected fields: {}",
                    self.state.selected_fields.join(", ")
                ));
            }
            Operation::SelectStrains {
                identifiers,
                replace,
            } => {
                let metadata = self.state.metadata.as_ref().ok_or_else(|| {
                    EngineError::invalid_input("No metadata table loaded; load one first")
                })?;
                if let Some(unknown) = identifiers.iter().find(|id| metadata.get(id).is_none()) {
                    return Err(EngineError::not_found(format!(
                        "Strain '{unknown}' is not in the metadata table"
                    )));
                }
                if replace {
                    self.state.selected_strains.clear();
                }
                for id in identifiers {
                    if self.state.selected_strains.contains(&id) {
                        result.warnings.push(format!("Strain '{id}' already selected"));
                    } else {
                        self.state.selected_strains.push(id);
                    }
                }
                if self.state.color_selection {
                    self.state.recolor();
                }
                result.messages.push(format!(
                    "{} strains selected",
                    self.state.selected_strains.len()
                ));
            }
            Operation::LoadTree { path } => {
                let text = fs::read_to_string(&path).map_err(|e| {
                    EngineError::new(ErrorCode::Io, format!("Could not read tree file '{path}': {e}"))
                })?;
                let (tree, map, warnings) = self.label_tree(&text)?;
                result.warnings.extend(warnings);
                result.messages.push(format!(
                    "Loaded tree '{path}' with {} leaves",
                    tree.leaf_count()
                ));
                self.install_tree(text, tree, map);
            }
            Operation::LoadTreeText { text } => {
                let (tree, map, warnings) = self.label_tree(&text)?;
                result.warnings.extend(warnings);
                result
                    .messages
                    .push(format!("Loaded tree with {} leaves", tree.leaf_count()));
                self.install_tree(text, tree, map);
            }
            Operation::LoadHeatmap { path } => {
                let table = HeatmapTable::from_path(&path)?;
                let normalized = heatmap::normalize(&table)?;
                if let Some(tree) = &self.state.tree {
                    let unattached =
                        export::unattached_rows(&normalized, &self.state.identifier_map, tree);
                    if !unattached.is_empty() {
                        result.warnings.push(format!(
                            "Heatmap rows without a matching leaf: {}",
                            unattached.join(", ")
                        ));
                    }
                }
                result.messages.push(format!(
                    "Loaded heatmap '{path}' with {} rows and {} columns",
                    normalized.rows.len(),
                    normalized.columns.len()
                ));
                self.state.heatmap = Some(normalized);
            }
            Operation::ColorByQuery { query } => {
                self.state.working_tree()?;
                let default = Color::new(&self.state.parameters.default_query_color);
                let (parsed, warnings) = Query::parse_with_default(&query, &default)?;
                result
                    .warnings
                    .extend(warnings.iter().map(|w| w.message().to_string()));
                self.state.active_query = Some(parsed);
                let matched = self.state.recolor();
                result
                    .messages
                    .push(format!("{matched} leaves match '{query}'"));
            }
            Operation::ColorSelection => {
                self.state.working_tree()?;
                self.state.require_strains("colour strains")?;
                self.state.color_selection = true;
                self.state.recolor();
                result.messages.push(format!(
                    "Highlighted {} selected strains",
                    self.state.selected_strains.len()
                ));
            }
            Operation::ClearColors => {
                self.state.active_query = None;
                self.state.color_selection = false;
                self.state.recolor();
                result.messages.push("Colours cleared".to_string());
            }
            Operation::Prune => {
                self.state.working_tree()?;
                self.state.require_strains("prune tree")?;
                let keep =
                    subset::compute_prune_set(&self.state.identifier_map, &self.state.selected_strains)?;
                let mut tree = self.state.working_tree()?.clone();
                if self.state.collapsed {
                    subset::clear(&mut tree);
                    result
                        .warnings
                        .push("Collapsed branches were expanded; pruning takes precedence".to_string());
                }
                subset::prune(&mut tree, &keep)?;
                result
                    .messages
                    .push(format!("Pruned tree to {} leaves", tree.leaf_count()));
                let mut labels: Vec<String> = keep.into_iter().collect();
                labels.sort();
                self.state.tree = Some(tree);
                self.state.subset_labels = labels;
                self.state.pruned = true;
                self.state.collapsed = false;
            }
            Operation::Collapse { depth } => {
                self.state.working_tree()?;
                self.state.require_strains("collapse tree")?;
                if self.state.pruned {
                    let msg = "Pruning options have already been applied; clear them to collapse";
                    log::warn!("{msg}");
                    result.changed = false;
                    result.warnings.push(msg.to_string());
                    return Ok(result);
                }
                let labels = subset::compute_collapse_set(
                    &self.state.identifier_map,
                    &self.state.selected_strains,
                )?;
                let depth = depth.unwrap_or(self.state.parameters.collapse_depth);
                let mut tree = self.state.working_tree()?.clone();
                subset::clear(&mut tree);
                let root = tree.root();
                let collapsed = subset::collapse_branches(&mut tree, root, &labels, depth);
                result
                    .messages
                    .push(format!("Collapsed {collapsed} branches at depth {depth}"));
                let mut labels: Vec<String> = labels.into_iter().collect();
                labels.sort();
                self.state.tree = Some(tree);
                self.state.subset_labels = labels;
                self.state.collapsed = true;
            }
            Operation::ClearSubset => {
                self.state.tree = self.state.base_tree.clone();
                self.state.pruned = false;
                self.state.collapsed = false;
                self.state.subset_labels.clear();
                self.state.recolor();
                result
                    .messages
                    .push("Pruning and/or collapse options have been cleared".to_string());
            }
            Operation::SetHeatmapDisplay { settings } => {
                if settings.active && self.state.heatmap.is_none() {
                    return Err(EngineError::invalid_input(
                        "No heatmap table loaded; load one before activating the heatmap",
                    ));
                }
                result.messages.push(format!(
                    "Heatmap {} with palette {}",
                    if settings.active { "shown" } else { "hidden" },
                    settings.palette.display_name()
                ));
                self.state.heatmap_settings = settings;
            }
            Operation::ExportLabelled { path } => {
                self.state.working_tree()?;
                let listing = self.export_listing();
                if listing.is_empty() {
                    return Err(EngineError::invalid_input("Nothing labelled to export"));
                }
                let path = if path.contains(".csv") {
                    path
                } else {
                    format!("{path}.csv")
                };
                let mut text = listing.join("\n");
                text.push('\n');
                fs::write(&path, text).map_err(|e| {
                    EngineError::new(ErrorCode::Io, format!("Could not write '{path}': {e}"))
                })?;
                result.changed = false;
                result
                    .messages
                    .push(format!("Exported {} labelled leaves to '{path}'", listing.len()));
            }
            Operation::ExportNewick { path } => {
                let newick = self.state.working_tree()?.to_newick();
                fs::write(&path, newick).map_err(|e| {
                    EngineError::new(ErrorCode::Io, format!("Could not write '{path}': {e}"))
                })?;
                result.changed = false;
                result.messages.push(format!("Wrote tree to '{path}'"));
            }
            Operation::SetParameter { name, value } => {
                match name.as_str() {
                    "collapse_depth" => {
                        let raw = value.as_u64().ok_or_else(|| {
                            EngineError::invalid_input(
                                "SetParameter collapse_depth requires a non-negative integer",
                            )
                        })?;
                        self.state.parameters.collapse_depth = raw as usize;
                    }
                    "highlight_color" => {
                        self.state.parameters.highlight_color =
                            Self::parse_color_parameter(&name, &value)?;
                        if self.state.color_selection {
                            self.state.recolor();
                        }
                    }
                    "default_query_color" => {
                        self.state.parameters.default_query_color =
                            Self::parse_color_parameter(&name, &value)?;
                    }
                    other => {
                        return Err(EngineError::new(
                            ErrorCode::Unsupported,
                            format!("Unknown parameter '{other}'"),
                        ));
                    }
                }
                result
                    .messages
                    .push(format!("Set parameter '{name}' to {value}"));
            }
            Operation::Reset => {
                let parameters = std::mem::take(&mut self.state.parameters);
                self.state = ExplorerState {
                    parameters,
                    ..ExplorerState::default()
                };
                result.messages.push("Session reset".to_string());
            }
        }

        for warning in &result.warnings {
            log::warn!("{}: {warning}", result.op_id);
        }
        for message in &result.messages {
            log::info!("{}: {message}", result.op_id);
        }
        Ok(result)
    }
}

impl Engine for ExplorerEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone())?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError> {
        let mut results = Vec::new();
        for op in &wf.ops {
            let result = self.apply_internal(op.clone())?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &ExplorerState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const METADATA: &str = "GenomeID,prtS,pH (units),Lysotype\n\
S1,1,4.2,SoS-ST0234-SX\n\
S2,0,6.1,SoS-ST0001\n\
S3,1,7.9,NA\n\
S4,0,5.0,SoS-ST0002\n";

    const TREE: &str = "((S1:1,S2:1):1,(S3:1,S4:1):1);";

    fn temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn path(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().to_string()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Engine with metadata, fields prtS and pH and the four-leaf tree.
    fn loaded() -> ExplorerEngine {
        let meta = temp_file(METADATA);
        let mut engine = ExplorerEngine::new();
        engine
            .apply(Operation::LoadMetadata { path: path(&meta) })
            .unwrap();
        engine
            .apply(Operation::SelectFields {
                fields: strings(&["prtS", "pH units"]),
                replace: false,
            })
            .unwrap();
        engine
            .apply(Operation::LoadTreeText {
                text: TREE.to_string(),
            })
            .unwrap();
        engine
    }

    fn colors(engine: &ExplorerEngine) -> Vec<String> {
        engine
            .leaf_views()
            .into_iter()
            .map(|v| v.color.to_string())
            .collect()
    }

    #[test]
    fn test_load_and_label() {
        let engine = loaded();
        let tree = engine.state().tree.as_ref().unwrap();
        assert_eq!(
            tree.leaf_names(),
            vec![
                "S1 // prtS_1 // pH units_4.2",
                "S2 // prtS_0 // pH units_6.1",
                "S3 // prtS_1 // pH units_7.9",
                "S4 // prtS_0 // pH units_5.0"
            ]
        );
        assert_eq!(engine.state().identifier_map.len(), 4);
        assert_eq!(engine.operation_log().len(), 3);
    }

    #[test]
    fn test_tree_without_metadata_warns() {
        let mut engine = ExplorerEngine::new();
        let res = engine
            .apply(Operation::LoadTreeText {
                text: TREE.to_string(),
            })
            .unwrap();
        assert_eq!(res.warnings.len(), 1);
        assert_eq!(engine.summarize_state().leaves, 4);
    }

    #[test]
    fn test_select_fields_unknown_and_duplicate() {
        let mut engine = loaded();
        let err = engine
            .apply(Operation::SelectFields {
                fields: strings(&["nope"]),
                replace: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        let res = engine
            .apply(Operation::SelectFields {
                fields: strings(&["prtS"]),
                replace: false,
            })
            .unwrap();
        assert!(res.warnings.iter().any(|w| w.contains("already selected")));
        assert_eq!(engine.state().selected_fields, strings(&["prtS", "pH units"]));
    }

    #[test]
    fn test_color_by_query_and_selection() {
        let mut engine = loaded();
        let res = engine
            .apply(Operation::ColorByQuery {
                query: "prtS=1 AND pH units=(L,5) AND colour=red".to_string(),
            })
            .unwrap();
        assert!(res.messages[0].starts_with("1 leaves"));
        assert_eq!(colors(&engine), vec!["red", "#FFFFFF", "#FFFFFF", "#FFFFFF"]);

        engine
            .apply(Operation::SelectStrains {
                identifiers: strings(&["S4"]),
                replace: false,
            })
            .unwrap();
        engine.apply(Operation::ColorSelection).unwrap();
        assert_eq!(colors(&engine), vec!["red", "#FFFFFF", "#FFFFFF", "#FEE715"]);
        assert_eq!(engine.export_listing(), vec!["S1,prtS_1,pH units_4.2", "S4,prtS_0,pH units_5.0"]);

        engine.apply(Operation::ClearColors).unwrap();
        assert!(engine.export_listing().is_empty());
    }

    #[test]
    fn test_query_without_tree_fails() {
        let mut engine = ExplorerEngine::new();
        let err = engine
            .apply(Operation::ColorByQuery {
                query: "a=1 AND red".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_prune_then_collapse_is_refused() {
        let mut engine = loaded();
        engine
            .apply(Operation::SelectStrains {
                identifiers: strings(&["S1", "S3"]),
                replace: false,
            })
            .unwrap();
        engine.apply(Operation::Prune).unwrap();
        assert_eq!(engine.summarize_state().leaves, 2);
        assert!(engine.state().pruned);

        let res = engine.apply(Operation::Collapse { depth: None }).unwrap();
        assert!(!res.changed);
        assert_eq!(res.warnings.len(), 1);
        assert!(!engine.state().collapsed);

        engine.apply(Operation::ClearSubset).unwrap();
        assert_eq!(engine.summarize_state().leaves, 4);
        assert_eq!(
            engine.state().tree.as_ref().unwrap(),
            engine.state().base_tree.as_ref().unwrap()
        );
    }

    #[test]
    fn test_collapse_then_prune_wins() {
        let mut engine = loaded();
        engine
            .apply(Operation::SelectStrains {
                identifiers: strings(&["S3"]),
                replace: false,
            })
            .unwrap();
        engine.apply(Operation::Collapse { depth: Some(1) }).unwrap();
        let summary = engine.summarize_state();
        assert_eq!((summary.leaves, summary.visible_leaves), (4, 2));

        let res = engine.apply(Operation::Prune).unwrap();
        assert_eq!(res.warnings.len(), 1);
        let summary = engine.summarize_state();
        assert!(summary.pruned && !summary.collapsed);
        assert_eq!(summary.leaves, 1);
    }

    #[test]
    fn test_prune_without_selection_fails_and_keeps_state() {
        let mut engine = loaded();
        let before = serde_json::to_value(engine.state()).unwrap();
        let err = engine.apply(Operation::Prune).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(serde_json::to_value(engine.state()).unwrap(), before);
    }

    #[test]
    fn test_heatmap_missing_data_keeps_previous() {
        let mut engine = loaded();
        let good = temp_file("id,g1,g2\nS1,1,+\nS2,3,-\n");
        engine
            .apply(Operation::LoadHeatmap { path: path(&good) })
            .unwrap();
        let bad = temp_file("id,g1\nS1,1\nS2,\n");
        let err = engine
            .apply(Operation::LoadHeatmap { path: path(&bad) })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingData);
        assert_eq!(engine.state().heatmap.as_ref().unwrap().columns, strings(&["g1", "g2"]));

        engine
            .apply(Operation::SetHeatmapDisplay {
                settings: HeatmapSettings {
                    active: true,
                    ..Default::default()
                },
            })
            .unwrap();
        let views = engine.leaf_views();
        assert_eq!(views[0].heatmap.len(), 2);
        assert_eq!(views[1].heatmap[0].value, 1.0);
        assert!(views[2].heatmap.is_empty());
        assert_eq!(engine.heatmap_header(), strings(&["g1", "g2"]));
    }

    #[test]
    fn test_export_labelled_appends_extension() {
        let mut engine = loaded();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hits").to_string_lossy().to_string();
        let err = engine
            .apply(Operation::ExportLabelled {
                path: target.clone(),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);

        engine
            .apply(Operation::ColorByQuery {
                query: "prtS_0 AND blue".to_string(),
            })
            .unwrap();
        engine
            .apply(Operation::ExportLabelled {
                path: target.clone(),
            })
            .unwrap();
        let text = fs::read_to_string(format!("{target}.csv")).unwrap();
        assert_eq!(text, "S2,prtS_0,pH units_6.1\nS4,prtS_0,pH units_5.0\n");
    }

    #[test]
    fn test_set_parameter() {
        let mut engine = ExplorerEngine::new();
        engine
            .apply(Operation::SetParameter {
                name: "collapse_depth".to_string(),
                value: serde_json::json!(3),
            })
            .unwrap();
        assert_eq!(engine.state().parameters.collapse_depth, 3);
        let err = engine
            .apply(Operation::SetParameter {
                name: "highlight_color".to_string(),
                value: serde_json::json!("not a colour"),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = engine
            .apply(Operation::SetParameter {
                name: "nope".to_string(),
                value: serde_json::json!(1),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);
    }

    #[test]
    fn test_reset_reinitializes_session() {
        let mut engine = loaded();
        engine
            .apply(Operation::ColorByQuery {
                query: "prtS_1 AND red".to_string(),
            })
            .unwrap();
        engine.apply(Operation::Reset).unwrap();
        let state = engine.state();
        assert!(state.metadata.is_none() && state.tree.is_none() && state.base_tree.is_none());
        assert!(state.identifier_map.is_empty());
        assert!(state.active_query.is_none() && state.selected_strains.is_empty());
        assert!(!state.pruned && !state.collapsed);
    }

    #[test]
    fn test_state_round_trips_through_file() {
        let engine = loaded();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state.json").to_string_lossy().to_string();
        engine.state().save_to_path(&file).unwrap();
        let restored = ExplorerEngine::from_state(ExplorerState::load_from_path(&file).unwrap());
        assert_eq!(restored.state().tree, engine.state().tree);
        assert_eq!(restored.state().selected_fields, engine.state().selected_fields);
    }

    #[test]
    fn test_workflow_runs_in_order() {
        let mut engine = ExplorerEngine::new();
        let wf: Workflow = serde_json::from_value(serde_json::json!({
            "run_id": "wf-1",
            "ops": [
                { "LoadTreeText": { "text": "(A,B,C);" } },
                { "ColorByQuery": { "query": "B AND green" } }
            ]
        }))
        .unwrap();
        let results = engine.apply_workflow(wf).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(colors(&engine), vec!["#FFFFFF", "green", "#FFFFFF"]);
        assert!(engine.operation_log().iter().all(|r| r.run_id == "wf-1"));
    }
}
