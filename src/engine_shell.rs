use crate::engine::{Engine, ExplorerEngine, Operation, OpResult, Workflow};
use crate::heatmap::{HeatmapSettings, Palette};
use serde_json::{Value, json};
use std::fs;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    Capabilities,
    StateSummary,
    LoadMetadata { path: String },
    SelectFields { fields: Vec<String>, replace: bool },
    SelectStrains { identifiers: Vec<String>, replace: bool },
    LoadTree { path: String },
    LoadHeatmap { path: String },
    Search { query: String },
    ColorStrains,
    ClearColors,
    Prune,
    Collapse { depth: Option<usize> },
    ClearSubset,
    Heatmap { settings: HeatmapSettings },
    Export { path: String },
    ExportNewick { path: String },
    Reset,
    SetParam { name: String, value: Value },
    Op { payload: String },
    Workflow { payload: String },
}

#[derive(Debug, Clone)]
pub struct ShellRunResult {
    pub state_changed: bool,
    pub output: Value,
}

impl ShellCommand {
    pub fn preview(&self) -> String {
        match self {
            Self::Help => "show shell command help".to_string(),
            Self::Capabilities => "inspect engine capabilities".to_string(),
            Self::StateSummary => "show table/tree/heatmap state summary".to_string(),
            Self::LoadMetadata { path } => format!("load metadata table from '{path}'"),
            Self::SelectFields { fields, .. } => format!("select fields {}", fields.join(",")),
            Self::SelectStrains { identifiers, .. } => {
                format!("select {} strain(s)", identifiers.len())
            }
            Self::LoadTree { path } => format!("load tree from '{path}'"),
            Self::LoadHeatmap { path } => format!("load heatmap table from '{path}'"),
            Self::Search { query } => format!("color leaves matching '{query}'"),
            Self::ColorStrains => "highlight selected strains".to_string(),
            Self::ClearColors => "reset all leaf colors".to_string(),
            Self::Prune => "prune tree to selected strains".to_string(),
            Self::Collapse { depth } => match depth {
                Some(d) => format!("collapse branches with selected strains at depth {d}"),
                None => "collapse branches with selected strains".to_string(),
            },
            Self::ClearSubset => "clear prune/collapse".to_string(),
            Self::Heatmap { settings } => format!(
                "{} heatmap with palette {}",
                if settings.active { "show" } else { "hide" },
                settings.palette.display_name()
            ),
            Self::Export { path } => format!("export labelled leaves to '{path}'"),
            Self::ExportNewick { path } => format!("write current tree to '{path}'"),
            Self::Reset => "reset session".to_string(),
            Self::SetParam { name, value } => format!("set parameter '{name}' to {value}"),
            Self::Op { .. } => "apply one engine operation from JSON".to_string(),
            Self::Workflow { .. } => "apply engine workflow from JSON".to_string(),
        }
    }

    pub fn is_state_mutating(&self) -> bool {
        !matches!(
            self,
            Self::Help
                | Self::Capabilities
                | Self::StateSummary
                | Self::Export { .. }
                | Self::ExportNewick { .. }
        )
    }

    fn into_operation(self) -> Option<Operation> {
        let op = match self {
            Self::LoadMetadata { path } => Operation::LoadMetadata { path },
            Self::SelectFields { fields, replace } => Operation::SelectFields { fields, replace },
            Self::SelectStrains {
                identifiers,
                replace,
            } => Operation::SelectStrains {
                identifiers,
                replace,
            },
            Self::LoadTree { path } => Operation::LoadTree { path },
            Self::LoadHeatmap { path } => Operation::LoadHeatmap { path },
            Self::Search { query } => Operation::ColorByQuery { query },
            Self::ColorStrains => Operation::ColorSelection,
            Self::ClearColors => Operation::ClearColors,
            Self::Prune => Operation::Prune,
            Self::Collapse { depth } => Operation::Collapse { depth },
            Self::ClearSubset => Operation::ClearSubset,
            Self::Heatmap { settings } => Operation::SetHeatmapDisplay { settings },
            Self::Export { path } => Operation::ExportLabelled { path },
            Self::ExportNewick { path } => Operation::ExportNewick { path },
            Self::Reset => Operation::Reset,
            Self::SetParam { name, value } => Operation::SetParameter { name, value },
            Self::Help
            | Self::Capabilities
            | Self::StateSummary
            | Self::Op { .. }
            | Self::Workflow { .. } => return None,
        };
        Some(op)
    }
}

pub fn shell_help_text() -> &'static str {
    "Tree Explorer shell commands:\n\
help\n\
capabilities\n\
state-summary\n\
load-metadata PATH\n\
select-fields FIELDS [--replace]\n\
select-strains IDS [--replace]\n\
load-tree PATH\n\
load-heatmap PATH\n\
search QUERY...\n\
color-strains\n\
clear-colors\n\
prune\n\
collapse [DEPTH]\n\
clear-subset\n\
heatmap grayscale|blue-red|orange-red [--no-labels] [--values] [--off]\n\
export PATH\n\
export-newick PATH\n\
reset\n\
set-param NAME JSON_VALUE\n\
op <operation-json-or-@file>\n\
workflow <workflow-json-or-@file>\n\
FIELDS and IDS are comma-separated; a query looks like: prtS=1 AND pH=(L,5) AND colour=red"
}

fn split_ids(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_json_payload(raw: &str) -> Result<String, String> {
    if let Some(path) = raw.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(raw.to_string())
    }
}

fn token_error(command: &str) -> String {
    format!("Invalid '{command}' usage. Try: help")
}

fn single_path(tokens: &[String], make: fn(String) -> ShellCommand) -> Result<ShellCommand, String> {
    if tokens.len() == 2 {
        Ok(make(tokens[1].clone()))
    } else {
        Err(token_error(&tokens[0]))
    }
}

fn no_args(tokens: &[String], command: ShellCommand) -> Result<ShellCommand, String> {
    if tokens.len() == 1 {
        Ok(command)
    } else {
        Err(token_error(&tokens[0]))
    }
}

/// `IDS [--replace]` with the list possibly spread over several words.
fn parse_list(tokens: &[String]) -> Result<(Vec<String>, bool), String> {
    let mut replace = false;
    let mut items = vec![];
    for token in &tokens[1..] {
        if token == "--replace" {
            replace = true;
        } else {
            items.extend(split_ids(token));
        }
    }
    if items.is_empty() {
        return Err(format!("{} requires at least one name", tokens[0]));
    }
    Ok((items, replace))
}

fn parse_heatmap(tokens: &[String]) -> Result<ShellCommand, String> {
    if tokens.len() < 2 {
        return Err(token_error(&tokens[0]));
    }
    let palette = Palette::parse(&tokens[1]).ok_or_else(|| {
        format!(
            "Unknown palette '{}', expected grayscale, blue-red or orange-red",
            tokens[1]
        )
    })?;
    let mut settings = HeatmapSettings {
        palette,
        active: true,
        ..HeatmapSettings::default()
    };
    for token in &tokens[2..] {
        match token.as_str() {
            "--no-labels" => settings.show_labels = false,
            "--values" => settings.value_only = true,
            "--off" => settings.active = false,
            other => return Err(format!("Unknown argument '{other}' for heatmap")),
        }
    }
    Ok(ShellCommand::Heatmap { settings })
}

pub fn parse_shell_tokens(tokens: &[String]) -> Result<ShellCommand, String> {
    if tokens.is_empty() {
        return Err("Missing shell command".to_string());
    }
    let cmd = tokens[0].as_str();
    match cmd {
        "help" | "-h" | "--help" => Ok(ShellCommand::Help),
        "capabilities" => no_args(tokens, ShellCommand::Capabilities),
        "state-summary" => no_args(tokens, ShellCommand::StateSummary),
        "load-metadata" => single_path(tokens, |path| ShellCommand::LoadMetadata { path }),
        "select-fields" => {
            let (fields, replace) = parse_list(tokens)?;
            Ok(ShellCommand::SelectFields { fields, replace })
        }
        "select-strains" => {
            let (identifiers, replace) = parse_list(tokens)?;
            Ok(ShellCommand::SelectStrains {
                identifiers,
                replace,
            })
        }
        "load-tree" => single_path(tokens, |path| ShellCommand::LoadTree { path }),
        "load-heatmap" => single_path(tokens, |path| ShellCommand::LoadHeatmap { path }),
        "search" => {
            let query = tokens[1..].join(" ");
            if query.trim().is_empty() {
                return Err("Missing query".to_string());
            }
            Ok(ShellCommand::Search { query })
        }
        "color-strains" | "colour-strains" => no_args(tokens, ShellCommand::ColorStrains),
        "clear-colors" | "clear-colours" => no_args(tokens, ShellCommand::ClearColors),
        "prune" => no_args(tokens, ShellCommand::Prune),
        "collapse" => match tokens.len() {
            1 => Ok(ShellCommand::Collapse { depth: None }),
            2 => {
                let depth = tokens[1]
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid collapse depth '{}'", tokens[1]))?;
                Ok(ShellCommand::Collapse { depth: Some(depth) })
            }
            _ => Err(token_error(cmd)),
        },
        "clear-subset" | "clear-prune" => no_args(tokens, ShellCommand::ClearSubset),
        "heatmap" => parse_heatmap(tokens),
        "export" => single_path(tokens, |path| ShellCommand::Export { path }),
        "export-newick" => single_path(tokens, |path| ShellCommand::ExportNewick { path }),
        "reset" => no_args(tokens, ShellCommand::Reset),
        "set-param" => {
            if tokens.len() < 3 {
                return Err(token_error(cmd));
            }
            let raw = tokens[2..].join(" ");
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            Ok(ShellCommand::SetParam {
                name: tokens[1].clone(),
                value,
            })
        }
        "op" => {
            let payload = tokens[1..].join(" ");
            if payload.trim().is_empty() {
                return Err("Missing operation JSON".to_string());
            }
            Ok(ShellCommand::Op { payload })
        }
        "workflow" => {
            let payload = tokens[1..].join(" ");
            if payload.trim().is_empty() {
                return Err("Missing workflow JSON".to_string());
            }
            Ok(ShellCommand::Workflow { payload })
        }
        other => Err(format!("Unknown shell command '{other}'. Try: help")),
    }
}

pub fn parse_shell_line(line: &str) -> Result<ShellCommand, String> {
    let tokens = split_shell_words(line)?;
    parse_shell_tokens(&tokens)
}

pub fn split_shell_words(line: &str) -> Result<Vec<String>, String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Normal,
        SingleQuoted,
        DoubleQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Normal;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Normal => match ch {
                '\'' => mode = Mode::SingleQuoted,
                '"' => mode = Mode::DoubleQuoted,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
            Mode::SingleQuoted => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    current.push(ch);
                }
            }
            Mode::DoubleQuoted => match ch {
                '"' => mode = Mode::Normal,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(ch),
            },
        }
    }

    if mode != Mode::Normal {
        return Err("Unterminated quoted string in shell command".to_string());
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        return Err("Empty shell command".to_string());
    }
    Ok(out)
}

fn op_output(result: OpResult) -> ShellRunResult {
    ShellRunResult {
        state_changed: result.changed,
        output: json!({ "result": result }),
    }
}

pub fn execute_shell_command(
    engine: &mut ExplorerEngine,
    command: &ShellCommand,
) -> Result<ShellRunResult, String> {
    let result = match command {
        ShellCommand::Help => ShellRunResult {
            state_changed: false,
            output: json!({ "help": shell_help_text() }),
        },
        ShellCommand::Capabilities => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(ExplorerEngine::capabilities())
                .map_err(|e| format!("Could not serialize capabilities: {e}"))?,
        },
        ShellCommand::StateSummary => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(engine.summarize_state())
                .map_err(|e| format!("Could not serialize state summary: {e}"))?,
        },
        ShellCommand::Op { payload } => {
            let json_text = parse_json_payload(payload)?;
            let op: Operation = serde_json::from_str(&json_text)
                .map_err(|e| format!("Invalid operation JSON: {e}"))?;
            op_output(engine.apply(op).map_err(|e| e.to_string())?)
        }
        ShellCommand::Workflow { payload } => {
            let json_text = parse_json_payload(payload)?;
            let workflow: Workflow = serde_json::from_str(&json_text)
                .map_err(|e| format!("Invalid workflow JSON: {e}"))?;
            let results = engine.apply_workflow(workflow).map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: results.iter().any(|r| r.changed),
                output: json!({ "results": results }),
            }
        }
        other => {
            let op = other
                .clone()
                .into_operation()
                .ok_or_else(|| format!("'{}' is not an engine operation", other.preview()))?;
            op_output(engine.apply(op).map_err(|e| e.to_string())?)
        }
    };
    Ok(result)
}

/// Runs one shell command per line of `reader`. Blank lines and lines
/// starting with `#` are skipped. Stops at the first failing line; commands
/// before it have already been applied to `engine`.
pub fn execute_shell_script<R: BufRead>(
    engine: &mut ExplorerEngine,
    reader: R,
) -> Result<ShellRunResult, String> {
    let mut state_changed = false;
    let mut outputs = vec![];
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| format!("Could not read script line {line_no}: {e}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = parse_shell_line(line).map_err(|e| format!("line {line_no}: {e}"))?;
        log::info!("line {line_no}: {}", command.preview());
        let outcome =
            execute_shell_command(engine, &command).map_err(|e| format!("line {line_no}: {e}"))?;
        state_changed |= command.is_state_mutating() && outcome.state_changed;
        outputs.push(json!({ "line": line_no, "output": outcome.output }));
    }
    Ok(ShellRunResult {
        state_changed,
        output: json!({ "results": outputs }),
    })
}
