use serde::Serialize;
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use tree_explorer::{
    about,
    engine::{ExplorerEngine, ExplorerState},
    engine_shell::{
        ShellCommand, ShellRunResult, execute_shell_command, execute_shell_script,
        parse_shell_line, parse_shell_tokens, shell_help_text,
    },
};

const DEFAULT_STATE_PATH: &str = ".tree_explorer_state.json";

fn usage() {
    eprintln!(
        "Usage:\n  \
  tree_explorer_cli --version\n  \
  tree_explorer_cli [--state PATH] COMMAND [ARGS...]\n  \
  tree_explorer_cli [--state PATH] line 'COMMAND ARGS...'\n  \
  tree_explorer_cli [--state PATH] script FILE|-\n\n\
{}\n\n  \
  Tip: pass @file.json instead of inline JSON",
        shell_help_text()
    );
}

fn load_state(path: &str) -> Result<ExplorerState, String> {
    if std::path::Path::new(path).exists() {
        ExplorerState::load_from_path(path).map_err(|e| e.to_string())
    } else {
        Ok(ExplorerState::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_global_state_arg(args: &[String]) -> (String, usize) {
    if args.len() >= 3 && args[1] == "--state" {
        return (args[2].clone(), 3);
    }
    (DEFAULT_STATE_PATH.to_string(), 1)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (state_path, cmd_idx) = parse_global_state_arg(&args);
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }

    let mut engine = ExplorerEngine::from_state(load_state(&state_path)?);
    let outcome = match args[cmd_idx].as_str() {
        "script" => run_script(&mut engine, &args[cmd_idx + 1..])?,
        "line" => {
            let command = parse_shell_line(&args[cmd_idx + 1..].join(" ")).inspect_err(|_| usage())?;
            run_command(&mut engine, &command)?
        }
        _ => {
            let command = parse_shell_tokens(&args[cmd_idx..]).inspect_err(|_| usage())?;
            run_command(&mut engine, &command)?
        }
    };
    if outcome.state_changed {
        engine
            .state()
            .save_to_path(&state_path)
            .map_err(|e| e.to_string())?;
    }
    print_json(&outcome.output)
}

fn run_command(
    engine: &mut ExplorerEngine,
    command: &ShellCommand,
) -> Result<ShellRunResult, String> {
    log::debug!("{}", command.preview());
    let outcome = execute_shell_command(engine, command)?;
    Ok(ShellRunResult {
        state_changed: outcome.state_changed && command.is_state_mutating(),
        output: outcome.output,
    })
}

/// Script lines run against one in-memory session; the state file is only
/// written when every line succeeded.
fn run_script(engine: &mut ExplorerEngine, args: &[String]) -> Result<ShellRunResult, String> {
    match args {
        [path] if path == "-" => execute_shell_script(engine, io::stdin().lock()),
        [path] => {
            let file = File::open(path).map_err(|e| format!("Could not open script '{path}': {e}"))?;
            execute_shell_script(engine, BufReader::new(file))
        }
        _ => {
            usage();
            Err("script expects exactly one FILE (or - for stdin)".to_string())
        }
    }
}
