use std::io::Read;
use std::path::Path;

pub type CmdResult<T> = pipecraft::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

/// Read JSON spec from string, file (@path), or stdin (-).
pub(crate) fn read_json_spec_to_string(spec: &str) -> pipecraft::Result<String> {
    use std::io::IsTerminal;

    if spec.trim() == "-" {
        let mut buf = String::new();
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(pipecraft::Error::validation_invalid_argument(
                "json",
                "Cannot read JSON from stdin when stdin is a TTY",
                None,
            ));
        }
        stdin.read_to_string(&mut buf).map_err(|e| {
            pipecraft::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    if let Some(path) = spec.strip_prefix('@') {
        if path.trim().is_empty() {
            return Err(pipecraft::Error::validation_invalid_argument(
                "json",
                "Invalid JSON spec '@' (missing file path)",
                None,
            ));
        }
        return std::fs::read_to_string(Path::new(path)).map_err(|e| {
            pipecraft::Error::internal_io(e.to_string(), Some(format!("read {}", path)))
        });
    }

    Ok(spec.to_string())
}

pub mod notify;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (pipecraft::Result<serde_json::Value>, i32) {
    crate::tty::status("pipecraft is working...");

    match command {
        crate::Commands::Notify(args) => dispatch!(args, global, notify),
    }
}
