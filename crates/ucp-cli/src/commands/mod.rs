pub mod receipts;
pub mod run;
pub mod template;
pub mod validate;
pub mod verify;

use serde_json::Value;
use std::path::Path;

pub const DEFAULT_DB: &str = ".ucp/ucp.db";

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Read a JSON document, naming the file in the error
pub fn read_json(path: &Path) -> CliResult<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))?;
    Ok(value)
}

/// Pretty-print `value` to `out`, or to stdout when no path is given
pub fn write_json<T: serde::Serialize>(value: &T, out: Option<&Path>) -> CliResult {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            create_parent_dir(path)?;
            std::fs::write(path, text + "\n")?;
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Create the directory holding `path` if it does not exist yet
pub fn create_parent_dir(path: &Path) -> CliResult {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
