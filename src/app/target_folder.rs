//! Target folder selection and validation.

use super::operation::Operation;
use super::read_line;
use crate::error::{Error, Result};
use std::path::PathBuf;

const MAX_PROMPT_ATTEMPTS: usize = 5;

/// Expand a leading `~` to `$HOME` (non-Windows only).
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    #[cfg(not(windows))]
    {
        if let Some(rest) = path.strip_prefix("~") {
            if rest.is_empty() || rest.starts_with('/') {
                if let Some(home) = std::env::var_os("HOME") {
                    let mut expanded = PathBuf::from(home);
                    expanded.push(rest.trim_start_matches('/'));
                    return expanded;
                }
            }
        }
    }
    PathBuf::from(path)
}

pub(crate) fn resolve(
    arg: Option<&str>,
    operation: Operation,
    email: &str,
) -> Result<PathBuf> {
    if let Some(arg) = arg {
        return validate(operation, expand_tilde(arg));
    }

    let default_dir = default_dir(email);
    let use_default = read_yes_no(&format!(
        "Use default folder '{}' for {}? (Y/N): ",
        default_dir.display(),
        operation.as_str()
    ))?;

    if use_default {
        return validate(operation, default_dir);
    }

    for _ in 0..MAX_PROMPT_ATTEMPTS {
        let input = read_line("Enter the path of the target folder: ")?;
        if input.is_empty() {
            continue;
        }
        return validate(operation, expand_tilde(&input));
    }

    Err(Error::Config("too many failed attempts".to_string()))
}

fn default_dir(email: &str) -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(email)
}

fn validate(operation: Operation, dir: PathBuf) -> Result<PathBuf> {
    match operation {
        Operation::Backup => {
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        }
        Operation::Restore => {
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(Error::Config(format!(
                    "backup folder '{}' does not exist",
                    dir.display()
                )))
            }
        }
    }
}

fn read_yes_no(prompt: &str) -> Result<bool> {
    for _ in 0..MAX_PROMPT_ATTEMPTS {
        let input = read_line(prompt)?;
        if input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes") {
            return Ok(true);
        }
        if input.eq_ignore_ascii_case("n") || input.eq_ignore_ascii_case("no") {
            return Ok(false);
        }
    }

    Err(Error::Config("too many failed attempts".to_string()))
}
