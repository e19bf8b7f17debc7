//! Operation selection (backup or restore).

use super::read_line;
use crate::error::{Error, Result};

const MAX_PROMPT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        }
    }
}

pub(crate) fn parse(input: &str) -> Result<Operation> {
    if input.eq_ignore_ascii_case("backup") || input.eq_ignore_ascii_case("b") {
        return Ok(Operation::Backup);
    }
    if input.eq_ignore_ascii_case("restore") || input.eq_ignore_ascii_case("r") {
        return Ok(Operation::Restore);
    }
    Err(Error::Config(format!("unknown operation {input}")))
}

pub(crate) fn resolve(arg: Option<&str>) -> Result<Operation> {
    if let Some(arg) = arg {
        return parse(arg);
    }

    for _ in 0..MAX_PROMPT_ATTEMPTS {
        let input = read_line("Enter the operation ((B)ackup / (R)estore): ")?;
        match parse(&input) {
            Ok(operation) => return Ok(operation),
            Err(err) => println!("Error: {err}"),
        }
    }

    Err(Error::Config("too many failed attempts".to_string()))
}
