//! Interactive prompts
//!
//! Generic over the reader/writer so they can be driven from tests.

use std::io::{self, BufRead, Write};

use crate::config::ConfigError;

/// Print `message` and read one trimmed line
pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> io::Result<String> {
    write!(output, "{}", message)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Show a numbered menu of `names` and return the chosen one
pub fn choose_environment<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    names: &[String],
) -> Result<String, ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::NoEnvironments);
    }

    writeln!(output, "Available environments:")?;
    for (i, name) in names.iter().enumerate() {
        writeln!(output, "{}. {}", i + 1, name)?;
    }

    let answer = prompt(input, output, "Select environment (enter number): ")?;
    match answer.parse::<usize>() {
        Ok(choice) if (1..=names.len()).contains(&choice) => Ok(names[choice - 1].clone()),
        _ => Err(ConfigError::InvalidSelection(answer)),
    }
}
