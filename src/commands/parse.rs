use anyhow::Result;
use colored::Colorize;
use std::io::Read;
use syslog_exporter::{parser, patterns::PatternLibrary};

/// Execute the parse command
///
/// Runs the line parser on a payload (or stdin) and prints one observation
/// per line
pub fn execute(payload: Option<String>) -> Result<()> {
    let payload = match payload {
        Some(payload) => payload,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let library = PatternLibrary::compile()?;
    let observations = parser::parse_payload(&library, &payload);

    if observations.is_empty() {
        println!("{}", "No observations".yellow());
        return Ok(());
    }

    for observation in &observations {
        println!(
            "{} {} = {}",
            observation.metric.cyan(),
            observation.field,
            observation.value.green()
        );
    }
    println!();
    println!("{} observations", observations.len());

    Ok(())
}
