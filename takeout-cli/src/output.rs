// Output formatting helpers

use colored::Colorize;
use serde::Serialize;
use std::fmt::Display;

pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{json}");
    Ok(())
}

pub fn print_success(message: impl Display) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: impl Display) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_info(message: impl Display) {
    println!("{} {}", "ℹ".blue(), message);
}
