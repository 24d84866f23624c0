//! `codesandbox languages`: list the language registry.

use colored::Colorize;

use crate::languages::{LanguageSpec, REGISTRY};

pub fn run() {
    print!("{}", format_registry(REGISTRY));
}

fn format_registry(registry: &[LanguageSpec]) -> String {
    let mut out = format!(
        "{:<10} {:<20} {:<6} {}\n",
        "LANGUAGE".bold(),
        "IMAGE".bold(),
        "EXT".bold(),
        "COMMAND".bold()
    );
    for spec in registry {
        out.push_str(&format!(
            "{:<10} {:<20} {:<6} {}\n",
            spec.id.cyan(),
            spec.image,
            spec.extension,
            spec.command.replace("{source}", &spec.source_name()).dimmed()
        ));
    }
    out
}
