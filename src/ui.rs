// UI layer: styled status lines for the workflows, the interactive
// `configure` prompts built on `dialoguer`, and deposition summaries.
// Status lines go to stderr so stdout only carries listings and JSON.

use crate::api::{Deposition, Environment};
use crate::config::Config;
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::{Input, Password, Select};
use serde::Serialize;
use std::fmt::Display;

/// Upload types accepted by Zenodo.
pub const UPLOAD_TYPES: &[&str] = &[
    "dataset",
    "software",
    "publication",
    "poster",
    "presentation",
    "image",
    "video",
    "lesson",
    "physicalobject",
    "other",
];

/// Announce which environment the following calls go to.
pub fn banner(environment: Environment) {
    let label = format!("--- Using {} environment ---", environment.to_string().to_uppercase());
    match environment {
        Environment::Production => eprintln!("{}", label.bold()),
        Environment::Sandbox => eprintln!("{}", label.yellow().bold()),
    }
}

/// Numbered workflow step.
pub fn step(number: u8, message: impl Display) {
    eprintln!("\n{}", format!("{number}. {message}").bold());
}

pub fn item(message: impl Display) {
    eprintln!("   - {message}");
}

pub fn success(message: impl Display) {
    eprintln!("   {} {message}", "✓".green());
}

pub fn warning(message: impl Display) {
    eprintln!("   {} {message}", "!".yellow().bold());
}

/// Print an error chain to stderr.
pub fn error(message: impl Display) {
    eprintln!("{} {message}", "✗ ERROR:".red().bold());
}

/// Final report for a draft left for manual review.
pub fn report_draft(deposition: &Deposition) {
    eprintln!("\n{}", "Upload complete. Record has been saved as a draft.".green());
    if let Some(url) = deposition.links.draft_url() {
        eprintln!("   Review and publish manually at: {}", url.to_string().underlined());
    }
}

/// Final report for a published record.
pub fn report_published(deposition: &Deposition) {
    eprintln!("\n{}", "Published successfully!".green().bold());
    if let Some(doi) = deposition.doi() {
        eprintln!("   DOI: {doi}");
    }
    if let Some(url) = &deposition.links.record_html {
        eprintln!("   View on Zenodo: {}", url.clone().underlined());
    }
}

/// Pretty JSON for `--json` output.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to encode JSON output")
}

/// One line per deposition: id, state, title.
pub fn print_listing(depositions: &[Deposition]) {
    if depositions.is_empty() {
        println!("No depositions found.");
        return;
    }
    for deposition in depositions {
        println!("{}", listing_line(deposition));
    }
}

fn listing_line(deposition: &Deposition) -> String {
    let state = if deposition.is_published() {
        "published"
    } else {
        "draft"
    };
    let title = if deposition.title.is_empty() {
        "(untitled)"
    } else {
        deposition.title.as_str()
    };
    match deposition.doi() {
        Some(doi) => format!("{:>10}  {state:<9}  {title}  [{doi}]", deposition.id),
        None => format!("{:>10}  {state:<9}  {title}", deposition.id),
    }
}

/// Interactively collect configuration, offering the current values as
/// defaults. Empty token answers keep the stored token.
pub fn prompt_config(current: &Config) -> Result<Config> {
    let mut config = current.clone();

    let author: String = Input::new()
        .with_prompt("Default author (e.g. 'Doe, John')")
        .with_initial_text(current.metadata.author.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    config.metadata.author = non_empty(author);

    let affiliation: String = Input::new()
        .with_prompt("Default affiliation")
        .with_initial_text(current.metadata.affiliation.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    config.metadata.affiliation = non_empty(affiliation);

    let keywords: String = Input::new()
        .with_prompt("Default keywords (comma separated)")
        .with_initial_text(current.metadata.keywords.join(", "))
        .allow_empty(true)
        .interact_text()?;
    config.metadata.keywords = split_keywords(&keywords);

    let default_type = UPLOAD_TYPES
        .iter()
        .position(|kind| *kind == current.metadata.upload_type)
        .unwrap_or(0);
    let selection = Select::new()
        .with_prompt("Default upload type")
        .items(UPLOAD_TYPES)
        .default(default_type)
        .interact()?;
    config.metadata.upload_type = UPLOAD_TYPES[selection].to_string();

    for environment in [Environment::Production, Environment::Sandbox] {
        let hint = if current.tokens.get(environment).is_some() {
            " (leave empty to keep current)"
        } else {
            ""
        };
        // `Password` hides the token while typing.
        let token = Password::new()
            .with_prompt(format!("{environment} access token{hint}"))
            .allow_empty_password(true)
            .interact()?;
        if let Some(token) = non_empty(token) {
            config.tokens.set(environment, token);
        }
    }

    Ok(config)
}

/// Split a comma separated answer into trimmed, non-empty keywords.
pub fn split_keywords(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
