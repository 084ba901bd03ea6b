// Library root
// -----------
// This crate exposes a small library surface for the CLI. The binary
// (`main.rs`) parses arguments and hands off to these modules.
//
// Module responsibilities:
// - `api`: Encapsulates HTTP interactions with Zenodo (create, fetch,
//   upload, update metadata, publish, list) behind `DepositionApi`.
// - `config`: TOML configuration with default metadata, limits and tokens.
// - `workflow`: The upload and update call sequences, including file size
//   checks.
// - `ui`: Styled terminal output and the interactive `configure` prompts.
//
// Library users can call `workflow::upload` with a `ZenodoClient` to get the
// same behavior as the command line.
pub mod api;
pub mod config;
pub mod ui;
pub mod workflow;

pub use api::{DepositionApi, Environment, ZenodoClient};
pub use workflow::{upload, update, UpdateRequest, UploadRequest};
