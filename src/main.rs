// Entrypoint for the CLI application.
// - Parses arguments, loads the config file and merges flags over it.
// - Hands off to the workflows in the library and exits with 1 on failure.

use anyhow::{anyhow, Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zenodo_uploader::api::{
    Creator, DepositionApi, DepositionMetadata, Environment, ListQuery, ListStatus, ZenodoClient,
};
use zenodo_uploader::config::{default_config_path, token_var, Config};
use zenodo_uploader::ui::{self, UPLOAD_TYPES};
use zenodo_uploader::workflow::{self, SizeLimits, UpdateRequest, UploadRequest};

#[derive(Debug, Parser)]
#[command(about, version, subcommand_help_heading = "Commands")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,

    /// Print the deposition JSON returned by Zenodo on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Override the API root, e.g. for a self-hosted Invenio instance.
    #[arg(long, global = true, value_name = "url", env = "ZENODO_API_URL", hide = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = Config::load(&config_path)?;
        let api_url = self.api_url.as_deref();
        let json = self.json;

        match self.command {
            Command::Configure(opts) => run_configure(opts, config, &config_path),
            Command::List(opts) => run_list(opts, &config, api_url, json),
            Command::Upload(opts) => run_upload(opts, &config, api_url, json),
            Command::Update(opts) => run_update(opts, &config, api_url, json),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store default metadata and access tokens.
    Configure(ConfigureOptions),

    /// List your depositions.
    List(ListOptions),

    /// Create a new deposition from local files.
    Upload(UploadOptions),

    /// Add files to or edit the metadata of an unpublished deposition.
    Update(UpdateOptions),
}

/// Which Zenodo instance to talk to and with which token.
#[derive(Debug, Args)]
struct Target {
    /// Use the Zenodo sandbox environment for testing.
    #[arg(long)]
    sandbox: bool,

    /// Personal access token, overriding the configured one.
    #[arg(long, value_name = "token")]
    token: Option<String>,
}

#[derive(Debug, Args)]
struct ConfigureOptions {
    /// Default primary author (e.g. 'Doe, John').
    #[arg(long, value_name = "name")]
    author: Option<String>,

    /// Default institutional affiliation.
    #[arg(long, value_name = "affiliation")]
    affiliation: Option<String>,

    /// Default keywords.
    #[arg(long, value_name = "keyword", num_args = 1.., value_delimiter = ',')]
    keywords: Option<Vec<String>>,

    /// Default upload type.
    #[arg(long, value_name = "type", value_parser = PossibleValuesParser::new(UPLOAD_TYPES.iter().copied()))]
    upload_type: Option<String>,

    /// Production access token.
    #[arg(long, value_name = "token")]
    token: Option<String>,

    /// Sandbox access token.
    #[arg(long, value_name = "token")]
    sandbox_token: Option<String>,

    /// Default max size for a single file in GB.
    #[arg(long, value_name = "gb")]
    max_file_size: Option<f64>,

    /// Default max total size for all files in GB.
    #[arg(long, value_name = "gb")]
    total_size_limit: Option<f64>,
}

impl ConfigureOptions {
    /// No flags means the user wants the interactive prompts.
    fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.affiliation.is_none()
            && self.keywords.is_none()
            && self.upload_type.is_none()
            && self.token.is_none()
            && self.sandbox_token.is_none()
            && self.max_file_size.is_none()
            && self.total_size_limit.is_none()
    }

    fn apply(self, mut config: Config) -> Config {
        if let Some(author) = self.author {
            config.metadata.author = Some(author);
        }
        if let Some(affiliation) = self.affiliation {
            config.metadata.affiliation = Some(affiliation);
        }
        if let Some(keywords) = self.keywords {
            config.metadata.keywords = keywords;
        }
        if let Some(upload_type) = self.upload_type {
            config.metadata.upload_type = upload_type;
        }
        if let Some(token) = self.token {
            config.tokens.set(Environment::Production, token);
        }
        if let Some(token) = self.sandbox_token {
            config.tokens.set(Environment::Sandbox, token);
        }
        if let Some(gb) = self.max_file_size {
            config.limits.max_file_size_gb = gb;
        }
        if let Some(gb) = self.total_size_limit {
            config.limits.total_size_limit_gb = gb;
        }
        config
    }
}

#[derive(Debug, Args)]
struct ListOptions {
    #[command(flatten)]
    target: Target,

    /// Only show depositions in this state.
    #[arg(long, value_name = "draft|published")]
    status: Option<ListStatus>,

    /// Maximum number of depositions to return.
    #[arg(long, value_name = "n")]
    size: Option<u32>,

    /// Search query in Elasticsearch syntax.
    #[arg(short, long, value_name = "query")]
    query: Option<String>,
}

#[derive(Debug, Args)]
struct UploadOptions {
    #[command(flatten)]
    target: Target,

    /// Paths to the files to upload.
    #[arg(long, required = true, num_args = 1.., value_name = "path")]
    file_paths: Vec<PathBuf>,

    /// Title of the upload.
    #[arg(long)]
    title: String,

    /// A description of the upload content.
    #[arg(long)]
    description: String,

    /// Primary author name, defaults to the configured author.
    #[arg(long, value_name = "name")]
    author: Option<String>,

    /// The author's institutional affiliation.
    #[arg(long)]
    affiliation: Option<String>,

    /// Keywords to describe the data.
    #[arg(long, num_args = 0.., value_name = "keyword", value_delimiter = ',')]
    keywords: Option<Vec<String>>,

    /// Version number for the data or software.
    #[arg(long = "record-version", value_name = "version")]
    version: Option<String>,

    /// The type of content being uploaded.
    #[arg(long, value_name = "type", value_parser = PossibleValuesParser::new(UPLOAD_TYPES.iter().copied()))]
    upload_type: Option<String>,

    /// Max size for a single file in GB.
    #[arg(long, value_name = "gb")]
    max_file_size: Option<f64>,

    /// Max total size for all files in GB.
    #[arg(long, value_name = "gb")]
    total_size_limit: Option<f64>,

    /// Publish the record immediately instead of saving as a draft.
    #[arg(long)]
    publish: bool,
}

#[derive(Debug, Args)]
struct UpdateOptions {
    #[command(flatten)]
    target: Target,

    /// Deposition id.
    #[arg(value_name = "id")]
    id: u64,

    /// Files to add to the deposition.
    #[arg(long = "add-file", num_args = 1.., value_name = "path")]
    add_files: Vec<PathBuf>,

    /// New title.
    #[arg(long)]
    title: Option<String>,

    /// New description.
    #[arg(long)]
    description: Option<String>,

    /// Replace the keywords.
    #[arg(long, num_args = 0.., value_name = "keyword", value_delimiter = ',')]
    keywords: Option<Vec<String>>,

    /// New version number.
    #[arg(long = "record-version", value_name = "version")]
    version: Option<String>,

    /// Max size for a single file in GB.
    #[arg(long, value_name = "gb")]
    max_file_size: Option<f64>,

    /// Max total size for all files in GB.
    #[arg(long, value_name = "gb")]
    total_size_limit: Option<f64>,

    /// Publish the deposition after applying the changes.
    #[arg(long)]
    publish: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = cli.run() {
        debug!("{error:?}");
        ui::error(format!("{error:#}"));
        exit(1);
    }

    exit(0)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let layer = fmt::layer().compact().with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zenodo_uploader={level},warn")));
    tracing_subscriber::registry().with(layer).with(filter).init();
}

fn run_configure(opts: ConfigureOptions, current: Config, path: &Path) -> Result<()> {
    let config = if opts.is_empty() {
        ui::prompt_config(&current)?
    } else {
        opts.apply(current)
    };
    config.save(path)?;
    ui::success(format!("Configuration written to {}", path.display()));
    Ok(())
}

fn run_list(opts: ListOptions, config: &Config, api_url: Option<&str>, json: bool) -> Result<()> {
    let client = connect(config, opts.target, api_url)?;
    let query = ListQuery {
        status: opts.status,
        size: opts.size,
        query: opts.query,
    };
    let depositions = client
        .list_depositions(&query)
        .context("failed to list depositions")?;

    if json {
        println!("{}", ui::render_json(&depositions)?);
    } else {
        ui::print_listing(&depositions);
    }
    Ok(())
}

fn run_upload(opts: UploadOptions, config: &Config, api_url: Option<&str>, json: bool) -> Result<()> {
    let author = opts
        .author
        .or_else(|| config.metadata.author.clone())
        .context("no author given; pass --author or set one with `zenodo-uploader configure`")?;
    let affiliation = opts
        .affiliation
        .or_else(|| config.metadata.affiliation.clone());
    let keywords = opts
        .keywords
        .unwrap_or_else(|| config.metadata.keywords.clone());

    let request = UploadRequest {
        file_paths: opts.file_paths,
        metadata: DepositionMetadata {
            title: opts.title,
            upload_type: opts
                .upload_type
                .unwrap_or_else(|| config.metadata.upload_type.clone()),
            description: opts.description,
            creators: vec![Creator::new(author, affiliation)],
            version: opts.version,
            keywords: (!keywords.is_empty()).then_some(keywords),
            ..Default::default()
        },
        limits: limits(config, opts.max_file_size, opts.total_size_limit),
        publish: opts.publish,
    };

    let client = connect(config, opts.target, api_url)?;
    let deposition = workflow::upload(&client, &request)?;
    if json {
        println!("{}", ui::render_json(&deposition)?);
    }
    Ok(())
}

fn run_update(opts: UpdateOptions, config: &Config, api_url: Option<&str>, json: bool) -> Result<()> {
    let request = UpdateRequest {
        id: opts.id,
        add_files: opts.add_files,
        title: opts.title,
        description: opts.description,
        keywords: opts.keywords,
        version: opts.version,
        limits: limits(config, opts.max_file_size, opts.total_size_limit),
        publish: opts.publish,
    };

    let client = connect(config, opts.target, api_url)?;
    let deposition = workflow::update(&client, &request)?;
    if json {
        println!("{}", ui::render_json(&deposition)?);
    }
    Ok(())
}

fn limits(config: &Config, max_file_gb: Option<f64>, total_gb: Option<f64>) -> SizeLimits {
    SizeLimits::from_gb(
        max_file_gb.unwrap_or(config.limits.max_file_size_gb),
        total_gb.unwrap_or(config.limits.total_size_limit_gb),
    )
}

fn connect(config: &Config, target: Target, api_url: Option<&str>) -> Result<ZenodoClient> {
    let environment = Environment::from_sandbox_flag(target.sandbox);
    let token = require_token(config, environment, target.token, |name| {
        std::env::var(name).ok()
    })?;

    let client = match api_url {
        Some(url) => ZenodoClient::with_base_url(environment, url, &token)?,
        None => ZenodoClient::new(environment, &token)?,
    };
    debug!(%environment, base_url = client.base_url(), "connected");
    Ok(client)
}

fn require_token(
    config: &Config,
    environment: Environment,
    flag: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    config
        .resolve_token_with(environment, flag, lookup)
        .ok_or_else(|| {
            anyhow!(
                "no {environment} access token; pass --token, set {} or run `zenodo-uploader configure`",
                token_var(environment)
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_upload() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "zenodo-uploader",
            "upload",
            "--file-paths",
            "a.csv",
            "b.csv",
            "--title",
            "Ocean temperatures",
            "--description",
            "Daily readings",
            "--sandbox",
            "--publish",
        ])?;

        let Command::Upload(opts) = cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(opts.file_paths, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);
        assert!(opts.target.sandbox);
        assert!(opts.publish);
        assert_eq!(opts.author, None);

        Ok(())
    }

    #[test]
    fn parse_update() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "zenodo-uploader",
            "update",
            "1234",
            "--add-file",
            "extra.csv",
            "--title",
            "Revised",
        ])?;

        let Command::Update(opts) = cli.command else {
            panic!("expected update command");
        };
        assert_eq!(opts.id, 1234);
        assert_eq!(opts.add_files, vec![PathBuf::from("extra.csv")]);
        assert_eq!(opts.title.as_deref(), Some("Revised"));
        assert!(!opts.target.sandbox);

        Ok(())
    }

    #[test]
    fn update_requires_numeric_id() {
        assert!(Cli::try_parse_from(["zenodo-uploader", "update", "abc"]).is_err());
    }

    #[test]
    fn list_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["zenodo-uploader", "list", "--status", "archived"]).is_err());
    }

    #[test]
    fn configure_with_flags_round_trips_through_loader() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        let cli = Cli::try_parse_from([
            "zenodo-uploader",
            "configure",
            "--author",
            "Doe, Jane",
            "--keywords",
            "ocean,climate",
            "--sandbox-token",
            "sandbox-secret",
        ])?;
        let Command::Configure(opts) = cli.command else {
            panic!("expected configure command");
        };

        run_configure(opts, Config::default(), &path)?;
        let loaded = Config::load(&path)?;

        assert_eq!(loaded.metadata.author.as_deref(), Some("Doe, Jane"));
        assert_eq!(loaded.metadata.keywords, vec!["ocean".to_string(), "climate".to_string()]);
        assert_eq!(loaded.tokens.get(Environment::Sandbox), Some("sandbox-secret"));
        assert_eq!(loaded.tokens.get(Environment::Production), None);

        Ok(())
    }

    #[test]
    fn missing_sandbox_token_is_reported() {
        let mut config = Config::default();
        config.tokens.set(Environment::Production, "prod-only".into());

        let error = require_token(&config, Environment::Sandbox, None, |_| None).unwrap_err();

        assert!(error.to_string().contains("no sandbox access token"));
        assert!(error.to_string().contains("ZENODO_SANDBOX_TOKEN"));
    }

    #[test]
    fn token_from_env_lookup_is_used() -> anyhow::Result<()> {
        let token = require_token(&Config::default(), Environment::Production, None, |name| {
            (name == "ZENODO_TOKEN").then(|| "env-token".to_string())
        })?;

        assert_eq!(token, "env-token");

        Ok(())
    }

    #[test]
    fn parse_global_json_after_subcommand_and_before() -> anyhow::Result<()> {
        let before = Cli::try_parse_from(["zenodo-uploader", "--json", "update", "5", "--title", "x"])?;
        let after = Cli::try_parse_from(["zenodo-uploader", "list", "--json", "--status", "draft"])?;

        assert!(before.json);
        assert!(after.json);
        let Command::List(opts) = after.command else {
            panic!("expected list command");
        };
        assert_eq!(opts.status, Some(ListStatus::Draft));

        Ok(())
    }

    #[test]
    fn keywords_split_on_commas_for_every_command() -> anyhow::Result<()> {
        let upload = Cli::try_parse_from([
            "zenodo-uploader",
            "upload",
            "--file-paths",
            "a.csv",
            "--title",
            "t",
            "--description",
            "d",
            "--keywords",
            "ocean,climate",
        ])?;
        let update = Cli::try_parse_from([
            "zenodo-uploader",
            "update",
            "5",
            "--keywords",
            "ocean,climate",
            "sea",
        ])?;

        let Command::Upload(upload) = upload.command else {
            panic!("expected upload command");
        };
        let Command::Update(update) = update.command else {
            panic!("expected update command");
        };
        assert_eq!(
            upload.keywords,
            Some(vec!["ocean".to_string(), "climate".to_string()])
        );
        assert_eq!(
            update.keywords,
            Some(vec!["ocean".to_string(), "climate".to_string(), "sea".to_string()])
        );

        Ok(())
    }
}
