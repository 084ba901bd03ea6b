// API client module: a small blocking HTTP client that talks to the Zenodo
// REST API. Every call is one authenticated request/response pair. Failures
// are returned as `ApiError` and never retried.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{multipart, Body, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Base URL of the production Zenodo API.
pub const PRODUCTION_URL: &str = "https://zenodo.org/api";

/// Base URL of the Zenodo sandbox API.
pub const SANDBOX_URL: &str = "https://sandbox.zenodo.org/api";

/// Zenodo environment a client talks to. The sandbox uses its own tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    pub fn from_sandbox_flag(sandbox: bool) -> Self {
        if sandbox {
            Self::Sandbox
        } else {
            Self::Production
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::Production => PRODUCTION_URL,
            Self::Sandbox => SANDBOX_URL,
        }
    }
}

impl Display for Environment {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Production => fmt.write_str("production"),
            Self::Sandbox => fmt.write_str("sandbox"),
        }
    }
}

/// Errors surfaced by the Zenodo client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no {0} access token configured")]
    MissingToken(Environment),

    #[error("access token contains characters that are not allowed in a header")]
    InvalidToken,

    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    #[error("failed to send request to {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Zenodo returned {status} for {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("invalid URL '{url}': {reason}")]
    Url { url: String, reason: String },

    #[error("deposition {0} is published and cannot be modified")]
    Published(u64),
}

/// A deposition as returned by `/deposit/depositions`.
///
/// Fields this crate does not interpret are kept in `extra` so the record
/// can be printed back as JSON without losing anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Deposition {
    pub id: u64,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub submitted: bool,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    #[serde(default)]
    pub links: DepositionLinks,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DepositionMetadata>,

    #[serde(default)]
    pub files: Vec<DepositionFile>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Deposition {
    /// Published records are finalized and must not be touched again.
    pub fn is_published(&self) -> bool {
        self.submitted || self.state == "done"
    }

    /// Zenodo reports an empty DOI for drafts.
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref().filter(|doi| !doi.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositionLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_draft_html: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_html: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DepositionLinks {
    /// Page where a draft can be reviewed and published by hand.
    pub fn draft_url(&self) -> Option<&str> {
        self.latest_draft_html.as_deref().or(self.html.as_deref())
    }
}

/// File attached to a deposition. The bucket API answers with `key`/`size`
/// where the files listing uses `filename`/`filesize`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, alias = "key")]
    pub filename: String,

    #[serde(default, alias = "size")]
    pub filesize: u64,

    #[serde(default)]
    pub checksum: String,
}

/// Deposition metadata. Zenodo requires `title`, `upload_type`,
/// `description` and at least one creator before publishing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositionMetadata {
    #[serde(default)]
    pub title: String,

    #[serde(default = "default_upload_type")]
    pub upload_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub creators: Vec<Creator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DepositionMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            upload_type: default_upload_type(),
            description: String::new(),
            creators: Vec::new(),
            version: None,
            keywords: None,
            extra: Map::new(),
        }
    }
}

pub fn default_upload_type() -> String {
    "dataset".into()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Creator {
    pub fn new(name: impl Into<String>, affiliation: Option<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: affiliation.filter(|value| !value.is_empty()),
            extra: Map::new(),
        }
    }
}

#[derive(Serialize)]
struct MetadataPayload<'a> {
    metadata: &'a DepositionMetadata,
}

/// Submission state filter accepted by the listing endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListStatus {
    Draft,
    Published,
}

impl ListStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

impl FromStr for ListStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown status '{other}', expected 'draft' or 'published'")),
        }
    }
}

/// Query parameters for `list_depositions`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub status: Option<ListStatus>,
    pub size: Option<u32>,
    pub query: Option<String>,
}

impl ListQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(status) = self.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(size) = self.size {
            params.push(("size", size.to_string()));
        }
        if let Some(query) = &self.query {
            params.push(("q", query.clone()));
        }
        params
    }
}

/// Operations the upload and update workflows need from Zenodo.
#[cfg_attr(test, mockall::automock)]
pub trait DepositionApi {
    /// Environment the calls are issued against.
    fn environment(&self) -> Environment;

    /// Create a new draft deposition, optionally with initial metadata.
    fn create_deposition(
        &self,
        metadata: Option<DepositionMetadata>,
    ) -> Result<Deposition, ApiError>;

    fn get_deposition(&self, id: u64) -> Result<Deposition, ApiError>;

    /// Stream one local file into the deposition.
    fn upload_file(&self, deposition: &Deposition, path: &Path)
        -> Result<DepositionFile, ApiError>;

    /// Replace the metadata of a draft.
    fn update_metadata(
        &self,
        id: u64,
        metadata: &DepositionMetadata,
    ) -> Result<Deposition, ApiError>;

    fn publish(&self, id: u64) -> Result<Deposition, ApiError>;

    /// List the depositions owned by the token's account.
    fn list_depositions(&self, query: &ListQuery) -> Result<Vec<Deposition>, ApiError>;
}

/// Blocking Zenodo client holding a reqwest client with the bearer token
/// baked into its default headers.
#[derive(Clone)]
pub struct ZenodoClient {
    client: Client,
    base_url: String,
    environment: Environment,
}

impl ZenodoClient {
    /// Create a client for the public API of `environment`.
    pub fn new(environment: Environment, token: &str) -> Result<Self, ApiError> {
        Self::with_base_url(environment, environment.base_url(), token)
    }

    /// Create a client against a custom API root, e.g. a self-hosted
    /// Invenio instance.
    pub fn with_base_url(
        environment: Environment,
        base_url: impl Into<String>,
        token: &str,
    ) -> Result<Self, ApiError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::MissingToken(environment));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        // Large uploads can take far longer than reqwest's default timeout.
        let no_timeout: Option<Duration> = None;
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(no_timeout)
            .build()
            .map_err(ApiError::Build)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            environment,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, ApiError> {
        let response = request.send().map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        check_status(response, url)
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, ApiError> {
        let response = self.send(request, url)?;
        response.json().map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl DepositionApi for ZenodoClient {
    fn environment(&self) -> Environment {
        self.environment
    }

    fn create_deposition(
        &self,
        metadata: Option<DepositionMetadata>,
    ) -> Result<Deposition, ApiError> {
        let url = self.endpoint("deposit/depositions");
        debug!(%url, "creating deposition");
        let request = match &metadata {
            Some(metadata) => self.client.post(&url).json(&MetadataPayload { metadata }),
            None => self.client.post(&url).json(&Map::new()),
        };
        self.send_json(request, &url)
    }

    fn get_deposition(&self, id: u64) -> Result<Deposition, ApiError> {
        let url = self.endpoint(&format!("deposit/depositions/{id}"));
        debug!(%url, "fetching deposition");
        self.send_json(self.client.get(&url), &url)
    }

    fn upload_file(
        &self,
        deposition: &Deposition,
        path: &Path,
    ) -> Result<DepositionFile, ApiError> {
        let filename = file_name(path)?;
        let io_error = |source: std::io::Error| ApiError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let size = file.metadata().map_err(io_error)?.len();

        let progress = upload_progress(&filename, size);
        let reader = progress.wrap_read(file);

        let result: Result<DepositionFile, ApiError> = match &deposition.links.bucket {
            Some(bucket) => {
                let url = bucket_file_url(bucket, &filename)?;
                debug!(%url, size, "uploading file to bucket");
                let request = self
                    .client
                    .put(url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(Body::sized(reader, size));
                self.send_json(request, url.as_str())
            }
            None => {
                let url = self.endpoint(&format!("deposit/depositions/{}/files", deposition.id));
                debug!(%url, size, "uploading file as multipart form");
                let part = multipart::Part::reader_with_length(reader, size)
                    .file_name(filename.clone());
                let form = multipart::Form::new()
                    .text("name", filename.clone())
                    .part("file", part);
                self.send_json(self.client.post(&url).multipart(form), &url)
            }
        };

        match &result {
            Ok(_) => progress.finish_and_clear(),
            Err(_) => progress.abandon(),
        }
        result
    }

    fn update_metadata(
        &self,
        id: u64,
        metadata: &DepositionMetadata,
    ) -> Result<Deposition, ApiError> {
        let url = self.endpoint(&format!("deposit/depositions/{id}"));
        debug!(%url, "updating metadata");
        let request = self.client.put(&url).json(&MetadataPayload { metadata });
        self.send_json(request, &url)
    }

    fn publish(&self, id: u64) -> Result<Deposition, ApiError> {
        let url = self.endpoint(&format!("deposit/depositions/{id}/actions/publish"));
        debug!(%url, "publishing deposition");
        self.send_json(self.client.post(&url), &url)
    }

    fn list_depositions(&self, query: &ListQuery) -> Result<Vec<Deposition>, ApiError> {
        let url = self.endpoint("deposit/depositions");
        debug!(%url, ?query, "listing depositions");
        self.send_json(self.client.get(&url).query(&query.params()), &url)
    }
}

/// Turn a non-success response into `ApiError::Status`, keeping the body
/// since Zenodo explains validation failures there.
fn check_status(response: Response, url: &str) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(ApiError::Status {
        status,
        url: url.to_string(),
        body,
    })
}

fn file_name(path: &Path) -> Result<String, ApiError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ApiError::NoFileName(path.to_path_buf()))
}

/// Append `filename` to a bucket URL as a single, percent-encoded segment.
fn bucket_file_url(bucket: &str, filename: &str) -> Result<Url, ApiError> {
    let invalid = |reason: String| ApiError::Url {
        url: bucket.to_string(),
        reason,
    };
    let mut url = Url::parse(bucket).map_err(|err| invalid(err.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| invalid("URL cannot be a base".into()))?;
        segments.pop_if_empty().push(filename);
    }
    Ok(url)
}

fn upload_progress(filename: &str, size: u64) -> ProgressBar {
    let progress = ProgressBar::new(size);
    let style = ProgressStyle::with_template(
        "     {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    progress.set_style(style);
    progress.set_message(filename.to_string());
    progress
}
