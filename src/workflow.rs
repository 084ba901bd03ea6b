// Workflow module: the fixed call sequences behind `upload` and `update`.
// Both are written against `DepositionApi` so they can run on any client.

use crate::api::{ApiError, Deposition, DepositionApi, DepositionMetadata};
use crate::config::Limits;
use crate::ui;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert gigabytes (1024^3 bytes) to bytes, truncating.
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB) as u64
}

/// Byte limits enforced before anything is sent to Zenodo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_file_bytes: u64,
    pub total_bytes: u64,
}

impl SizeLimits {
    pub fn from_gb(max_file_gb: f64, total_gb: f64) -> Self {
        Self {
            max_file_bytes: gb_to_bytes(max_file_gb),
            total_bytes: gb_to_bytes(total_gb),
        }
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Limits::default().into()
    }
}

impl From<Limits> for SizeLimits {
    fn from(limits: Limits) -> Self {
        Self::from_gb(limits.max_file_size_gb, limits.total_size_limit_gb)
    }
}

/// Outcome of the pre-flight check.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FileSelection {
    /// Files to upload, in the order given.
    pub accepted: Vec<PathBuf>,

    /// Files over the per-file limit.
    pub skipped: Vec<PathBuf>,

    /// Combined size of the accepted files.
    pub total_bytes: u64,
}

/// Check that every path exists, drop files over the per-file limit and
/// refuse selections whose total exceeds the overall limit.
pub fn select_files(paths: &[PathBuf], limits: &SizeLimits) -> Result<FileSelection> {
    let mut selection = FileSelection::default();

    for path in paths {
        let metadata = fs::metadata(path)
            .with_context(|| format!("file not found: '{}'", path.display()))?;
        if !metadata.is_file() {
            bail!("not a regular file: '{}'", path.display());
        }

        let size = metadata.len();
        if size > limits.max_file_bytes {
            warn!(path = %path.display(), size, limit = limits.max_file_bytes, "skipping oversized file");
            ui::warning(format!("File '{}' exceeds size limit. Skipping.", display_name(path)));
            selection.skipped.push(path.clone());
            continue;
        }

        selection.accepted.push(path.clone());
        selection.total_bytes += size;
    }

    if selection.total_bytes > limits.total_bytes {
        bail!(
            "total file size of {} bytes exceeds the limit of {} bytes",
            selection.total_bytes,
            limits.total_bytes
        );
    }

    Ok(selection)
}

/// Everything needed to create a new deposition.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadRequest {
    pub file_paths: Vec<PathBuf>,
    pub metadata: DepositionMetadata,
    pub limits: SizeLimits,

    /// Publish at the end instead of leaving a draft.
    pub publish: bool,
}

/// Create a deposition, upload the files, set metadata and optionally
/// publish.
///
/// Returns `None` when no file survives the pre-flight check, in which case
/// Zenodo is never contacted.
pub fn upload(api: &dyn DepositionApi, request: &UploadRequest) -> Result<Option<Deposition>> {
    ui::banner(api.environment());

    ui::step(0, "Checking file sizes and total capacity...");
    let selection = select_files(&request.file_paths, &request.limits)?;
    if selection.accepted.is_empty() {
        ui::warning("No valid files to upload.");
        return Ok(None);
    }

    ui::step(1, "Creating new deposition record...");
    let deposition = api
        .create_deposition(None)
        .context("failed to create deposition")?;
    info!(id = deposition.id, "created deposition");
    ui::success(format!("Deposition ID: {}", deposition.id));

    ui::step(2, format!("Starting upload of {} files...", selection.accepted.len()));
    upload_files(api, &deposition, &selection.accepted)?;

    ui::step(3, "Adding metadata...");
    let draft = api
        .update_metadata(deposition.id, &request.metadata)
        .with_context(|| format!("failed to set metadata on deposition {}", deposition.id))?;
    ui::success("Metadata added successfully!");

    finish(api, draft, request.publish).map(Some)
}

/// Changes to apply to an existing draft.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateRequest {
    pub id: u64,
    pub add_files: Vec<PathBuf>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub version: Option<String>,
    pub limits: SizeLimits,
    pub publish: bool,
}

impl UpdateRequest {
    fn changes_metadata(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.keywords.is_some()
            || self.version.is_some()
    }

    /// Overlay the requested fields onto `metadata`.
    fn apply_to(&self, metadata: &mut DepositionMetadata) {
        if let Some(title) = &self.title {
            metadata.title = title.clone();
        }
        if let Some(description) = &self.description {
            metadata.description = description.clone();
        }
        if let Some(keywords) = &self.keywords {
            metadata.keywords = Some(keywords.clone());
        }
        if let Some(version) = &self.version {
            metadata.version = Some(version.clone());
        }
    }
}

/// Add files to and/or edit the metadata of an unpublished deposition.
///
/// Published depositions are refused before any change is made.
pub fn update(api: &dyn DepositionApi, request: &UpdateRequest) -> Result<Deposition> {
    ui::banner(api.environment());

    ui::step(1, format!("Fetching deposition {}...", request.id));
    let mut deposition = api
        .get_deposition(request.id)
        .with_context(|| format!("failed to fetch deposition {}", request.id))?;
    if deposition.is_published() {
        return Err(ApiError::Published(deposition.id).into());
    }
    ui::success(format!("Found draft '{}'", deposition.title));

    if !request.add_files.is_empty() {
        ui::step(2, "Checking file sizes and total capacity...");
        let selection = select_files(&request.add_files, &request.limits)?;
        if selection.accepted.is_empty() {
            ui::warning("No valid files to upload.");
        } else {
            ui::item(format!("Starting upload of {} files...", selection.accepted.len()));
            upload_files(api, &deposition, &selection.accepted)?;
        }
    }

    if request.changes_metadata() {
        ui::step(3, "Updating metadata...");
        let mut metadata = deposition.metadata.clone().unwrap_or_default();
        request.apply_to(&mut metadata);
        deposition = api
            .update_metadata(deposition.id, &metadata)
            .with_context(|| format!("failed to update metadata of deposition {}", deposition.id))?;
        ui::success("Metadata updated successfully!");
    }

    finish(api, deposition, request.publish)
}

fn upload_files(api: &dyn DepositionApi, deposition: &Deposition, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        ui::item(format!("Uploading: {}...", display_name(path)));
        info!(id = deposition.id, path = %path.display(), "uploading file");
        api.upload_file(deposition, path)
            .with_context(|| format!("failed to upload '{}'", path.display()))?;
    }
    ui::success("All files uploaded successfully!");
    Ok(())
}

fn finish(api: &dyn DepositionApi, deposition: Deposition, publish: bool) -> Result<Deposition> {
    if !publish {
        ui::report_draft(&deposition);
        return Ok(deposition);
    }

    ui::step(4, "Publishing record...");
    let published = api
        .publish(deposition.id)
        .with_context(|| format!("failed to publish deposition {}", deposition.id))?;
    info!(id = published.id, doi = ?published.doi(), "published deposition");
    ui::report_published(&published);
    Ok(published)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
