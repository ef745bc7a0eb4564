//! The `pull_data` operation: materialise every source into the input cache.
//!
//! Sheets and translation files are pulled incrementally against the timestamp
//! of the last successful pull. A failure on a single item is logged and the
//! item skipped, leaving its previously cached file in place; failures that
//! prevent a whole source from being processed abort the run. The pull
//! timestamp only advances when every item was pulled, so failed items are
//! retried next time.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, JsonSource, SafeguardingSource, SheetSubformat, SheetsSource, SourceConfig, TranslationSource};
use crate::contract::{run_checked, Drive, ExternalTool, RepoFile, RepoRef, SheetConverter, ToolInvocation, TranslationRepo};
use crate::error::{PullError, RemoteError};
use crate::fs_util::clear_or_create_dir;
use crate::keywords::{process_keywords_to_file, KeywordWorkbook};
use crate::meta::{read_meta, write_meta, PullMeta};
use crate::remote::download_archive;
use crate::steps::sheet_names;
use crate::tools::TRANSLATION_COMMON;
use crate::PIPELINE_VERSION;

pub const SAFEGUARDING_WORDS_FILE: &str = "safeguarding_words.json";
const RAW_PO_DIR: &str = "raw_po_files";

static DRIVE_FILE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{33}$").expect("valid drive id regex"));
static SHEETS_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{44}$").expect("valid sheets id regex"));

/// Collaborators used while pulling.
#[derive(Clone)]
pub struct PullContext {
    pub drive: Arc<dyn Drive>,
    pub sheets: Arc<dyn SheetConverter>,
    pub repo: Arc<dyn TranslationRepo>,
    pub tool: Arc<dyn ExternalTool>,
    pub http: reqwest::Client,
}

/// What happened to the items of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePullReport {
    pub source: String,
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub removed: Vec<String>,
}

impl SourcePullReport {
    fn new(source: &str) -> Self {
        SourcePullReport {
            source: source.to_owned(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullReport {
    pub sources: Vec<SourcePullReport>,
    /// Metadata written for this pull; `None` when nothing could be recorded.
    pub meta: Option<PullMeta>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PullError + '_ {
    move |e| PullError::Io {
        path: path.to_path_buf(),
        source: e,
    }
}

pub async fn run(config: &Config, ctx: &PullContext) -> Result<PullReport, PullError> {
    let last_update = read_meta(&config.inputpath).map(|meta| meta.pull_timestamp);
    match last_update {
        Some(ts) => info!(last_update = %ts, "[PULL] Incremental pull"),
        None => info!("[PULL] No previous pull recorded, updating everything"),
    }

    // The input path is managed incrementally; only temp is wiped.
    clear_or_create_dir(&config.temppath).map_err(io_err(&config.temppath))?;

    let mut reports = Vec::new();
    for (name, source) in &config.sources {
        let report = match source {
            SourceConfig::Sheets(sheets) => pull_sheets(config, name, sheets, last_update, ctx).await?,
            SourceConfig::Json(json) => pull_json(config, name, json)?,
            SourceConfig::TranslationRepo(repo) => {
                pull_translations(config, name, repo, last_update, ctx).await?
            }
            SourceConfig::Safeguarding(sg) => pull_safeguarding(config, name, sg, ctx).await?,
            SourceConfig::MediaAssets(_) => {
                debug!(source = %name, "[PULL] Skipping media assets source");
                continue;
            }
        };
        info!(
            source = %name,
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            "[PULL] Pulled all {name} data"
        );
        reports.push(report);
    }

    let failures: usize = reports.iter().map(|r| r.failed.len()).sum();
    let fresh = PullMeta::now(PIPELINE_VERSION, config.meta.config_version.clone());
    let meta = match (failures, last_update) {
        (0, _) => Some(fresh),
        (_, Some(previous)) => {
            warn!(failures, last_update = %previous, "[PULL] Some items failed, keeping the previous pull timestamp");
            Some(PullMeta {
                pull_timestamp: previous,
                ..fresh
            })
        }
        (_, None) => {
            warn!(failures, "[PULL] Some items failed, no pull timestamp recorded");
            None
        }
    };
    if let Some(meta) = &meta {
        write_meta(&config.inputpath, meta)?;
    }
    info!("[PULL] DONE.");
    Ok(PullReport {
        sources: reports,
        meta,
    })
}

/// Whether a cached item must be pulled again. Items with an unknown modified
/// time are refetched.
pub fn needs_fetch(
    last_update: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    cached: bool,
) -> bool {
    match last_update {
        None => true,
        Some(_) if !cached => true,
        Some(last) => modified.map_or(true, |m| m > last),
    }
}

/// Deletes `*.json` files in `dir` whose stem is not in `expected`.
fn remove_obsolete(dir: &Path, expected: &HashSet<String>) -> Result<Vec<String>, PullError> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
            continue;
        };
        if !expected.contains(&stem) {
            info!(file = ?path, "[PULL] Removing obsolete file");
            fs::remove_file(&path).map_err(io_err(&path))?;
            removed.push(stem);
        }
    }
    removed.sort();
    Ok(removed)
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), PullError> {
    let archive_err = |reason: String| PullError::Archive {
        path: archive.to_path_buf(),
        reason,
    };
    let file = fs::File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
    zip.extract(dest).map_err(|e| archive_err(e.to_string()))?;
    debug!(archive = ?archive, dest = ?dest, "[PULL] Unpacked archive");
    Ok(())
}

fn local_modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

pub async fn pull_sheets(
    config: &Config,
    name: &str,
    source: &SheetsSource,
    last_update: Option<DateTime<Utc>>,
    ctx: &PullContext,
) -> Result<SourcePullReport, PullError> {
    let mut report = SourcePullReport::new(name);
    let input_dir = config.source_input_dir(name);
    fs::create_dir_all(&input_dir).map_err(io_err(&input_dir))?;

    // Kept alive until the pull is done; dropping it removes the unpacked archive.
    let mut unpacked = None;
    let base: PathBuf = match &source.files_archive {
        Some(location) => {
            let archive = download_archive(&ctx.http, location, &config.source_temp_dir(name)).await?;
            let dir = tempfile::tempdir().map_err(io_err(&config.temppath))?;
            unpack_zip(&archive, dir.path())?;
            let path = dir.path().to_path_buf();
            unpacked = Some(dir);
            path
        }
        None => source.basepath.clone().unwrap_or_else(|| PathBuf::from(".")),
    };

    let lookup: BTreeMap<String, String> = source
        .files_list
        .iter()
        .map(|n| (n.clone(), config.resolve_sheet_id(n)))
        .chain(
            source
                .files_dict
                .iter()
                .map(|(n, sheet)| (n.clone(), config.resolve_sheet_id(sheet))),
        )
        .collect();
    let all_sheets: Vec<(String, String)> = sheet_names(source)
        .into_iter()
        .filter_map(|n| lookup.get(&n).map(|id| (n, id.clone())))
        .collect();

    let location_of = |id: &str| -> String {
        if source.subformat.is_remote() {
            id.to_owned()
        } else {
            base.join(id).to_string_lossy().into_owned()
        }
    };

    let modified: BTreeMap<String, Option<DateTime<Utc>>> = if source.subformat.is_remote() {
        let ids: Vec<String> = all_sheets.iter().map(|(_, id)| id.clone()).collect();
        match ctx.drive.modified_times(&ids).await {
            Ok(times) => times.into_iter().collect(),
            Err(e) => {
                warn!(source = %name, error = %e, "[PULL] Could not read modified times, refetching all sheets");
                BTreeMap::new()
            }
        }
    } else if unpacked.is_some() {
        BTreeMap::new()
    } else {
        all_sheets
            .iter()
            .map(|(_, id)| (id.clone(), local_modified_time(Path::new(&location_of(id)))))
            .collect()
    };

    let mut to_fetch = Vec::new();
    for (sheet_name, sheet_id) in &all_sheets {
        let cached = input_dir.join(format!("{sheet_name}.json")).exists();
        let modified_time = modified.get(sheet_id).copied().flatten();
        if needs_fetch(last_update, modified_time, cached) {
            to_fetch.push((sheet_name.clone(), location_of(sheet_id)));
        } else {
            report.skipped.push(sheet_name.clone());
        }
    }

    let subformat: SheetSubformat = source.subformat;
    let converter = ctx.sheets.clone();
    let results: Vec<(String, Result<String, RemoteError>)> = stream::iter(to_fetch)
        .map(|(sheet_name, location)| {
            let converter = converter.clone();
            async move {
                let result = converter.to_json(subformat, &location).await;
                (sheet_name, result)
            }
        })
        .buffer_unordered(config.fetch_concurrency)
        .collect()
        .await;

    for (sheet_name, result) in results {
        match result {
            Ok(content) => {
                let dest = input_dir.join(format!("{sheet_name}.json"));
                fs::write(&dest, content).map_err(io_err(&dest))?;
                info!(source = %name, sheet = %sheet_name, "[PULL] Pulled updated sheet");
                report.fetched.push(sheet_name);
            }
            Err(e) => {
                error!(source = %name, sheet = %sheet_name, error = %e, "[PULL] Error downloading sheet");
                report.failed.push(sheet_name);
            }
        }
    }
    report.fetched.sort();
    report.failed.sort();

    let expected: HashSet<String> = all_sheets.into_iter().map(|(n, _)| n).collect();
    report.removed = remove_obsolete(&input_dir, &expected)?;
    drop(unpacked);
    Ok(report)
}

pub fn pull_json(config: &Config, name: &str, source: &JsonSource) -> Result<SourcePullReport, PullError> {
    let mut report = SourcePullReport::new(name);
    let input_dir = config.source_input_dir(name);
    fs::create_dir_all(&input_dir).map_err(io_err(&input_dir))?;

    for (key, path) in &source.files_dict {
        let Some(path) = path else {
            debug!(source = %name, key = %key, "[PULL] No file configured, skipping");
            report.skipped.push(key.clone());
            continue;
        };
        let dest = input_dir.join(format!("{key}.json"));
        fs::copy(path, &dest).map_err(io_err(path))?;
        report.fetched.push(key.clone());
    }
    Ok(report)
}

/// Remote `.po` files of a language folder, and the subset to download.
pub async fn select_translation_files(
    repo_api: &dyn TranslationRepo,
    repo: &RepoRef,
    folder: &str,
    last_update: Option<DateTime<Utc>>,
) -> Result<(Vec<RepoFile>, Vec<RepoFile>), RemoteError> {
    let remote: Vec<RepoFile> = repo_api
        .list_files(repo, folder)
        .await?
        .into_iter()
        .filter(|f| f.path.ends_with(".po"))
        .collect();

    let Some(last) = last_update else {
        let all = remote.iter().filter(|f| f.path.contains(folder)).cloned().collect();
        return Ok((remote, all));
    };

    let head = repo_api.latest_commit(repo).await?;
    let Some(base) = repo_api.commit_before(repo, last).await? else {
        info!(%repo, "[PULL] No commit before last pull, downloading all translations");
        let all = remote.iter().filter(|f| f.path.contains(folder)).cloned().collect();
        return Ok((remote, all));
    };

    let changed: HashSet<String> = repo_api
        .changed_files(repo, &base, &head)
        .await?
        .into_iter()
        .filter(|path| path.contains(folder))
        .collect();
    let delta = remote.iter().filter(|f| changed.contains(&f.path)).cloned().collect();
    Ok((remote, delta))
}

fn po_stem(file: &RepoFile) -> String {
    Path::new(&file.name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.name.clone())
}

pub async fn pull_translations(
    config: &Config,
    name: &str,
    source: &TranslationSource,
    last_update: Option<DateTime<Utc>>,
    ctx: &PullContext,
) -> Result<SourcePullReport, PullError> {
    let mut report = SourcePullReport::new(name);
    let repo = RepoRef::parse(&source.translation_repo)?;

    for lang in &source.languages {
        let code = &lang.code;
        let input_dir = config.source_input_dir(name).join(code);
        let po_dir = config.source_temp_dir(name).join(code).join(RAW_PO_DIR);
        clear_or_create_dir(&po_dir).map_err(io_err(&po_dir))?;
        fs::create_dir_all(&input_dir).map_err(io_err(&input_dir))?;

        let folder = format!("{}/{}", source.folder_within_repo, code);
        let (remote, mut selected) =
            match select_translation_files(ctx.repo.as_ref(), &repo, &folder, last_update).await {
                Ok(selection) => selection,
                Err(e) => {
                    error!(%repo, folder = %folder, error = %e, "[PULL] Could not list translations, keeping cache");
                    report.failed.push(code.clone());
                    continue;
                }
            };

        // Files never converted locally are pulled whatever the history says.
        for file in &remote {
            let cached = input_dir.join(format!("{}.json", po_stem(file))).exists();
            if !cached && !selected.iter().any(|s| s.path == file.path) {
                selected.push(file.clone());
            }
        }

        let selected_paths: HashSet<&str> = selected.iter().map(|f| f.path.as_str()).collect();
        report.skipped.extend(
            remote
                .iter()
                .filter(|f| !selected_paths.contains(f.path.as_str()))
                .map(|f| format!("{code}/{}", po_stem(f))),
        );

        let repo_api = ctx.repo.clone();
        let downloads: Vec<(RepoFile, Result<Vec<u8>, RemoteError>)> = stream::iter(selected)
            .map(|file| {
                let repo_api = repo_api.clone();
                async move {
                    let result = repo_api.download(&file).await;
                    (file, result)
                }
            })
            .buffer_unordered(config.fetch_concurrency)
            .collect()
            .await;

        for (file, result) in downloads {
            let label = format!("{code}/{}", po_stem(&file));
            let content = match result {
                Ok(content) => content,
                Err(e) => {
                    error!(file = %file.path, error = %e, "[PULL] Error downloading translation");
                    report.failed.push(label);
                    continue;
                }
            };
            let po_path = po_dir.join(&file.name);
            fs::write(&po_path, content).map_err(io_err(&po_path))?;

            let dest = input_dir.join(format!("{}.json", po_stem(&file)));
            let convert = ToolInvocation::new(
                TRANSLATION_COMMON,
                [
                    "convert".to_owned(),
                    po_path.to_string_lossy().into_owned(),
                    dest.to_string_lossy().into_owned(),
                ],
            );
            match run_checked(ctx.tool.as_ref(), convert).await {
                Ok(()) => {
                    info!(file = %file.name, "[PULL] Pulled updated translation");
                    report.fetched.push(label);
                }
                Err(e) => {
                    error!(file = %file.name, error = %e, "[PULL] Error converting translation");
                    report.failed.push(label);
                }
            }
        }

        let expected: HashSet<String> = remote.iter().map(po_stem).collect();
        report.removed.extend(
            remove_obsolete(&input_dir, &expected)?
                .into_iter()
                .map(|stem| format!("{code}/{stem}")),
        );
    }

    report.fetched.sort();
    report.failed.sort();
    Ok(report)
}

pub fn is_google_drive_file_id(location: &str) -> bool {
    DRIVE_FILE_ID_RE.is_match(location)
}

pub fn is_google_sheets_id(location: &str) -> bool {
    SHEETS_ID_RE.is_match(location)
}

/// Local path of one safeguarding workbook, downloading it first when it lives on Drive.
async fn materialise_workbook(location: &str, dest: &Path, drive: &dyn Drive) -> Result<PathBuf, PullError> {
    if is_google_drive_file_id(location) {
        let file = drive.fetch(location).await?;
        let suffix = Path::new(&file.name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let path = dest.join(format!("{location}{suffix}"));
        fs::write(&path, &file.content).map_err(io_err(&path))?;
        Ok(path)
    } else if is_google_sheets_id(location) {
        let content = drive.export(location, ".xlsx").await?;
        let path = dest.join(format!("{location}.xlsx"));
        fs::write(&path, content).map_err(io_err(&path))?;
        Ok(path)
    } else {
        Ok(PathBuf::from(location))
    }
}

pub async fn pull_safeguarding(
    config: &Config,
    name: &str,
    source: &SafeguardingSource,
    ctx: &PullContext,
) -> Result<SourcePullReport, PullError> {
    let mut report = SourcePullReport::new(name);
    let input_dir = config.source_input_dir(name);
    fs::create_dir_all(&input_dir).map_err(io_err(&input_dir))?;
    let keywords_file = input_dir.join(SAFEGUARDING_WORDS_FILE);

    let workbooks = source.sources.as_deref().unwrap_or_default();
    if workbooks.is_empty() {
        // Validation guarantees a filepath when there are no workbooks.
        if let Some(filepath) = &source.filepath {
            fs::copy(filepath, &keywords_file).map_err(io_err(filepath))?;
            report.fetched.push(SAFEGUARDING_WORDS_FILE.to_owned());
        }
        return Ok(report);
    }

    let dest = config.source_temp_dir(name);
    fs::create_dir_all(&dest).map_err(io_err(&dest))?;

    let mut books = Vec::with_capacity(workbooks.len());
    for workbook in workbooks {
        let Some(location) = workbook.location() else {
            continue;
        };
        let key = workbook.language_key().to_owned();
        match materialise_workbook(location, &dest, ctx.drive.as_ref()).await {
            Ok(path) => books.push(KeywordWorkbook { key, path }),
            Err(e) => {
                error!(source = %name, workbook = %location, error = %e, "[PULL] Error downloading safeguarding workbook");
                report.failed.push(key);
            }
        }
    }

    // A partial word list would drop languages, so the cached one is kept.
    if !report.failed.is_empty() {
        warn!(source = %name, failed = ?report.failed, "[PULL] Keeping cached safeguarding words");
        report.skipped = books.into_iter().map(|b| b.key).collect();
        return Ok(report);
    }

    process_keywords_to_file(&books, &keywords_file)?;
    report.fetched = books.into_iter().map(|b| b.key).collect();
    Ok(report)
}
