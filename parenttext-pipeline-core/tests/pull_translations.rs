use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parenttext_pipeline_core::config::Config;
use parenttext_pipeline_core::contract::{
    MockDrive, MockExternalTool, MockSheetConverter, MockTranslationRepo, RepoFile, RepoRef, ToolStatus,
};
use parenttext_pipeline_core::error::RemoteError;
use parenttext_pipeline_core::meta::{write_meta, PullMeta};
use parenttext_pipeline_core::pull_data::{run, select_translation_files, PullContext};
use serde_json::json;
use tempfile::tempdir;

const FOLDER: &str = "translations/parent_text_v2";

fn translation_config(root: &Path) -> Config {
    Config::from_value(json!({
        "meta": {"pipeline_version": "1.0.0"},
        "flows_outputbasename": "parenttext_all",
        "outputpath": root.join("output"),
        "temppath": root.join("temp"),
        "inputpath": root.join("input"),
        "sources": {
            "translation": {
                "format": "translation_repo",
                "translation_repo": "https://github.com/IDEMSInternational/plh-translations.git",
                "folder_within_repo": FOLDER,
                "languages": [{"language": "zul", "code": "zu"}],
            },
        },
    }))
    .expect("config should load")
}

fn po_file(stem: &str) -> RepoFile {
    RepoFile {
        name: format!("{stem}.po"),
        path: format!("{FOLDER}/zu/{stem}.po"),
        download_url: Some(format!("https://raw.example.org/zu/{stem}.po")),
    }
}

fn listing() -> Vec<RepoFile> {
    let mut files = vec![po_file("flows"), po_file("quick_replies")];
    files.push(RepoFile {
        name: "README.md".to_owned(),
        path: format!("{FOLDER}/zu/README.md"),
        download_url: None,
    });
    files
}

/// A converter that writes an empty JSON object to the destination argument.
fn converting_tool(times: usize) -> MockExternalTool {
    let mut tool = MockExternalTool::new();
    tool.expect_invoke()
        .withf(|invocation| invocation.tool == "translation_common" && invocation.subcommand() == Some("convert"))
        .times(times)
        .returning(|invocation| {
            fs::write(&invocation.args[2], "{}").unwrap();
            Ok(ToolStatus::SUCCESS)
        });
    tool
}

fn context(repo: MockTranslationRepo, tool: MockExternalTool) -> PullContext {
    PullContext {
        drive: Arc::new(MockDrive::new()),
        sheets: Arc::new(MockSheetConverter::new()),
        repo: Arc::new(repo),
        tool: Arc::new(tool),
        http: reqwest::Client::new(),
    }
}

fn cache_translation(config: &Config, stem: &str) {
    let dir = config.source_input_dir("translation").join("zu");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{stem}.json")), "cached").unwrap();
}

#[tokio::test]
async fn test_first_pull_downloads_and_converts_every_po_file() {
    let root = tempdir().unwrap();
    let config = translation_config(root.path());

    let mut repo = MockTranslationRepo::new();
    repo.expect_list_files()
        .withf(|repo, folder| repo.name == "plh-translations" && folder == format!("{FOLDER}/zu"))
        .times(1)
        .returning(|_, _| Ok(listing()));
    repo.expect_latest_commit().times(0);
    repo.expect_download()
        .times(2)
        .returning(|file| Ok(format!("msgid \"{}\"", file.name).into_bytes()));

    let report = run(&config, &context(repo, converting_tool(2))).await.unwrap();

    let translations = &report.sources[0];
    assert_eq!(translations.fetched, vec!["zu/flows", "zu/quick_replies"]);
    assert!(translations.failed.is_empty());
    let cache = root.path().join("input/translation/zu");
    assert!(cache.join("flows.json").is_file());
    assert!(cache.join("quick_replies.json").is_file());
    assert_eq!(
        fs::read_to_string(root.path().join("temp/translation/zu/raw_po_files/flows.po")).unwrap(),
        "msgid \"flows.po\""
    );
}

#[tokio::test]
async fn test_incremental_pull_downloads_files_changed_since_last_pull() {
    let root = tempdir().unwrap();
    let config = translation_config(root.path());
    let last_pull = Utc::now() - Duration::days(3);
    write_meta(
        &config.inputpath,
        &PullMeta {
            pull_timestamp: last_pull,
            pipeline_version: None,
            config_version: None,
        },
    )
    .unwrap();
    cache_translation(&config, "flows");
    cache_translation(&config, "quick_replies");
    cache_translation(&config, "retired");

    let mut repo = MockTranslationRepo::new();
    repo.expect_list_files().times(1).returning(|_, _| Ok(listing()));
    repo.expect_latest_commit()
        .times(1)
        .returning(|_| Ok("head123".to_owned()));
    repo.expect_commit_before()
        .withf(move |_, until| *until == last_pull)
        .times(1)
        .returning(|_, _| Ok(Some("base456".to_owned())));
    repo.expect_changed_files()
        .withf(|_, base, head| base == "base456" && head == "head123")
        .times(1)
        .returning(|_, _, _| {
            Ok(vec![
                format!("{FOLDER}/zu/quick_replies.po"),
                format!("{FOLDER}/xh/quick_replies.po"),
                "README.md".to_owned(),
            ])
        });
    repo.expect_download()
        .withf(|file| file.name == "quick_replies.po")
        .times(1)
        .returning(|_| Ok(b"msgid \"\"".to_vec()));

    let report = run(&config, &context(repo, converting_tool(1))).await.unwrap();

    let translations = &report.sources[0];
    assert_eq!(translations.fetched, vec!["zu/quick_replies"]);
    assert_eq!(translations.skipped, vec!["zu/flows"]);
    assert_eq!(translations.removed, vec!["zu/retired"]);
    let cache = root.path().join("input/translation/zu");
    assert_eq!(fs::read_to_string(cache.join("flows.json")).unwrap(), "cached");
    assert_eq!(fs::read_to_string(cache.join("quick_replies.json")).unwrap(), "{}");
    assert!(!cache.join("retired.json").exists());
}

#[tokio::test]
async fn test_unreachable_repository_keeps_the_cache() {
    let root = tempdir().unwrap();
    let config = translation_config(root.path());
    cache_translation(&config, "flows");

    let mut repo = MockTranslationRepo::new();
    repo.expect_list_files().times(1).returning(|_, folder| {
        Err(RemoteError::Unexpected {
            url: folder.to_owned(),
            reason: "403 rate limited".to_owned(),
        })
    });
    repo.expect_download().times(0);

    let report = run(&config, &context(repo, converting_tool(0))).await.unwrap();

    assert_eq!(report.sources[0].failed, vec!["zu"]);
    assert_eq!(
        fs::read_to_string(root.path().join("input/translation/zu/flows.json")).unwrap(),
        "cached"
    );
}

#[tokio::test]
async fn test_no_commit_before_last_pull_selects_the_whole_folder() {
    let mut repo = MockTranslationRepo::new();
    repo.expect_list_files().returning(|_, _| Ok(listing()));
    repo.expect_latest_commit().returning(|_| Ok("head".to_owned()));
    repo.expect_commit_before().returning(|_, _| Ok(None));
    repo.expect_changed_files().times(0);

    let repo_ref = RepoRef::parse("https://github.com/IDEMSInternational/plh-translations").unwrap();
    let (remote, selected) = select_translation_files(
        &repo,
        &repo_ref,
        &format!("{FOLDER}/zu"),
        Some(Utc::now()),
    )
    .await
    .unwrap();

    assert_eq!(remote, vec![po_file("flows"), po_file("quick_replies")]);
    assert_eq!(selected, remote);
}
