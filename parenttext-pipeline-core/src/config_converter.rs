//! Conversion of legacy (pre-`meta`) configuration documents.
//!
//! Legacy documents describe a single flow source under `sources[0]` and carry
//! every step parameter at the top level. The converter is a total, pure
//! function: missing keys become `null` and are resolved to defaults (or
//! rejected) by the typed loader afterwards.

use serde_json::{json, Map, Value};

fn get<'a>(map: &'a Value, key: &str) -> Value {
    map.get(key).cloned().unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

fn sheet_ids(legacy: &Value, keys: &[&str]) -> Value {
    Value::Array(
        keys.iter()
            .map(|key| get(legacy, key))
            .filter(truthy)
            .collect(),
    )
}

/// Maps a legacy configuration document onto the current layout.
pub fn convert_legacy_config(legacy: &Value, pipeline_version: &str) -> Value {
    let first_source = legacy
        .get("sources")
        .and_then(|s| s.get(0))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let mut sources = Map::new();
    sources.insert(
        "flow_definitions".into(),
        json!({
            "format": "sheets",
            "subformat": "google_sheets",
            "files_list": get(&first_source, "spreadsheet_ids"),
            "files_archive": get(&first_source, "archive"),
        }),
    );
    sources.insert(
        "edits_pretranslation".into(),
        json!({
            "format": "sheets",
            "subformat": "google_sheets",
            "files_list": sheet_ids(legacy, &["ab_testing_sheet_id", "localisation_sheet_id"]),
        }),
    );
    sources.insert(
        "edits_posttranslation".into(),
        json!({
            "format": "sheets",
            "subformat": "google_sheets",
            "files_list": sheet_ids(legacy, &["transl_edits_sheet_id", "eng_edits_sheet_id"]),
        }),
    );
    sources.insert(
        "translation".into(),
        json!({
            "format": "translation_repo",
            "translation_repo": get(legacy, "translation_repo"),
            "folder_within_repo": get(legacy, "folder_within_repo"),
            "languages": get(legacy, "languages"),
        }),
    );
    sources.insert(
        "expiration_times".into(),
        json!({
            "format": "json",
            "files_dict": {
                "special_expiration_file": get(legacy, "special_expiration"),
            },
        }),
    );
    sources.insert(
        "qr_treatment".into(),
        json!({
            "format": "json",
            "files_dict": {
                "select_phrases_file": get(legacy, "select_phrases"),
                "special_words_file": get(legacy, "special_words"),
            },
        }),
    );

    let mut steps = vec![
        json!({
            "id": "create_flows",
            "type": "create_flows",
            "sources": ["flow_definitions"],
            "models_module": get(legacy, "model"),
            "tags": get(&first_source, "tags"),
        }),
        json!({
            "id": "update_expiration_times",
            "type": "update_expiration_times",
            "sources": ["expiration_times"],
            "default_expiration_time": get(legacy, "default_expiration"),
        }),
        json!({
            "id": "edits_pretranslation",
            "type": "edits",
            "sources": ["edits_pretranslation"],
        }),
        json!({"id": "hasanyword_pretranslation", "type": "has_any_word_check"}),
        json!({
            "id": "overall_integrity_check_pretranslation",
            "type": "overall_integrity_check",
        }),
        json!({
            "id": "extract_texts_for_translators",
            "type": "extract_texts_for_translators",
        }),
        json!({
            "id": "translation",
            "type": "translation",
            "sources": ["translation"],
            "languages": get(legacy, "languages"),
        }),
        json!({
            "id": "edits_posttranslation",
            "type": "edits",
            "sources": ["edits_posttranslation"],
        }),
        json!({"id": "hasanyword_posttranslation", "type": "has_any_word_check"}),
        json!({"id": "fix_arg_qr_translation", "type": "fix_arg_qr_translation"}),
        json!({
            "id": "overall_integrity_check_posttranslation",
            "type": "overall_integrity_check",
        }),
        json!({
            "id": "qr_treatment",
            "type": "qr_treatment",
            "sources": ["qr_treatment"],
            "qr_treatment": get(legacy, "qr_treatment"),
            "count_threshold": get(legacy, "count_threshold"),
            "length_threshold": get(legacy, "length_threshold"),
            "add_selectors": get(legacy, "add_selectors"),
        }),
    ];

    // A deployment without safeguarding material has nothing to pull or apply.
    let sg_path = get(legacy, "sg_path");
    let sg_sources = get(legacy, "sg_sources");
    if truthy(&sg_path) || truthy(&sg_sources) {
        sources.insert(
            "safeguarding".into(),
            json!({
                "format": "safeguarding",
                "filepath": sg_path,
                "sources": sg_sources,
            }),
        );
        steps.push(json!({
            "id": "safeguarding",
            "type": "safeguarding",
            "sources": ["safeguarding"],
            "flow_uuid": get(legacy, "sg_flow_id"),
            "flow_name": get(legacy, "sg_flow_name"),
            "redirect_flow_names": get(legacy, "redirect_flow_names"),
        }));
    }

    json!({
        "meta": {"pipeline_version": pipeline_version},
        "parents": [],
        "flows_outputbasename": get(&first_source, "filename"),
        "output_split_number": get(&first_source, "split_no"),
        "sources": Value::Object(sources),
        "steps": Value::Array(steps),
    })
}
