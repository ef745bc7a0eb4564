//! Safeguarding keyword extraction from translated XLSX workbooks.
//!
//! Each worksheet holds at most one keyword table. The row above the table has a
//! fixed instruction text in column A; keyword columns run from B up to the
//! misspellings column, which is found by its header text.

use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::KeywordError;
use crate::flow_graph::to_pretty_json;

pub const TABLE_MARKER: &str = "Please insert translation of each word under each corresponding cell. If the particular word does not translate into the chosen language, please leave it blank";
pub const MISSPELLINGS_HEADER: &str =
    "Range of possible misspellings and common slang used by the population";

/// How many rows at the top of a sheet are searched for [`TABLE_MARKER`].
const MARKER_SEARCH_ROWS: usize = 10;

/// A worksheet as rows of optional cell texts, indexed from A1.
pub type Grid = Vec<Vec<Option<String>>>;

/// One workbook to extract, with the language key it is merged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordWorkbook {
    pub key: String,
    pub path: PathBuf,
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn cell<'a>(row: &'a [Option<String>], col: usize) -> Option<&'a str> {
    row.get(col).and_then(|c| c.as_deref())
}

/// Index of the first table row, i.e. the row after the marker.
pub fn find_table_row_start(grid: &Grid) -> Option<usize> {
    grid.iter()
        .take(MARKER_SEARCH_ROWS)
        .position(|row| cell(row, 0) == Some(TABLE_MARKER))
        .map(|index| index + 1)
}

/// Column of the first cell anywhere in the sheet holding [`MISSPELLINGS_HEADER`].
pub fn find_misspellings_col(grid: &Grid) -> Option<usize> {
    grid.iter()
        .find_map(|row| row.iter().position(|c| c.as_deref() == Some(MISSPELLINGS_HEADER)))
}

fn read_cols(row: &[Option<String>], start: usize, end: Option<usize>) -> Vec<String> {
    let end = end.unwrap_or(row.len()).min(row.len());
    if start >= end {
        return Vec::new();
    }
    row[start..end]
        .iter()
        .flatten()
        .map(|text| text.trim().to_owned())
        .collect()
}

/// `{word: {"keywords": [...], "mispellings": [...]}}` for a table row, or `None`
/// when the row holds no words.
pub fn create_wordset(row: &[Option<String>], misspellings_col: Option<usize>) -> Option<Value> {
    let keywords = read_cols(row, 1, misspellings_col);
    let misspellings = misspellings_col
        .map(|col| read_cols(row, col, None))
        .unwrap_or_default();
    if keywords.is_empty() && misspellings.is_empty() {
        return None;
    }
    let Some(word) = read_cols(row, 0, Some(1)).into_iter().next() else {
        debug!(?keywords, "[KEYWORDS] Row without a word in column A, skipping");
        return None;
    };
    let mut wordset = Map::new();
    wordset.insert(
        word,
        json!({
            "keywords": keywords,
            "mispellings": misspellings,
        }),
    );
    Some(Value::Object(wordset))
}

/// Rows of the keyword table of a sheet, or `None` when the sheet has no table.
pub fn process_sheet(grid: &Grid) -> Option<Vec<Value>> {
    let start = find_table_row_start(grid)?;
    let misspellings_col = find_misspellings_col(grid);
    Some(
        grid.iter()
            .skip(start)
            .filter_map(|row| create_wordset(row, misspellings_col))
            .collect(),
    )
}

fn load_grids(path: &Path) -> Result<Vec<(String, Grid)>, KeywordError> {
    let workbook_error = |reason: String| KeywordError::Workbook {
        path: path.to_path_buf(),
        reason,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;

    let mut grids = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| workbook_error(e.to_string()))?;
        let (row0, col0) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut grid: Grid = vec![vec![None; col0 + range.width()]; row0 + range.height()];
        for (r, c, data) in range.used_cells() {
            grid[row0 + r][col0 + c] = cell_text(data);
        }
        grids.push((name, grid));
    }
    Ok(grids)
}

/// Keyword tables of every sheet of a workbook, keyed by sheet name.
pub fn process_workbook(path: &Path) -> Result<Map<String, Value>, KeywordError> {
    let mut tables = Map::new();
    for (name, grid) in load_grids(path)? {
        match process_sheet(&grid) {
            Some(rows) => {
                debug!(sheet = %name, rows = rows.len(), "[KEYWORDS] Extracted keyword table");
                tables.insert(name, Value::Array(rows));
            }
            None => debug!(sheet = %name, "[KEYWORDS] No keyword table in sheet"),
        }
    }
    Ok(tables)
}

/// Merges per-language tables into the first language's tables. Each row of the
/// base gains one entry per other language; sheets missing from a language or
/// with a different number of rows are left alone for that language.
pub fn merge_languages(languages: Vec<(String, Map<String, Value>)>) -> Map<String, Value> {
    let mut languages = languages.into_iter();
    let Some((first_lang, mut merged)) = languages.next() else {
        return Map::new();
    };

    for (lang, tables) in languages {
        for (sheet, rows) in merged.iter_mut() {
            let Some(target_rows) = tables.get(sheet).and_then(Value::as_array) else {
                info!(sheet = %sheet, language = %lang, "[KEYWORDS] Sheet not found, skipping");
                continue;
            };
            let Some(rows) = rows.as_array_mut() else {
                continue;
            };
            if rows.len() != target_rows.len() {
                warn!(
                    sheet = %sheet,
                    base = %first_lang,
                    language = %lang,
                    "[KEYWORDS] Row count mismatch, skipping"
                );
                continue;
            }
            for (row, target) in rows.iter_mut().zip(target_rows) {
                let entry = target.get(&lang).cloned().unwrap_or_else(|| target.clone());
                if let Some(row) = row.as_object_mut() {
                    row.insert(lang.clone(), entry);
                }
            }
        }
    }
    merged
}

pub fn process_keywords(workbooks: &[KeywordWorkbook]) -> Result<Map<String, Value>, KeywordError> {
    if workbooks.is_empty() {
        return Err(KeywordError::NoSources);
    }
    let languages = workbooks
        .iter()
        .map(|wb| process_workbook(&wb.path).map(|tables| (wb.key.clone(), tables)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merge_languages(languages))
}

/// Extracts and merges keywords, writing them to `output` with 4-space indentation.
pub fn process_keywords_to_file(workbooks: &[KeywordWorkbook], output: &Path) -> Result<(), KeywordError> {
    let merged = process_keywords(workbooks)?;
    fs::write(output, to_pretty_json(&merged)?)?;
    info!(output = ?output, sheets = merged.len(), "[KEYWORDS] Wrote safeguarding keywords");
    Ok(())
}
