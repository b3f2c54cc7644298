//! Multi-release code-dictionary consolidation.
//!
//! Each release ships a JSON document listing, per table and variable, the
//! code→label categories in force that quarter. Releases disagree, so the
//! corpus is merged per (module base, variable) in ascending release order,
//! the most recent release winning on key collisions. Every code is indexed
//! under several normalized variants so later lookups tolerate incidental
//! casing and zero-padding differences between dictionaries and data.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use glob::glob;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;

/// One dictionary entry as shipped: a release-tagged table name, a variable
/// and its category list.
#[derive(Debug, Deserialize)]
pub struct DictionaryEntry {
    #[serde(default)]
    pub tabla: String,
    #[serde(default)]
    pub variable: String,
    #[serde(default)]
    pub categorias: Vec<Category>,
}

#[derive(Debug, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub valor: String,
    #[serde(default)]
    pub categoria: String,
}

/// Documents come either as a flat entry list or keyed by table name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DictionaryDoc {
    Entries(Vec<DictionaryEntry>),
    Grouped(HashMap<String, Vec<DictionaryEntry>>),
}

/// Consolidated mappings: module base → variable → normalized code → label.
#[derive(Debug, Default)]
pub struct DictionaryIndex {
    maps: HashMap<String, BTreeMap<String, HashMap<String, String>>>,
}

impl DictionaryIndex {
    /// Variable mappings for one module base, in deterministic variable
    /// order.
    pub fn variables(&self, base: &str) -> Option<&BTreeMap<String, HashMap<String, String>>> {
        self.maps.get(base)
    }

    pub fn bases(&self) -> Vec<&str> {
        let mut bases: Vec<&str> = self.maps.keys().map(String::as_str).collect();
        bases.sort_unstable();
        bases
    }

    pub fn insert(
        &mut self,
        base: impl Into<String>,
        variable: impl Into<String>,
        mapping: HashMap<String, String>,
    ) {
        self.maps
            .entry(base.into())
            .or_default()
            .insert(variable.into(), mapping);
    }
}

/// Consolidation result plus the corpus counters for the run summary.
#[derive(Debug, Default)]
pub struct DictionaryCorpus {
    pub index: DictionaryIndex,
    pub documents: usize,
    pub documents_skipped: usize,
    pub entries: usize,
}

// release-tagged table names: COE2T424 → (COE2T, quarter 4, year 24)
static TABLE_RELEASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z0-9]+?)(\d)(\d{2})$").expect("valid table release regex"));

static INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+$").expect("valid integer regex"));

/// Split a release-tagged table name into (canonical base, quarter, year
/// offset). Names without a release suffix collapse to their alphanumerics
/// with rank components zeroed, so they sort before any real release.
pub fn parse_table_name(tabla: &str) -> (String, u32, u32) {
    let s = tabla.trim().to_uppercase();
    if let Some(caps) = TABLE_RELEASE_RE.captures(&s) {
        let base = canonical_base(&caps[1]);
        let quarter = caps[2].parse().unwrap_or(0);
        let yy = caps[3].parse().unwrap_or(0);
        return (base, quarter, yy);
    }
    let base: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    (base, 0, 0)
}

fn canonical_base(prefix: &str) -> String {
    match prefix {
        "COE1" | "COE1T" => "COE1T".to_string(),
        "COE2" | "COE2T" => "COE2T".to_string(),
        "SDEM" | "SDEMT" => "SDEMT".to_string(),
        "HOG" | "HOGT" => "HOGT".to_string(),
        "VIV" | "VIVT" => "VIVT".to_string(),
        other => other.to_string(),
    }
}

/// Sortable chronological rank for a release.
pub fn release_rank(quarter: u32, yy: u32) -> u32 {
    (2000 + yy) * 10 + quarter
}

/// Normalized key variants for a raw code, in lookup order: verbatim
/// (trimmed), upper-cased when non-numeric, and for small integers both the
/// unpadded and the 2-digit zero-padded spellings.
pub fn normalize_code_keys(code: &str) -> Vec<String> {
    let s = code.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let mut keys = vec![s.to_string()];
    let mut push = |keys: &mut Vec<String>, k: String| {
        if !keys.contains(&k) {
            keys.push(k);
        }
    };
    if INTEGER_RE.is_match(s) {
        if let Ok(n) = s.parse::<i64>() {
            push(&mut keys, n.to_string());
            if (0..100).contains(&n) {
                push(&mut keys, format!("{n:02}"));
            }
        }
    } else {
        push(&mut keys, s.to_uppercase());
    }
    keys
}

fn discover_documents(cfg: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let pattern = cfg.dict_dir.join("**").join("rnm_diccionario_*.json");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("globbing {pattern}"))?
        .filter_map(|entry| entry.ok())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| !n.to_lowercase().starts_with("rnm_diccionario_test"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Load and merge the whole dictionary corpus. Unreadable documents are
/// skipped with a warning; the rest of the corpus still merges.
pub fn consolidate_dictionaries(cfg: &PipelineConfig) -> Result<DictionaryCorpus> {
    let paths = discover_documents(cfg)?;
    info!(count = paths.len(), dir = %cfg.dict_dir.display(), "dictionary documents found");

    let mut corpus = DictionaryCorpus::default();
    let mut rows: Vec<DictionaryEntry> = Vec::new();
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str::<DictionaryDoc>(&text).map_err(Into::into));
        match parsed {
            Ok(DictionaryDoc::Entries(entries)) => {
                corpus.documents += 1;
                rows.extend(entries);
            }
            Ok(DictionaryDoc::Grouped(groups)) => {
                corpus.documents += 1;
                rows.extend(groups.into_values().flatten());
            }
            Err(e) => {
                warn!(file = %path.display(), "skipping unreadable dictionary document: {e:#}");
                corpus.documents_skipped += 1;
            }
        }
    }
    corpus.entries = rows.len();

    // group each entry's local code→label map under (base, variable),
    // tagged with its release rank
    let mut grouped: BTreeMap<(String, String), Vec<(u32, HashMap<String, String>)>> =
        BTreeMap::new();
    for entry in rows {
        let (base, quarter, yy) = parse_table_name(&entry.tabla);
        if base.is_empty() {
            continue;
        }
        let rank = release_rank(quarter, yy);

        let mut local: HashMap<String, String> = HashMap::new();
        for cat in &entry.categorias {
            let code = cat.valor.trim();
            let label = cat.categoria.trim();
            if code.is_empty() || label.is_empty() {
                continue;
            }
            for key in normalize_code_keys(code) {
                local.insert(key, label.to_string());
            }
        }
        grouped
            .entry((base, entry.variable.trim().to_string()))
            .or_default()
            .push((rank, local));
    }

    for ((base, variable), mut releases) in grouped {
        if variable.is_empty() {
            continue;
        }
        // stable: equal ranks keep document order, oldest to newest
        releases.sort_by_key(|(rank, _)| *rank);
        let mut merged: HashMap<String, String> = HashMap::new();
        for (_, map) in releases {
            merged.extend(map);
        }
        if merged.is_empty() {
            continue;
        }
        corpus
            .index
            .maps
            .entry(base)
            .or_default()
            .insert(variable, merged);
    }

    info!(
        documents = corpus.documents,
        skipped = corpus.documents_skipped,
        entries = corpus.entries,
        bases = corpus.index.bases().len(),
        "dictionary corpus consolidated"
    );
    Ok(corpus)
}
