//! GFF3 annotation records
//!
//! Only the nine-column feature lines matter. Comments, directives, blank
//! lines and anything that does not parse are skipped.

use std::collections::HashMap;
use std::io::{self, BufRead};

#[derive(Debug, Clone, PartialEq)]
pub struct GffRecord {
    pub seqid: String,
    pub feature_type: String,
    pub start: i64,
    pub end: i64,
    pub score: Option<f64>,
    pub strand: Option<String>,
    pub phase: Option<String>,
    /// Raw attribute column
    pub attributes: String,
    pub gene_id: Option<String>,
    pub partial: Option<String>,
    pub start_type: Option<String>,
    pub rbs_motif: Option<String>,
    pub gc_content: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGff {
    pub records: Vec<GffRecord>,
    /// Non-comment lines that were not valid feature lines
    pub skipped: usize,
}

/// `key=value;key=value` into a map; pairs without `=` are dropped
pub fn parse_attributes(column: &str) -> HashMap<String, String> {
    column
        .trim()
        .trim_end_matches(';')
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn optional_float(value: Option<&str>) -> Option<f64> {
    match value {
        None | Some(".") => None,
        Some(v) => v.parse().ok(),
    }
}

fn optional_text(value: &str) -> Option<String> {
    (value != ".").then(|| value.to_string())
}

/// Parse one feature line; `None` for anything else
pub fn parse_line(line: &str) -> Option<GffRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    let cols: Vec<&str> = line.split('\t').collect();
    let &[seqid, _source, feature_type, start, end, score, strand, phase, attributes] =
        cols.as_slice()
    else {
        return None;
    };

    let attrs = parse_attributes(attributes);
    let attr = |key: &str| attrs.get(key).cloned();

    Some(GffRecord {
        seqid: seqid.to_string(),
        feature_type: feature_type.to_string(),
        start: start.trim().parse().ok()?,
        end: end.trim().parse().ok()?,
        score: optional_float(Some(score)),
        strand: optional_text(strand),
        phase: optional_text(phase),
        attributes: attributes.to_string(),
        gene_id: attr("ID"),
        partial: attr("partial"),
        start_type: attr("start_type"),
        rbs_motif: attr("rbs_motif"),
        gc_content: optional_float(attrs.get("gc_cont").map(String::as_str)),
        confidence: optional_float(attrs.get("conf").map(String::as_str)),
    })
}

pub fn parse<R: BufRead>(reader: R) -> io::Result<ParsedGff> {
    let mut parsed = ParsedGff::default();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(&line) {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped += 1,
        }
    }

    Ok(parsed)
}
