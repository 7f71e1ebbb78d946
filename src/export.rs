use std::{fmt, fmt::Write as _, str::FromStr};

use chrono::SecondsFormat;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    index::TermInfo,
};

/// Terms exported when no limit is given.
pub const DEFAULT_EXPORT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `term\tweight\tdf\ttf\tcategory` per line.
    Txt,
    Csv,
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(ExportFormat::Txt),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::Config(format!(
                "unsupported format: {other} (supported: txt, csv, json)"
            ))),
        }
    }
}

#[derive(Serialize)]
struct ExportedTerm<'a> {
    term: &'a str,
    weight: f64,
    document_freq: usize,
    total_freq: usize,
    category: String,
    last_seen: String,
}

/// Render `terms` (already ranked) in `format`.
pub fn render(terms: &[TermInfo], format: ExportFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        ExportFormat::Txt => {
            for t in terms {
                let _ = writeln!(
                    out,
                    "{}\t{:.6}\t{}\t{}\t{}",
                    t.term, t.weight, t.document_freq, t.total_freq, t.category
                );
            }
        }
        ExportFormat::Csv => {
            out.push_str("Term,Weight,DocumentFreq,TotalFreq,Category,LastSeen\n");
            for t in terms {
                let _ = writeln!(
                    out,
                    "{},{:.6},{},{},{},{}",
                    t.term,
                    t.weight,
                    t.document_freq,
                    t.total_freq,
                    t.category,
                    t.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
            }
        }
        ExportFormat::Json => {
            let rows: Vec<ExportedTerm<'_>> = terms
                .iter()
                .map(|t| ExportedTerm {
                    term: &t.term,
                    weight: (t.weight * 1e6).round() / 1e6,
                    document_freq: t.document_freq,
                    total_freq: t.total_freq,
                    category: t.category.to_string(),
                    last_seen: t
                        .last_seen
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                })
                .collect();
            out = serde_json::to_string_pretty(&rows)?;
            out.push('\n');
        }
    }
    Ok(out)
}
