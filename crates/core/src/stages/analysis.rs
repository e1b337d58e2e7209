//! In-process post-analysis of force coefficient output.
//!
//! Reads the latest `postProcessing/forceCoeffs*/<time>/` data file,
//! averages every coefficient column after discarding the start-up
//! transient, and writes `postProcessingSummary.json` next to the case.

use crate::engine::{StageContext, StageOutcome, StageStep};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUMMARY_FILE: &str = "postProcessingSummary.json";

/// Averages force coefficients; absent data skips the analysis.
pub struct PostAnalysis;

/// Contents of `postProcessingSummary.json`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub source: PathBuf,
    pub total_samples: usize,
    pub excluded_samples: usize,
    pub averaged_samples: usize,
    pub time_range: (f64, f64),
    pub averages: BTreeMap<String, f64>,
}

#[async_trait]
impl StageStep for PostAnalysis {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let dir = ctx.solve_dir();
        let Some(source) = find_coefficient_file(&dir) else {
            return Ok(StageOutcome::success(
                "No force coefficient data found, analysis skipped",
            ));
        };

        let text = tokio::fs::read_to_string(&source)
            .await
            .with_context(|| format!("reading {}", source.display()))?;
        let Some(summary) = summarize(&source, &text, ctx.settings.analysis.exclude_fraction)
        else {
            return Ok(StageOutcome::success(format!(
                "No usable samples in {}, analysis skipped",
                source.display()
            )));
        };

        let out = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(&out, json)
            .await
            .with_context(|| format!("writing {}", out.display()))?;

        let headline: Vec<String> = ["Cd", "Cl", "CmPitch", "Cm"]
            .iter()
            .filter_map(|k| summary.averages.get(*k).map(|v| format!("{k}={v:.4}")))
            .collect();
        Ok(StageOutcome::success(format!(
            "Averaged {} samples: {}",
            summary.averaged_samples,
            headline.join(" ")
        )))
    }
}

/// The data file of the latest time directory of the first
/// `forceCoeffs*` function object, preferring `coefficient.dat`.
pub fn find_coefficient_file(case_dir: &Path) -> Option<PathBuf> {
    let function = sorted_children(&case_dir.join("postProcessing"))
        .into_iter()
        .find(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("forceCoeffs"))
        })?;

    let latest = sorted_children(&function)
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let time: f64 = p.file_name()?.to_str()?.parse().ok()?;
            Some((time, p))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))?
        .1;

    let preferred = latest.join("coefficient.dat");
    if preferred.is_file() {
        return Some(preferred);
    }
    sorted_children(&latest)
        .into_iter()
        .find(|p| p.is_file() && p.extension().is_some_and(|e| e == "dat"))
}

fn sorted_children(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.into_path())
        .collect()
}

/// Parse a whitespace-separated coefficient table and average each column.
///
/// Column names come from the last `#` comment line that starts with
/// `Time`. The first `floor(n * exclude_fraction)` samples are dropped.
/// Returns `None` when there is no header or nothing left to average.
pub fn summarize(source: &Path, text: &str, exclude_fraction: f64) -> Option<AnalysisSummary> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(comment) = line.strip_prefix('#') {
            let names: Vec<String> = comment.split_whitespace().map(String::from).collect();
            if names.first().is_some_and(|n| n == "Time") {
                columns = names;
            }
            continue;
        }
        let values: Option<Vec<f64>> = line.split_whitespace().map(|v| v.parse().ok()).collect();
        if let Some(values) = values.filter(|v| v.len() == columns.len() && !columns.is_empty()) {
            rows.push(values);
        }
    }

    let total = rows.len();
    let fraction = exclude_fraction.clamp(0.0, 1.0);
    let excluded = (total as f64 * fraction).floor() as usize;
    let kept = rows.get(excluded..)?;
    if kept.is_empty() {
        return None;
    }

    let averages = columns
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, name)| {
            let sum: f64 = kept.iter().map(|row| row[i]).sum();
            (name.clone(), sum / kept.len() as f64)
        })
        .collect();

    Some(AnalysisSummary {
        source: source.to_path_buf(),
        total_samples: total,
        excluded_samples: excluded,
        averaged_samples: kept.len(),
        time_range: (kept[0][0], kept[kept.len() - 1][0]),
        averages,
    })
}
