//! Roster tidy utilities: one-shot dataset cleanups that run between
//! pipeline stages. Each reads a CSV, rewrites it atomically, and returns a
//! small report of what changed.

use std::path::Path;

use tracing::{info, warn};
use url::Url;

use rostermill_shared::{Result, RostermillError};
use rostermill_store::Dataset;

// ---------------------------------------------------------------------------
// clean-urls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CleanUrlsOptions {
    /// Column holding the URL to normalize.
    pub url_column: String,
    /// Columns copied to the output, in order. Must all exist in the input.
    pub keep_columns: Vec<String>,
    /// Rows whose normalized URL contains any of these substrings are
    /// dropped (webmail hosts, link aggregators).
    pub blocklist: Vec<String>,
}

impl Default for CleanUrlsOptions {
    fn default() -> Self {
        Self {
            url_column: "Website URL".into(),
            keep_columns: vec![
                "Record ID".into(),
                "Company name".into(),
                "Website URL".into(),
            ],
            blocklist: vec!["google".into(), "outlook".into(), "yahoo".into()],
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanUrlsReport {
    pub kept: usize,
    pub dropped: usize,
}

/// Reduce each URL to `scheme://host`, defaulting the scheme to `https`,
/// and write a pared-down roster with blocklisted hosts removed.
pub fn clean_urls(input: &Path, output: &Path, opts: &CleanUrlsOptions) -> Result<CleanUrlsReport> {
    let source = Dataset::load(input)?;
    let keep: Vec<&str> = opts.keep_columns.iter().map(String::as_str).collect();
    source.require_columns(&keep)?;

    if !opts.keep_columns.contains(&opts.url_column) {
        return Err(RostermillError::schema(format!(
            "url column {:?} is not among the kept columns",
            opts.url_column
        )));
    }

    let mut cleaned = Dataset::new(opts.keep_columns.clone());
    let mut report = CleanUrlsReport::default();

    for i in 0..source.len() {
        let url = normalize_url(source.get(i, &opts.url_column));
        let lowered = url.to_lowercase();
        if opts.blocklist.iter().any(|bad| lowered.contains(bad)) {
            report.dropped += 1;
            continue;
        }

        let mut row: Vec<String> = opts
            .keep_columns
            .iter()
            .map(|c| source.get(i, c).to_string())
            .collect();
        let url_idx = opts
            .keep_columns
            .iter()
            .position(|c| *c == opts.url_column)
            .unwrap_or(0);
        row[url_idx] = url;
        cleaned.push_row(row);
        report.kept += 1;
    }

    cleaned.save(output)?;
    info!(kept = report.kept, dropped = report.dropped, output = %output.display(), "cleaned urls");
    Ok(report)
}

/// Normalize a URL to its homepage: default the scheme to https, keep only
/// `scheme://host`. Unparseable values pass through unchanged.
fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    match Url::parse(&candidate) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
                None => format!("{}://{host}", parsed.scheme()),
            },
            None => candidate,
        },
        Err(e) => {
            warn!(url = raw, error = %e, "url did not parse, leaving as-is");
            candidate
        }
    }
}

// ---------------------------------------------------------------------------
// clear-errors
// ---------------------------------------------------------------------------

/// Blank every value in `column` that starts with `ERROR`, so the next
/// stage run retries those rows. Rewrites the file only when something
/// changed; returns the number of cleared cells.
pub fn clear_errors(path: &Path, column: &str) -> Result<usize> {
    let mut dataset = Dataset::load(path)?;
    dataset.require_columns(&[column])?;

    let mut cleared = 0;
    for i in 0..dataset.len() {
        if dataset.get(i, column).trim_start().starts_with("ERROR") {
            dataset.set(i, column, "");
            cleared += 1;
        }
    }

    if cleared > 0 {
        dataset.save(path)?;
        info!(cleared, column, path = %path.display(), "blanked recorded errors");
    } else {
        info!(column, path = %path.display(), "no recorded errors found");
    }
    Ok(cleared)
}

// ---------------------------------------------------------------------------
// truncate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TruncateReport {
    pub truncated: usize,
    pub total: usize,
    /// Key column values of the rows that were truncated.
    pub keys: Vec<String>,
}

/// Replace oversized values in `column` with `N/A`. Runaway classifier
/// responses blow up downstream prompt sizes; this caps them.
pub fn truncate_long_fields(
    path: &Path,
    column: &str,
    key_column: &str,
    threshold: usize,
) -> Result<TruncateReport> {
    let mut dataset = Dataset::load(path)?;
    dataset.require_columns(&[column, key_column])?;

    let mut report = TruncateReport {
        total: dataset.len(),
        ..Default::default()
    };

    for i in 0..dataset.len() {
        if dataset.get(i, column).len() > threshold {
            report.keys.push(dataset.get(i, key_column).to_string());
            dataset.set(i, column, "N/A");
            report.truncated += 1;
        }
    }

    if report.truncated > 0 {
        dataset.save(path)?;
    }
    info!(
        truncated = report.truncated,
        total = report.total,
        column,
        threshold,
        "truncated oversized fields"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// parse-info
// ---------------------------------------------------------------------------

/// Labeled sections extracted by `parse_info` when no explicit list is
/// given. Matches the sections the website-info prompt asks for.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "COMPANY_NAME",
    "PRODUCTS",
    "BUSINESS_MODEL",
    "WEBSITE_FINDINGS",
    "TARGET_CUSTOMERS",
    "DISTRIBUTION FINDINGS",
    "NUMBER OF TRUCKS",
    "PAYMENT PROCESSING",
    "ERP",
    "PRODUCT BRANDS",
    "NUMBER OF SKUS",
    "PHONE NUMBERS & EMAILS",
    "ADDRESS",
    "ADDITIONAL FINDINGS",
];

/// Explode a labeled free-text column into one column per category.
///
/// Each category value runs from its `LABEL:` line to the next all-caps
/// label or the end of the blob; absent labels and empty blobs yield `N/A`.
/// The source column (and any other `drop_columns`) are omitted from the
/// output. Returns the number of rows written.
pub fn parse_info(
    input: &Path,
    output: &Path,
    info_column: &str,
    categories: &[&str],
    drop_columns: &[&str],
) -> Result<usize> {
    let source = Dataset::load(input)?;
    source.require_columns(&[info_column])?;

    let extractors: Vec<(String, regex::Regex)> = categories
        .iter()
        .map(|cat| {
            let pattern = format!(
                r"(?ms)^{}:\s*(.*?)(?=^[A-Z &_]+:|\z)",
                regex::escape(cat)
            );
            regex::Regex::new(&pattern)
                .map(|re| (cat.to_string(), re))
                .map_err(|e| RostermillError::config(format!("category {cat:?}: {e}")))
        })
        .collect::<Result<_>>()?;

    let base_columns: Vec<String> = source
        .columns()
        .iter()
        .filter(|c| c.as_str() != info_column && !drop_columns.contains(&c.as_str()))
        .cloned()
        .collect();

    let mut columns = base_columns.clone();
    columns.extend(categories.iter().map(|c| c.to_string()));
    let mut parsed = Dataset::new(columns);

    for i in 0..source.len() {
        let mut row: Vec<String> = base_columns
            .iter()
            .map(|c| source.get(i, c).to_string())
            .collect();

        let blob = source.get(i, info_column);
        let empty = blob.trim().is_empty() || blob.trim() == "N/A";
        for (_, re) in &extractors {
            let value = if empty {
                None
            } else {
                re.captures(blob).map(|c| c[1].trim().to_string())
            };
            row.push(value.filter(|v| !v.is_empty()).unwrap_or_else(|| "N/A".into()));
        }
        parsed.push_row(row);
    }

    let written = parsed.len();
    parsed.save(output)?;
    info!(rows = written, output = %output.display(), "parsed info column");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_reduces_to_homepage() {
        assert_eq!(
            normalize_url("acme.test/products?page=2"),
            "https://acme.test"
        );
        assert_eq!(
            normalize_url("http://www.acme.test/about"),
            "http://www.acme.test"
        );
        assert_eq!(normalize_url("  "), "");
        assert_eq!(
            normalize_url("https://acme.test:8443/shop"),
            "https://acme.test:8443"
        );
    }

    #[test]
    fn clean_urls_drops_blocklisted_and_pares_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");

        let mut ds = Dataset::new(vec![
            "Record ID".into(),
            "Company name".into(),
            "Website URL".into(),
            "Notes".into(),
        ]);
        ds.push_row(vec![
            "1".into(),
            "Acme".into(),
            "acme.test/contact".into(),
            "x".into(),
        ]);
        ds.push_row(vec![
            "2".into(),
            "Ghost".into(),
            "mail.google.com".into(),
            "x".into(),
        ]);
        ds.save(&input).unwrap();

        let report = clean_urls(&input, &output, &CleanUrlsOptions::default()).unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.dropped, 1);

        let cleaned = Dataset::load(&output).unwrap();
        assert_eq!(
            cleaned.columns(),
            &["Record ID", "Company name", "Website URL"]
        );
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.get(0, "Website URL"), "https://acme.test");
    }

    #[test]
    fn clear_errors_blanks_and_saves_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");

        let mut ds = Dataset::new(vec!["Company name".into(), "Sub Vertical".into()]);
        ds.push_row(vec!["Acme".into(), "Produce".into()]);
        ds.push_row(vec![
            "Beta".into(),
            "ERROR after 3 attempts: timeout: no response within 45s".into(),
        ]);
        ds.save(&path).unwrap();

        assert_eq!(clear_errors(&path, "Sub Vertical").unwrap(), 1);
        let saved = Dataset::load(&path).unwrap();
        assert_eq!(saved.get(0, "Sub Vertical"), "Produce");
        assert_eq!(saved.get(1, "Sub Vertical"), "");

        // Idempotent: a second pass finds nothing.
        assert_eq!(clear_errors(&path, "Sub Vertical").unwrap(), 0);
    }

    #[test]
    fn truncate_replaces_oversized_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");

        let mut ds = Dataset::new(vec!["Website URL".into(), "Website Information".into()]);
        ds.push_row(vec!["https://acme.test".into(), "short".into()]);
        ds.push_row(vec!["https://huge.test".into(), "x".repeat(8000)]);
        ds.save(&path).unwrap();

        let report =
            truncate_long_fields(&path, "Website Information", "Website URL", 7500).unwrap();
        assert_eq!(report.truncated, 1);
        assert_eq!(report.keys, vec!["https://huge.test"]);

        let saved = Dataset::load(&path).unwrap();
        assert_eq!(saved.get(0, "Website Information"), "short");
        assert_eq!(saved.get(1, "Website Information"), "N/A");
    }

    #[test]
    fn parse_info_extracts_labeled_sections() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");

        let blob = "COMPANY_NAME: Acme Foods\n\
                    BUSINESS_MODEL: B2B wholesale\nserves restaurants\n\
                    PHONE NUMBERS & EMAILS: none listed\n";

        let mut ds = Dataset::new(vec![
            "URL".into(),
            "Vertical".into(),
            "Website Information".into(),
        ]);
        ds.push_row(vec!["https://acme.test".into(), "Meat".into(), blob.into()]);
        ds.push_row(vec!["https://empty.test".into(), "".into(), "N/A".into()]);
        ds.save(&input).unwrap();

        let categories = ["COMPANY_NAME", "BUSINESS_MODEL", "PHONE NUMBERS & EMAILS", "ERP"];
        let written = parse_info(
            &input,
            &output,
            "Website Information",
            &categories,
            &["Vertical"],
        )
        .unwrap();
        assert_eq!(written, 2);

        let parsed = Dataset::load(&output).unwrap();
        assert_eq!(
            parsed.columns(),
            &["URL", "COMPANY_NAME", "BUSINESS_MODEL", "PHONE NUMBERS & EMAILS", "ERP"]
        );
        assert_eq!(parsed.get(0, "COMPANY_NAME"), "Acme Foods");
        // A section runs until the next label, across line breaks.
        assert_eq!(
            parsed.get(0, "BUSINESS_MODEL"),
            "B2B wholesale\nserves restaurants"
        );
        assert_eq!(parsed.get(0, "PHONE NUMBERS & EMAILS"), "none listed");
        assert_eq!(parsed.get(0, "ERP"), "N/A");
        // Empty blob rows get N/A everywhere.
        assert_eq!(parsed.get(1, "COMPANY_NAME"), "N/A");
    }
}
