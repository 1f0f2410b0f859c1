//! Report assembly: ordered page results → one markdown document → file.
//!
//! A report has exactly one section per source page. Each section starts
//! with the configured page marker; failed pages keep their place and carry
//! a failure annotation instead of a body. Nothing time-dependent goes into
//! the markdown, so the same results always assemble to the same bytes.

use crate::config::PageMarker;
use crate::document::DocumentId;
use crate::error::BatchError;
use crate::output::{PageOutcome, PageResult, Report};
use crate::pipeline::checkpoint::write_atomic;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

/// Build the report for a fully processed document.
///
/// `results` must hold pages `1..=total_pages` in order; anything else is an
/// [`BatchError::OrderViolation`].
pub fn assemble(
    document_id: &DocumentId,
    total_pages: usize,
    results: &[PageResult],
    marker: &PageMarker,
) -> Result<Report, BatchError> {
    for (i, result) in results.iter().enumerate() {
        if result.page_index != i + 1 {
            return Err(BatchError::OrderViolation {
                document: document_id.to_string(),
                expected: i + 1,
                got: result.page_index,
            });
        }
    }
    if results.len() != total_pages {
        return Err(BatchError::OrderViolation {
            document: document_id.to_string(),
            expected: results.len() + 1,
            got: total_pages + 1,
        });
    }

    let mut failed_pages = Vec::new();
    let sections: Vec<String> = results
        .iter()
        .map(|result| {
            let header = marker.render(result.page_index, total_pages);
            let body = match &result.outcome {
                PageOutcome::Extracted { markdown } => markdown.trim().to_string(),
                PageOutcome::Failed { error } => {
                    failed_pages.push(result.page_index);
                    failure_annotation(&error.to_string())
                }
            };
            format!("{header}\n\n{body}")
        })
        .collect();

    let mut markdown = sections.join("\n\n");
    markdown.push('\n');

    Ok(Report {
        document_id: document_id.clone(),
        total_pages,
        failed_pages,
        markdown,
    })
}

/// The text that stands in for a page that could not be extracted.
pub fn failure_annotation(detail: &str) -> String {
    format!("> **Extraction failed:** {}", detail.replace('\n', " "))
}

/// Write the report to `output_dir` as `<document id>_<YYYYmmdd_HHMMSS>.md`.
///
/// An existing file is never overwritten; a numeric suffix is added instead.
pub async fn finalize(report: &Report, output_dir: &Path) -> Result<PathBuf, BatchError> {
    let path = unused_path(output_dir, &report_file_stem(&report.document_id, Local::now()));
    write_atomic(&path, report.markdown.as_bytes()).await?;

    info!(
        "{}: report written to {} ({} pages, {} failed)",
        report.document_id,
        path.display(),
        report.total_pages,
        report.failed_pages.len()
    );
    Ok(path)
}

fn report_file_stem(document_id: &DocumentId, at: DateTime<Local>) -> String {
    format!("{}_{}", document_id.as_str(), at.format("%Y%m%d_%H%M%S"))
}

fn unused_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.md"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.md")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use chrono::{TimeZone, Utc};

    fn page(n: usize, ok: bool) -> PageResult {
        PageResult {
            document_id: DocumentId::new("doc"),
            page_index: n,
            outcome: if ok {
                PageOutcome::Extracted {
                    markdown: format!("Body of page {n}\n"),
                }
            } else {
                PageOutcome::Failed {
                    error: PageError::Permanent {
                        page: n,
                        attempts: 1,
                        detail: "request rejected: 400".into(),
                    },
                }
            },
            completed_at: Utc::now(),
            duration_ms: 5,
            attempts: 1,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    #[test]
    fn one_section_per_page_with_failures_in_place() {
        let results = vec![page(1, true), page(2, false), page(3, true)];
        let report = assemble(&DocumentId::new("doc"), 3, &results, &PageMarker::Heading).unwrap();

        assert_eq!(report.failed_pages, vec![2]);
        assert_eq!(report.markdown.matches("## Page ").count(), 3);
        let p1 = report.markdown.find("## Page 1 of 3").unwrap();
        let p2 = report.markdown.find("## Page 2 of 3").unwrap();
        let p3 = report.markdown.find("## Page 3 of 3").unwrap();
        assert!(p1 < p2 && p2 < p3);

        let section_2 = &report.markdown[p2..p3];
        assert!(section_2.contains("> **Extraction failed:**"));
        assert!(!section_2.contains("Body of page 2"));
    }

    #[test]
    fn exact_layout() {
        let results = vec![page(1, true), page(2, true)];
        let report = assemble(&DocumentId::new("doc"), 2, &results, &PageMarker::Heading).unwrap();
        assert_eq!(
            report.markdown,
            "## Page 1 of 2\n\nBody of page 1\n\n## Page 2 of 2\n\nBody of page 2\n"
        );
    }

    #[test]
    fn deterministic_for_identical_input() {
        let results = vec![page(1, true), page(2, false)];
        let a = assemble(&DocumentId::new("doc"), 2, &results, &PageMarker::Comment).unwrap();
        let b = assemble(&DocumentId::new("doc"), 2, &results, &PageMarker::Comment).unwrap();
        assert_eq!(a.markdown.as_bytes(), b.markdown.as_bytes());
    }

    #[test]
    fn missing_or_misordered_pages_are_rejected() {
        let id = DocumentId::new("doc");
        let short = vec![page(1, true), page(2, true)];
        assert!(matches!(
            assemble(&id, 3, &short, &PageMarker::Heading),
            Err(BatchError::OrderViolation { .. })
        ));
        let swapped = vec![page(2, true), page(1, true)];
        assert!(matches!(
            assemble(&id, 2, &swapped, &PageMarker::Heading),
            Err(BatchError::OrderViolation { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn file_stem_has_id_and_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            report_file_stem(&DocumentId::new("annual_report"), at),
            "annual_report_20240309_140507"
        );
    }

    #[tokio::test]
    async fn finalize_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![page(1, true)];
        let report = assemble(&DocumentId::new("doc"), 1, &results, &PageMarker::Heading).unwrap();

        let a = finalize(&report, dir.path()).await.unwrap();
        let b = finalize(&report, dir.path()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), report.markdown);
        assert_eq!(std::fs::read_to_string(&b).unwrap(), report.markdown);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("doc_"));
    }

    #[tokio::test]
    async fn finalize_into_a_file_path_fails_with_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("output");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let report = assemble(&DocumentId::new("doc"), 1, &[page(1, true)], &PageMarker::Heading)
            .unwrap();

        let err = finalize(&report, &blocker).await.unwrap_err();
        assert!(matches!(err, BatchError::Storage { .. }));
    }
}
