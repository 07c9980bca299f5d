//! Text rendering of run reports and job records

use crate::model::{JobStatus, ScrapeJob};
use crate::orchestrator::{RunReport, SourceOutcome};
use std::fmt::Write;

impl RunReport {
    /// Compact summary for log lines
    pub fn one_line(&self) -> String {
        let mut line = format!(
            "{} source(s), {} listing(s), {} image(s)",
            self.sources.len(),
            self.listings(),
            self.images()
        );
        let failed = self.failed_sources();
        if !failed.is_empty() {
            let _ = write!(line, ", failed: {}", failed.join(", "));
        }
        let busy = self.busy_sources();
        if !busy.is_empty() {
            let _ = write!(line, ", skipped (busy): {}", busy.join(", "));
        }
        line
    }
}

/// Multi-line report printed at the end of a run
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    let elapsed = (report.ended_at - report.started_at).num_seconds().max(0);

    let _ = writeln!(out, "=== Harvest Run ===\n");
    let _ = writeln!(
        out,
        "Started: {}  ({}s)",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        elapsed
    );
    let _ = writeln!(
        out,
        "Listings stored: {}   Images stored: {}\n",
        report.listings(),
        report.images()
    );

    for source in &report.sources {
        match &source.outcome {
            SourceOutcome::Busy => {
                let _ = writeln!(out, "{}: skipped, a previous run is still active", source.source);
            }
            SourceOutcome::Finished(job) => {
                let _ = writeln!(out, "{}: {}", source.source, job.status);
                write_job_details(&mut out, job);
            }
        }
    }
    out
}

fn write_job_details(out: &mut String, job: &ScrapeJob) {
    let c = &job.counters;
    let _ = writeln!(
        out,
        "  listings: {}, images: {}, pages: {} fetched / {} failed",
        job.listings_count, job.images_count, c.pages_fetched, c.pages_failed
    );
    let dropped = c.cards_dropped + c.details_failed + c.images_failed + c.persist_errors;
    if dropped > 0 {
        let _ = writeln!(
            out,
            "  dropped cards: {}, failed details: {}, failed images: {}, write errors: {}",
            c.cards_dropped, c.details_failed, c.images_failed, c.persist_errors
        );
    }
    if let Some(termination) = job.termination {
        let _ = writeln!(out, "  stopped on: {}", termination.to_db_string());
    }
    if let Some(error) = &job.error {
        let _ = writeln!(out, "  error: {}", error);
    }
}

/// Table of recorded jobs, newest first
pub fn format_jobs(jobs: &[ScrapeJob]) -> String {
    if jobs.is_empty() {
        return "No jobs recorded\n".to_string();
    }

    let mut jobs: Vec<&ScrapeJob> = jobs.iter().collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36} {:<12} {:<10} {:>8} {:>7}  {}",
        "JOB", "SOURCE", "STATUS", "LISTINGS", "IMAGES", "ENDED"
    );
    for job in jobs {
        let ended = job
            .ended_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<36} {:<12} {:<10} {:>8} {:>7}  {}",
            job.id,
            job.source,
            job.status.to_db_string(),
            job.listings_count,
            job.images_count,
            ended
        );
        if job.status == JobStatus::Failed {
            if let Some(error) = &job.error {
                let _ = writeln!(out, "    {}", error);
            }
        }
    }
    out
}
