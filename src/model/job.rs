//! Scrape job records
//!
//! A job tracks one source's crawl within one orchestrator invocation.
use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a scrape job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true if no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Checks whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Why the pagination loop for a source stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A search page yielded zero cards
    EmptyPage,
    /// The page had no next-page affordance
    NoNextPage,
    /// `max_pages_per_source` was reached
    PageCap,
    /// The run was cancelled between pages
    Cancelled,
}

impl Termination {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::EmptyPage => "empty_page",
            Self::NoNextPage => "no_next_page",
            Self::PageCap => "page_cap",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "empty_page" => Some(Self::EmptyPage),
            "no_next_page" => Some(Self::NoNextPage),
            "page_cap" => Some(Self::PageCap),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Per-job failure and progress counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub cards_dropped: u32,
    pub details_failed: u32,
    pub images_failed: u32,
    pub persist_errors: u32,
}

/// One source's crawl within one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: String,
    pub source: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub listings_count: u32,
    pub images_count: u32,
    #[serde(default)]
    pub counters: JobCounters,
    #[serde(default)]
    pub termination: Option<Termination>,
    #[serde(default)]
    pub config_hash: Option<String>,
}

impl ScrapeJob {
    /// Creates a pending job for a source
    pub fn new(source: &str, config_hash: Option<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("{}-{}", source, created_at.format("%Y%m%dT%H%M%S%.3f")),
            source: source.to_string(),
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            ended_at: None,
            error: None,
            listings_count: 0,
            images_count: 0,
            counters: JobCounters::default(),
            termination: None,
            config_hash,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), HarvestError> {
        if !self.status.can_transition_to(to) {
            return Err(HarvestError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<(), HarvestError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed
    pub fn complete(&mut self) -> Result<(), HarvestError> {
        self.transition(JobStatus::Completed)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// {pending, running} -> failed, recording the cause
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), HarvestError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}
