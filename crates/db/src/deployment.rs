//! Per-lease workload container and its health telemetry.
//!
//! Health status and the consecutive failure counter are only changed
//! through [`Deployment::observe_healthy`], [`Deployment::observe_unhealthy`]
//! and [`Deployment::restarted`].

use std::collections::VecDeque;

use derive_more::Display;
use serde::Serialize;
use time::OffsetDateTime;

/// Deployment lifecycle status.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[display(fmt = "pending")]
    Pending,

    #[display(fmt = "running")]
    Running,

    #[display(fmt = "failed")]
    Failed,

    #[display(fmt = "stopped")]
    Stopped,
}

/// Last known workload health.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[display(fmt = "healthy")]
    Healthy,

    #[display(fmt = "unhealthy")]
    Unhealthy,

    #[display(fmt = "unknown")]
    Unknown,
}

/// Single timestamped health log entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub health: Health,
    pub message: String,
}

/// Append-only health log, bounded by a retention limit.
///
/// Once the limit is reached, the oldest entries are dropped first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthLog {
    entries: VecDeque<HealthEvent>,

    #[serde(skip)]
    retention: usize,
}

impl HealthLog {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    pub fn push(&mut self, health: Health, message: impl Into<String>) {
        if self.entries.len() == self.retention {
            self.entries.pop_front();
        }

        self.entries.push_back(HealthEvent {
            at: OffsetDateTime::now_utc(),
            health,
            message: message.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &HealthEvent> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HealthEvent> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resource usage snapshot reported by the container runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Resources {
    /// CPU usage, in percent of a single core.
    pub cpu_percent: f64,

    /// Memory usage, in megabytes.
    pub memory_mb: f64,

    /// Writable layer size, in megabytes.
    pub storage_mb: Option<f64>,
}

/// Deployment record, keyed by lease identifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Deployment {
    pub lease_id: u64,
    pub order_id: u64,
    pub provider_id: u64,

    /// Runtime container identifier, absent if no container was ever started.
    pub container_id: Option<String>,

    /// Workload image reference.
    pub image: String,

    pub access_url: Option<String>,

    pub status: Status,

    pub health: Health,

    /// Number of unhealthy observations since the last healthy one.
    pub consecutive_failures: u32,

    /// Set once the current failure streak was escalated to the provider.
    pub escalated: bool,

    pub health_log: HealthLog,

    pub resources: Option<Resources>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Deployment {
    /// Create a deployment record without an associated container.
    pub fn new(lease_id: u64, order_id: u64, provider_id: u64, image: String, retention: usize) -> Self {
        let now = OffsetDateTime::now_utc();

        Self {
            lease_id,
            order_id,
            provider_id,
            container_id: None,
            image,
            access_url: None,
            status: Status::Pending,
            health: Health::Unknown,
            consecutive_failures: 0,
            escalated: false,
            health_log: HealthLog::new(retention),
            resources: None,
            last_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the health loop should keep checking this deployment.
    ///
    /// Failed deployments stay supervised until their failure streak
    /// is escalated, otherwise the remediation threshold could never be reached.
    pub fn is_supervised(&self) -> bool {
        match self.status {
            Status::Running => true,
            Status::Failed => self.container_id.is_some() && !self.escalated,
            Status::Pending | Status::Stopped => false,
        }
    }

    /// Append a health log entry without changing health state.
    pub fn note(&mut self, message: impl Into<String>) {
        self.health_log.push(self.health, message);
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Record a healthy observation, resetting the failure streak.
    pub fn observe_healthy(&mut self, resources: Option<Resources>, message: impl Into<String>) {
        let now = OffsetDateTime::now_utc();

        self.status = Status::Running;
        self.health = Health::Healthy;
        self.consecutive_failures = 0;
        self.escalated = false;

        if resources.is_some() {
            self.resources = resources;
        }

        self.health_log.push(Health::Healthy, message);
        self.last_check = Some(now);
        self.updated_at = now;
    }

    /// Record an unhealthy observation, returning the new failure streak length.
    pub fn observe_unhealthy(&mut self, message: impl Into<String>) -> u32 {
        let now = OffsetDateTime::now_utc();

        self.status = Status::Failed;
        self.health = Health::Unhealthy;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.health_log.push(Health::Unhealthy, message);
        self.last_check = Some(now);
        self.updated_at = now;

        self.consecutive_failures
    }

    /// Record a successful remediation with a freshly started container.
    pub fn restarted(&mut self, container_id: String, message: impl Into<String>) {
        self.container_id = Some(container_id);
        self.status = Status::Running;
        self.health = Health::Unknown;
        self.consecutive_failures = 0;
        self.escalated = false;
        self.health_log.push(Health::Unknown, message);
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Record a failed remediation attempt, closing the current failure streak.
    pub fn escalate(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.escalated = true;
        self.health_log.push(Health::Unhealthy, message);
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Mark the deployment as stopped.
    pub fn stop(&mut self, message: impl Into<String>) {
        self.status = Status::Stopped;
        self.health_log.push(self.health, message);
        self.updated_at = OffsetDateTime::now_utc();
    }
}
