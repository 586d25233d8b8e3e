//! crates/residency_core/src/progress.rs
//!
//! The residency workflow: the fixed step catalog, the overall-status
//! derivation, and the read/write paths over a customer's progress record.

use crate::domain::{OverallStatus, ResidencyProgress, ResidencyStep, StepStatus, StepUpdate};
use crate::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

//=========================================================================================
// Step Catalog
//=========================================================================================

/// Static content of one workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStep {
    pub order: i32,
    pub title: &'static str,
    pub description: &'static str,
    pub estimated_time: &'static str,
    pub requirements: &'static str,
}

/// The eight stages every residency application goes through, in order.
pub const STEP_CATALOG: [CatalogStep; 8] = [
    CatalogStep {
        order: 1,
        title: "Document Upload",
        description: "Initial submission and review of required documents in digital format",
        estimated_time: "1-2 weeks",
        requirements: "Passport, birth certificate, criminal record certificate and Interpol certificate",
    },
    CatalogStep {
        order: 2,
        title: "Translation and Notarization",
        description: "Official translation to Spanish and notarization of foreign documents",
        estimated_time: "1-2 weeks",
        requirements: "Apostilled originals of every foreign document",
    },
    CatalogStep {
        order: 3,
        title: "Immigration Appointment",
        description: "Physical document submission and interview at Immigration Office",
        estimated_time: "1 day",
        requirements: "Presence in the country with all original documents",
    },
    CatalogStep {
        order: 4,
        title: "Residency Issuance",
        description: "Processing and follow-up of application at Immigration Office",
        estimated_time: "4-8 weeks",
        requirements: "Approved immigration file",
    },
    CatalogStep {
        order: 5,
        title: "ID Card Processing",
        description: "Processing of Paraguayan ID at the Identification Department",
        estimated_time: "1 day",
        requirements: "Residency resolution and presence at the Identification Department",
    },
    CatalogStep {
        order: 6,
        title: "ID Card Reception",
        description: "Physical delivery of Paraguayan ID",
        estimated_time: "2-4 weeks",
        requirements: "ID card processing receipt",
    },
    CatalogStep {
        order: 7,
        title: "Tax ID Processing",
        description: "Registration with Treasury to obtain Tax ID",
        estimated_time: "1 week",
        requirements: "Paraguayan ID card and proof of address",
    },
    CatalogStep {
        order: 8,
        title: "Tax ID Reception",
        description: "Delivery of official Tax ID document and process completion",
        estimated_time: "1 week",
        requirements: "Tax ID registration confirmation",
    },
];

//=========================================================================================
// Overall Status Derivation
//=========================================================================================

impl OverallStatus {
    /// The only source of a progress record's overall status.
    pub fn derive<'a, I>(statuses: I) -> OverallStatus
    where
        I: IntoIterator<Item = &'a StepStatus>,
    {
        let mut any = false;
        let mut all_completed = true;
        let mut any_blocked = false;
        for status in statuses {
            any = true;
            all_completed &= *status == StepStatus::Completed;
            any_blocked |= *status == StepStatus::Blocked;
        }
        if any && all_completed {
            OverallStatus::Completed
        } else if any_blocked {
            OverallStatus::Blocked
        } else {
            OverallStatus::InProgress
        }
    }
}

impl ResidencyProgress {
    pub fn status(&self) -> OverallStatus {
        OverallStatus::derive(self.steps.iter().map(|s| &s.status))
    }

    pub fn step(&self, step_id: Uuid) -> Option<&ResidencyStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// What the agency customer list shows per customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub status: OverallStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
}

impl ProgressSummary {
    pub fn from_statuses(statuses: &[StepStatus]) -> Self {
        Self {
            status: OverallStatus::derive(statuses),
            total_steps: statuses.len(),
            completed_steps: statuses
                .iter()
                .filter(|s| **s == StepStatus::Completed)
                .count(),
        }
    }
}

/// A progress record together with its derived status, as shown to both roles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressOverview {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OverallStatus,
    pub steps: Vec<ResidencyStep>,
}

impl From<ResidencyProgress> for ProgressOverview {
    fn from(progress: ResidencyProgress) -> Self {
        let status = progress.status();
        Self {
            id: progress.id,
            user_id: progress.user_id,
            status,
            steps: progress.steps,
        }
    }
}

/// Builds the stored fields for a status change. Completion stamps the time;
/// every other status clears it.
pub fn step_update(status: StepStatus, notes: Option<String>, now: DateTime<Utc>) -> StepUpdate {
    StepUpdate {
        status,
        notes,
        completed_at: (status == StepStatus::Completed).then_some(now),
    }
}

//=========================================================================================
// Progress Service
//=========================================================================================

#[derive(Clone)]
pub struct ProgressService {
    db: Arc<dyn DatabaseService>,
}

impl ProgressService {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// `Ok(None)` means the residency process has not been started yet.
    pub async fn overview(&self, user_id: Uuid) -> PortResult<Option<ProgressOverview>> {
        let progress = self.db.get_progress(user_id).await?;
        Ok(progress.map(|mut p| {
            p.steps.sort_by_key(|s| s.order);
            ProgressOverview::from(p)
        }))
    }

    /// Agency write path. Any status may follow any other.
    pub async fn update_step(
        &self,
        user_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
        notes: Option<String>,
    ) -> PortResult<ProgressOverview> {
        let progress = self
            .db
            .get_progress(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("No residency progress for user {}", user_id)))?;

        if progress.step(step_id).is_none() {
            return Err(PortError::NotFound(format!(
                "Step {} is not part of progress {}",
                step_id, progress.id
            )));
        }

        let update = step_update(status, notes, Utc::now());
        self.db.update_step(progress.id, step_id, &update).await?;

        let refreshed = self
            .overview(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("No residency progress for user {}", user_id)))?;
        self.db
            .cache_progress_status(refreshed.id, refreshed.status)
            .await?;

        info!(
            %user_id,
            %step_id,
            step_status = %status,
            overall = %refreshed.status,
            "Residency step updated"
        );
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::memory::InMemoryDatabase;

    #[test]
    fn derivation_prefers_completed_then_blocked() {
        use StepStatus::*;
        assert_eq!(OverallStatus::derive(&[Completed, Completed]), OverallStatus::Completed);
        assert_eq!(OverallStatus::derive(&[Completed, Blocked]), OverallStatus::Blocked);
        assert_eq!(OverallStatus::derive(&[Pending, InProgress]), OverallStatus::InProgress);
        assert_eq!(OverallStatus::derive(&[]), OverallStatus::InProgress);
    }

    #[test]
    fn catalog_orders_are_strictly_increasing() {
        assert!(STEP_CATALOG.windows(2).all(|w| w[0].order < w[1].order));
        assert_eq!(STEP_CATALOG.len(), 8);
    }

    #[test]
    fn completion_timestamp_follows_status() {
        let now = Utc::now();
        assert_eq!(step_update(StepStatus::Completed, None, now).completed_at, Some(now));
        assert_eq!(step_update(StepStatus::Blocked, None, now).completed_at, None);
    }

    #[test]
    fn summary_counts_completed_steps() {
        use StepStatus::*;
        let summary = ProgressSummary::from_statuses(&[Completed, Completed, Pending]);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.completed_steps, 2);
        assert_eq!(summary.status, OverallStatus::InProgress);
    }

    #[tokio::test]
    async fn missing_progress_is_not_an_error() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("new@example.com", Role::Customer);
        let service = ProgressService::new(db);
        assert!(service.overview(user.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn steps_are_read_in_catalog_order() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("order@example.com", Role::Customer);
        db.provision_progress(user.user_id);
        let service = ProgressService::new(db);

        let overview = service.overview(user.user_id).await.unwrap().unwrap();
        let orders: Vec<i32> = overview.steps.iter().map(|s| s.order).collect();
        let catalog: Vec<i32> = STEP_CATALOG.iter().map(|s| s.order).collect();
        assert_eq!(orders, catalog);
    }

    #[tokio::test]
    async fn blocking_a_step_blocks_the_overview_even_with_completed_steps() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("blocked@example.com", Role::Customer);
        let progress_id = db.provision_progress(user.user_id);
        let service = ProgressService::new(db.clone());

        let overview = service.overview(user.user_id).await.unwrap().unwrap();
        let first = overview.steps[0].id;
        let second = overview.steps[1].id;

        let after_complete = service
            .update_step(user.user_id, first, StepStatus::Completed, Some("Received".into()))
            .await
            .unwrap();
        assert!(after_complete.steps[0].completed_at.is_some());

        service
            .update_step(user.user_id, second, StepStatus::Blocked, None)
            .await
            .unwrap();

        let reread = service.overview(user.user_id).await.unwrap().unwrap();
        assert_eq!(reread.status, OverallStatus::Blocked);
        assert_eq!(reread.steps[0].status, StepStatus::Completed);
        assert_eq!(db.cached_progress_status(progress_id), Some(OverallStatus::Blocked));
    }

    #[tokio::test]
    async fn unblocking_the_only_blocked_step_lifts_the_block() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("unblock@example.com", Role::Customer);
        let progress_id = db.provision_progress(user.user_id);
        let service = ProgressService::new(db.clone());
        let step = service.overview(user.user_id).await.unwrap().unwrap().steps[2].id;

        let blocked = service
            .update_step(user.user_id, step, StepStatus::Blocked, Some("Appointment cancelled".into()))
            .await
            .unwrap();
        assert_eq!(blocked.status, OverallStatus::Blocked);
        assert_eq!(db.cached_progress_status(progress_id), Some(OverallStatus::Blocked));

        let resumed = service
            .update_step(user.user_id, step, StepStatus::InProgress, None)
            .await
            .unwrap();
        assert_eq!(resumed.status, OverallStatus::InProgress);

        let reread = service.overview(user.user_id).await.unwrap().unwrap();
        assert_eq!(reread.status, OverallStatus::InProgress);
        assert_eq!(db.cached_progress_status(progress_id), Some(OverallStatus::InProgress));
    }

    #[tokio::test]
    async fn leaving_completed_clears_the_timestamp() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("undo@example.com", Role::Customer);
        db.provision_progress(user.user_id);
        let service = ProgressService::new(db);
        let step = service.overview(user.user_id).await.unwrap().unwrap().steps[0].id;

        service
            .update_step(user.user_id, step, StepStatus::Completed, None)
            .await
            .unwrap();
        let reopened = service
            .update_step(user.user_id, step, StepStatus::InProgress, None)
            .await
            .unwrap();
        assert_eq!(reopened.steps[0].status, StepStatus::InProgress);
        assert!(reopened.steps[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn unknown_step_is_rejected() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("unknown@example.com", Role::Customer);
        db.provision_progress(user.user_id);
        let service = ProgressService::new(db);

        let err = service
            .update_step(user.user_id, Uuid::new_v4(), StepStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
