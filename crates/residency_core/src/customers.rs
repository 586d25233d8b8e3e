//! crates/residency_core/src/customers.rs
//!
//! The agency's view over customer accounts.

use crate::chat::matches_search;
use crate::domain::{CustomerOverview, Document, Role, User, UserProfile};
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::progress::{ProgressOverview, ProgressService, ProgressSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One row of the agency customer list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` until the residency process is started.
    pub progress: Option<ProgressSummary>,
}

impl From<CustomerOverview> for CustomerSummary {
    fn from(row: CustomerOverview) -> Self {
        Self {
            user_id: row.user.user_id,
            email: row.user.email,
            first_name: row.first_name,
            last_name: row.last_name,
            created_at: row.user.created_at,
            progress: row
                .step_statuses
                .as_deref()
                .map(ProgressSummary::from_statuses),
        }
    }
}

/// Everything the agency sees on a customer's detail page.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerDetail {
    pub user: User,
    pub documents: Vec<Document>,
    pub progress: Option<ProgressOverview>,
    pub profile: Option<UserProfile>,
}

#[derive(Clone)]
pub struct CustomerDirectory {
    db: Arc<dyn DatabaseService>,
    progress: ProgressService,
}

impl CustomerDirectory {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self {
            progress: ProgressService::new(db.clone()),
            db,
        }
    }

    /// Customers, newest account first, optionally filtered by email or name.
    pub async fn list(&self, search: Option<&str>) -> PortResult<Vec<CustomerSummary>> {
        let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        let mut rows: Vec<CustomerSummary> = self
            .db
            .list_customers()
            .await?
            .into_iter()
            .filter(|row| match &needle {
                Some(needle) => matches_search(
                    needle,
                    &row.user.email,
                    row.first_name.as_deref(),
                    row.last_name.as_deref(),
                ),
                None => true,
            })
            .map(CustomerSummary::from)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    pub async fn detail(&self, user_id: Uuid) -> PortResult<CustomerDetail> {
        let user = self.customer(user_id).await?;
        let (documents, progress, profile) = tokio::try_join!(
            self.db.list_documents(user_id),
            self.progress.overview(user_id),
            self.db.get_profile(user_id),
        )?;
        Ok(CustomerDetail {
            user,
            documents,
            progress,
            profile,
        })
    }

    /// Deletes a customer account and everything it owns.
    pub async fn delete(&self, user_id: Uuid) -> PortResult<()> {
        self.customer(user_id).await?;
        self.db.delete_user(user_id).await?;
        info!(%user_id, "Customer deleted");
        Ok(())
    }

    async fn customer(&self, user_id: Uuid) -> PortResult<User> {
        let user = self.db.get_user(user_id).await?;
        if user.role != Role::Customer {
            return Err(PortError::NotFound(format!("Customer {} not found", user_id)));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProfileFields, StepStatus};
    use crate::memory::InMemoryDatabase;

    #[tokio::test]
    async fn list_excludes_agency_and_summarizes_progress() {
        let db = Arc::new(InMemoryDatabase::new());
        let started = db.add_user("started@example.com", Role::Customer);
        db.add_user("fresh@example.com", Role::Customer);
        db.add_user("staff@example.com", Role::Agency);
        db.provision_progress(started.user_id);

        let directory = CustomerDirectory::new(db);
        let rows = directory.list(None).await.unwrap();
        assert_eq!(rows.len(), 2);

        let started_row = rows.iter().find(|r| r.user_id == started.user_id).unwrap();
        let summary = started_row.progress.as_ref().unwrap();
        assert_eq!(summary.total_steps, 8);
        assert_eq!(summary.completed_steps, 0);
        assert!(rows.iter().any(|r| r.progress.is_none()));
    }

    #[tokio::test]
    async fn list_search_matches_profile_names() {
        let db = Arc::new(InMemoryDatabase::new());
        let maria = db.add_user("m@example.com", Role::Customer);
        db.add_user("x@example.com", Role::Customer);
        db.upsert_profile(
            maria.user_id,
            &ProfileFields {
                first_name: Some("María".to_string()),
                last_name: Some("González".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let rows = CustomerDirectory::new(db).list(Some("gonzález")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, maria.user_id);
    }

    #[tokio::test]
    async fn detail_reports_blocked_progress() {
        let db = Arc::new(InMemoryDatabase::new());
        let customer = db.add_user("c@example.com", Role::Customer);
        db.provision_progress(customer.user_id);
        let progress = ProgressService::new(db.clone());
        let step = progress.overview(customer.user_id).await.unwrap().unwrap().steps[3].id;
        progress
            .update_step(customer.user_id, step, StepStatus::Blocked, Some("Missing stamp".into()))
            .await
            .unwrap();

        let detail = CustomerDirectory::new(db).detail(customer.user_id).await.unwrap();
        let overview = detail.progress.unwrap();
        assert_eq!(overview.status, crate::domain::OverallStatus::Blocked);
        assert!(detail.documents.is_empty());
        assert!(detail.profile.is_none());
    }

    #[tokio::test]
    async fn agency_accounts_cannot_be_deleted_through_the_directory() {
        let db = Arc::new(InMemoryDatabase::new());
        let staff = db.add_user("staff@example.com", Role::Agency);
        let customer = db.add_user("c@example.com", Role::Customer);
        let directory = CustomerDirectory::new(db.clone());

        assert!(matches!(directory.delete(staff.user_id).await, Err(PortError::NotFound(_))));
        directory.delete(customer.user_id).await.unwrap();
        assert!(db.get_user(customer.user_id).await.is_err());
    }
}
