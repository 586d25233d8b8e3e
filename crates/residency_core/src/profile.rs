//! crates/residency_core/src/profile.rs
//!
//! Profile reads and upserts with per-role visibility of the three note fields.

use crate::domain::{ProfileFields, Role, UserProfile};
use crate::ports::{DatabaseService, PortResult};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

impl ProfileFields {
    /// What a customer may see of their own profile.
    pub fn visible_to(mut self, role: Role) -> Self {
        if role == Role::Customer {
            self.internal_agency_notes = None;
        }
        self
    }

    /// Applies a write from `role` on top of the stored fields. Each side keeps
    /// the note fields it does not own.
    pub fn merge_write(stored: Option<&ProfileFields>, incoming: ProfileFields, role: Role) -> Self {
        let stored = stored.cloned().unwrap_or_default();
        match role {
            Role::Customer => ProfileFields {
                internal_agency_notes: stored.internal_agency_notes,
                agency_to_client_notes: stored.agency_to_client_notes,
                ..incoming
            },
            Role::Agency => ProfileFields {
                client_to_agency_notes: stored.client_to_agency_notes,
                ..incoming
            },
        }
    }
}

impl UserProfile {
    pub fn visible_to(self, role: Role) -> Self {
        UserProfile {
            fields: self.fields.visible_to(role),
            ..self
        }
    }
}

#[derive(Clone)]
pub struct ProfileService {
    db: Arc<dyn DatabaseService>,
}

impl ProfileService {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// `user_id`'s profile as seen by `viewer`. `None` when it was never filled in.
    pub async fn get(&self, user_id: Uuid, viewer: Role) -> PortResult<Option<UserProfile>> {
        let profile = self.db.get_profile(user_id).await?;
        Ok(profile.map(|p| p.visible_to(viewer)))
    }

    /// Creates or updates `user_id`'s profile on behalf of `writer`.
    pub async fn save(
        &self,
        user_id: Uuid,
        fields: ProfileFields,
        writer: Role,
    ) -> PortResult<UserProfile> {
        let stored = self.db.get_profile(user_id).await?;
        let merged = ProfileFields::merge_write(stored.as_ref().map(|p| &p.fields), fields, writer);
        let saved = self.db.upsert_profile(user_id, &merged).await?;
        info!(%user_id, writer = %writer, created = stored.is_none(), "Profile saved");
        Ok(saved.visible_to(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MaritalStatus, ResidencyType, ShippingAddress};
    use crate::memory::InMemoryDatabase;
    use chrono::NaiveDate;

    fn fields() -> ProfileFields {
        ProfileFields {
            first_name: Some("Lucía".to_string()),
            last_name: Some("Benítez".to_string()),
            birth_date: NaiveDate::from_ymd_opt(1990, 4, 12),
            desired_residency_type: Some(ResidencyType::PermanentInvestment),
            marital_status: Some(MaritalStatus::Married),
            shipping_address: Some(ShippingAddress {
                street: "Calle Palma 123".to_string(),
                city: "Asunción".to_string(),
                state: "Central".to_string(),
                country: "Paraguay".to_string(),
                postal_code: "1209".to_string(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn customers_never_see_internal_notes() {
        let db = Arc::new(InMemoryDatabase::new());
        let customer = db.add_user("c@example.com", Role::Customer);
        let service = ProfileService::new(db);

        let agency_write = ProfileFields {
            internal_agency_notes: Some("Pending background check".to_string()),
            agency_to_client_notes: Some("Bring your originals".to_string()),
            ..fields()
        };
        service.save(customer.user_id, agency_write, Role::Agency).await.unwrap();

        let seen = service.get(customer.user_id, Role::Customer).await.unwrap().unwrap();
        assert_eq!(seen.fields.internal_agency_notes, None);
        assert_eq!(seen.fields.agency_to_client_notes.as_deref(), Some("Bring your originals"));

        let full = service.get(customer.user_id, Role::Agency).await.unwrap().unwrap();
        assert!(full.fields.internal_agency_notes.is_some());
    }

    #[tokio::test]
    async fn each_side_keeps_the_notes_it_does_not_own() {
        let db = Arc::new(InMemoryDatabase::new());
        let customer = db.add_user("c@example.com", Role::Customer);
        let service = ProfileService::new(db.clone());

        service
            .save(
                customer.user_id,
                ProfileFields {
                    internal_agency_notes: Some("VIP".to_string()),
                    agency_to_client_notes: Some("Welcome".to_string()),
                    client_to_agency_notes: Some("ignored".to_string()),
                    ..fields()
                },
                Role::Agency,
            )
            .await
            .unwrap();

        service
            .save(
                customer.user_id,
                ProfileFields {
                    client_to_agency_notes: Some("I arrive in March".to_string()),
                    internal_agency_notes: Some("overwrite attempt".to_string()),
                    agency_to_client_notes: None,
                    whatsapp: Some("+595 981 000000".to_string()),
                    ..fields()
                },
                Role::Customer,
            )
            .await
            .unwrap();

        let stored = db.get_profile(customer.user_id).await.unwrap().unwrap();
        assert_eq!(stored.fields.internal_agency_notes.as_deref(), Some("VIP"));
        assert_eq!(stored.fields.agency_to_client_notes.as_deref(), Some("Welcome"));
        assert_eq!(stored.fields.client_to_agency_notes.as_deref(), Some("I arrive in March"));
        assert_eq!(stored.fields.whatsapp.as_deref(), Some("+595 981 000000"));
    }

    #[tokio::test]
    async fn saving_twice_updates_the_same_profile() {
        let db = Arc::new(InMemoryDatabase::new());
        let customer = db.add_user("c@example.com", Role::Customer);
        let service = ProfileService::new(db);

        let first = service.save(customer.user_id, fields(), Role::Customer).await.unwrap();
        let second = service
            .save(
                customer.user_id,
                ProfileFields {
                    country: Some("Argentina".to_string()),
                    ..fields()
                },
                Role::Customer,
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.fields.country.as_deref(), Some("Argentina"));
        assert_eq!(second.email, "c@example.com");
    }
}
