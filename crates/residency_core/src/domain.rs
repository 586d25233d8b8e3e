//! crates/residency_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! These structs are independent of any database or transport. They derive
//! serde so the analysis result can be persisted as a JSON document and so the
//! web layer can return them without a parallel set of response types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Returned by the `FromStr` impls below when a stored value is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` over a fixed variant table.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

//=========================================================================================
// Users and Authentication
//=========================================================================================

/// The two account roles. Agency staff see every customer; customers see themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Agency,
}

string_enum!(Role, "role", {
    Customer => "customer",
    Agency => "agency",
});

/// Represents an account - used throughout the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_agency(&self) -> bool {
        self.role == Role::Agency
    }
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub hashed_password: String,
}

//=========================================================================================
// Documents
//=========================================================================================

/// The eight document kinds the classifier may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "Passport")]
    Passport,
    #[serde(rename = "Identity Document")]
    IdentityDocument,
    #[serde(rename = "Birth Certificate")]
    BirthCertificate,
    #[serde(rename = "Marriage Certificate")]
    MarriageCertificate,
    #[serde(rename = "Criminal Record Certificate")]
    CriminalRecordCertificate,
    #[serde(rename = "Interpol Certificate")]
    InterpolCertificate,
    #[serde(rename = "Residency Card")]
    ResidencyCard,
    #[serde(rename = "Entry Permit")]
    EntryPermit,
}

string_enum!(DocumentType, "document type", {
    Passport => "Passport",
    IdentityDocument => "Identity Document",
    BirthCertificate => "Birth Certificate",
    MarriageCertificate => "Marriage Certificate",
    CriminalRecordCertificate => "Criminal Record Certificate",
    InterpolCertificate => "Interpol Certificate",
    ResidencyCard => "Residency Card",
    EntryPermit => "Entry Permit",
});

impl DocumentType {
    pub const ALL: [DocumentType; 8] = [
        DocumentType::Passport,
        DocumentType::IdentityDocument,
        DocumentType::BirthCertificate,
        DocumentType::MarriageCertificate,
        DocumentType::CriminalRecordCertificate,
        DocumentType::InterpolCertificate,
        DocumentType::ResidencyCard,
        DocumentType::EntryPermit,
    ];

    /// Identity documents are accepted as-is apart from their remaining validity.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            DocumentType::Passport | DocumentType::IdentityDocument | DocumentType::ResidencyCard
        )
    }
}

/// The pipeline never self-certifies; a reviewer moves documents out of `Review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Valid,
    Invalid,
    Review,
}

/// One of the three fixed requirement categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub is_required: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_period: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub apostille: Requirement,
    pub translation: Requirement,
    pub validity: Requirement,
}

/// The structured verdict stored alongside every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub document_type: DocumentType,
    pub country: String,
    pub is_apostilled: bool,
    pub status: AnalysisStatus,
    pub condition: String,
    pub observations: Vec<String>,
    pub requirements: Requirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_period: Option<String>,
}

/// Represents an uploaded and analyzed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_type: DocumentType,
    pub analysis_result: AnalysisResult,
    pub file_path: String,
    pub agency_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A raw file as received from the client, before validation.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

//=========================================================================================
// Residency Progress
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

string_enum!(StepStatus, "step status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Blocked => "blocked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    InProgress,
    Completed,
    Blocked,
}

string_enum!(OverallStatus, "progress status", {
    InProgress => "in_progress",
    Completed => "completed",
    Blocked => "blocked",
});

/// One stage of a customer's residency workflow, joined with its per-customer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidencyStep {
    pub id: Uuid,
    pub order: i32,
    pub title: String,
    pub description: String,
    pub estimated_time: String,
    pub requirements: String,
    pub status: StepStatus,
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A customer's progress record. The overall status is derived from `steps`,
/// see `progress::OverallStatus::derive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidencyProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub steps: Vec<ResidencyStep>,
}

/// The per-step fields the agency is allowed to write.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Conversations and Messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

string_enum!(ConversationStatus, "conversation status", {
    Active => "active",
    Closed => "closed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ConversationStatus,
    pub is_bot_active: bool,
    pub agency_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    User,
    Agency,
}

string_enum!(ParticipantRole, "participant role", {
    User => "user",
    Agency => "agency",
});

/// Who wrote a message. Bot messages carry no sender id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Agency,
    Bot,
}

string_enum!(SenderType, "sender type", {
    User => "user",
    Agency => "agency",
    Bot => "bot",
});

impl SenderType {
    /// The sender type a signed-in account writes as.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Customer => SenderType::User,
            Role::Agency => SenderType::Agency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    /// Commit position assigned by the datastore. Zero for a send not yet stored.
    pub seq: i64,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Chosen by the writer so a retried insert cannot store the message twice.
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub sender_type: SenderType,
    pub content: String,
}

//=========================================================================================
// User Profiles
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyType {
    TemporaryShort,
    TemporaryLong,
    PermanentInvestment,
}

string_enum!(ResidencyType, "residency type", {
    TemporaryShort => "temporary_short",
    TemporaryLong => "temporary_long",
    PermanentInvestment => "permanent_investment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyGoal {
    TaxResidency,
    PlanB,
    Relocation,
}

string_enum!(ResidencyGoal, "residency goal", {
    TaxResidency => "tax_residency",
    PlanB => "plan_b",
    Relocation => "relocation",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaritalStatus {
    Single,
    Married,
    Divorced,
    Widowed,
}

string_enum!(MaritalStatus, "marital status", {
    Single => "single",
    Married => "married",
    Divorced => "divorced",
    Widowed => "widowed",
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
}

/// Every writable profile field. Used both as the upsert payload and, with
/// `id`/timestamps added, as the stored profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    pub preferred_language: Option<String>,
    pub whatsapp: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub shipping_address: Option<ShippingAddress>,
    pub nationality_country: Option<String>,
    pub desired_residency_type: Option<ResidencyType>,
    pub birth_country: Option<String>,
    pub primary_residency_country: Option<String>,
    pub residency_goal: Option<ResidencyGoal>,
    pub marital_status: Option<MaritalStatus>,
    pub internal_agency_notes: Option<String>,
    pub client_to_agency_notes: Option<String>,
    pub agency_to_client_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    #[serde(flatten)]
    pub fields: ProfileFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//=========================================================================================
// Agency Overviews
//=========================================================================================

/// A customer row as returned by the datastore, before summarizing.
#[derive(Debug, Clone)]
pub struct CustomerOverview {
    pub user: User,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `None` when the residency process has not been started.
    pub step_statuses: Option<Vec<StepStatus>>,
}

/// A conversation row as returned by the datastore, before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub user_email: String,
    pub user_first_name: Option<String>,
    pub user_last_name: Option<String>,
    pub unread_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_uses_display_names_on_the_wire() {
        let json = serde_json::to_string(&DocumentType::CriminalRecordCertificate).unwrap();
        assert_eq!(json, "\"Criminal Record Certificate\"");

        let parsed: DocumentType = serde_json::from_str("\"Identity Document\"").unwrap();
        assert_eq!(parsed, DocumentType::IdentityDocument);
        assert!(serde_json::from_str::<DocumentType>("\"Driving Licence\"").is_err());
    }

    #[test]
    fn stored_status_strings_parse_back() {
        for status in [
            StepStatus::Pending,
            StepStatus::InProgress,
            StepStatus::Completed,
            StepStatus::Blocked,
        ] {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), status);
        }
        let err = "done".parse::<StepStatus>().unwrap_err();
        assert_eq!(err.kind, "step status");
    }

    #[test]
    fn sender_type_follows_role() {
        assert_eq!(SenderType::for_role(Role::Customer), SenderType::User);
        assert_eq!(SenderType::for_role(Role::Agency), SenderType::Agency);
    }
}
