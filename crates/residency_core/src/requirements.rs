//! crates/residency_core/src/requirements.rs
//!
//! The requirement rules attached to every analyzed document. A total, pure
//! table lookup over (document type, "is the document in Spanish").

use crate::domain::{DocumentType, Requirement, Requirements};

/// Identity documents and criminal record certificates must not be older than this.
pub const VALIDITY_PERIOD: &str = "6 months";

/// Returns what the applicant still has to do with a document of `document_type`.
pub fn requirements_for(document_type: DocumentType, is_spanish: bool) -> Requirements {
    if document_type.is_identity() {
        return Requirements {
            apostille: Requirement {
                is_required: false,
                description: "No apostille or legalization required".to_string(),
                validity_period: None,
            },
            translation: Requirement {
                is_required: false,
                description: "No translation required".to_string(),
                validity_period: None,
            },
            validity: Requirement {
                is_required: true,
                description: "Minimum 6 months validity".to_string(),
                validity_period: Some(VALIDITY_PERIOD.to_string()),
            },
        };
    }

    let translation = if is_spanish {
        Requirement {
            is_required: false,
            description: "No translation required (document in Spanish)".to_string(),
            validity_period: None,
        }
    } else {
        Requirement {
            is_required: true,
            description: "Requires translation to Spanish".to_string(),
            validity_period: None,
        }
    };

    let validity = if document_type == DocumentType::CriminalRecordCertificate {
        Requirement {
            is_required: true,
            description: "Maximum validity of 6 months".to_string(),
            validity_period: Some(VALIDITY_PERIOD.to_string()),
        }
    } else {
        Requirement {
            is_required: false,
            description: "No validity period".to_string(),
            validity_period: None,
        }
    };

    Requirements {
        apostille: Requirement {
            is_required: true,
            description: "Requires mandatory apostille or legalization".to_string(),
            validity_period: None,
        },
        translation,
        validity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_documents_need_neither_apostille_nor_translation() {
        for document_type in [
            DocumentType::Passport,
            DocumentType::IdentityDocument,
            DocumentType::ResidencyCard,
        ] {
            for is_spanish in [true, false] {
                let req = requirements_for(document_type, is_spanish);
                assert!(!req.apostille.is_required, "{document_type}");
                assert!(!req.translation.is_required, "{document_type}");
                assert!(req.validity.is_required);
                assert_eq!(req.validity.validity_period.as_deref(), Some("6 months"));
            }
        }
    }

    #[test]
    fn criminal_record_needs_translation_only_when_not_spanish() {
        let foreign = requirements_for(DocumentType::CriminalRecordCertificate, false);
        assert!(foreign.apostille.is_required);
        assert!(foreign.translation.is_required);
        assert!(foreign.validity.is_required);
        assert_eq!(foreign.validity.validity_period.as_deref(), Some("6 months"));

        let spanish = requirements_for(DocumentType::CriminalRecordCertificate, true);
        assert!(!spanish.translation.is_required);
        assert!(spanish.validity.is_required);
    }

    #[test]
    fn other_documents_always_need_an_apostille_and_no_validity() {
        for document_type in [
            DocumentType::BirthCertificate,
            DocumentType::MarriageCertificate,
            DocumentType::InterpolCertificate,
            DocumentType::EntryPermit,
        ] {
            let req = requirements_for(document_type, true);
            assert!(req.apostille.is_required);
            assert!(!req.validity.is_required);
            assert!(req.validity.validity_period.is_none());
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        for document_type in DocumentType::ALL {
            for is_spanish in [true, false] {
                assert_eq!(
                    requirements_for(document_type, is_spanish),
                    requirements_for(document_type, is_spanish)
                );
            }
        }
    }
}
