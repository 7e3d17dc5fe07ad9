use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "consent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Revoked,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Pending => "pending",
            ConsentStatus::Approved => "approved",
            ConsentStatus::Rejected => "rejected",
            ConsentStatus::Expired => "expired",
            ConsentStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsentStatus::Rejected | ConsentStatus::Expired | ConsentStatus::Revoked
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConsentStatus::Pending | ConsentStatus::Approved)
    }

    /// §4.4 state machine: is `self -> to` a legal transition?
    pub fn can_transition_to(&self, to: ConsentStatus) -> bool {
        use ConsentStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Approved, Approved)
                | (Approved, Rejected)
                | (Approved, Revoked)
                | (Approved, Expired)
                | (Rejected, Expired)
                | (Revoked, Expired)
                | (Expired, Expired)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "consent_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConsentType {
    #[default]
    Realtime,
    Offline,
}

/// A single data item covered by a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_name: String,
    pub schema_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl FieldSpec {
    pub fn validate(&self, index: usize) -> Result<(), crate::error::ConsentError> {
        if self.field_name.trim().is_empty() {
            return Err(crate::error::ConsentError::validation(
                format!("consentRequirement.fields[{index}].fieldName"),
                "is required",
            ));
        }
        if self.schema_id.trim().is_empty() {
            return Err(crate::error::ConsentError::validation(
                format!("consentRequirement.fields[{index}].schemaId"),
                "is required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentRecord {
    pub consent_id: Uuid,
    pub owner_id: String,
    pub owner_email: String,
    pub app_id: String,
    pub app_name: Option<String>,
    pub status: ConsentStatus,
    #[serde(rename = "type")]
    pub consent_type: ConsentType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub pending_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub grant_expires_at: Option<OffsetDateTime>,
    pub grant_duration: String,
    pub fields: Vec<FieldSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub consent_portal_url: String,
    pub updated_by: String,
}

impl ConsentRecord {
    /// I5: the portal URL is disclosed only while pending and non-empty.
    pub fn disclosable_portal_url(&self) -> Option<&str> {
        if self.status == ConsentStatus::Pending && !self.consent_portal_url.is_empty() {
            Some(&self.consent_portal_url)
        } else {
            None
        }
    }
}

/// Double-option deserialization: distinguishes "key absent" from
/// "key present with value null/empty" (I3).
pub fn deserialize_double_option<'de, D, T>(
    deserializer: D,
) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(ConsentStatus::Pending.can_transition_to(ConsentStatus::Approved));
        assert!(ConsentStatus::Pending.can_transition_to(ConsentStatus::Rejected));
        assert!(ConsentStatus::Approved.can_transition_to(ConsentStatus::Approved));
        assert!(ConsentStatus::Approved.can_transition_to(ConsentStatus::Revoked));
        assert!(ConsentStatus::Expired.can_transition_to(ConsentStatus::Expired));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!ConsentStatus::Rejected.can_transition_to(ConsentStatus::Approved));
        assert!(!ConsentStatus::Pending.can_transition_to(ConsentStatus::Revoked));
        assert!(!ConsentStatus::Revoked.can_transition_to(ConsentStatus::Approved));
        assert!(!ConsentStatus::Expired.can_transition_to(ConsentStatus::Approved));
    }

    #[test]
    fn portal_url_disclosure() {
        let mut rec = sample_record();
        rec.status = ConsentStatus::Pending;
        assert!(rec.disclosable_portal_url().is_some());
        rec.status = ConsentStatus::Approved;
        assert!(rec.disclosable_portal_url().is_none());
        rec.status = ConsentStatus::Pending;
        rec.consent_portal_url = String::new();
        assert!(rec.disclosable_portal_url().is_none());
    }

    fn sample_record() -> ConsentRecord {
        let now = OffsetDateTime::now_utc();
        ConsentRecord {
            consent_id: Uuid::new_v4(),
            owner_id: "u@x".into(),
            owner_email: "u@x".into(),
            app_id: "passport-app".into(),
            app_name: None,
            status: ConsentStatus::Pending,
            consent_type: ConsentType::Realtime,
            created_at: now,
            updated_at: now,
            pending_expires_at: Some(now),
            grant_expires_at: None,
            grant_duration: "PT1H".into(),
            fields: vec![],
            session_id: None,
            consent_portal_url: "http://portal/?consent_id=x".into(),
            updated_by: "system".into(),
        }
    }
}
