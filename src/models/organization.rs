use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub const STATUS_APPROVED: &str = "approved";
pub const PLAN_TIER_ENTERPRISE: &str = "enterprise";
pub const PLAN_STATUS_ACTIVE: &str = "active";

/// Columns selected wherever an [`Organization`] is read from a row.
pub const ORG_COLUMNS: &str = "id, name, slug, email, website, status, restricted, \
     deleted_at, plan_tier, plan_status, plan_expires_at, created_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub status: String,
    pub restricted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub plan_tier: Option<String>,
    pub plan_status: Option<String>,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            slug: row.get("slug"),
            email: row.get("email"),
            website: row.get("website"),
            status: row.get("status"),
            restricted: row.get("restricted"),
            deleted_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("deleted_at")
                .map(|dt| dt.and_utc()),
            plan_tier: row.get("plan_tier"),
            plan_status: row.get("plan_status"),
            plan_expires_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("plan_expires_at")
                .map(|dt| dt.and_utc()),
            created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        }
    }

    /// Eligible to be linked: approved, not deleted, not restricted.
    pub fn is_eligible(&self) -> bool {
        self.status == STATUS_APPROVED && self.deleted_at.is_none() && !self.restricted
    }

    pub fn is_enterprise_tier(&self) -> bool {
        self.plan_tier.as_deref() == Some(PLAN_TIER_ENTERPRISE)
    }

    /// Active, non-expired, non-restricted, approved enterprise plan.
    pub fn has_active_enterprise_plan(&self, now: DateTime<Utc>) -> bool {
        self.is_eligible()
            && self.is_enterprise_tier()
            && self.plan_status.as_deref() == Some(PLAN_STATUS_ACTIVE)
            && self.plan_expires_at.is_none_or(|expires| expires > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}
