// ============================================
// Enterprise Quota Model & Guard
// ============================================
//
// An enterprise's resource ceilings (workspaces, linked organizations,
// API keys, members) are read into an immutable QuotaSnapshot, and every
// mutation that would grow a counted resource runs assert_available()
// against a snapshot resolved in the same transactional scope.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

pub mod resolver;

// ============================================
// Defaults
// ============================================

/// Fallback ceilings applied when an enterprise row carries no explicit
/// limit, or an invalid one.
pub const DEFAULT_MAX_WORKSPACES: i64 = 10;
pub const DEFAULT_MAX_LINKED_ORGS: i64 = 50;
pub const DEFAULT_MAX_API_KEYS: i64 = 10;
pub const DEFAULT_MAX_MEMBERS: i64 = 100;

// ============================================
// Resource Kinds
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaResource {
    Workspaces,
    LinkedOrgs,
    ApiKeys,
    Members,
}

impl QuotaResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::Workspaces => "WORKSPACES",
            QuotaResource::LinkedOrgs => "LINKED_ORGS",
            QuotaResource::ApiKeys => "API_KEYS",
            QuotaResource::Members => "MEMBERS",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            QuotaResource::Workspaces => "workspace",
            QuotaResource::LinkedOrgs => "linked organization",
            QuotaResource::ApiKeys => "API key",
            QuotaResource::Members => "member",
        }
    }
}

// ============================================
// Limits
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub max_workspaces: i64,
    pub max_linked_orgs: i64,
    pub max_api_keys: i64,
    pub max_members: i64,
}

impl QuotaLimits {
    /// Normalize raw limit inputs into valid ceilings.
    ///
    /// Inputs arrive as optional floats (limits may come from integer
    /// columns or from plan metadata blobs). A missing, non-finite, or
    /// sub-1 value falls back to the resource default; everything else is
    /// floored to an integer.
    pub fn normalize(
        max_workspaces: Option<f64>,
        max_linked_orgs: Option<f64>,
        max_api_keys: Option<f64>,
        max_members: Option<f64>,
    ) -> Self {
        Self {
            max_workspaces: normalize_limit(max_workspaces, DEFAULT_MAX_WORKSPACES),
            max_linked_orgs: normalize_limit(max_linked_orgs, DEFAULT_MAX_LINKED_ORGS),
            max_api_keys: normalize_limit(max_api_keys, DEFAULT_MAX_API_KEYS),
            max_members: normalize_limit(max_members, DEFAULT_MAX_MEMBERS),
        }
    }

    pub fn for_resource(&self, resource: QuotaResource) -> i64 {
        match resource {
            QuotaResource::Workspaces => self.max_workspaces,
            QuotaResource::LinkedOrgs => self.max_linked_orgs,
            QuotaResource::ApiKeys => self.max_api_keys,
            QuotaResource::Members => self.max_members,
        }
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self::normalize(None, None, None, None)
    }
}

fn normalize_limit(value: Option<f64>, default: i64) -> i64 {
    match value {
        Some(v) if v.is_finite() && v.floor() >= 1.0 => v.floor() as i64,
        _ => default,
    }
}

// ============================================
// Usage
// ============================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub workspaces: i64,
    pub linked_orgs: i64,
    pub api_keys: i64,
    pub members: i64,
}

impl QuotaUsage {
    pub fn for_resource(&self, resource: QuotaResource) -> i64 {
        match resource {
            QuotaResource::Workspaces => self.workspaces,
            QuotaResource::LinkedOrgs => self.linked_orgs,
            QuotaResource::ApiKeys => self.api_keys,
            QuotaResource::Members => self.members,
        }
    }
}

// ============================================
// Snapshot
// ============================================

/// Point-in-time view of an enterprise's usage versus its limits.
///
/// Constructed fresh for every guard check by the resolver, never mutated,
/// never cached across requests. `tracked_linked_organization_ids` holds
/// every organization id already counted toward linked-org usage, whether
/// via a realized link or a still-open request; the enterprise's own id is
/// excluded by construction.
#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub enterprise_id: Uuid,
    pub limits: QuotaLimits,
    pub usage: QuotaUsage,
    pub workspace_ids: Vec<Uuid>,
    pub tracked_linked_organization_ids: HashSet<Uuid>,
}

impl QuotaSnapshot {
    pub fn is_tracked(&self, organization_id: Uuid) -> bool {
        self.tracked_linked_organization_ids
            .contains(&organization_id)
    }
}

// ============================================
// Guard
// ============================================

/// Options for a single guard check.
#[derive(Debug, Clone, Copy)]
pub struct QuotaCheck {
    /// How many units the caller intends to consume. Negative values are
    /// clamped to zero.
    pub increment: i64,
    /// For LINKED_ORGS: the organization being linked. An id already in
    /// the snapshot's tracked set makes the check free.
    pub linked_organization_id: Option<Uuid>,
}

impl Default for QuotaCheck {
    fn default() -> Self {
        Self {
            increment: 1,
            linked_organization_id: None,
        }
    }
}

impl QuotaCheck {
    pub fn linking(organization_id: Uuid) -> Self {
        Self {
            increment: 1,
            linked_organization_id: Some(organization_id),
        }
    }

    #[allow(dead_code)]
    pub fn increment(n: i64) -> Self {
        Self {
            increment: n,
            linked_organization_id: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LimitReachedError {
    pub resource: QuotaResource,
    pub limit: i64,
    pub current: i64,
    pub message: String,
}

impl LimitReachedError {
    pub fn new(resource: QuotaResource, limit: i64, current: i64) -> Self {
        let message = format!(
            "{} limit reached ({} of {} used)",
            resource.label(),
            current,
            limit
        );
        Self {
            resource,
            limit,
            current,
            message,
        }
    }
}

/// Decide whether `snapshot` has room for the intended increment.
///
/// Pure: no I/O, no mutation. Re-linking an organization that the snapshot
/// already tracks resolves to a zero increment and always passes, so
/// approving an already-counted intent can never spuriously fail.
pub fn assert_available(
    snapshot: &QuotaSnapshot,
    resource: QuotaResource,
    check: QuotaCheck,
) -> Result<(), LimitReachedError> {
    let mut increment = check.increment.max(0);

    if resource == QuotaResource::LinkedOrgs
        && check
            .linked_organization_id
            .is_some_and(|id| snapshot.is_tracked(id))
    {
        increment = 0;
    }

    if increment == 0 {
        return Ok(());
    }

    let limit = snapshot.limits.for_resource(resource);
    let current = snapshot.usage.for_resource(resource);

    if current + increment > limit {
        return Err(LimitReachedError::new(resource, limit, current));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(limit: i64, used: i64, tracked: &[Uuid]) -> QuotaSnapshot {
        QuotaSnapshot {
            enterprise_id: Uuid::new_v4(),
            limits: QuotaLimits {
                max_workspaces: limit,
                max_linked_orgs: limit,
                max_api_keys: limit,
                max_members: limit,
            },
            usage: QuotaUsage {
                workspaces: used,
                linked_orgs: used,
                api_keys: used,
                members: used,
            },
            workspace_ids: vec![],
            tracked_linked_organization_ids: tracked.iter().copied().collect(),
        }
    }

    #[test]
    fn normalize_applies_defaults_for_invalid_inputs() {
        let limits = QuotaLimits::normalize(None, Some(f64::NAN), Some(f64::INFINITY), Some(-3.0));
        assert_eq!(limits.max_workspaces, DEFAULT_MAX_WORKSPACES);
        assert_eq!(limits.max_linked_orgs, DEFAULT_MAX_LINKED_ORGS);
        assert_eq!(limits.max_api_keys, DEFAULT_MAX_API_KEYS);
        assert_eq!(limits.max_members, DEFAULT_MAX_MEMBERS);

        let zeroed = QuotaLimits::normalize(Some(0.0), Some(0.5), Some(-0.0), Some(0.99));
        assert_eq!(zeroed.max_workspaces, DEFAULT_MAX_WORKSPACES);
        assert_eq!(zeroed.max_linked_orgs, DEFAULT_MAX_LINKED_ORGS);
        assert_eq!(zeroed.max_api_keys, DEFAULT_MAX_API_KEYS);
        assert_eq!(zeroed.max_members, DEFAULT_MAX_MEMBERS);
    }

    #[test]
    fn normalize_floors_and_passes_valid_values() {
        let limits = QuotaLimits::normalize(Some(3.0), Some(7.9), Some(1.0), Some(250.0));
        assert_eq!(limits.max_workspaces, 3);
        assert_eq!(limits.max_linked_orgs, 7);
        assert_eq!(limits.max_api_keys, 1);
        assert_eq!(limits.max_members, 250);
    }

    #[test]
    fn zero_increment_always_passes() {
        let snap = snapshot(3, 3, &[]);
        // At the ceiling, but a zero increment is a no-op.
        assert_available(&snap, QuotaResource::Members, QuotaCheck::increment(0)).unwrap();
        assert_available(&snap, QuotaResource::Workspaces, QuotaCheck::increment(-5)).unwrap();
    }

    #[test]
    fn tracked_organization_relinks_for_free() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let snap = snapshot(3, 3, &[a, b, c]);

        assert_available(&snap, QuotaResource::LinkedOrgs, QuotaCheck::linking(b)).unwrap();

        let err = assert_available(&snap, QuotaResource::LinkedOrgs, QuotaCheck::linking(d))
            .unwrap_err();
        assert_eq!(err.resource, QuotaResource::LinkedOrgs);
        assert_eq!(err.limit, 3);
        assert_eq!(err.current, 3);
    }

    #[test]
    fn guard_rejects_past_the_ceiling() {
        let snap = snapshot(10, 9, &[]);
        assert_available(&snap, QuotaResource::ApiKeys, QuotaCheck::default()).unwrap();

        let err = assert_available(&snap, QuotaResource::ApiKeys, QuotaCheck::increment(2))
            .unwrap_err();
        assert_eq!(err.limit, 10);
        assert_eq!(err.current, 9);
        assert!(err.message.contains("9 of 10"));
    }

    #[test]
    fn guard_allows_exactly_to_the_ceiling() {
        let snap = snapshot(5, 3, &[]);
        assert_available(&snap, QuotaResource::Members, QuotaCheck::increment(2)).unwrap();
        assert_available(&snap, QuotaResource::Members, QuotaCheck::increment(3)).unwrap_err();
    }
}
