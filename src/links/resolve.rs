// ============================================
// Organization Resolution by Identifier
// ============================================
//
// A link request names its target organization with a single raw string:
// an email, a slug, or a website/domain. Three candidate lookups run,
// their results merge, and ambiguity is resolved by preferring the most
// exact interpretation.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::Organization;
use crate::models::organization::ORG_COLUMNS;

const ELIGIBLE: &str = "status = 'approved' AND deleted_at IS NULL AND restricted = FALSE";

/// Look up an eligible organization directly by primary key.
pub async fn resolve_organization_by_id(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Organization, ServiceError> {
    let row = sqlx::query(&format!(
        "SELECT {ORG_COLUMNS} FROM organization WHERE id = $1 AND {ELIGIBLE}"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ServiceError::NotFound("organization"))?;

    Ok(Organization::from_row(&row))
}

/// Resolve an organization from a raw identifier string.
///
/// Candidates are gathered by exact email, exact slug, and normalized
/// domain match, merged, and deduplicated. Only eligible organizations
/// (approved, not deleted, not restricted) are considered.
pub async fn resolve_organization(
    conn: &mut PgConnection,
    identifier: &str,
) -> Result<Organization, ServiceError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ServiceError::Validation(
            "organization identifier is required".into(),
        ));
    }

    let mut candidates: Vec<Organization> = Vec::new();

    if identifier.contains('@') {
        let rows = sqlx::query(&format!(
            "SELECT {ORG_COLUMNS} FROM organization \
             WHERE LOWER(email) = LOWER($1) AND {ELIGIBLE}"
        ))
        .bind(identifier)
        .fetch_all(&mut *conn)
        .await?;
        candidates.extend(rows.iter().map(Organization::from_row));
    }

    if let Some(slug) = slug_form(identifier) {
        let rows = sqlx::query(&format!(
            "SELECT {ORG_COLUMNS} FROM organization WHERE slug = $1 AND {ELIGIBLE}"
        ))
        .bind(&slug)
        .fetch_all(&mut *conn)
        .await?;
        candidates.extend(rows.iter().map(Organization::from_row));
    }

    if let Some(host) = normalize_host(identifier) {
        // SQL prefilter is a superset; the exact comparison happens on the
        // normalized hostnames below.
        let rows = sqlx::query(&format!(
            "SELECT {ORG_COLUMNS} FROM organization \
             WHERE website IS NOT NULL AND website ILIKE '%' || $1 || '%' AND {ELIGIBLE}"
        ))
        .bind(&host)
        .fetch_all(&mut *conn)
        .await?;

        candidates.extend(
            rows.iter()
                .map(Organization::from_row)
                .filter(|org| org.website.as_deref().and_then(normalize_host) == Some(host.clone())),
        );
    }

    dedupe_by_id(&mut candidates);
    disambiguate(candidates, identifier)
}

// ============================================
// Identifier forms
// ============================================

/// The slug interpretation of an identifier: lowercase letters, digits,
/// and dashes, at least two characters, after trimming slashes.
pub(crate) fn slug_form(identifier: &str) -> Option<String> {
    let trimmed = identifier.trim().trim_matches('/');
    if trimmed.len() >= 2
        && trimmed
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Normalize a URL-ish string to a bare hostname: strip the scheme, a
/// leading "www.", and any path, then lowercase.
pub(crate) fn normalize_host(input: &str) -> Option<String> {
    let mut rest = input.trim();
    for scheme in ["https://", "http://"] {
        if let Some(prefix) = rest.get(..scheme.len()) {
            if prefix.eq_ignore_ascii_case(scheme) {
                rest = &rest[scheme.len()..];
                break;
            }
        }
    }

    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() { None } else { Some(host) }
}

fn dedupe_by_id(candidates: &mut Vec<Organization>) {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|org| seen.insert(org.id));
}

/// Settle on a single organization among merged candidates: exactly one
/// wins outright; several prefer an exact slug match, then an exact email
/// match; anything else is ambiguous.
pub(crate) fn disambiguate(
    mut candidates: Vec<Organization>,
    identifier: &str,
) -> Result<Organization, ServiceError> {
    match candidates.len() {
        0 => Err(ServiceError::NotFound("organization")),
        1 => Ok(candidates.remove(0)),
        _ => {
            if let Some(slug) = slug_form(identifier) {
                if let Some(org) = candidates
                    .iter()
                    .find(|org| org.slug.as_deref() == Some(slug.as_str()))
                {
                    return Ok(org.clone());
                }
            }

            if identifier.contains('@') {
                if let Some(org) = candidates.iter().find(|org| {
                    org.email
                        .as_deref()
                        .is_some_and(|email| email.eq_ignore_ascii_case(identifier.trim()))
                }) {
                    return Ok(org.clone());
                }
            }

            Err(ServiceError::AmbiguousMatch(format!(
                "multiple organizations matched '{}'; use an exact slug, email, or organization id",
                identifier
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn org(slug: Option<&str>, email: Option<&str>, website: Option<&str>) -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: "org".into(),
            slug: slug.map(String::from),
            email: email.map(String::from),
            website: website.map(String::from),
            status: "approved".into(),
            restricted: false,
            deleted_at: None,
            plan_tier: None,
            plan_status: None,
            plan_expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn slug_form_accepts_plain_slugs() {
        assert_eq!(slug_form("acme-co"), Some("acme-co".to_string()));
        assert_eq!(slug_form("/acme-co/"), Some("acme-co".to_string()));
        assert_eq!(slug_form("a1"), Some("a1".to_string()));
    }

    #[test]
    fn slug_form_rejects_non_slugs() {
        assert_eq!(slug_form("Acme"), None);
        assert_eq!(slug_form("a"), None);
        assert_eq!(slug_form("acme co"), None);
        assert_eq!(slug_form("ops@acme.com"), None);
    }

    #[test]
    fn normalize_host_strips_scheme_www_and_path() {
        assert_eq!(
            normalize_host("https://www.Example.com/about?x=1"),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_host("http://example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_host("www.example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(normalize_host("example.com"), Some("example.com".to_string()));
        assert_eq!(normalize_host("  "), None);
    }

    #[test]
    fn single_candidate_wins() {
        let only = org(Some("acme"), None, None);
        let resolved = disambiguate(vec![only.clone()], "acme").unwrap();
        assert_eq!(resolved.id, only.id);
    }

    #[test]
    fn slug_match_beats_email_match() {
        // The identifier is a valid slug that also happens to be a
        // substring of another org's email domain.
        let by_slug = org(Some("acme"), None, None);
        let by_domain = org(Some("other"), Some("hello@acme.io"), Some("acme.io"));
        let resolved =
            disambiguate(vec![by_domain, by_slug.clone()], "acme").unwrap();
        assert_eq!(resolved.id, by_slug.id);
    }

    #[test]
    fn email_match_breaks_domain_ties() {
        let by_email = org(Some("one"), Some("Ops@Acme.com"), Some("acme.com"));
        let by_domain = org(Some("two"), Some("sales@acme.com"), Some("acme.com"));
        let resolved =
            disambiguate(vec![by_domain, by_email.clone()], "ops@acme.com").unwrap();
        assert_eq!(resolved.id, by_email.id);
    }

    #[test]
    fn unresolvable_ambiguity_is_an_error() {
        let a = org(Some("one"), None, Some("acme.com"));
        let b = org(Some("two"), None, Some("acme.com"));
        let err = disambiguate(vec![a, b], "acme.com").unwrap_err();
        assert!(matches!(err, ServiceError::AmbiguousMatch(_)));
    }

    #[test]
    fn no_candidates_is_not_found() {
        let err = disambiguate(vec![], "ghost").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
