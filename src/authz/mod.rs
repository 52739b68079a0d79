//! Authorization rules over an [`AuthContext`].
//!
//! A [`Rule`] is a one-shot check returning `Ok(())` or an
//! [`AuthorizationError`] with a diagnostic cause. Primitives check role,
//! account identity and organisation; [`require_all`] and [`satisfy_any`]
//! compose them. [`set_organisation_id`] is the one rule with a side effect:
//! it pins a list query to the caller's organisation.

pub mod policy;

use crate::auth::AuthContext;
use crate::db::{AccountQuery, AccountRole, OrganisationQuery};

/// The caller is not allowed to do what it asked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not authorized: {cause}")]
pub struct AuthorizationError {
    pub cause: String,
}

impl AuthorizationError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

pub type CheckResult = Result<(), AuthorizationError>;

/// A single authorization check. Consumed when evaluated.
pub struct Rule<'a>(Box<dyn FnOnce(&AuthContext) -> CheckResult + 'a>);

impl<'a> Rule<'a> {
    pub fn new(check: impl FnOnce(&AuthContext) -> CheckResult + 'a) -> Self {
        Self(Box::new(check))
    }

    pub fn check(self, context: &AuthContext) -> CheckResult {
        (self.0)(context)
    }
}

/// Passes when `condition` holds. For constraints on the command itself.
pub fn require<'a>(condition: bool, cause: impl Into<String>) -> Rule<'a> {
    let cause = cause.into();
    Rule::new(move |_| {
        if condition {
            Ok(())
        } else {
            Err(AuthorizationError::new(cause))
        }
    })
}

/// Passes when the caller has one of `roles`.
pub fn require_role(roles: &[AccountRole]) -> Rule<'_> {
    Rule::new(move |ctx| match ctx.role() {
        Some(role) if roles.contains(&role) => Ok(()),
        Some(role) => Err(AuthorizationError::new(format!(
            "role {} is not one of [{}]",
            role,
            roles
                .iter()
                .map(AccountRole::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
        None => Err(AuthorizationError::new("caller has no role")),
    })
}

/// Passes when the caller is the account `id`. Absent on either side fails.
pub fn require_same_account(id: Option<&str>) -> Rule<'_> {
    Rule::new(move |ctx| match (ctx.account_id(), id) {
        (Some(caller), Some(target)) if !caller.is_empty() && caller == target => Ok(()),
        (Some(_), Some(_)) => Err(AuthorizationError::new("caller is not the target account")),
        _ => Err(AuthorizationError::new(
            "account identity missing on caller or target",
        )),
    })
}

/// Passes when the caller is not the account `id`. Absent on either side fails.
pub fn require_not_same_account(id: Option<&str>) -> Rule<'_> {
    Rule::new(move |ctx| match (ctx.account_id(), id) {
        (Some(caller), Some(target)) if !caller.is_empty() && !target.is_empty() => {
            if caller == target {
                Err(AuthorizationError::new("caller is the target account"))
            } else {
                Ok(())
            }
        }
        _ => Err(AuthorizationError::new(
            "account identity missing on caller or target",
        )),
    })
}

/// Passes when caller and target belong to the same organisation. Absent on
/// either side fails.
pub fn require_organisation_id(id: Option<&str>) -> Rule<'_> {
    Rule::new(move |ctx| match (ctx.organisation_id(), id) {
        (Some(caller), Some(target)) if !caller.is_empty() && caller == target => Ok(()),
        (Some(_), Some(_)) => Err(AuthorizationError::new(
            "target belongs to another organisation",
        )),
        _ => Err(AuthorizationError::new(
            "organisation missing on caller or target",
        )),
    })
}

/// All rules must pass. Stops at the first failure.
pub fn require_all<'a>(rules: impl IntoIterator<Item = Rule<'a>>) -> Rule<'a> {
    let rules: Vec<Rule<'a>> = rules.into_iter().collect();
    Rule::new(move |ctx| {
        for rule in rules {
            rule.check(ctx)?;
        }
        Ok(())
    })
}

/// At least one rule must pass. Stops at the first success; on total failure
/// the error lists every branch's cause.
pub fn satisfy_any<'a>(rules: impl IntoIterator<Item = Rule<'a>>) -> Rule<'a> {
    let rules: Vec<Rule<'a>> = rules.into_iter().collect();
    Rule::new(move |ctx| {
        let mut causes = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule.check(ctx) {
                Ok(()) => return Ok(()),
                Err(e) => causes.push(e.cause),
            }
        }
        Err(AuthorizationError::new(format!(
            "no alternative satisfied: {}",
            causes
                .iter()
                .enumerate()
                .map(|(i, c)| format!("({}) {}", i + 1, c))
                .collect::<Vec<_>>()
                .join("; ")
        )))
    })
}

/// A list query that can be restricted to one organisation.
pub trait OrganisationScoped {
    fn restrict_to_organisation(&mut self, organisation_id: &str);
}

impl OrganisationScoped for AccountQuery {
    fn restrict_to_organisation(&mut self, organisation_id: &str) {
        self.organisation_id = Some(organisation_id.to_string());
    }
}

impl OrganisationScoped for OrganisationQuery {
    fn restrict_to_organisation(&mut self, organisation_id: &str) {
        self.id = Some(organisation_id.to_string());
    }
}

/// Scope `query` to the caller's organisation. Fails if the caller has none.
pub fn set_organisation_id<Q: OrganisationScoped>(query: &mut Q) -> Rule<'_> {
    Rule::new(move |ctx| match ctx.organisation_id() {
        Some(org) if !org.is_empty() => {
            query.restrict_to_organisation(org);
            Ok(())
        }
        _ => Err(AuthorizationError::new(
            "caller has no organisation to scope the query to",
        )),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::auth::{AuthContext, AuthError, Session};
    use crate::db::AccountRole;

    pub fn context(id: &str, role: AccountRole, organisation_id: Option<&str>) -> AuthContext {
        AuthContext::authenticated(
            Session {
                account_id: id.to_string(),
                organisation_id: organisation_id.map(str::to_string),
                role,
                secret: b"0123456789abcdef".to_vec(),
                issued_at: 0,
                expiry: 100,
            },
            false,
            false,
        )
    }

    pub fn unauthenticated() -> AuthContext {
        AuthContext::failed(AuthError::TokenInvalid, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{context, unauthenticated};
    use super::*;

    const SYSADMIN: AccountRole = AccountRole::SystemAdministrator;
    const ORGADMIN: AccountRole = AccountRole::OrganisationAdministrator;

    #[test]
    fn test_require_role() {
        let ctx = context("a", ORGADMIN, Some("Acme"));
        assert!(require_role(&[ORGADMIN, SYSADMIN]).check(&ctx).is_ok());

        let err = require_role(&[SYSADMIN]).check(&ctx).unwrap_err();
        assert!(err.cause.contains("organisationAdministrator"));

        assert!(require_role(&[SYSADMIN]).check(&unauthenticated()).is_err());
    }

    #[test]
    fn test_same_account_fails_closed() {
        let ctx = context("a", SYSADMIN, None);
        assert!(require_same_account(Some("a")).check(&ctx).is_ok());
        assert!(require_same_account(Some("b")).check(&ctx).is_err());
        assert!(require_same_account(None).check(&ctx).is_err());
        assert!(
            require_same_account(None)
                .check(&unauthenticated())
                .is_err()
        );
    }

    #[test]
    fn test_not_same_account_fails_closed() {
        let ctx = context("a", SYSADMIN, None);
        assert!(require_not_same_account(Some("b")).check(&ctx).is_ok());
        assert!(require_not_same_account(Some("a")).check(&ctx).is_err());
        assert!(require_not_same_account(None).check(&ctx).is_err());
        assert!(require_not_same_account(Some("")).check(&ctx).is_err());
        assert!(
            require_not_same_account(Some("b"))
                .check(&unauthenticated())
                .is_err()
        );
    }

    #[test]
    fn test_organisation_id_requires_both_sides() {
        let ctx = context("a", ORGADMIN, Some("Acme"));
        assert!(require_organisation_id(Some("Acme")).check(&ctx).is_ok());
        assert!(require_organisation_id(Some("Globex")).check(&ctx).is_err());
        assert!(require_organisation_id(None).check(&ctx).is_err());

        let no_org = context("b", SYSADMIN, None);
        assert!(require_organisation_id(None).check(&no_org).is_err());
        assert!(require_organisation_id(Some("Acme")).check(&no_org).is_err());
    }

    #[test]
    fn test_require_all_short_circuits() {
        let ctx = context("a", ORGADMIN, Some("Acme"));
        let mut reached = false;
        let result = require_all([
            require(false, "first"),
            Rule::new(|_| {
                reached = true;
                Ok(())
            }),
        ])
        .check(&ctx);

        assert_eq!(result.unwrap_err().cause, "first");
        assert!(!reached);
    }

    #[test]
    fn test_satisfy_any_collects_causes() {
        let ctx = context("a", ORGADMIN, Some("Acme"));
        assert!(
            satisfy_any([require(false, "no"), require(true, "yes")])
                .check(&ctx)
                .is_ok()
        );

        let err = satisfy_any([require(false, "left"), require(false, "right")])
            .check(&ctx)
            .unwrap_err();
        assert!(err.cause.contains("(1) left"));
        assert!(err.cause.contains("(2) right"));
    }

    #[test]
    fn test_set_organisation_id_scopes_query() {
        let ctx = context("a", ORGADMIN, Some("Acme"));
        let mut query = AccountQuery::default();
        set_organisation_id(&mut query).check(&ctx).unwrap();
        assert_eq!(query.organisation_id.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_set_organisation_id_without_organisation_fails() {
        let ctx = context("a", ORGADMIN, None);
        let mut query = OrganisationQuery::default();
        assert!(set_organisation_id(&mut query).check(&ctx).is_err());
        assert_eq!(query.id, None);
    }
}
