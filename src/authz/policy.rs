//! Authorization policies for the back-office resources.
//!
//! System administrators manage everything. Organisation administrators
//! manage their own organisation and the non-system accounts in it. Every
//! account may view itself, revoke its own sessions and edit its own profile.

use tracing::info;

use super::{
    AuthorizationError, CheckResult, Rule, require, require_all, require_not_same_account,
    require_organisation_id, require_role, require_same_account, satisfy_any,
    set_organisation_id,
};
use crate::auth::AuthContext;
use crate::db::{Account, AccountQuery, AccountRole, OrganisationQuery};

const SYSTEM_ADMINISTRATOR: &[AccountRole] = &[AccountRole::SystemAdministrator];
const ORGANISATION_ADMINISTRATOR: &[AccountRole] = &[AccountRole::OrganisationAdministrator];

/// What a rule needs to know about an existing account.
///
/// A missing account is represented by empty fields, so rules that compare
/// organisations fail and only system administrators get as far as "not found".
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub id: Option<String>,
    pub organisation_id: Option<String>,
    pub role: Option<AccountRole>,
}

impl Target {
    pub fn missing(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn is_system_administrator(&self) -> bool {
        self.role == Some(AccountRole::SystemAdministrator)
    }
}

impl From<&Account> for Target {
    fn from(account: &Account) -> Self {
        Self {
            id: Some(account.id.clone()),
            organisation_id: account.organisation_id.clone(),
            role: Some(account.role),
        }
    }
}

fn evaluate(operation: &'static str, context: &AuthContext, rule: Rule<'_>) -> CheckResult {
    let result = rule.check(context);
    if let Err(AuthorizationError { cause }) = &result {
        info!(
            operation,
            account_id = context.account_id().unwrap_or_default(),
            cause = %cause,
            "Authorization denied"
        );
    }
    result
}

fn manages_target_organisation(target: &Target) -> Rule<'_> {
    require_all([
        require_role(ORGANISATION_ADMINISTRATOR),
        require_organisation_id(target.organisation_id.as_deref()),
        require(
            !target.is_system_administrator(),
            "target is a system administrator",
        ),
    ])
}

pub fn create_account(
    context: &AuthContext,
    organisation_id: Option<&str>,
    role: AccountRole,
) -> CheckResult {
    evaluate(
        "createAccount",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_all([
                require_role(ORGANISATION_ADMINISTRATOR),
                require_organisation_id(organisation_id),
                require(
                    role == AccountRole::OrganisationAdministrator,
                    format!("organisation administrators may not create {} accounts", role),
                ),
            ]),
        ]),
    )
}

pub fn view_account(context: &AuthContext, target: &Target) -> CheckResult {
    evaluate(
        "viewAccount",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_same_account(target.id.as_deref()),
            require_all([
                require_role(ORGANISATION_ADMINISTRATOR),
                require_organisation_id(target.organisation_id.as_deref()),
            ]),
        ]),
    )
}

/// `new_role` is the role the caller asks for, if any.
pub fn update_account(
    context: &AuthContext,
    target: &Target,
    new_role: Option<AccountRole>,
) -> CheckResult {
    let role_change = new_role.is_some_and(|role| Some(role) != target.role);
    evaluate(
        "updateAccount",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_all([
                manages_target_organisation(target),
                require(
                    matches!(new_role, None | Some(AccountRole::OrganisationAdministrator)),
                    "organisation administrators may only grant organisationAdministrator",
                ),
            ]),
            require_all([
                require_same_account(target.id.as_deref()),
                require(!role_change, "accounts may not change their own role"),
            ]),
        ]),
    )
}

pub fn delete_account(context: &AuthContext, target: &Target) -> CheckResult {
    evaluate(
        "deleteAccount",
        context,
        require_all([
            require_not_same_account(target.id.as_deref()),
            satisfy_any([
                require_role(SYSTEM_ADMINISTRATOR),
                manages_target_organisation(target),
            ]),
        ]),
    )
}

pub fn revoke_account_sessions(context: &AuthContext, target: &Target) -> CheckResult {
    evaluate(
        "revokeAccountSessions",
        context,
        satisfy_any([
            require_same_account(target.id.as_deref()),
            require_role(SYSTEM_ADMINISTRATOR),
            manages_target_organisation(target),
        ]),
    )
}

/// On success the query is scoped to what the caller may see.
pub fn list_accounts(context: &AuthContext, query: &mut AccountQuery) -> CheckResult {
    evaluate(
        "listAccounts",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_all([
                require_role(ORGANISATION_ADMINISTRATOR),
                set_organisation_id(query),
            ]),
        ]),
    )
}

pub fn create_organisation(context: &AuthContext) -> CheckResult {
    evaluate(
        "createOrganisation",
        context,
        require_role(SYSTEM_ADMINISTRATOR),
    )
}

pub fn view_organisation(context: &AuthContext, organisation_id: &str) -> CheckResult {
    evaluate(
        "viewOrganisation",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_organisation_id(Some(organisation_id)),
        ]),
    )
}

pub fn update_organisation(context: &AuthContext, organisation_id: &str) -> CheckResult {
    evaluate(
        "updateOrganisation",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            require_all([
                require_role(ORGANISATION_ADMINISTRATOR),
                require_organisation_id(Some(organisation_id)),
            ]),
        ]),
    )
}

pub fn delete_organisation(context: &AuthContext) -> CheckResult {
    evaluate(
        "deleteOrganisation",
        context,
        require_role(SYSTEM_ADMINISTRATOR),
    )
}

/// On success the query is scoped to what the caller may see.
pub fn list_organisations(context: &AuthContext, query: &mut OrganisationQuery) -> CheckResult {
    evaluate(
        "listOrganisations",
        context,
        satisfy_any([
            require_role(SYSTEM_ADMINISTRATOR),
            set_organisation_id(query),
        ]),
    )
}
