//! Organization members: users granted roles on an organization.

use crate::commands::{Commands, ObjectDetails};
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::password_policy::{ORG_AGGREGATE, require_org};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sourced_iam_core::aggregate::Aggregate;
use sourced_iam_core::event::{Event, PendingEvent};
use sourced_iam_core::search::SearchQueryBuilder;
use sourced_iam_core::write_model::{EventReducers, WriteModel, WriteModelBase};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// A user became a member of an organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAdded {
    /// Member user id.
    pub user_id: String,
    /// Granted roles.
    pub roles: Vec<String>,
}

impl Event for MemberAdded {
    const EVENT_TYPE: &'static str = "org.member.added";
}

/// The roles of a member were replaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChanged {
    /// Member user id.
    pub user_id: String,
    /// New full set of roles.
    pub roles: Vec<String>,
}

impl Event for MemberChanged {
    const EVENT_TYPE: &'static str = "org.member.changed";
}

/// A member was removed from an organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRemoved {
    /// Former member user id.
    pub user_id: String,
}

impl Event for MemberRemoved {
    const EVENT_TYPE: &'static str = "org.member.removed";
}

/// Membership lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemberState {
    /// Never a member.
    #[default]
    Unspecified,
    /// Currently a member.
    Active,
    /// Was a member.
    Removed,
}

/// One user's membership in one organization.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgMemberWriteModel {
    base: WriteModelBase,
    /// Member user id.
    pub user_id: String,
    /// Current roles.
    pub roles: Vec<String>,
    /// Lifecycle.
    pub state: MemberState,
}

impl OrgMemberWriteModel {
    /// Empty model for `user_id` in `org_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str, user_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            user_id: user_id.to_string(),
            roles: Vec::new(),
            state: MemberState::Unspecified,
        }
    }

    fn aggregate(&self) -> Aggregate {
        Aggregate::new(
            self.base.instance_id.clone(),
            ORG_AGGREGATE,
            self.base.aggregate_id.clone(),
            self.base.resource_owner.clone(),
        )
    }
}

impl WriteModel for OrgMemberWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgMemberWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: MemberAdded| {
                    m.roles = e.roles;
                    m.state = MemberState::Active;
                })
                .on(|m: &mut Self, e: MemberChanged| m.roles = e.roles)
                .on(|m: &mut Self, _: MemberRemoved| {
                    m.roles.clear();
                    m.state = MemberState::Removed;
                })
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        SearchQueryBuilder::new(self.base.instance_id.clone())
            .resource_owner(self.base.resource_owner.clone())
            .add_query(
                self.base
                    .sub_query(Self::AGGREGATE_TYPE, Self::reducers().event_types())
                    .event_data(json!({ "userId": self.user_id })),
            )
    }
}

/// Trim, drop empty entries and deduplicate, keeping first occurrence order.
fn normalize_roles(roles: Vec<String>) -> Result<Vec<String>, CommandError> {
    let mut seen = BTreeSet::new();
    let roles: Vec<String> = roles
        .into_iter()
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty() && seen.insert(role.clone()))
        .collect();
    if roles.is_empty() {
        return Err(CommandError::InvalidArgument("at least one role is required".to_string()));
    }
    Ok(roles)
}

fn require_user(user_id: &str) -> Result<(), CommandError> {
    if user_id.trim().is_empty() {
        return Err(CommandError::InvalidArgument("user id must not be empty".to_string()));
    }
    Ok(())
}

impl Commands {
    async fn push_member_event<E: Event>(
        &self,
        ctx: &CommandContext,
        model: &OrgMemberWriteModel,
        event: &E,
    ) -> Result<ObjectDetails, CommandError> {
        let pending = PendingEvent::from_event(&model.aggregate(), &ctx.editor, event)?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![pending]).await?;
        ObjectDetails::from_pushed(&stored)
    }

    /// Make `user_id` a member of `org_id` with `roles`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for empty ids or no roles
    /// - [`CommandError::AlreadyExists`] if the user is already a member
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn add_org_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require_user(user_id)?;
        let roles = normalize_roles(roles)?;

        let mut model = OrgMemberWriteModel::new(&ctx.instance_id, org_id, user_id);
        self.load(ctx, &mut model).await?;
        if model.state == MemberState::Active {
            return Err(CommandError::AlreadyExists(format!("member {user_id} of org {org_id}")));
        }

        let event = MemberAdded {
            user_id: user_id.to_string(),
            roles,
        };
        self.push_member_event(ctx, &model, &event).await
    }

    /// Replace the roles of member `user_id` of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for empty ids or no roles
    /// - [`CommandError::NotFound`] if the user is not a member
    /// - [`CommandError::PreconditionFailed`] if the role set is unchanged
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn change_org_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require_user(user_id)?;
        let roles = normalize_roles(roles)?;

        let mut model = OrgMemberWriteModel::new(&ctx.instance_id, org_id, user_id);
        self.load(ctx, &mut model).await?;
        if model.state != MemberState::Active {
            return Err(CommandError::NotFound(format!("member {user_id} of org {org_id}")));
        }

        let current: BTreeSet<&String> = model.roles.iter().collect();
        let requested: BTreeSet<&String> = roles.iter().collect();
        if current == requested {
            return Err(CommandError::PreconditionFailed("member roles have not changed".to_string()));
        }

        let event = MemberChanged {
            user_id: user_id.to_string(),
            roles,
        };
        self.push_member_event(ctx, &model, &event).await
    }

    /// Remove member `user_id` from `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for empty ids
    /// - [`CommandError::NotFound`] if the user is not a member
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn remove_org_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require_user(user_id)?;

        let mut model = OrgMemberWriteModel::new(&ctx.instance_id, org_id, user_id);
        self.load(ctx, &mut model).await?;
        if model.state != MemberState::Active {
            return Err(CommandError::NotFound(format!("member {user_id} of org {org_id}")));
        }

        let event = MemberRemoved {
            user_id: user_id.to_string(),
        };
        self.push_member_event(ctx, &model, &event).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_trimmed_and_deduplicated() {
        let roles = normalize_roles(vec![
            " ORG_OWNER".to_string(),
            "ORG_USER_MANAGER".to_string(),
            "ORG_OWNER".to_string(),
            String::new(),
        ])
        .unwrap();
        assert_eq!(roles, vec!["ORG_OWNER", "ORG_USER_MANAGER"]);
    }

    #[test]
    fn no_roles_is_invalid() {
        assert!(matches!(
            normalize_roles(vec!["  ".to_string()]),
            Err(CommandError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_filters_on_user_id() {
        let model = OrgMemberWriteModel::new("i1", "o1", "u1");
        let query = model.query();
        assert_eq!(query.queries()[0].event_data_filter().get("userId"), Some(&json!("u1")));
    }
}
