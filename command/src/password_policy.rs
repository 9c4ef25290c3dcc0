//! Password complexity policies.
//!
//! The default policy lives on the instance aggregate (aggregate id and
//! resource owner are the instance id); an organization may override it with
//! its own policy on the org aggregate.

use crate::commands::{Commands, ObjectDetails};
use crate::context::CommandContext;
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use sourced_iam_core::aggregate::Aggregate;
use sourced_iam_core::event::{Event, PendingEvent};
use sourced_iam_core::search::SearchQueryBuilder;
use sourced_iam_core::write_model::{EventReducers, WriteModel, WriteModelBase};
use std::sync::OnceLock;

/// Aggregate type of tenants.
pub const INSTANCE_AGGREGATE: &str = "instance";

/// Aggregate type of organizations.
pub const ORG_AGGREGATE: &str = "org";

/// Requested or current password complexity rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordComplexityPolicy {
    /// Minimum password length, at least 1.
    pub min_length: u64,
    /// Require an uppercase letter.
    #[serde(rename = "upper")]
    pub has_uppercase: bool,
    /// Require a lowercase letter.
    #[serde(rename = "lower")]
    pub has_lowercase: bool,
    /// Require a digit.
    #[serde(rename = "number")]
    pub has_number: bool,
    /// Require a symbol.
    #[serde(rename = "symbol")]
    pub has_symbol: bool,
}

impl PasswordComplexityPolicy {
    /// Policy with `min_length` and no character class requirements.
    #[must_use]
    pub const fn new(min_length: u64) -> Self {
        Self {
            min_length,
            has_uppercase: false,
            has_lowercase: false,
            has_number: false,
            has_symbol: false,
        }
    }

    /// Check the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] if `min_length` is 0.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.min_length == 0 {
            return Err(CommandError::InvalidArgument(
                "password complexity policy: min length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Fields of `requested` that differ from `self`.
    #[must_use]
    pub fn changes(&self, requested: &Self) -> PasswordComplexityPolicyChanges {
        fn diff<T: PartialEq + Copy>(current: T, requested: T) -> Option<T> {
            (current != requested).then_some(requested)
        }
        PasswordComplexityPolicyChanges {
            min_length: diff(self.min_length, requested.min_length),
            has_uppercase: diff(self.has_uppercase, requested.has_uppercase),
            has_lowercase: diff(self.has_lowercase, requested.has_lowercase),
            has_number: diff(self.has_number, requested.has_number),
            has_symbol: diff(self.has_symbol, requested.has_symbol),
        }
    }

    fn apply(&mut self, changes: PasswordComplexityPolicyChanges) {
        if let Some(v) = changes.min_length {
            self.min_length = v;
        }
        if let Some(v) = changes.has_uppercase {
            self.has_uppercase = v;
        }
        if let Some(v) = changes.has_lowercase {
            self.has_lowercase = v;
        }
        if let Some(v) = changes.has_number {
            self.has_number = v;
        }
        if let Some(v) = changes.has_symbol {
            self.has_symbol = v;
        }
    }
}

/// Payload of a policy change: only the fields that changed are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordComplexityPolicyChanges {
    /// New minimum length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    /// New uppercase requirement.
    #[serde(rename = "upper", default, skip_serializing_if = "Option::is_none")]
    pub has_uppercase: Option<bool>,
    /// New lowercase requirement.
    #[serde(rename = "lower", default, skip_serializing_if = "Option::is_none")]
    pub has_lowercase: Option<bool>,
    /// New digit requirement.
    #[serde(rename = "number", default, skip_serializing_if = "Option::is_none")]
    pub has_number: Option<bool>,
    /// New symbol requirement.
    #[serde(rename = "symbol", default, skip_serializing_if = "Option::is_none")]
    pub has_symbol: Option<bool>,
}

impl PasswordComplexityPolicyChanges {
    /// Whether nothing changed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.has_uppercase.is_none()
            && self.has_lowercase.is_none()
            && self.has_number.is_none()
            && self.has_symbol.is_none()
    }
}

/// Default policy added to an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstancePasswordComplexityPolicyAdded(pub PasswordComplexityPolicy);

impl Event for InstancePasswordComplexityPolicyAdded {
    const EVENT_TYPE: &'static str = "policy.password.added";
}

/// Default policy of an instance changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstancePasswordComplexityPolicyChanged(pub PasswordComplexityPolicyChanges);

impl Event for InstancePasswordComplexityPolicyChanged {
    const EVENT_TYPE: &'static str = "policy.password.changed";
}

/// Organization policy added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgPasswordComplexityPolicyAdded(pub PasswordComplexityPolicy);

impl Event for OrgPasswordComplexityPolicyAdded {
    const EVENT_TYPE: &'static str = "org.policy.password.added";
}

/// Organization policy changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgPasswordComplexityPolicyChanged(pub PasswordComplexityPolicyChanges);

impl Event for OrgPasswordComplexityPolicyChanged {
    const EVENT_TYPE: &'static str = "org.policy.password.changed";
}

/// Organization policy removed; the instance default applies again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgPasswordComplexityPolicyRemoved {}

impl Event for OrgPasswordComplexityPolicyRemoved {
    const EVENT_TYPE: &'static str = "org.policy.password.removed";
}

/// Lifecycle of a policy on its aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolicyState {
    /// Never added.
    #[default]
    Unspecified,
    /// In force.
    Active,
    /// Removed (organization policies only).
    Removed,
}

impl PolicyState {
    /// Whether the policy is currently in force.
    #[must_use]
    pub const fn exists(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Policy state shared by the instance and org write models.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PasswordComplexityPolicyState {
    /// Current rules.
    pub policy: PasswordComplexityPolicy,
    /// Lifecycle.
    pub state: PolicyState,
}

impl PasswordComplexityPolicyState {
    fn added(&mut self, policy: PasswordComplexityPolicy) {
        self.policy = policy;
        self.state = PolicyState::Active;
    }

    fn changed(&mut self, changes: PasswordComplexityPolicyChanges) {
        self.policy.apply(changes);
    }

    fn removed(&mut self) {
        self.policy = PasswordComplexityPolicy::default();
        self.state = PolicyState::Removed;
    }
}

/// The default password complexity policy of an instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancePasswordComplexityPolicyWriteModel {
    base: WriteModelBase,
    /// Folded policy.
    pub current: PasswordComplexityPolicyState,
}

impl InstancePasswordComplexityPolicyWriteModel {
    /// Empty model for `instance_id`.
    #[must_use]
    pub fn new(instance_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, instance_id, instance_id),
            current: PasswordComplexityPolicyState::default(),
        }
    }

    fn aggregate(&self) -> Aggregate {
        Aggregate::new(
            self.base.instance_id.clone(),
            INSTANCE_AGGREGATE,
            self.base.aggregate_id.clone(),
            self.base.resource_owner.clone(),
        )
    }
}

impl WriteModel for InstancePasswordComplexityPolicyWriteModel {
    const AGGREGATE_TYPE: &'static str = INSTANCE_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<InstancePasswordComplexityPolicyWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: InstancePasswordComplexityPolicyAdded| m.current.added(e.0))
                .on(|m: &mut Self, e: InstancePasswordComplexityPolicyChanged| m.current.changed(e.0))
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        self.base.search_for(Self::AGGREGATE_TYPE, Self::reducers().event_types())
    }
}

/// The password complexity policy of one organization.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgPasswordComplexityPolicyWriteModel {
    base: WriteModelBase,
    /// Folded policy.
    pub current: PasswordComplexityPolicyState,
}

impl OrgPasswordComplexityPolicyWriteModel {
    /// Empty model for `org_id` in `instance_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            current: PasswordComplexityPolicyState::default(),
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

impl WriteModel for OrgPasswordComplexityPolicyWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgPasswordComplexityPolicyWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: OrgPasswordComplexityPolicyAdded| m.current.added(e.0))
                .on(|m: &mut Self, e: OrgPasswordComplexityPolicyChanged| m.current.changed(e.0))
                .on(|m: &mut Self, _: OrgPasswordComplexityPolicyRemoved| m.current.removed())
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        self.base.search_for(Self::AGGREGATE_TYPE, Self::reducers().event_types())
    }
}

/// A policy as stored after a successful command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordComplexityPolicyDetails {
    /// The policy now in force.
    pub policy: PasswordComplexityPolicy,
    /// Where and when it was written.
    pub details: ObjectDetails,
}

impl Commands {
    /// Add the default password complexity policy of the context's instance.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if `min_length` is 0
    /// - [`CommandError::AlreadyExists`] if the instance already has one
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn add_default_password_complexity_policy(
        &self,
        ctx: &CommandContext,
        policy: PasswordComplexityPolicy,
    ) -> Result<PasswordComplexityPolicyDetails, CommandError> {
        policy.validate()?;

        let mut model = InstancePasswordComplexityPolicyWriteModel::new(&ctx.instance_id);
        self.load(ctx, &mut model).await?;
        if model.current.state.exists() {
            return Err(CommandError::AlreadyExists(
                "default password complexity policy already exists".to_string(),
            ));
        }

        let event = PendingEvent::from_event(
            &model.aggregate(),
            &ctx.editor,
            &InstancePasswordComplexityPolicyAdded(policy.clone()),
        )?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![event]).await?;

        Ok(PasswordComplexityPolicyDetails {
            policy,
            details: ObjectDetails::from_pushed(&stored)?,
        })
    }

    /// Change the default password complexity policy of the context's instance.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if `min_length` is 0
    /// - [`CommandError::NotFound`] if the instance has no policy
    /// - [`CommandError::PreconditionFailed`] if nothing would change
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn change_default_password_complexity_policy(
        &self,
        ctx: &CommandContext,
        policy: PasswordComplexityPolicy,
    ) -> Result<PasswordComplexityPolicyDetails, CommandError> {
        policy.validate()?;

        let mut model = InstancePasswordComplexityPolicyWriteModel::new(&ctx.instance_id);
        self.load(ctx, &mut model).await?;
        if !model.current.state.exists() {
            return Err(CommandError::NotFound("default password complexity policy".to_string()));
        }

        let changes = model.current.policy.changes(&policy);
        if changes.is_empty() {
            return Err(CommandError::PreconditionFailed(
                "password complexity policy has not changed".to_string(),
            ));
        }

        let event = PendingEvent::from_event(
            &model.aggregate(),
            &ctx.editor,
            &InstancePasswordComplexityPolicyChanged(changes),
        )?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![event]).await?;

        Ok(PasswordComplexityPolicyDetails {
            policy,
            details: ObjectDetails::from_pushed(&stored)?,
        })
    }

    /// Add a password complexity policy overriding the default for `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for an empty org id or `min_length` 0
    /// - [`CommandError::AlreadyExists`] if the organization already has one
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn add_org_password_complexity_policy(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        policy: PasswordComplexityPolicy,
    ) -> Result<PasswordComplexityPolicyDetails, CommandError> {
        require_org(org_id)?;
        policy.validate()?;

        let mut model = OrgPasswordComplexityPolicyWriteModel::new(&ctx.instance_id, org_id);
        self.load(ctx, &mut model).await?;
        if model.current.state.exists() {
            return Err(CommandError::AlreadyExists(format!(
                "password complexity policy of org {org_id}"
            )));
        }

        let event = PendingEvent::from_event(
            &model.aggregate(),
            &ctx.editor,
            &OrgPasswordComplexityPolicyAdded(policy.clone()),
        )?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![event]).await?;

        Ok(PasswordComplexityPolicyDetails {
            policy,
            details: ObjectDetails::from_pushed(&stored)?,
        })
    }

    /// Change the password complexity policy of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for an empty org id or `min_length` 0
    /// - [`CommandError::NotFound`] if the organization has no policy
    /// - [`CommandError::PreconditionFailed`] if nothing would change
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn change_org_password_complexity_policy(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        policy: PasswordComplexityPolicy,
    ) -> Result<PasswordComplexityPolicyDetails, CommandError> {
        require_org(org_id)?;
        policy.validate()?;

        let mut model = OrgPasswordComplexityPolicyWriteModel::new(&ctx.instance_id, org_id);
        self.load(ctx, &mut model).await?;
        if !model.current.state.exists() {
            return Err(CommandError::NotFound(format!("password complexity policy of org {org_id}")));
        }

        let changes = model.current.policy.changes(&policy);
        if changes.is_empty() {
            return Err(CommandError::PreconditionFailed(
                "password complexity policy has not changed".to_string(),
            ));
        }

        let event = PendingEvent::from_event(
            &model.aggregate(),
            &ctx.editor,
            &OrgPasswordComplexityPolicyChanged(changes),
        )?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![event]).await?;

        Ok(PasswordComplexityPolicyDetails {
            policy,
            details: ObjectDetails::from_pushed(&stored)?,
        })
    }

    /// Remove the password complexity policy of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] for an empty org id
    /// - [`CommandError::NotFound`] if the organization has no policy
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn remove_org_password_complexity_policy(
        &self,
        ctx: &CommandContext,
        org_id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;

        let mut model = OrgPasswordComplexityPolicyWriteModel::new(&ctx.instance_id, org_id);
        self.load(ctx, &mut model).await?;
        if !model.current.state.exists() {
            return Err(CommandError::NotFound(format!("password complexity policy of org {org_id}")));
        }

        let event = PendingEvent::from_event(
            &model.aggregate(),
            &ctx.editor,
            &OrgPasswordComplexityPolicyRemoved::default(),
        )?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![event]).await?;
        ObjectDetails::from_pushed(&stored)
    }
}

pub(crate) fn require_org(org_id: &str) -> Result<(), CommandError> {
    if org_id.trim().is_empty() {
        return Err(CommandError::InvalidArgument("org id must not be empty".to_string()));
    }
    Ok(())
}
