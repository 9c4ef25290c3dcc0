//! Identity providers owned by an organization.
//!
//! Each write model reads the org aggregate filtered to one provider id
//! (`event_data {"id": ..}`) and delegates its folds to the generic model.

use super::events::{
    GoogleIdpAdded, IdpRemoved, LdapIdpAdded, OAuthIdpAdded, OrgGoogleIdpAdded, OrgGoogleIdpChanged,
    OrgIdpRemoved, OrgLdapIdpAdded, OrgLdapIdpChanged, OrgOAuthIdpAdded, OrgOAuthIdpChanged,
};
use super::model::{GoogleIdpWriteModel, IdpRemoveWriteModel, LdapIdpWriteModel, OAuthIdpWriteModel};
use super::{IdpOptions, IdpType, LdapAttributes};
use crate::commands::{Commands, ObjectDetails};
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::password_policy::{ORG_AGGREGATE, require_org};
use serde_json::json;
use sourced_iam_core::aggregate::Aggregate;
use sourced_iam_core::event::{Event, PendingEvent};
use sourced_iam_core::search::SearchQueryBuilder;
use sourced_iam_core::write_model::{EventReducers, WriteModel, WriteModelBase};
use std::sync::OnceLock;

/// Requested configuration of a generic `OAuth` provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OAuthProvider {
    /// Display name.
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Plain client secret; empty on update keeps the current one.
    pub client_secret: String,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// User info endpoint URL.
    pub user_endpoint: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Linking and provisioning options.
    pub options: IdpOptions,
}

/// Requested configuration of a Google provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoogleProvider {
    /// Display name (may be empty).
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Plain client secret; empty on update keeps the current one.
    pub client_secret: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Linking and provisioning options.
    pub options: IdpOptions,
}

/// Requested configuration of an LDAP provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LdapProvider {
    /// Display name.
    pub name: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: String,
    /// Connect with TLS.
    pub tls: bool,
    /// Base DN for user searches.
    pub base_dn: String,
    /// Object class of user entries.
    pub user_object_class: String,
    /// Attribute identifying a user uniquely.
    pub user_unique_attribute: String,
    /// Bind DN.
    pub admin: String,
    /// Plain bind password; empty on update keeps the current one.
    pub password: String,
    /// Attribute mapping.
    pub attributes: LdapAttributes,
    /// Linking and provisioning options.
    pub options: IdpOptions,
}

fn require(field: &str, value: &str) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}

impl OAuthProvider {
    fn validate(&self, adding: bool) -> Result<(), CommandError> {
        require("name", &self.name)?;
        require("client id", &self.client_id)?;
        if adding {
            require("client secret", &self.client_secret)?;
        }
        require("authorization endpoint", &self.authorization_endpoint)?;
        require("token endpoint", &self.token_endpoint)?;
        require("user endpoint", &self.user_endpoint)
    }
}

impl GoogleProvider {
    fn validate(&self, adding: bool) -> Result<(), CommandError> {
        require("client id", &self.client_id)?;
        if adding {
            require("client secret", &self.client_secret)?;
        }
        Ok(())
    }
}

impl LdapProvider {
    fn validate(&self, adding: bool) -> Result<(), CommandError> {
        require("name", &self.name)?;
        require("host", &self.host)?;
        require("base DN", &self.base_dn)?;
        require("user object class", &self.user_object_class)?;
        require("user unique attribute", &self.user_unique_attribute)?;
        require("admin", &self.admin)?;
        if adding {
            require("password", &self.password)?;
        }
        Ok(())
    }
}

fn org_idp_query(base: &WriteModelBase, idp_id: &str, event_types: Vec<&'static str>) -> SearchQueryBuilder {
    SearchQueryBuilder::new(base.instance_id.clone())
        .resource_owner(base.resource_owner.clone())
        .add_query(
            base.sub_query(ORG_AGGREGATE, event_types)
                .event_data(json!({ "id": idp_id })),
        )
}

fn org_aggregate(base: &WriteModelBase) -> Aggregate {
    Aggregate::new(
        base.instance_id.clone(),
        ORG_AGGREGATE,
        base.aggregate_id.clone(),
        base.resource_owner.clone(),
    )
}

/// An `OAuth` provider of one organization.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgOAuthIdpWriteModel {
    base: WriteModelBase,
    /// Folded provider.
    pub idp: OAuthIdpWriteModel,
}

impl OrgOAuthIdpWriteModel {
    /// Empty model for provider `idp_id` of `org_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str, idp_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            idp: OAuthIdpWriteModel::new(idp_id),
        }
    }
}

impl WriteModel for OrgOAuthIdpWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgOAuthIdpWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: OrgOAuthIdpAdded| m.idp.added(e.0))
                .on(|m: &mut Self, e: OrgOAuthIdpChanged| m.idp.changed(e.0))
                .on(|m: &mut Self, _: OrgIdpRemoved| m.idp.removed())
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        org_idp_query(&self.base, &self.idp.id, Self::reducers().event_types())
    }
}

/// A Google provider of one organization.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgGoogleIdpWriteModel {
    base: WriteModelBase,
    /// Folded provider.
    pub idp: GoogleIdpWriteModel,
}

impl OrgGoogleIdpWriteModel {
    /// Empty model for provider `idp_id` of `org_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str, idp_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            idp: GoogleIdpWriteModel::new(idp_id),
        }
    }
}

impl WriteModel for OrgGoogleIdpWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgGoogleIdpWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: OrgGoogleIdpAdded| m.idp.added(e.0))
                .on(|m: &mut Self, e: OrgGoogleIdpChanged| m.idp.changed(e.0))
                .on(|m: &mut Self, _: OrgIdpRemoved| m.idp.removed())
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        org_idp_query(&self.base, &self.idp.id, Self::reducers().event_types())
    }
}

/// An LDAP provider of one organization.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgLdapIdpWriteModel {
    base: WriteModelBase,
    /// Folded provider.
    pub idp: LdapIdpWriteModel,
}

impl OrgLdapIdpWriteModel {
    /// Empty model for provider `idp_id` of `org_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str, idp_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            idp: LdapIdpWriteModel::new(idp_id),
        }
    }
}

impl WriteModel for OrgLdapIdpWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgLdapIdpWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: OrgLdapIdpAdded| m.idp.added(e.0))
                .on(|m: &mut Self, e: OrgLdapIdpChanged| m.idp.changed(e.0))
                .on(|m: &mut Self, _: OrgIdpRemoved| m.idp.removed())
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        org_idp_query(&self.base, &self.idp.id, Self::reducers().event_types())
    }
}

/// Any provider of one organization, for removal.
#[derive(Clone, Debug, PartialEq)]
pub struct OrgIdpRemoveWriteModel {
    base: WriteModelBase,
    /// Folded provider.
    pub idp: IdpRemoveWriteModel,
}

impl OrgIdpRemoveWriteModel {
    /// Empty model for provider `idp_id` of `org_id`.
    #[must_use]
    pub fn new(instance_id: &str, org_id: &str, idp_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, org_id, org_id),
            idp: IdpRemoveWriteModel::new(idp_id),
        }
    }
}

impl WriteModel for OrgIdpRemoveWriteModel {
    const AGGREGATE_TYPE: &'static str = ORG_AGGREGATE;

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn reducers() -> &'static EventReducers<Self> {
        static REDUCERS: OnceLock<EventReducers<OrgIdpRemoveWriteModel>> = OnceLock::new();
        REDUCERS.get_or_init(|| {
            EventReducers::new()
                .on(|m: &mut Self, e: OrgOAuthIdpAdded| m.idp.added(e.0.name, IdpType::OAuth))
                .on(|m: &mut Self, e: OrgOAuthIdpChanged| m.idp.renamed(e.0.name))
                .on(|m: &mut Self, e: OrgGoogleIdpAdded| m.idp.added(e.0.name, IdpType::Google))
                .on(|m: &mut Self, e: OrgGoogleIdpChanged| m.idp.renamed(e.0.name))
                .on(|m: &mut Self, e: OrgLdapIdpAdded| m.idp.added(e.0.name, IdpType::Ldap))
                .on(|m: &mut Self, e: OrgLdapIdpChanged| m.idp.renamed(e.0.name))
                .on(|m: &mut Self, _: OrgIdpRemoved| m.idp.removed())
        })
    }

    fn query(&self) -> SearchQueryBuilder {
        org_idp_query(&self.base, &self.idp.id, Self::reducers().event_types())
    }
}

impl Commands {
    /// Push a single event on an org write model and return the details.
    async fn push_one<M: WriteModel, E: Event>(
        &self,
        ctx: &CommandContext,
        model: &M,
        event: &E,
    ) -> Result<ObjectDetails, CommandError> {
        let pending = PendingEvent::from_event(&org_aggregate(model.base()), &ctx.editor, event)?;
        let stored = self.push(ctx, model.base().expected_sequence(), vec![pending]).await?;
        ObjectDetails::from_pushed(&stored)
    }

    /// Configure a generic `OAuth` provider on `org_id`.
    ///
    /// Returns the new provider id.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if a required field is empty
    /// - [`CommandError::Crypto`] if the secret cannot be encrypted
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn add_org_oauth_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        provider: OAuthProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        require_org(org_id)?;
        provider.validate(true)?;

        let id = self.next_id();
        let mut model = OrgOAuthIdpWriteModel::new(&ctx.instance_id, org_id, &id);
        self.load(ctx, &mut model).await?;

        let event = OrgOAuthIdpAdded(OAuthIdpAdded {
            id: id.clone(),
            name: provider.name,
            client_id: provider.client_id,
            client_secret: self.crypto().encrypt(&provider.client_secret)?,
            authorization_endpoint: provider.authorization_endpoint,
            token_endpoint: provider.token_endpoint,
            user_endpoint: provider.user_endpoint,
            scopes: provider.scopes,
            options: provider.options,
        });
        let details = self.push_one(ctx, &model, &event).await?;
        Ok((id, details))
    }

    /// Update the `OAuth` provider `idp_id` of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if a required field is empty
    /// - [`CommandError::NotFound`] if the provider does not exist
    /// - [`CommandError::PreconditionFailed`] if nothing would change
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn update_org_oauth_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        idp_id: &str,
        provider: OAuthProvider,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require("id", idp_id)?;
        provider.validate(false)?;

        let mut model = OrgOAuthIdpWriteModel::new(&ctx.instance_id, org_id, idp_id);
        self.load(ctx, &mut model).await?;
        if !model.idp.state.exists() {
            return Err(CommandError::NotFound(format!("identity provider {idp_id}")));
        }

        let changes = model
            .idp
            .new_changes(&provider, self.crypto())?
            .ok_or_else(unchanged)?;
        self.push_one(ctx, &model, &OrgOAuthIdpChanged(changes)).await
    }

    /// Configure a Google provider on `org_id`.
    ///
    /// Returns the new provider id.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if the client id or secret is empty
    /// - [`CommandError::Crypto`] if the secret cannot be encrypted
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn add_org_google_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        provider: GoogleProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        require_org(org_id)?;
        provider.validate(true)?;

        let id = self.next_id();
        let mut model = OrgGoogleIdpWriteModel::new(&ctx.instance_id, org_id, &id);
        self.load(ctx, &mut model).await?;

        let event = OrgGoogleIdpAdded(GoogleIdpAdded {
            id: id.clone(),
            name: provider.name,
            client_id: provider.client_id,
            client_secret: self.crypto().encrypt(&provider.client_secret)?,
            scopes: provider.scopes,
            options: provider.options,
        });
        let details = self.push_one(ctx, &model, &event).await?;
        Ok((id, details))
    }

    /// Update the Google provider `idp_id` of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if the id or client id is empty
    /// - [`CommandError::NotFound`] if the provider does not exist
    /// - [`CommandError::PreconditionFailed`] if nothing would change
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn update_org_google_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        idp_id: &str,
        provider: GoogleProvider,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require("id", idp_id)?;
        provider.validate(false)?;

        let mut model = OrgGoogleIdpWriteModel::new(&ctx.instance_id, org_id, idp_id);
        self.load(ctx, &mut model).await?;
        if !model.idp.state.exists() {
            return Err(CommandError::NotFound(format!("identity provider {idp_id}")));
        }

        let changes = model
            .idp
            .new_changes(&provider, self.crypto())?
            .ok_or_else(unchanged)?;
        self.push_one(ctx, &model, &OrgGoogleIdpChanged(changes)).await
    }

    /// Configure an LDAP provider on `org_id`.
    ///
    /// Returns the new provider id.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if a required field is empty
    /// - [`CommandError::Crypto`] if the password cannot be encrypted
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn add_org_ldap_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        provider: LdapProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        require_org(org_id)?;
        provider.validate(true)?;

        let id = self.next_id();
        let mut model = OrgLdapIdpWriteModel::new(&ctx.instance_id, org_id, &id);
        self.load(ctx, &mut model).await?;

        let event = OrgLdapIdpAdded(LdapIdpAdded {
            id: id.clone(),
            name: provider.name,
            host: provider.host,
            port: provider.port,
            tls: provider.tls,
            base_dn: provider.base_dn,
            user_object_class: provider.user_object_class,
            user_unique_attribute: provider.user_unique_attribute,
            admin: provider.admin,
            password: self.crypto().encrypt(&provider.password)?,
            attributes: provider.attributes,
            options: provider.options,
        });
        let details = self.push_one(ctx, &model, &event).await?;
        Ok((id, details))
    }

    /// Update the LDAP provider `idp_id` of `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if a required field is empty
    /// - [`CommandError::NotFound`] if the provider does not exist
    /// - [`CommandError::PreconditionFailed`] if nothing would change
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx, provider), fields(instance_id = %ctx.instance_id))]
    pub async fn update_org_ldap_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        idp_id: &str,
        provider: LdapProvider,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require("id", idp_id)?;
        provider.validate(false)?;

        let mut model = OrgLdapIdpWriteModel::new(&ctx.instance_id, org_id, idp_id);
        self.load(ctx, &mut model).await?;
        if !model.idp.state.exists() {
            return Err(CommandError::NotFound(format!("identity provider {idp_id}")));
        }

        let changes = model
            .idp
            .new_changes(&provider, self.crypto())?
            .ok_or_else(unchanged)?;
        self.push_one(ctx, &model, &OrgLdapIdpChanged(changes)).await
    }

    /// Remove provider `idp_id` of any type from `org_id`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InvalidArgument`] if the id is empty
    /// - [`CommandError::NotFound`] if the provider does not exist
    /// - [`CommandError::Concurrency`] / [`CommandError::Storage`] from the push
    #[tracing::instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn remove_org_provider(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        idp_id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        require_org(org_id)?;
        require("id", idp_id)?;

        let mut model = OrgIdpRemoveWriteModel::new(&ctx.instance_id, org_id, idp_id);
        self.load(ctx, &mut model).await?;
        if !model.idp.state.exists() {
            return Err(CommandError::NotFound(format!("identity provider {idp_id}")));
        }

        let event = OrgIdpRemoved(IdpRemoved {
            id: idp_id.to_string(),
        });
        self.push_one(ctx, &model, &event).await
    }
}

fn unchanged() -> CommandError {
    CommandError::PreconditionFailed("identity provider has not changed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_update_may_omit_secret() {
        let provider = OAuthProvider {
            name: "Corp".to_string(),
            client_id: "client".to_string(),
            authorization_endpoint: "https://corp/auth".to_string(),
            token_endpoint: "https://corp/token".to_string(),
            user_endpoint: "https://corp/user".to_string(),
            ..OAuthProvider::default()
        };
        assert!(provider.validate(false).is_ok());
        assert!(matches!(provider.validate(true), Err(CommandError::InvalidArgument(_))));
    }

    #[test]
    fn google_name_is_optional() {
        let provider = GoogleProvider {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..GoogleProvider::default()
        };
        assert!(provider.validate(true).is_ok());
    }

    #[test]
    fn ldap_requires_directory_settings() {
        let provider = LdapProvider {
            name: "Directory".to_string(),
            host: "ldap.corp".to_string(),
            ..LdapProvider::default()
        };
        assert!(matches!(provider.validate(false), Err(CommandError::InvalidArgument(msg)) if msg.contains("base DN")));
    }

    #[test]
    fn queries_filter_on_provider_id() {
        let model = OrgLdapIdpWriteModel::new("i1", "o1", "idp-9");
        let query = model.query();

        assert_eq!(query.resource_owner_filter(), Some("o1"));
        let sub = &query.queries()[0];
        assert_eq!(sub.event_data_filter().get("id"), Some(&json!("idp-9")));
        assert_eq!(
            sub.event_type_filter(),
            ["org.idp.ldap.added", "org.idp.ldap.changed", "org.idp.removed"]
        );
    }

    #[test]
    fn remove_model_listens_to_every_provider_type() {
        assert_eq!(OrgIdpRemoveWriteModel::reducers().event_types().len(), 7);
    }
}
