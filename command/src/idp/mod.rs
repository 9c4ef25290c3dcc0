//! Federated identity providers configured on organizations.
//!
//! - [`events`]: payloads of the provider lifecycle events
//! - [`model`]: provider write models independent of the owning aggregate
//! - [`org`]: organization-scoped write models and the commands
//!
//! Secrets (OAuth client secrets, LDAP bind passwords) are encrypted with
//! [`SecretCrypto`](crate::crypto::SecretCrypto) before they are written to an
//! event. On update an empty secret means "keep the current one".

use serde::{Deserialize, Serialize};

pub mod events;
pub mod model;
pub mod org;

pub use org::{
    GoogleProvider, LdapProvider, OAuthProvider, OrgGoogleIdpWriteModel, OrgIdpRemoveWriteModel,
    OrgLdapIdpWriteModel, OrgOAuthIdpWriteModel,
};

/// Lifecycle of an identity provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdpState {
    /// Never configured.
    #[default]
    Unspecified,
    /// Usable for login.
    Active,
    /// Configured but disabled.
    Inactive,
    /// Deleted.
    Removed,
}

impl IdpState {
    /// Whether the provider is configured and not removed.
    #[must_use]
    pub const fn exists(self) -> bool {
        !matches!(self, Self::Unspecified | Self::Removed)
    }
}

impl TryFrom<i32> for IdpState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::Active),
            2 => Ok(Self::Inactive),
            3 => Ok(Self::Removed),
            other => Err(other),
        }
    }
}

/// Protocol family of an identity provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdpType {
    /// Unknown.
    #[default]
    Unspecified,
    /// `OpenID` Connect.
    Oidc,
    /// JWT from a trusted issuer.
    Jwt,
    /// Generic `OAuth` 2.0.
    OAuth,
    /// LDAP bind.
    Ldap,
    /// Azure AD.
    AzureAd,
    /// GitHub.
    GitHub,
    /// GitHub Enterprise.
    GitHubEnterprise,
    /// GitLab.
    GitLab,
    /// Self-hosted GitLab.
    GitLabSelfHosted,
    /// Google.
    Google,
}

/// How users coming from a provider are linked and provisioned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpOptions {
    /// Users may create an account with this provider.
    #[serde(default)]
    pub is_creation_allowed: bool,
    /// Users may link an existing account to this provider.
    #[serde(default)]
    pub is_linking_allowed: bool,
    /// Accounts are created without asking the user.
    #[serde(default)]
    pub is_auto_creation: bool,
    /// Account data is refreshed from the provider on every login.
    #[serde(default)]
    pub is_auto_update: bool,
}

impl IdpOptions {
    /// Fields of `requested` that differ from `self`.
    #[must_use]
    pub fn changes(&self, requested: &Self) -> IdpOptionChanges {
        fn diff(current: bool, requested: bool) -> Option<bool> {
            (current != requested).then_some(requested)
        }
        IdpOptionChanges {
            is_creation_allowed: diff(self.is_creation_allowed, requested.is_creation_allowed),
            is_linking_allowed: diff(self.is_linking_allowed, requested.is_linking_allowed),
            is_auto_creation: diff(self.is_auto_creation, requested.is_auto_creation),
            is_auto_update: diff(self.is_auto_update, requested.is_auto_update),
        }
    }

    /// Apply the present fields of `changes`.
    pub fn apply(&mut self, changes: &IdpOptionChanges) {
        if let Some(v) = changes.is_creation_allowed {
            self.is_creation_allowed = v;
        }
        if let Some(v) = changes.is_linking_allowed {
            self.is_linking_allowed = v;
        }
        if let Some(v) = changes.is_auto_creation {
            self.is_auto_creation = v;
        }
        if let Some(v) = changes.is_auto_update {
            self.is_auto_update = v;
        }
    }
}

/// Changed subset of [`IdpOptions`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpOptionChanges {
    /// See [`IdpOptions::is_creation_allowed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_creation_allowed: Option<bool>,
    /// See [`IdpOptions::is_linking_allowed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_linking_allowed: Option<bool>,
    /// See [`IdpOptions::is_auto_creation`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_creation: Option<bool>,
    /// See [`IdpOptions::is_auto_update`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_update: Option<bool>,
}

impl IdpOptionChanges {
    /// Whether no option changed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.is_creation_allowed.is_none()
            && self.is_linking_allowed.is_none()
            && self.is_auto_creation.is_none()
            && self.is_auto_update.is_none()
    }
}

/// Mapping of LDAP attributes to user profile fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapAttributes {
    /// Attribute holding the external user id.
    #[serde(default)]
    pub id_attribute: String,
    /// Attribute holding the first name.
    #[serde(default)]
    pub first_name_attribute: String,
    /// Attribute holding the last name.
    #[serde(default)]
    pub last_name_attribute: String,
    /// Attribute holding the display name.
    #[serde(default)]
    pub display_name_attribute: String,
    /// Attribute holding the email address.
    #[serde(default)]
    pub email_attribute: String,
}

impl LdapAttributes {
    /// Fields of `requested` that differ from `self`.
    #[must_use]
    pub fn changes(&self, requested: &Self) -> LdapAttributeChanges {
        LdapAttributeChanges {
            id_attribute: changed(&self.id_attribute, &requested.id_attribute),
            first_name_attribute: changed(&self.first_name_attribute, &requested.first_name_attribute),
            last_name_attribute: changed(&self.last_name_attribute, &requested.last_name_attribute),
            display_name_attribute: changed(
                &self.display_name_attribute,
                &requested.display_name_attribute,
            ),
            email_attribute: changed(&self.email_attribute, &requested.email_attribute),
        }
    }

    /// Apply the present fields of `changes`.
    pub fn apply(&mut self, changes: LdapAttributeChanges) {
        set(&mut self.id_attribute, changes.id_attribute);
        set(&mut self.first_name_attribute, changes.first_name_attribute);
        set(&mut self.last_name_attribute, changes.last_name_attribute);
        set(&mut self.display_name_attribute, changes.display_name_attribute);
        set(&mut self.email_attribute, changes.email_attribute);
    }
}

/// Changed subset of [`LdapAttributes`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapAttributeChanges {
    /// See [`LdapAttributes::id_attribute`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attribute: Option<String>,
    /// See [`LdapAttributes::first_name_attribute`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name_attribute: Option<String>,
    /// See [`LdapAttributes::last_name_attribute`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_attribute: Option<String>,
    /// See [`LdapAttributes::display_name_attribute`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_attribute: Option<String>,
    /// See [`LdapAttributes::email_attribute`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_attribute: Option<String>,
}

impl LdapAttributeChanges {
    /// Whether no attribute changed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id_attribute.is_none()
            && self.first_name_attribute.is_none()
            && self.last_name_attribute.is_none()
            && self.display_name_attribute.is_none()
            && self.email_attribute.is_none()
    }
}

pub(crate) fn changed<T: PartialEq + Clone>(current: &T, requested: &T) -> Option<T> {
    (current != requested).then(|| requested.clone())
}

pub(crate) fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}
