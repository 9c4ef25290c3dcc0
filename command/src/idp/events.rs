//! Identity provider events.
//!
//! The payload structs are independent of the owning aggregate; the `Org*`
//! newtypes give them their organization event tags. Every payload carries
//! the provider `id`, which write models filter on.

use super::{IdpOptionChanges, IdpOptions, LdapAttributeChanges, LdapAttributes};
use crate::crypto::EncryptedSecret;
use serde::{Deserialize, Serialize};
use sourced_iam_core::event::Event;

/// A generic `OAuth` 2.0 provider was configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthIdpAdded {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Encrypted client secret.
    pub client_secret: EncryptedSecret,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// User info endpoint URL.
    pub user_endpoint: String,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Linking and provisioning options.
    #[serde(flatten)]
    pub options: IdpOptions,
}

/// An `OAuth` provider changed; only changed fields are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthIdpChanged {
    /// Provider id.
    pub id: String,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// New encrypted client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<EncryptedSecret>,
    /// New authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// New token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// New user info endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_endpoint: Option<String>,
    /// New scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Changed options.
    #[serde(flatten)]
    pub options: IdpOptionChanges,
}

impl OAuthIdpChanged {
    /// Whether the event would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.client_id.is_none()
            && self.client_secret.is_none()
            && self.authorization_endpoint.is_none()
            && self.token_endpoint.is_none()
            && self.user_endpoint.is_none()
            && self.scopes.is_none()
            && self.options.is_empty()
    }
}

/// A Google provider was configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleIdpAdded {
    /// Provider id.
    pub id: String,
    /// Display name (may be empty).
    #[serde(default)]
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Encrypted client secret.
    pub client_secret: EncryptedSecret,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Linking and provisioning options.
    #[serde(flatten)]
    pub options: IdpOptions,
}

/// A Google provider changed; only changed fields are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleIdpChanged {
    /// Provider id.
    pub id: String,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// New encrypted client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<EncryptedSecret>,
    /// New scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Changed options.
    #[serde(flatten)]
    pub options: IdpOptionChanges,
}

impl GoogleIdpChanged {
    /// Whether the event would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.client_id.is_none()
            && self.client_secret.is_none()
            && self.scopes.is_none()
            && self.options.is_empty()
    }
}

/// An LDAP provider was configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapIdpAdded {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Server host.
    pub host: String,
    /// Server port (empty for the protocol default).
    #[serde(default)]
    pub port: String,
    /// Connect with TLS.
    #[serde(default)]
    pub tls: bool,
    /// Base DN for user searches.
    #[serde(rename = "baseDN")]
    pub base_dn: String,
    /// Object class of user entries.
    pub user_object_class: String,
    /// Attribute identifying a user uniquely.
    pub user_unique_attribute: String,
    /// DN used to bind for searches.
    pub admin: String,
    /// Encrypted bind password.
    pub password: EncryptedSecret,
    /// Attribute mapping.
    #[serde(flatten)]
    pub attributes: LdapAttributes,
    /// Linking and provisioning options.
    #[serde(flatten)]
    pub options: IdpOptions,
}

/// An LDAP provider changed; only changed fields are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapIdpChanged {
    /// Provider id.
    pub id: String,
    /// Name before the change.
    #[serde(default)]
    pub old_name: String,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// New port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// New TLS flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    /// New base DN.
    #[serde(default, rename = "baseDN", skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,
    /// New user object class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_object_class: Option<String>,
    /// New unique attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_unique_attribute: Option<String>,
    /// New bind DN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    /// New encrypted bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<EncryptedSecret>,
    /// Changed attribute mapping.
    #[serde(flatten)]
    pub attributes: LdapAttributeChanges,
    /// Changed options.
    #[serde(flatten)]
    pub options: IdpOptionChanges,
}

impl LdapIdpChanged {
    /// Whether the event would change nothing (`old_name` does not count).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.tls.is_none()
            && self.base_dn.is_none()
            && self.user_object_class.is_none()
            && self.user_unique_attribute.is_none()
            && self.admin.is_none()
            && self.password.is_none()
            && self.attributes.is_empty()
            && self.options.is_empty()
    }
}

/// A provider of any type was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpRemoved {
    /// Provider id.
    pub id: String,
}

macro_rules! org_event {
    ($(#[$doc:meta])* $name:ident($payload:ty) = $tag:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $payload);

        impl Event for $name {
            const EVENT_TYPE: &'static str = $tag;
        }
    };
}

org_event!(
    /// `OAuth` provider added to an organization.
    OrgOAuthIdpAdded(OAuthIdpAdded) = "org.idp.oauth.added"
);
org_event!(
    /// `OAuth` provider of an organization changed.
    OrgOAuthIdpChanged(OAuthIdpChanged) = "org.idp.oauth.changed"
);
org_event!(
    /// Google provider added to an organization.
    OrgGoogleIdpAdded(GoogleIdpAdded) = "org.idp.google.added"
);
org_event!(
    /// Google provider of an organization changed.
    OrgGoogleIdpChanged(GoogleIdpChanged) = "org.idp.google.changed"
);
org_event!(
    /// LDAP provider added to an organization.
    OrgLdapIdpAdded(LdapIdpAdded) = "org.idp.ldap.added"
);
org_event!(
    /// LDAP provider of an organization changed.
    OrgLdapIdpChanged(LdapIdpChanged) = "org.idp.ldap.changed"
);
org_event!(
    /// Provider removed from an organization.
    OrgIdpRemoved(IdpRemoved) = "org.idp.removed"
);
