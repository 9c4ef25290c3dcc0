//! Provider state independent of the aggregate that owns the provider.
//!
//! Aggregate-scoped write models (see [`super::org`]) own one of these and
//! delegate their folds to it. Each model also computes the changed event
//! for an update request; `None` means the request changes nothing.

use super::events::{
    GoogleIdpAdded, GoogleIdpChanged, LdapIdpAdded, LdapIdpChanged, OAuthIdpAdded, OAuthIdpChanged,
};
use super::org::{GoogleProvider, LdapProvider, OAuthProvider};
use super::{IdpOptions, IdpState, IdpType, LdapAttributes, changed, set};
use crate::crypto::{CryptoError, EncryptedSecret, SecretCrypto};

fn new_secret(crypto: &SecretCrypto, plaintext: &str) -> Result<Option<EncryptedSecret>, CryptoError> {
    if plaintext.is_empty() {
        return Ok(None);
    }
    crypto.encrypt(plaintext).map(Some)
}

/// State of a generic `OAuth` provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OAuthIdpWriteModel {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Encrypted client secret.
    pub client_secret: Option<EncryptedSecret>,
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
    /// Lifecycle.
    pub state: IdpState,
}

impl OAuthIdpWriteModel {
    /// Empty model for provider `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn added(&mut self, event: OAuthIdpAdded) {
        self.name = event.name;
        self.client_id = event.client_id;
        self.client_secret = Some(event.client_secret);
        self.authorization_endpoint = event.authorization_endpoint;
        self.token_endpoint = event.token_endpoint;
        self.user_endpoint = event.user_endpoint;
        self.scopes = event.scopes;
        self.options = event.options;
        self.state = IdpState::Active;
    }

    pub(crate) fn changed(&mut self, event: OAuthIdpChanged) {
        set(&mut self.name, event.name);
        set(&mut self.client_id, event.client_id);
        if event.client_secret.is_some() {
            self.client_secret = event.client_secret;
        }
        set(&mut self.authorization_endpoint, event.authorization_endpoint);
        set(&mut self.token_endpoint, event.token_endpoint);
        set(&mut self.user_endpoint, event.user_endpoint);
        set(&mut self.scopes, event.scopes);
        self.options.apply(&event.options);
    }

    pub(crate) fn removed(&mut self) {
        self.state = IdpState::Removed;
    }

    /// The changed event for `requested`, or `None` if nothing differs.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if a new secret cannot be encrypted.
    pub fn new_changes(
        &self,
        requested: &OAuthProvider,
        crypto: &SecretCrypto,
    ) -> Result<Option<OAuthIdpChanged>, CryptoError> {
        let event = OAuthIdpChanged {
            id: self.id.clone(),
            name: changed(&self.name, &requested.name),
            client_id: changed(&self.client_id, &requested.client_id),
            client_secret: new_secret(crypto, &requested.client_secret)?,
            authorization_endpoint: changed(&self.authorization_endpoint, &requested.authorization_endpoint),
            token_endpoint: changed(&self.token_endpoint, &requested.token_endpoint),
            user_endpoint: changed(&self.user_endpoint, &requested.user_endpoint),
            scopes: changed(&self.scopes, &requested.scopes),
            options: self.options.changes(&requested.options),
        };
        Ok((!event.is_empty()).then_some(event))
    }
}

/// State of a Google provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoogleIdpWriteModel {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `OAuth` client id.
    pub client_id: String,
    /// Encrypted client secret.
    pub client_secret: Option<EncryptedSecret>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Linking and provisioning options.
    pub options: IdpOptions,
    /// Lifecycle.
    pub state: IdpState,
}

impl GoogleIdpWriteModel {
    /// Empty model for provider `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn added(&mut self, event: GoogleIdpAdded) {
        self.name = event.name;
        self.client_id = event.client_id;
        self.client_secret = Some(event.client_secret);
        self.scopes = event.scopes;
        self.options = event.options;
        self.state = IdpState::Active;
    }

    pub(crate) fn changed(&mut self, event: GoogleIdpChanged) {
        set(&mut self.name, event.name);
        set(&mut self.client_id, event.client_id);
        if event.client_secret.is_some() {
            self.client_secret = event.client_secret;
        }
        set(&mut self.scopes, event.scopes);
        self.options.apply(&event.options);
    }

    pub(crate) fn removed(&mut self) {
        self.state = IdpState::Removed;
    }

    /// The changed event for `requested`, or `None` if nothing differs.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if a new secret cannot be encrypted.
    pub fn new_changes(
        &self,
        requested: &GoogleProvider,
        crypto: &SecretCrypto,
    ) -> Result<Option<GoogleIdpChanged>, CryptoError> {
        let event = GoogleIdpChanged {
            id: self.id.clone(),
            name: changed(&self.name, &requested.name),
            client_id: changed(&self.client_id, &requested.client_id),
            client_secret: new_secret(crypto, &requested.client_secret)?,
            scopes: changed(&self.scopes, &requested.scopes),
            options: self.options.changes(&requested.options),
        };
        Ok((!event.is_empty()).then_some(event))
    }
}

/// State of an LDAP provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LdapIdpWriteModel {
    /// Provider id.
    pub id: String,
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
    /// Encrypted bind password.
    pub password: Option<EncryptedSecret>,
    /// Attribute mapping.
    pub attributes: LdapAttributes,
    /// Linking and provisioning options.
    pub options: IdpOptions,
    /// Lifecycle.
    pub state: IdpState,
}

impl LdapIdpWriteModel {
    /// Empty model for provider `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn added(&mut self, event: LdapIdpAdded) {
        self.name = event.name;
        self.host = event.host;
        self.port = event.port;
        self.tls = event.tls;
        self.base_dn = event.base_dn;
        self.user_object_class = event.user_object_class;
        self.user_unique_attribute = event.user_unique_attribute;
        self.admin = event.admin;
        self.password = Some(event.password);
        self.attributes = event.attributes;
        self.options = event.options;
        self.state = IdpState::Active;
    }

    pub(crate) fn changed(&mut self, event: LdapIdpChanged) {
        set(&mut self.name, event.name);
        set(&mut self.host, event.host);
        set(&mut self.port, event.port);
        set(&mut self.tls, event.tls);
        set(&mut self.base_dn, event.base_dn);
        set(&mut self.user_object_class, event.user_object_class);
        set(&mut self.user_unique_attribute, event.user_unique_attribute);
        set(&mut self.admin, event.admin);
        if event.password.is_some() {
            self.password = event.password;
        }
        self.attributes.apply(event.attributes);
        self.options.apply(&event.options);
    }

    pub(crate) fn removed(&mut self) {
        self.state = IdpState::Removed;
    }

    /// The changed event for `requested`, or `None` if nothing differs.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if a new password cannot be encrypted.
    pub fn new_changes(
        &self,
        requested: &LdapProvider,
        crypto: &SecretCrypto,
    ) -> Result<Option<LdapIdpChanged>, CryptoError> {
        let event = LdapIdpChanged {
            id: self.id.clone(),
            old_name: self.name.clone(),
            name: changed(&self.name, &requested.name),
            host: changed(&self.host, &requested.host),
            port: changed(&self.port, &requested.port),
            tls: changed(&self.tls, &requested.tls),
            base_dn: changed(&self.base_dn, &requested.base_dn),
            user_object_class: changed(&self.user_object_class, &requested.user_object_class),
            user_unique_attribute: changed(&self.user_unique_attribute, &requested.user_unique_attribute),
            admin: changed(&self.admin, &requested.admin),
            password: new_secret(crypto, &requested.password)?,
            attributes: self.attributes.changes(&requested.attributes),
            options: self.options.changes(&requested.options),
        };
        Ok((!event.is_empty()).then_some(event))
    }
}

/// Just enough state to remove a provider of any type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdpRemoveWriteModel {
    /// Provider id.
    pub id: String,
    /// Current display name.
    pub name: String,
    /// Protocol family.
    pub idp_type: IdpType,
    /// Lifecycle.
    pub state: IdpState,
}

impl IdpRemoveWriteModel {
    /// Empty model for provider `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn added(&mut self, name: String, idp_type: IdpType) {
        self.name = name;
        self.idp_type = idp_type;
        self.state = IdpState::Active;
    }

    pub(crate) fn renamed(&mut self, name: Option<String>) {
        set(&mut self.name, name);
    }

    pub(crate) fn removed(&mut self) {
        self.state = IdpState::Removed;
    }
}
