//! User read models: `users`, `users_humans`, `users_machines`, `login_names`.
//!
//! `users` holds what every user has; humans and machines get their own
//! detail table. Login names are kept in a separate table so the query layer
//! can join the primary one. A user's login name is its username.

use crate::{USER_REMOVED, sequence_column};
use serde::Deserialize;
use sourced_iam_core::aggregate::AggregateType;
use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{Column, Projection, ProjectionReducers, Result, RowMutation};

/// Common user columns.
pub const USERS_TABLE: &str = "users";
/// Human profile columns.
pub const USERS_HUMANS_TABLE: &str = "users_humans";
/// Machine user columns.
pub const USERS_MACHINES_TABLE: &str = "users_machines";
/// Login names per user.
pub const LOGIN_NAMES_TABLE: &str = "login_names";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanAdded {
    user_name: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    nick_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    preferred_language: Option<String>,
    email: String,
    #[serde(default)]
    is_email_verified: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineAdded {
    user_name: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineChanged {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsernameChanged {
    user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanProfileChanged {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    nick_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    preferred_language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanEmailChanged {
    email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanAvatarAdded {
    store_key: String,
}

/// Materializes `user.*` events into the user tables.
#[derive(Debug)]
pub struct UserProjection {
    reducers: ProjectionReducers,
}

impl UserProjection {
    /// Projection name, also its checkpoint key.
    pub const NAME: &'static str = "users";

    /// Create the projection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reducers: ProjectionReducers::new()
                .on_type("user.human.added", human_added)
                .on_type("user.machine.added", machine_added)
                .on_type("user.machine.changed", machine_changed)
                .on_type("user.username.changed", username_changed)
                .on_type("user.human.profile.changed", profile_changed)
                .on_type("user.human.email.changed", email_changed)
                .on_stored("user.human.email.verified", email_verified)
                .on_type("user.human.avatar.added", avatar_added)
                .on_stored("user.human.avatar.removed", avatar_removed)
                .on_stored(USER_REMOVED, user_removed),
        }
    }
}

impl Default for UserProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for UserProjection {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregate_types(&self) -> Vec<AggregateType> {
        vec![AggregateType::new("user")]
    }

    fn reducers(&self) -> &ProjectionReducers {
        &self.reducers
    }

    fn tables(&self) -> &[&'static str] {
        &[USERS_TABLE, USERS_HUMANS_TABLE, USERS_MACHINES_TABLE, LOGIN_NAMES_TABLE]
    }
}

fn user_key(event: &StoredEvent) -> Vec<Column> {
    vec![
        Column::new("instance_id", event.instance_id.as_str()),
        Column::new("id", event.aggregate_id.as_str()),
    ]
}

fn detail_key(event: &StoredEvent) -> Vec<Column> {
    vec![
        Column::new("instance_id", event.instance_id.as_str()),
        Column::new("user_id", event.aggregate_id.as_str()),
    ]
}

/// Bump `change_date` and `sequence` of the user row.
fn touch(event: &StoredEvent) -> Result<RowMutation> {
    Ok(RowMutation::Update {
        table: USERS_TABLE,
        key: user_key(event),
        values: vec![Column::new("change_date", event.created_at), sequence_column(event)?],
    })
}

fn user_added(event: &StoredEvent, username: &str, user_type: &str) -> Result<Vec<RowMutation>> {
    let mut login_key = detail_key(event);
    login_key.push(Column::new("login_name", username));
    Ok(vec![
        RowMutation::Upsert {
            table: USERS_TABLE,
            key: user_key(event),
            values: vec![
                Column::new("resource_owner", event.resource_owner.as_str()),
                Column::new("username", username),
                Column::new("user_type", user_type),
                Column::new("creation_date", event.created_at),
                Column::new("change_date", event.created_at),
                sequence_column(event)?,
            ],
        },
        RowMutation::Delete {
            table: LOGIN_NAMES_TABLE,
            key: detail_key(event),
        },
        RowMutation::Upsert {
            table: LOGIN_NAMES_TABLE,
            key: login_key,
            values: vec![Column::new("is_primary", true)],
        },
    ])
}

fn human_added(event: &StoredEvent, added: HumanAdded) -> Result<Vec<RowMutation>> {
    let mut mutations = user_added(event, &added.user_name, "human")?;
    mutations.push(RowMutation::Upsert {
        table: USERS_HUMANS_TABLE,
        key: detail_key(event),
        values: vec![
            Column::new("first_name", added.first_name),
            Column::new("last_name", added.last_name),
            Column::new("nick_name", added.nick_name),
            Column::new("display_name", added.display_name),
            Column::new("preferred_language", added.preferred_language),
            Column::new("email", added.email),
            Column::new("is_email_verified", added.is_email_verified),
            Column::new("avatar_key", None::<String>),
        ],
    });
    Ok(mutations)
}

fn machine_added(event: &StoredEvent, added: MachineAdded) -> Result<Vec<RowMutation>> {
    let mut mutations = user_added(event, &added.user_name, "machine")?;
    mutations.push(RowMutation::Upsert {
        table: USERS_MACHINES_TABLE,
        key: detail_key(event),
        values: vec![
            Column::new("name", added.name),
            Column::new("description", added.description),
        ],
    });
    Ok(mutations)
}

fn machine_changed(event: &StoredEvent, changed: MachineChanged) -> Result<Vec<RowMutation>> {
    let values = [("name", changed.name), ("description", changed.description)]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| Column::new(name, value)))
        .collect();
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_MACHINES_TABLE,
            key: detail_key(event),
            values,
        },
    ])
}

fn username_changed(event: &StoredEvent, changed: UsernameChanged) -> Result<Vec<RowMutation>> {
    let mut login_key = detail_key(event);
    login_key.push(Column::new("login_name", changed.user_name.as_str()));
    Ok(vec![
        RowMutation::Update {
            table: USERS_TABLE,
            key: user_key(event),
            values: vec![
                Column::new("username", changed.user_name.as_str()),
                Column::new("change_date", event.created_at),
                sequence_column(event)?,
            ],
        },
        RowMutation::Delete {
            table: LOGIN_NAMES_TABLE,
            key: detail_key(event),
        },
        RowMutation::Upsert {
            table: LOGIN_NAMES_TABLE,
            key: login_key,
            values: vec![Column::new("is_primary", true)],
        },
    ])
}

fn profile_changed(event: &StoredEvent, changed: HumanProfileChanged) -> Result<Vec<RowMutation>> {
    let values = [
        ("first_name", changed.first_name),
        ("last_name", changed.last_name),
        ("nick_name", changed.nick_name),
        ("display_name", changed.display_name),
        ("preferred_language", changed.preferred_language),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|value| Column::new(name, value)))
    .collect();
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
            values,
        },
    ])
}

fn email_changed(event: &StoredEvent, changed: HumanEmailChanged) -> Result<Vec<RowMutation>> {
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
            values: vec![
                Column::new("email", changed.email),
                Column::new("is_email_verified", false),
            ],
        },
    ])
}

fn email_verified(event: &StoredEvent) -> Result<Vec<RowMutation>> {
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
            values: vec![Column::new("is_email_verified", true)],
        },
    ])
}

fn avatar_added(event: &StoredEvent, added: HumanAvatarAdded) -> Result<Vec<RowMutation>> {
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
            values: vec![Column::new("avatar_key", added.store_key)],
        },
    ])
}

fn avatar_removed(event: &StoredEvent) -> Result<Vec<RowMutation>> {
    Ok(vec![
        touch(event)?,
        RowMutation::Update {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
            values: vec![Column::new("avatar_key", None::<String>)],
        },
    ])
}

fn user_removed(event: &StoredEvent) -> Result<Vec<RowMutation>> {
    Ok(vec![
        RowMutation::Delete {
            table: LOGIN_NAMES_TABLE,
            key: detail_key(event),
        },
        RowMutation::Delete {
            table: USERS_HUMANS_TABLE,
            key: detail_key(event),
        },
        RowMutation::Delete {
            table: USERS_MACHINES_TABLE,
            key: detail_key(event),
        },
        RowMutation::Delete {
            table: USERS_TABLE,
            key: user_key(event),
        },
    ])
}
