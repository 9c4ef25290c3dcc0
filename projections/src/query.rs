//! Read-side queries over the projection tables.
//!
//! Joins are resolved here, at read time: `org_members` is joined with the
//! user tables and the primary login name instead of copying user details
//! into every membership row.

use chrono::{DateTime, Utc};
use sourced_iam_core::projection::{ProjectionError, Result};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};

/// Upper bound for a page.
pub const MAX_LIMIT: u64 = 1000;

/// List the members of one organization, with user details and a total count.
///
/// # Example
///
/// ```ignore
/// let members = OrgMembersQuery::new("INSTANCE", "org-1")
///     .roles(["ORG_OWNER"])
///     .limit(20)
///     .execute(&pool)
///     .await?;
/// println!("{} of {}", members.members.len(), members.count);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgMembersQuery {
    instance_id: String,
    org_id: String,
    user_id: Option<String>,
    email: Option<String>,
    roles: Vec<String>,
    limit: u64,
    offset: u64,
}

/// One page of members.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Members {
    /// Total matching members, independent of limit/offset.
    pub count: u64,
    /// The requested page.
    pub members: Vec<Member>,
}

/// A membership joined with its user.
///
/// User columns are `None` while the user projection lags behind, or for
/// memberships of users it never saw.
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    /// Organization.
    pub org_id: String,
    /// Member user id.
    pub user_id: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// When the membership was created.
    pub creation_date: DateTime<Utc>,
    /// Last change of the membership.
    pub change_date: DateTime<Utc>,
    /// Sequence of the last applied membership event.
    pub sequence: u64,
    /// Organization owning the user.
    pub user_resource_owner: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Primary login name.
    pub preferred_login_name: Option<String>,
    /// Email (humans only).
    pub email: Option<String>,
    /// First name (humans only).
    pub first_name: Option<String>,
    /// Last name (humans only).
    pub last_name: Option<String>,
    /// Display name; for machine users their name.
    pub display_name: Option<String>,
    /// Avatar store key (humans only).
    pub avatar_key: Option<String>,
    /// `human` or `machine`.
    pub user_type: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for Member {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let sequence: i64 = row.try_get("sequence")?;
        Ok(Self {
            org_id: row.try_get("org_id")?,
            user_id: row.try_get("user_id")?,
            roles: row.try_get("roles")?,
            creation_date: row.try_get("creation_date")?,
            change_date: row.try_get("change_date")?,
            sequence: u64::try_from(sequence).map_err(|e| sqlx::Error::ColumnDecode {
                index: "sequence".to_string(),
                source: Box::new(e),
            })?,
            user_resource_owner: row.try_get("user_resource_owner")?,
            username: row.try_get("username")?,
            preferred_login_name: row.try_get("preferred_login_name")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            display_name: row.try_get("display_name")?,
            avatar_key: row.try_get("avatar_key")?,
            user_type: row.try_get("user_type")?,
        })
    }
}

const SELECT_MEMBERS: &str = "SELECT m.org_id, m.user_id, m.roles, m.creation_date, m.change_date, m.sequence, \
     u.resource_owner AS user_resource_owner, u.username, u.user_type, \
     l.login_name AS preferred_login_name, \
     h.email, h.first_name, h.last_name, COALESCE(h.display_name, mc.name) AS display_name, h.avatar_key, \
     COUNT(*) OVER () AS total_count \
     FROM org_members m \
     LEFT JOIN users u ON u.instance_id = m.instance_id AND u.id = m.user_id \
     LEFT JOIN users_humans h ON h.instance_id = m.instance_id AND h.user_id = m.user_id \
     LEFT JOIN users_machines mc ON mc.instance_id = m.instance_id AND mc.user_id = m.user_id \
     LEFT JOIN login_names l ON l.instance_id = m.instance_id AND l.user_id = m.user_id AND l.is_primary";

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl OrgMembersQuery {
    /// Members of `org_id` in `instance_id`; first 100 by creation date.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            org_id: org_id.into(),
            user_id: None,
            email: None,
            roles: Vec::new(),
            limit: 100,
            offset: 0,
        }
    }

    /// Only this user.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Only members with this email (case-insensitive).
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Only members holding all of `roles`.
    #[must_use]
    pub fn roles<I, T>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Page size, clamped to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    /// Rows to skip.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Render the query.
    #[must_use]
    pub fn to_sql(&self) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(SELECT_MEMBERS);
        builder
            .push(" WHERE m.instance_id = ")
            .push_bind(self.instance_id.clone())
            .push(" AND m.org_id = ")
            .push_bind(self.org_id.clone());

        if let Some(user_id) = &self.user_id {
            builder.push(" AND m.user_id = ").push_bind(user_id.clone());
        }
        if let Some(email) = &self.email {
            builder.push(" AND lower(h.email) = lower(").push_bind(email.clone()).push(")");
        }
        if !self.roles.is_empty() {
            builder.push(" AND m.roles @> ").push_bind(self.roles.clone());
        }

        builder
            .push(" ORDER BY m.creation_date ASC, m.user_id ASC LIMIT ")
            .push_bind(to_db(self.limit))
            .push(" OFFSET ")
            .push_bind(to_db(self.offset));
        builder
    }

    /// Run the query.
    ///
    /// `count` comes from the window function, so a page past the end
    /// reports 0.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    #[tracing::instrument(skip(self, pool), fields(instance_id = %self.instance_id, org_id = %self.org_id))]
    pub async fn execute(&self, pool: &PgPool) -> Result<Members> {
        let mut builder = self.to_sql();
        let rows = builder
            .build()
            .fetch_all(pool)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let count = match rows.first() {
            Some(row) => {
                let total: i64 = row
                    .try_get("total_count")
                    .map_err(|e| ProjectionError::Storage(e.to_string()))?;
                u64::try_from(total).unwrap_or_default()
            }
            None => 0,
        };
        let members = rows
            .iter()
            .map(Member::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        tracing::debug!(count, returned = members.len(), "Org members queried");
        Ok(Members { count, members })
    }
}
