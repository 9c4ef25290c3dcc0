//! Organization membership read model (`org_members`).
//!
//! One row per `(instance_id, org_id, user_id)`. User details are joined at
//! read time by [`crate::query::OrgMembersQuery`], so user events only matter
//! here when the user disappears.

use crate::{ORG_REMOVED, USER_REMOVED, sequence_column};
use sourced_iam_command::member::{MemberAdded, MemberChanged, MemberRemoved};
use sourced_iam_core::aggregate::AggregateType;
use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{Column, Projection, ProjectionReducers, Result, RowMutation};

/// Table maintained by [`OrgMemberProjection`].
pub const ORG_MEMBERS_TABLE: &str = "org_members";

/// Materializes `org.member.*` events into `org_members`.
#[derive(Debug)]
pub struct OrgMemberProjection {
    reducers: ProjectionReducers,
}

impl OrgMemberProjection {
    /// Projection name, also its checkpoint key.
    pub const NAME: &'static str = "org_members";

    /// Create the projection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reducers: ProjectionReducers::new()
                .on(member_added)
                .on(member_changed)
                .on(member_removed)
                .on_stored(ORG_REMOVED, org_removed)
                .on_stored(USER_REMOVED, user_removed),
        }
    }
}

impl Default for OrgMemberProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for OrgMemberProjection {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregate_types(&self) -> Vec<AggregateType> {
        vec![AggregateType::new("org"), AggregateType::new("user")]
    }

    fn reducers(&self) -> &ProjectionReducers {
        &self.reducers
    }

    fn tables(&self) -> &[&'static str] {
        &[ORG_MEMBERS_TABLE]
    }
}

fn member_key(event: &StoredEvent, user_id: String) -> Vec<Column> {
    vec![
        Column::new("instance_id", event.instance_id.as_str()),
        Column::new("org_id", event.aggregate_id.as_str()),
        Column::new("user_id", user_id),
    ]
}

fn member_added(event: &StoredEvent, added: MemberAdded) -> Result<Vec<RowMutation>> {
    Ok(vec![RowMutation::Upsert {
        table: ORG_MEMBERS_TABLE,
        key: member_key(event, added.user_id),
        values: vec![
            Column::new("roles", added.roles),
            Column::new("creation_date", event.created_at),
            Column::new("change_date", event.created_at),
            sequence_column(event)?,
        ],
    }])
}

fn member_changed(event: &StoredEvent, changed: MemberChanged) -> Result<Vec<RowMutation>> {
    Ok(vec![RowMutation::Update {
        table: ORG_MEMBERS_TABLE,
        key: member_key(event, changed.user_id),
        values: vec![
            Column::new("roles", changed.roles),
            Column::new("change_date", event.created_at),
            sequence_column(event)?,
        ],
    }])
}

fn member_removed(event: &StoredEvent, removed: MemberRemoved) -> Result<Vec<RowMutation>> {
    Ok(vec![RowMutation::Delete {
        table: ORG_MEMBERS_TABLE,
        key: member_key(event, removed.user_id),
    }])
}

fn org_removed(event: &StoredEvent) -> Result<Vec<RowMutation>> {
    Ok(vec![RowMutation::Delete {
        table: ORG_MEMBERS_TABLE,
        key: vec![
            Column::new("instance_id", event.instance_id.as_str()),
            Column::new("org_id", event.aggregate_id.as_str()),
        ],
    }])
}

fn user_removed(event: &StoredEvent) -> Result<Vec<RowMutation>> {
    Ok(vec![RowMutation::Delete {
        table: ORG_MEMBERS_TABLE,
        key: vec![
            Column::new("instance_id", event.instance_id.as_str()),
            Column::new("user_id", event.aggregate_id.as_str()),
        ],
    }])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use sourced_iam_core::projection::ColumnValue;
    use sourced_iam_testing::ProjectionTestHarness;
    use sourced_iam_testing::fixtures::EventBuilder;

    fn text(value: &str) -> ColumnValue {
        ColumnValue::Text(value.to_string())
    }

    fn roles(names: &[&str]) -> ColumnValue {
        ColumnValue::TextArray(names.iter().map(ToString::to_string).collect())
    }

    fn added(org: &str, user: &str, sequence: u64) -> StoredEvent {
        EventBuilder::typed(
            "org",
            org,
            &MemberAdded {
                user_id: user.to_string(),
                roles: vec!["ORG_OWNER".to_string()],
            },
        )
        .sequence(sequence)
        .position(sequence)
        .build()
    }

    #[tokio::test]
    async fn member_lifecycle() {
        let mut harness = ProjectionTestHarness::new(OrgMemberProjection::new());
        let changed = EventBuilder::new("org", "org-1", "org.member.changed")
            .sequence(2)
            .position(2)
            .payload(json!({"userId": "u1", "roles": ["ORG_OWNER", "ORG_USER_MANAGER"]}))
            .build();

        harness.given_events(vec![added("org-1", "u1", 1), changed]).await.unwrap();

        let row = harness.then_row_exists(ORG_MEMBERS_TABLE, &[("org_id", text("org-1")), ("user_id", text("u1"))]);
        assert_eq!(row["roles"], roles(&["ORG_OWNER", "ORG_USER_MANAGER"]));
        assert_eq!(row["sequence"], ColumnValue::Int(2));

        let removed = EventBuilder::new("org", "org-1", "org.member.removed")
            .sequence(3)
            .position(3)
            .payload(json!({"userId": "u1"}))
            .build();
        harness.given_event(removed).await.unwrap();
        harness.then_row_missing(ORG_MEMBERS_TABLE, &[("user_id", text("u1"))]);
    }

    #[test]
    fn sequence_beyond_bigint_is_rejected_not_clamped() {
        let event = added("org-1", "u1", u64::MAX);
        let err = OrgMemberProjection::new().reducers().reduce(&event).unwrap_err();
        assert!(matches!(err, sourced_iam_core::projection::ProjectionError::EventProcessing(_)), "{err}");
    }

    #[tokio::test]
    async fn reapplying_an_event_is_idempotent() {
        let mut harness = ProjectionTestHarness::new(OrgMemberProjection::new());
        let event = added("org-1", "u1", 1);

        harness.given_event(event.clone()).await.unwrap();
        let once = harness.store().rows(ORG_MEMBERS_TABLE);
        harness.given_event(event).await.unwrap();

        assert_eq!(harness.store().rows(ORG_MEMBERS_TABLE), once);
    }

    #[tokio::test]
    async fn removed_org_and_user_drop_memberships() {
        let mut harness = ProjectionTestHarness::new(OrgMemberProjection::new());
        harness
            .given_events(vec![
                added("org-1", "u1", 1),
                added("org-1", "u2", 2),
                added("org-2", "u1", 1),
            ])
            .await
            .unwrap();

        harness
            .given_event(EventBuilder::new("user", "u1", USER_REMOVED).position(4).build())
            .await
            .unwrap();
        assert_eq!(harness.store().count(ORG_MEMBERS_TABLE), 1);

        harness
            .given_event(EventBuilder::new("org", "org-1", ORG_REMOVED).position(5).build())
            .await
            .unwrap();
        assert_eq!(harness.store().count(ORG_MEMBERS_TABLE), 0);
    }

    #[tokio::test]
    async fn memberships_are_scoped_by_instance() {
        let mut harness = ProjectionTestHarness::new(OrgMemberProjection::new());
        let other = EventBuilder::typed(
            "org",
            "org-1",
            &MemberAdded {
                user_id: "u1".to_string(),
                roles: vec!["ORG_OWNER".to_string()],
            },
        )
        .instance("OTHER")
        .build();

        harness.given_events(vec![added("org-1", "u1", 1), other]).await.unwrap();
        harness
            .given_event(
                EventBuilder::new("user", "u1", USER_REMOVED)
                    .instance("OTHER")
                    .position(3)
                    .build(),
            )
            .await
            .unwrap();

        harness.then_row_exists(ORG_MEMBERS_TABLE, &[("instance_id", text("INSTANCE"))]);
        harness.then_row_missing(ORG_MEMBERS_TABLE, &[("instance_id", text("OTHER"))]);
    }
}
