//! Turns a sort [`Mode`] into the base clause set: the table that drives the ID
//! search, the predicates that table needs on its own, and its natural ordering.
//!
//! | mode | driving table | ordering |
//! |---|---|---|
//! | online | activity | last seen, newest first |
//! | active | users + activity | last seen, then display name |
//! | newest | users + activity | ID, descending |
//! | random | users + activity | `RANDOM()` |
//! | popular | usermeta | friend count as an integer, descending |
//! | alphabetical | users or profile data | display name |
//! | in | users | position in the `include` list |
//! | unordered, custom | users | none |

use chrono::{TimeDelta, Utc};
use rusqlite::types::Value;
use tracing::debug;

use crate::clause::{id_list, ClauseSet, Fragment, OrderBy, OrderTerm, Origin, SelectClause};
use crate::query::{Mode, QuerySpec};
use crate::settings::Settings;
use crate::store::{format_timestamp, ACTIVITY, LAST_ACTIVITY, PROFILE_DATA, USERMETA, USERS};

pub fn assemble(spec: &QuerySpec, settings: &Settings) -> ClauseSet {
    let clauses = match &spec.mode {
        Mode::Online => online(settings),
        Mode::ActiveRecently | Mode::Newest | Mode::Random => {
            let mut clauses = users_with_activity(settings);
            clauses.order = match spec.mode {
                Mode::Newest => OrderBy::Single(OrderTerm::desc("u.ID")),
                Mode::Random => OrderBy::Single(OrderTerm::bare(Fragment::new("RANDOM()"))),
                _ => OrderBy::Compound(vec![
                    // members who never showed up sort last
                    OrderTerm::desc("COALESCE(a.date_recorded, '')"),
                    OrderTerm::asc("u.display_name"),
                ]),
            };
            clauses
        }
        Mode::Popular => popular(settings),
        Mode::Alphabetical => alphabetical(settings),
        Mode::ExplicitOrder => explicit_order(&spec.include),
        Mode::Unordered | Mode::Custom(_) => ClauseSet::new(SelectClause::new(USERS, "ID")),
    };
    debug!(mode = %spec.mode, table = %clauses.select.table, "assembled base clauses");
    clauses
}

fn online(settings: &Settings) -> ClauseSet {
    let mut clauses = ClauseSet::new(SelectClause::new(ACTIVITY, "user_id"));
    clauses.push_where(
        Origin::Base,
        Fragment::with_params(
            "u.component = ? AND u.type = ?",
            vec![
                Value::Text(settings.members_component.clone()),
                Value::Text(LAST_ACTIVITY.to_string()),
            ],
        ),
    );
    let window = TimeDelta::try_seconds(settings.online_window_secs()).unwrap_or(TimeDelta::zero());
    let threshold = (Utc::now() - window).naive_utc();
    clauses.push_where(
        Origin::Base,
        Fragment::with_params(
            "u.date_recorded >= ?",
            vec![Value::Text(format_timestamp(&threshold))],
        ),
    );
    clauses.order = OrderBy::Single(OrderTerm::desc("u.date_recorded"));
    clauses.activity_column = Some("u.date_recorded".to_string());
    clauses
}

fn users_with_activity(settings: &Settings) -> ClauseSet {
    let mut select = SelectClause::new(USERS, "ID");
    select.join = Some(Fragment::with_params(
        format!("LEFT JOIN {ACTIVITY} a ON u.ID = a.user_id AND a.component = ? AND a.type = ?"),
        vec![
            Value::Text(settings.members_component.clone()),
            Value::Text(LAST_ACTIVITY.to_string()),
        ],
    ));
    let mut clauses = ClauseSet::new(select);
    clauses.push_where(Origin::Status, Fragment::new(settings.status_sql("u")));
    clauses.activity_column = Some("a.date_recorded".to_string());
    clauses
}

fn popular(settings: &Settings) -> ClauseSet {
    let mut clauses = ClauseSet::new(SelectClause::new(USERMETA, "user_id"));
    clauses.push_where(
        Origin::Base,
        Fragment::with_params(
            "u.meta_key = ?",
            vec![Value::Text(settings.friend_count_key.clone())],
        ),
    );
    // counts are stored as text
    clauses.order = OrderBy::Single(OrderTerm::desc("CAST(u.meta_value AS INTEGER)"));
    clauses
}

fn alphabetical(settings: &Settings) -> ClauseSet {
    let mut clauses = if settings.sorts_by_profile_field() {
        let mut clauses = ClauseSet::new(SelectClause::new(PROFILE_DATA, "user_id"));
        clauses.push_where(
            Origin::Base,
            Fragment::with_params(
                "u.field_id = ?",
                vec![Value::Integer(settings.fullname_field_id)],
            ),
        );
        clauses.order = OrderBy::Single(OrderTerm::asc("u.value"));
        clauses
    } else {
        let mut clauses = ClauseSet::new(SelectClause::new(USERS, "ID"));
        clauses.order = OrderBy::Single(OrderTerm::asc("u.display_name"));
        clauses
    };
    // Without the activity join nothing else screens out inactive accounts.
    let id = clauses.id();
    clauses.push_where(
        Origin::Status,
        Fragment::new(format!(
            "{id} IN (SELECT ID FROM {USERS} WHERE {})",
            settings.status_sql("")
        )),
    );
    clauses
}

fn explicit_order(include: &[u64]) -> ClauseSet {
    let mut clauses = ClauseSet::new(SelectClause::new(USERS, "ID"));
    if !include.is_empty() {
        // json_each numbers array elements from zero, in list order.
        clauses.order = OrderBy::Single(OrderTerm::bare(Fragment::with_params(
            "(SELECT key FROM json_each(?) WHERE value = u.ID)",
            vec![id_list(include)],
        )));
    }
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: Mode) -> QuerySpec {
        QuerySpec { mode, ..Default::default() }
    }

    #[test]
    fn active_mode_orders_by_activity_then_name() {
        let clauses = assemble(&spec(Mode::ActiveRecently), &Settings::default());
        assert!(clauses.order.is_compound());
        assert_eq!(clauses.activity_column.as_deref(), Some("a.date_recorded"));
    }

    #[test]
    fn alphabetical_switches_to_profile_data_without_sync() {
        let settings = Settings { profile_sync: false, ..Default::default() };
        let clauses = assemble(&spec(Mode::Alphabetical), &settings);
        assert_eq!(clauses.select.table, PROFILE_DATA);
        assert!(clauses.has_where(&Origin::Status));

        let clauses = assemble(&spec(Mode::Alphabetical), &Settings::default());
        assert_eq!(clauses.select.table, USERS);
        assert!(clauses.has_where(&Origin::Status));
    }

    #[test]
    fn custom_modes_assemble_unordered() {
        let clauses = assemble(&spec(Mode::Custom("karma".into())), &Settings::default());
        assert_eq!(clauses.order, OrderBy::None);
        assert!(clauses.wheres.is_empty());
    }

    #[test]
    fn explicit_order_binds_positions() {
        let spec = QuerySpec { mode: Mode::ExplicitOrder, include: vec![7, 3], ..Default::default() };
        match assemble(&spec, &Settings::default()).order {
            OrderBy::Single(term) => {
                assert_eq!(term.expr.sql, "(SELECT key FROM json_each(?) WHERE value = u.ID)");
                assert_eq!(term.expr.params, vec![Value::Text("[7,3]".into())]);
            }
            other => panic!("unexpected order {other:?}"),
        }
    }
}
