// used for the backing user store
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use seahash::SeaHasher;
use tracing::trace;

use crate::clause::{id_list, id_value, placeholders, Fragment, ID_LIST};
use crate::error::{QueryError, Result};
use crate::extension::AttributeFetcher;
use crate::settings::Settings;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type IdMap<V> = HashMap<u64, V, IdHasher>;

pub const USERS: &str = "users";
pub const USERMETA: &str = "usermeta";
pub const ACTIVITY: &str = "activity";
pub const PROFILE_DATA: &str = "xprofile_data";
pub const LAST_ACTIVITY: &str = "last_activity";

/// Timestamps are stored as text in this format so they sort lexically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

// ------------- Records -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRecord {
    pub id: u64,
    pub login: String,
    pub nicename: String,
    pub email: String,
    pub url: String,
    pub registered: String,
    pub status: i64,
    pub display_name: String,
    pub spam: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRow {
    pub user_id: u64,
    pub key: String,
    pub value: String,
}

/// Site whose taxonomy is consulted. Passed explicitly instead of switching sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub site_id: i64,
}

impl TenantContext {
    pub fn new(site_id: i64) -> Self {
        Self { site_id }
    }
}

// ------------- Collaborators -------------
pub trait EntityStore {
    /// Core records for the given IDs, in no particular order. Unknown IDs are skipped.
    fn fetch_members(&self, ids: &[u64]) -> Result<Vec<MemberRecord>>;
    /// IDs whose display name matches any of the LIKE patterns (escaped with `\`).
    fn search_display_names(&self, patterns: &[String]) -> Result<Vec<u64>>;
}

pub trait SocialGraph {
    /// Confirmed connections of the owner, in either direction.
    fn connection_ids(&self, owner: u64) -> Result<Vec<u64>>;
}

pub trait TaxonomyStore {
    fn is_registered_type(&self, tenant: TenantContext, name: &str) -> Result<bool>;
    /// Members holding at least one of the named types.
    fn members_with_types(&self, tenant: TenantContext, names: &[String]) -> Result<Vec<u64>>;
}

pub trait MetaStore {
    fn ids_with_meta(&self, key: &str, value: Option<&str>) -> Result<Vec<u64>>;
    fn meta_for(&self, ids: &[u64], keys: &[&str]) -> Result<Vec<MetaRow>>;
}

pub trait ActivityStore {
    /// Last-activity timestamp per member that has one.
    fn last_activity(&self, ids: &[u64]) -> Result<IdMap<String>>;
}

/// Runs rendered ID and count queries.
pub trait IdQueryRunner {
    fn select_ids(&self, query: &Fragment) -> Result<Vec<u64>>;
    /// Rows of `(id, total)`; the total is read from the first row.
    fn select_ids_with_total(&self, query: &Fragment) -> Result<(Vec<u64>, Option<u64>)>;
    fn select_count(&self, query: &Fragment) -> Result<u64>;
}

/// Everything the member query needs from its backing store.
pub trait Backend:
    EntityStore + SocialGraph + TaxonomyStore + MetaStore + ActivityStore + IdQueryRunner
{
}

impl<T> Backend for T where
    T: EntityStore + SocialGraph + TaxonomyStore + MetaStore + ActivityStore + IdQueryRunner
{
}

fn to_id(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| QueryError::Invariant(format!("negative member id {raw}")))
}

fn to_ids(raw: Vec<i64>) -> Result<Vec<u64>> {
    raw.into_iter().map(to_id).collect()
}

// ------------- Seeding -------------
#[derive(Debug, Clone, Default)]
pub struct NewMember {
    pub login: String,
    pub display_name: String,
    pub email: String,
    pub registered: Option<NaiveDateTime>,
    pub status: i64,
    pub spam: bool,
    pub deleted: bool,
}

impl NewMember {
    pub fn named(login: impl Into<String>, display_name: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            email: format!("{login}@example.org"),
            login,
            display_name: display_name.into(),
            ..Default::default()
        }
    }
}

// ------------- SQLite -------------
pub struct SqliteStore<'db> {
    pub db: &'db Connection,
    settings: Settings,
}

impl<'db> SqliteStore<'db> {
    pub fn new(connection: &'db Connection, settings: &Settings) -> Result<SqliteStore<'db>> {
        connection.execute_batch(
            "
            create table if not exists users (
                ID integer primary key,
                user_login text not null unique,
                user_nicename text not null default '',
                user_email text not null default '',
                user_url text not null default '',
                user_registered text not null,
                user_status integer not null default 0,
                display_name text not null default '',
                spam integer not null default 0,
                deleted integer not null default 0
            );
            create table if not exists usermeta (
                umeta_id integer primary key,
                user_id integer not null,
                meta_key text not null,
                meta_value text null
            );
            create index if not exists usermeta_key on usermeta (meta_key, user_id);
            create table if not exists activity (
                id integer primary key,
                user_id integer not null,
                component text not null,
                type text not null,
                date_recorded text not null
            );
            create index if not exists activity_user on activity (user_id, component, type);
            create table if not exists friends (
                id integer primary key,
                initiator_user_id integer not null,
                friend_user_id integer not null,
                is_confirmed integer not null default 0
            );
            create table if not exists member_types (
                term_id integer primary key,
                site_id integer not null,
                name text not null,
                constraint unique_member_type unique (site_id, name)
            );
            create table if not exists term_relationships (
                object_id integer not null,
                term_id integer not null references member_types(term_id),
                constraint unique_relationship primary key (object_id, term_id)
            );
            create table if not exists xprofile_data (
                id integer primary key,
                field_id integer not null,
                user_id integer not null,
                value text not null,
                constraint unique_field_value unique (field_id, user_id)
            );
            ",
        )?;
        Ok(SqliteStore {
            db: connection,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn add_member(&self, member: &NewMember) -> Result<u64> {
        let registered = member
            .registered
            .unwrap_or_else(|| Utc::now().naive_utc());
        let nicename = member.login.to_lowercase();
        self.db.execute(
            "
            insert into users (
                user_login,
                user_nicename,
                user_email,
                user_registered,
                user_status,
                display_name,
                spam,
                deleted
            ) values (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                &member.login,
                &nicename,
                &member.email,
                format_timestamp(&registered),
                member.status,
                &member.display_name,
                member.spam,
                member.deleted
            ],
        )?;
        to_id(self.db.last_insert_rowid())
    }

    /// Keeps one last-activity row per member.
    pub fn record_activity(&self, user_id: u64, at: &NaiveDateTime) -> Result<()> {
        let recorded = format_timestamp(at);
        let updated = self.db.execute(
            "
            update activity
                set date_recorded = ?
                where user_id = ? and component = ? and type = ?
            ",
            params![&recorded, id_value(user_id), &self.settings.members_component, LAST_ACTIVITY],
        )?;
        if updated == 0 {
            self.db.execute(
                "
                insert into activity (
                    user_id,
                    component,
                    type,
                    date_recorded
                ) values (?, ?, ?, ?)
                ",
                params![id_value(user_id), &self.settings.members_component, LAST_ACTIVITY, &recorded],
            )?;
        }
        Ok(())
    }

    pub fn set_meta(&self, user_id: u64, key: &str, value: &str) -> Result<()> {
        let updated = self.db.execute(
            "update usermeta set meta_value = ? where user_id = ? and meta_key = ?",
            params![value, id_value(user_id), key],
        )?;
        if updated == 0 {
            self.db.execute(
                "insert into usermeta (user_id, meta_key, meta_value) values (?, ?, ?)",
                params![id_value(user_id), key, value],
            )?;
        }
        Ok(())
    }

    pub fn add_friendship(&self, initiator: u64, friend: u64, confirmed: bool) -> Result<()> {
        self.db.execute(
            "
            insert into friends (
                initiator_user_id,
                friend_user_id,
                is_confirmed
            ) values (?, ?, ?)
            ",
            params![id_value(initiator), id_value(friend), confirmed],
        )?;
        Ok(())
    }

    pub fn register_member_type(&self, tenant: TenantContext, name: &str) -> Result<i64> {
        self.db.execute(
            "insert or ignore into member_types (site_id, name) values (?, ?)",
            params![tenant.site_id, name],
        )?;
        let term_id = self.db.query_row(
            "select term_id from member_types where site_id = ? and name = ?",
            params![tenant.site_id, name],
            |r| r.get(0),
        )?;
        Ok(term_id)
    }

    pub fn assign_member_type(&self, user_id: u64, tenant: TenantContext, name: &str) -> Result<()> {
        let term_id = self.register_member_type(tenant, name)?;
        self.db.execute(
            "insert or ignore into term_relationships (object_id, term_id) values (?, ?)",
            params![id_value(user_id), term_id],
        )?;
        Ok(())
    }

    pub fn set_profile_field(&self, field_id: i64, user_id: u64, value: &str) -> Result<()> {
        self.db.execute(
            "insert or replace into xprofile_data (field_id, user_id, value) values (?, ?, ?)",
            params![field_id, id_value(user_id), value],
        )?;
        Ok(())
    }

    fn column_i64s(&self, sql: &str, params: &[rusqlite::types::Value]) -> Result<Vec<i64>> {
        trace!(sql, params = params.len(), "lookup");
        let mut statement = self.db.prepare(sql)?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |r| r.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
    }
}

impl EntityStore for SqliteStore<'_> {
    fn fetch_members(&self, ids: &[u64]) -> Result<Vec<MemberRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "
            select ID, user_login, user_nicename, user_email, user_url,
                    user_registered, user_status, display_name, spam, deleted
                from {USERS}
                where ID in {ID_LIST}
            "
        );
        let mut statement = self.db.prepare(&sql)?;
        let rows = statement
            .query_map([id_list(ids)], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    MemberRecord {
                        id: 0,
                        login: r.get(1)?,
                        nicename: r.get(2)?,
                        email: r.get(3)?,
                        url: r.get(4)?,
                        registered: r.get(5)?,
                        status: r.get(6)?,
                        display_name: r.get(7)?,
                        spam: r.get::<_, i64>(8)? != 0,
                        deleted: r.get::<_, i64>(9)? != 0,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(raw, record)| -> Result<MemberRecord> {
                Ok(MemberRecord { id: to_id(raw)?, ..record })
            })
            .collect()
    }

    fn search_display_names(&self, patterns: &[String]) -> Result<Vec<u64>> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let matches = vec!["display_name like ? escape '\\'"; patterns.len()].join(" or ");
        let sql = format!("select ID from {USERS} where ({matches}) order by ID");
        let params: Vec<_> = patterns
            .iter()
            .map(|p| rusqlite::types::Value::Text(p.clone()))
            .collect();
        to_ids(self.column_i64s(&sql, &params)?)
    }
}

impl SocialGraph for SqliteStore<'_> {
    fn connection_ids(&self, owner: u64) -> Result<Vec<u64>> {
        let owner = id_value(owner);
        let raw = self.column_i64s(
            "
            select friend_user_id from friends
                where initiator_user_id = ? and is_confirmed = 1
            union
            select initiator_user_id from friends
                where friend_user_id = ? and is_confirmed = 1
            ",
            &[owner.clone(), owner],
        )?;
        to_ids(raw)
    }
}

impl TaxonomyStore for SqliteStore<'_> {
    fn is_registered_type(&self, tenant: TenantContext, name: &str) -> Result<bool> {
        let found = self
            .db
            .query_row(
                "select term_id from member_types where site_id = ? and name = ?",
                params![tenant.site_id, name],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn members_with_types(&self, tenant: TenantContext, names: &[String]) -> Result<Vec<u64>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "
            select distinct r.object_id
                from term_relationships r
                join member_types t
                on t.term_id = r.term_id
                where t.site_id = ? and t.name in ({})
                order by r.object_id
            ",
            placeholders(names.len())
        );
        let mut params = vec![rusqlite::types::Value::Integer(tenant.site_id)];
        params.extend(names.iter().map(|n| rusqlite::types::Value::Text(n.clone())));
        to_ids(self.column_i64s(&sql, &params)?)
    }
}

impl MetaStore for SqliteStore<'_> {
    fn ids_with_meta(&self, key: &str, value: Option<&str>) -> Result<Vec<u64>> {
        let mut sql = format!("select distinct user_id from {USERMETA} where meta_key = ?");
        let mut params = vec![rusqlite::types::Value::Text(key.to_string())];
        if let Some(value) = value {
            sql.push_str(" and meta_value = ?");
            params.push(rusqlite::types::Value::Text(value.to_string()));
        }
        to_ids(self.column_i64s(&sql, &params)?)
    }

    fn meta_for(&self, ids: &[u64], keys: &[&str]) -> Result<Vec<MetaRow>> {
        if ids.is_empty() || keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "
            select user_id, meta_key, meta_value
                from {USERMETA}
                where meta_key in ({}) and user_id in {ID_LIST}
                order by umeta_id
            ",
            placeholders(keys.len())
        );
        let mut params: Vec<_> = keys
            .iter()
            .map(|k| rusqlite::types::Value::Text(k.to_string()))
            .collect();
        params.push(id_list(ids));
        let mut statement = self.db.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(user_id, key, value)| -> Result<MetaRow> {
                Ok(MetaRow {
                    user_id: to_id(user_id)?,
                    key,
                    value: value.unwrap_or_default(),
                })
            })
            .collect()
    }
}

impl ActivityStore for SqliteStore<'_> {
    fn last_activity(&self, ids: &[u64]) -> Result<IdMap<String>> {
        let mut found = IdMap::default();
        if ids.is_empty() {
            return Ok(found);
        }
        let sql = format!(
            "
            select user_id, date_recorded
                from {ACTIVITY}
                where component = ? and type = ? and user_id in {ID_LIST}
            "
        );
        let params = [
            rusqlite::types::Value::Text(self.settings.members_component.clone()),
            rusqlite::types::Value::Text(LAST_ACTIVITY.to_string()),
            id_list(ids),
        ];
        let mut statement = self.db.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (user_id, recorded) in rows {
            found.insert(to_id(user_id)?, recorded);
        }
        Ok(found)
    }
}

impl IdQueryRunner for SqliteStore<'_> {
    fn select_ids(&self, query: &Fragment) -> Result<Vec<u64>> {
        to_ids(self.column_i64s(&query.sql, &query.params)?)
    }

    fn select_ids_with_total(&self, query: &Fragment) -> Result<(Vec<u64>, Option<u64>)> {
        trace!(sql = %query.sql, params = query.params.len(), "windowed id query");
        let mut statement = self.db.prepare(&query.sql)?;
        let rows = statement
            .query_map(params_from_iter(query.params.iter()), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let total = match rows.first() {
            Some((_, total)) => Some(to_id(*total)?),
            None => None,
        };
        let ids = to_ids(rows.into_iter().map(|(id, _)| id).collect())?;
        Ok((ids, total))
    }

    fn select_count(&self, query: &Fragment) -> Result<u64> {
        trace!(sql = %query.sql, params = query.params.len(), "count query");
        let count = self.db.query_row(
            &query.sql,
            params_from_iter(query.params.iter()),
            |r| r.get::<_, i64>(0),
        )?;
        to_id(count)
    }
}

// ------------- Friendship status -------------
/// Attaches how each listed member relates to a viewer: `is_friend`, `pending`
/// (the viewer asked), `awaiting_response` (the member asked) or `not_friends`.
pub struct FriendshipStatus<'s, 'db> {
    store: &'s SqliteStore<'db>,
    viewer: u64,
}

impl<'s, 'db> FriendshipStatus<'s, 'db> {
    pub const ATTRIBUTE: &'static str = "friendship_status";

    pub fn new(store: &'s SqliteStore<'db>, viewer: u64) -> Self {
        Self { store, viewer }
    }
}

impl AttributeFetcher for FriendshipStatus<'_, '_> {
    fn name(&self) -> &str {
        Self::ATTRIBUTE
    }

    fn fetch(&self, ids: &[u64]) -> Result<IdMap<String>> {
        let others: Vec<u64> = ids.iter().copied().filter(|id| *id != self.viewer).collect();
        let mut statuses: IdMap<String> = others
            .iter()
            .map(|id| (*id, "not_friends".to_string()))
            .collect();
        if others.is_empty() {
            return Ok(statuses);
        }
        let sql = "
            select initiator_user_id, friend_user_id, is_confirmed
                from friends
                where (initiator_user_id = ?1 and friend_user_id in (select value from json_each(?2)))
                or (friend_user_id = ?1 and initiator_user_id in (select value from json_each(?2)))
            ";
        let params = [id_value(self.viewer), id_list(&others)];
        let mut statement = self.store.db.prepare(sql)?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, bool>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (initiator, friend, confirmed) in rows {
            let (initiator, friend) = (to_id(initiator)?, to_id(friend)?);
            let (other, status) = match (confirmed, initiator == self.viewer) {
                (true, true) => (friend, "is_friend"),
                (true, false) => (initiator, "is_friend"),
                (false, true) => (friend, "pending"),
                (false, false) => (initiator, "awaiting_response"),
            };
            // a confirmed row outranks a stale pending one
            let current = statuses.entry(other).or_default();
            if current.as_str() != "is_friend" {
                *current = status.to_string();
            }
        }
        Ok(statuses)
    }
}
