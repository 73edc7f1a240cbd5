#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};
use member_query::settings::Settings;
use member_query::store::{NewMember, SqliteStore};
use rusqlite::Connection;

pub fn open() -> Connection {
    member_query::logging::init_tracing();
    Connection::open_in_memory().expect("in-memory database")
}

pub fn store<'db>(conn: &'db Connection, settings: &Settings) -> SqliteStore<'db> {
    SqliteStore::new(conn, settings).expect("schema created")
}

/// Adds a member whose login is derived from the display name.
pub fn member(store: &SqliteStore, display_name: &str) -> u64 {
    let login = display_name.to_lowercase().replace(' ', "_");
    store
        .add_member(&NewMember::named(login, display_name))
        .expect("member added")
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid timestamp")
}

pub fn minutes_ago(minutes: i64) -> NaiveDateTime {
    (Utc::now() - TimeDelta::minutes(minutes)).naive_utc()
}
