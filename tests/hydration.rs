mod common;

use member_query::error::Result;
use member_query::extension::{AttributeFetcher, Extensions, DEFAULT_PRIORITY};
use member_query::hydrator::MetaMatch;
use member_query::query::{MetaFilter, Mode, QuerySpec};
use member_query::settings::Settings;
use member_query::store::{FriendshipStatus, IdMap, SqliteStore};
use member_query::MemberQuery;

use common::{at, member, open, store};

#[test]
fn explicit_ids_keep_their_order_and_drop_missing_members() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let a = member(&store, "A");
    let b = member(&store, "B");
    let c = member(&store, "C");

    let result = MemberQuery::new(&store, &settings)
        .run(&QuerySpec::explicit(vec![c, 999, a, b]))
        .unwrap();
    assert_eq!(result.ids, vec![c, a, b]);
    assert_eq!(result.display_names(), vec!["C", "A", "B"]);
    assert_eq!(result.total, 3);
}

#[test]
fn explicit_ids_bypass_every_predicate() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let a = member(&store, "A");
    let b = member(&store, "B");

    let spec = QuerySpec {
        include: vec![0],
        exclude: vec![a],
        search_terms: Some("nobody".into()),
        per_page: 1,
        ..QuerySpec::explicit(vec![b, a])
    };
    let result = MemberQuery::new(&store, &settings).run(&spec).unwrap();
    assert_eq!(result.ids, vec![b, a]);
}

#[test]
fn rehydrating_a_result_reproduces_it() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    for (n, name) in ["Dee", "Ann", "Cal", "Bo"].iter().enumerate() {
        let id = member(&store, name);
        if n % 2 == 0 {
            store.record_activity(id, &at(3, n as u32)).unwrap();
        }
    }
    let query = MemberQuery::new(&store, &settings);

    let first = query
        .run(&QuerySpec { mode: Mode::ActiveRecently, ..Default::default() })
        .unwrap();
    let again = query.run(&QuerySpec::explicit(first.ids.clone())).unwrap();
    assert_eq!(again.ids, first.ids);
    assert_eq!(again.members, first.members);
    assert_eq!(again.attributes, first.attributes);
}

#[test]
fn missing_secondary_attributes_read_as_defaults() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let quiet = member(&store, "Quiet");
    let garbled = member(&store, "Garbled");
    store.set_meta(garbled, "total_friend_count", "lots").unwrap();

    let result = MemberQuery::new(&store, &settings)
        .run(&QuerySpec::explicit(vec![quiet, garbled]))
        .unwrap();
    for id in [quiet, garbled] {
        let attributes = result.attributes_of(id).unwrap();
        assert_eq!(attributes.last_activity, "");
        assert_eq!(attributes.total_friend_count, 0);
        assert_eq!(attributes.latest_update, None, "not requested");
        assert_eq!(attributes.meta, None);
    }
}

#[test]
fn latest_update_is_loaded_on_request() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let chatty = member(&store, "Chatty");
    let silent = member(&store, "Silent");
    store.set_meta(chatty, "bp_latest_update", "Back from holiday").unwrap();
    store.set_meta(chatty, "total_friend_count", "12").unwrap();

    let spec = QuerySpec { latest_update: true, ..QuerySpec::explicit(vec![chatty, silent]) };
    let result = MemberQuery::new(&store, &settings).run(&spec).unwrap();
    let chatty = result.attributes_of(chatty).unwrap();
    assert_eq!(chatty.latest_update.as_deref(), Some("Back from holiday"));
    assert_eq!(chatty.total_friend_count, 12);
    assert_eq!(result.attributes_of(silent).unwrap().latest_update.as_deref(), Some(""));
}

#[test]
fn extras_can_be_skipped_except_for_popular() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let a = member(&store, "A");
    store.set_meta(a, "total_friend_count", "3").unwrap();
    let query = MemberQuery::new(&store, &settings);

    let bare = QuerySpec { populate_extras: false, ..Default::default() };
    let result = query.run(&bare).unwrap();
    assert_eq!(result.ids, vec![a]);
    assert!(result.attributes.is_empty());

    let popular = QuerySpec { mode: Mode::Popular, ..bare };
    let result = query.run(&popular).unwrap();
    assert_eq!(result.attributes_of(a).unwrap().total_friend_count, 3);
}

#[test]
fn matched_metadata_is_reattached() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let olga = member(&store, "Olga");
    member(&store, "Bjorn");
    store.set_meta(olga, "city", "Oslo").unwrap();

    let spec = QuerySpec {
        mode: Mode::Alphabetical,
        meta: Some(MetaFilter::key_value("city", "Oslo")),
        ..Default::default()
    };
    let result = MemberQuery::new(&store, &settings).run(&spec).unwrap();
    assert_eq!(result.ids, vec![olga]);
    assert_eq!(
        result.attributes_of(olga).unwrap().meta,
        Some(MetaMatch { key: "city".into(), value: Some("Oslo".into()) })
    );
}

#[test]
fn friendship_status_is_fetched_for_the_viewer() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let viewer = member(&store, "Viewer");
    let friend = member(&store, "Friend");
    let asked = member(&store, "Asked");
    let asking = member(&store, "Asking");
    let stranger = member(&store, "Stranger");
    store.add_friendship(viewer, friend, true).unwrap();
    store.add_friendship(viewer, asked, false).unwrap();
    store.add_friendship(asking, viewer, false).unwrap();

    let mut extensions = Extensions::new();
    extensions.add_fetcher(DEFAULT_PRIORITY, FriendshipStatus::new(&store, viewer));
    let result = MemberQuery::new(&store, &settings)
        .with_extensions(extensions)
        .run(&QuerySpec::explicit(vec![viewer, friend, asked, asking, stranger]))
        .unwrap();

    let status = |id: u64| {
        result
            .attributes_of(id)
            .and_then(|attributes| attributes.extra.get(FriendshipStatus::ATTRIBUTE))
            .map(String::as_str)
    };
    assert_eq!(status(friend), Some("is_friend"));
    assert_eq!(status(asked), Some("pending"));
    assert_eq!(status(asking), Some("awaiting_response"));
    assert_eq!(status(stranger), Some("not_friends"));
    assert_eq!(status(viewer), None, "no status towards oneself");
}

/// Looks up a profile field for every listed member in one query.
struct ProfileField<'s, 'db> {
    store: &'s SqliteStore<'db>,
    field_id: i64,
    calls: std::cell::Cell<usize>,
}

impl AttributeFetcher for ProfileField<'_, '_> {
    fn name(&self) -> &str {
        "location"
    }

    fn fetch(&self, ids: &[u64]) -> Result<IdMap<String>> {
        self.calls.set(self.calls.get() + 1);
        let mut statement = self
            .store
            .db
            .prepare("select user_id, value from xprofile_data where field_id = ?")?;
        let rows = statement
            .query_map([self.field_id], |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter(|(id, _)| ids.contains(id)).collect())
    }
}

#[test]
fn registered_fetchers_run_once_per_query() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let a = member(&store, "A");
    let b = member(&store, "B");
    let c = member(&store, "C");
    store.set_profile_field(4, a, "Lund").unwrap();
    store.set_profile_field(4, c, "Malmo").unwrap();

    let fetcher = ProfileField { store: &store, field_id: 4, calls: Default::default() };
    let mut extensions = Extensions::new();
    extensions.add_fetcher(DEFAULT_PRIORITY, &fetcher);
    let result = MemberQuery::new(&store, &settings)
        .with_extensions(extensions)
        .run(&QuerySpec { mode: Mode::Alphabetical, ..Default::default() })
        .unwrap();

    assert_eq!(fetcher.calls.get(), 1);
    let location = |id: u64| result.attributes_of(id).unwrap().extra.get("location").cloned();
    assert_eq!(location(a).as_deref(), Some("Lund"));
    assert_eq!(location(b), None);
    assert_eq!(location(c).as_deref(), Some("Malmo"));
}

#[test]
fn fetchers_wait_for_populated_extras() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let a = member(&store, "A");
    store.set_profile_field(4, a, "Lund").unwrap();

    let fetcher = ProfileField { store: &store, field_id: 4, calls: Default::default() };
    let mut extensions = Extensions::new();
    extensions.add_fetcher(DEFAULT_PRIORITY, &fetcher);
    let query = MemberQuery::new(&store, &settings).with_extensions(extensions);

    let bare = QuerySpec { populate_extras: false, ..Default::default() };
    let result = query.run(&bare).unwrap();
    assert_eq!(result.ids, vec![a]);
    assert_eq!(fetcher.calls.get(), 0, "no extras, no fetchers");
    assert!(result.attributes_of(a).is_none());

    let result = query.run(&QuerySpec { mode: Mode::Popular, ..bare }).unwrap();
    assert_eq!(fetcher.calls.get(), 1, "popular always populates");
    assert_eq!(
        result.attributes_of(a).and_then(|attributes| attributes.extra.get("location")).map(String::as_str),
        Some("Lund")
    );
}

#[test]
fn results_serialize_with_stable_attribute_order() {
    let conn = open();
    let settings = Settings::default();
    let store = store(&conn, &settings);
    let ids: Vec<u64> = ["A", "B", "C"].iter().map(|name| member(&store, name)).collect();
    let query = MemberQuery::new(&store, &settings);

    let first = serde_json::to_string(&query.run(&QuerySpec::explicit(ids.clone())).unwrap()).unwrap();
    let second = serde_json::to_string(&query.run(&QuerySpec::explicit(ids)).unwrap()).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("\"display_name\":\"A\""));
}
