use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, Criterion};
use rusqlite::Connection;

use member_query::query::{CountStrategy, Mode, QuerySpec, Wildcard};
use member_query::settings::Settings;
use member_query::store::{NewMember, SqliteStore, TenantContext};
use member_query::MemberQuery;

const MEMBERS: u32 = 5_000;

fn seed(store: &SqliteStore) {
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)).unwrap();
    let site = TenantContext::new(1);
    store.db.execute_batch("begin").unwrap();
    for n in 0..MEMBERS {
        let id = store
            .add_member(&NewMember::named(format!("member{n}"), format!("Member {n:05}")))
            .unwrap();
        if n % 3 != 0 {
            let seen = day + chrono::TimeDelta::minutes(i64::from(n * 7 % 10_000));
            store.record_activity(id, &seen).unwrap();
        }
        store.set_meta(id, "total_friend_count", &(n % 97).to_string()).unwrap();
        if n % 5 == 0 {
            store.assign_member_type(id, site, "student").unwrap();
        }
    }
    store.db.execute_batch("commit").unwrap();
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let conn = Connection::open_in_memory().unwrap();
    let settings = Settings::default();
    let store = SqliteStore::new(&conn, &settings).unwrap();
    seed(&store);
    let query = MemberQuery::new(&store, &settings);

    let page = |mode: Mode, count_total: CountStrategy| QuerySpec {
        mode,
        page: 3,
        per_page: 20,
        count_total,
        ..Default::default()
    };

    c.bench_function("active page, separate count", |b| {
        b.iter(|| query.run(black_box(&page(Mode::ActiveRecently, CountStrategy::SeparateCountQuery))))
    });
    c.bench_function("newest page, window count", |b| {
        b.iter(|| query.run(black_box(&page(Mode::Newest, CountStrategy::WindowCount))))
    });
    c.bench_function("popular page", |b| {
        b.iter(|| query.run(black_box(&page(Mode::Popular, CountStrategy::SeparateCountQuery))))
    });
    let search = QuerySpec {
        search_terms: Some("00".into()),
        search_wildcard: Wildcard::Both,
        member_type: vec!["student".into()],
        ..page(Mode::Alphabetical, CountStrategy::SeparateCountQuery)
    };
    c.bench_function("search with member type", |b| b.iter(|| query.run(black_box(&search))));
    let explicit = QuerySpec::explicit((1..=200).collect());
    c.bench_function("hydrate 200 explicit ids", |b| b.iter(|| query.run(black_box(&explicit))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
