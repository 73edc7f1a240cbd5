//! Predicates layered onto the base clause set.
//!
//! Search, member-type and metadata filters resolve to ID lists through their own
//! lookups and fold back in as `IN` lists, so the main query never joins against
//! those tables and its row shape stays stable for paging and counting.

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::Value;
use tracing::debug;

use crate::clause::{ClauseSet, Fragment, Origin};
use crate::error::Result;
use crate::query::{ActivityRange, MetaFilter, QuerySpec, Wildcard};
use crate::settings::Settings;
use crate::store::{format_timestamp, EntityStore, MetaStore, SocialGraph, TaxonomyStore, TenantContext};

lazy_static! {
    static ref MARKUP: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref ENTITY: Regex = Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap();
}

/// `[0]` alone means "deliberately nobody".
pub fn include(clauses: &mut ClauseSet, ids: &[u64]) {
    if ids == [0] {
        clauses.push_where(Origin::Include, Fragment::always_false());
    } else if !ids.is_empty() {
        let id = clauses.id();
        clauses.push_where(Origin::Include, Fragment::id_in(&id, ids, false));
    }
}

pub fn exclude(clauses: &mut ClauseSet, ids: &[u64]) {
    if !ids.is_empty() {
        let id = clauses.id();
        clauses.push_where(Origin::Exclude, Fragment::id_in(&id, ids, true));
    }
}

pub fn owner_scope(
    clauses: &mut ClauseSet,
    owner: Option<u64>,
    graph: &(impl SocialGraph + ?Sized),
    settings: &Settings,
) -> Result<()> {
    let Some(owner) = owner.filter(|owner| *owner != 0 && settings.friends_active) else {
        return Ok(());
    };
    let connections = graph.connection_ids(owner)?;
    debug!(owner, connections = connections.len(), "owner scope resolved");
    if connections.is_empty() {
        clauses.push_where(Origin::Owner, Fragment::always_false());
    } else {
        let id = clauses.id();
        clauses.push_where(Origin::Owner, Fragment::id_in(&id, &connections, false));
    }
    Ok(())
}

/// Strips tags and decodes the handful of entities that show up in names.
pub fn normalize_search_terms(raw: &str) -> String {
    let stripped = MARKUP.replace_all(raw, "");
    let decoded = ENTITY.replace_all(&stripped, |caps: &regex::Captures| {
        let entity = &caps[1];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    });
    decoded.trim().to_string()
}

/// Escapes the LIKE metacharacters with `\`.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// The pair of LIKE patterns for one term. `Left` finds the term at the end of a
/// word and `Right` at the start of one.
pub fn search_patterns(term: &str, wildcard: Wildcard) -> Vec<String> {
    let term = escape_like(term);
    match wildcard {
        Wildcard::Left => vec![format!("%{term}"), format!("%{term} %")],
        Wildcard::Right => vec![format!("{term}%"), format!("% {term}%")],
        Wildcard::Both => vec![format!("%{term}%")],
    }
}

pub fn search(
    clauses: &mut ClauseSet,
    terms: Option<&str>,
    wildcard: Wildcard,
    entities: &(impl EntityStore + ?Sized),
) -> Result<()> {
    let Some(terms) = terms else {
        return Ok(());
    };
    let term = normalize_search_terms(terms);
    if term.is_empty() {
        return Ok(());
    }
    let matched = entities.search_display_names(&search_patterns(&term, wildcard))?;
    debug!(term = %term, ?wildcard, matched = matched.len(), "search resolved");
    let id = clauses.id();
    // an empty match renders IN (NULL)
    clauses.push_where(Origin::Search, Fragment::id_in(&id, &matched, false));
    Ok(())
}

/// Exclusions win over inclusions; `member_type_in` only counts when
/// `member_type` is empty. Unknown type names are dropped.
pub fn member_types(
    clauses: &mut ClauseSet,
    spec: &QuerySpec,
    taxonomy: &(impl TaxonomyStore + ?Sized),
    tenant: TenantContext,
) -> Result<()> {
    let included = if spec.member_type.is_empty() {
        &spec.member_type_in
    } else {
        &spec.member_type
    };
    let (names, negate) = if !spec.member_type_not_in.is_empty() {
        (&spec.member_type_not_in, true)
    } else if !included.is_empty() {
        (included, false)
    } else {
        return Ok(());
    };

    let mut valid = Vec::with_capacity(names.len());
    for name in names {
        if taxonomy.is_registered_type(tenant, name)? {
            valid.push(name.clone());
        }
    }
    debug!(requested = names.len(), valid = valid.len(), negate, site = tenant.site_id, "member types resolved");

    if valid.is_empty() {
        if !negate {
            clauses.push_where(Origin::MemberType, Fragment::always_false());
        }
        return Ok(());
    }
    let members = taxonomy.members_with_types(tenant, &valid)?;
    let id = clauses.id();
    match (members.is_empty(), negate) {
        (true, false) => clauses.push_where(Origin::MemberType, Fragment::always_false()),
        (true, true) => (),
        (false, _) => clauses.push_where(Origin::MemberType, Fragment::id_in(&id, &members, negate)),
    }
    Ok(())
}

pub fn metadata(
    clauses: &mut ClauseSet,
    filter: Option<&MetaFilter>,
    meta: &(impl MetaStore + ?Sized),
) -> Result<()> {
    let Some(filter) = filter else {
        return Ok(());
    };
    let found = meta.ids_with_meta(&filter.key, filter.value.as_deref())?;
    debug!(key = %filter.key, found = found.len(), "metadata filter resolved");
    if found.is_empty() {
        clauses.push_where(Origin::Meta, Fragment::always_false());
    } else {
        let id = clauses.id();
        clauses.push_where(Origin::Meta, Fragment::id_in(&id, &found, false));
    }
    Ok(())
}

/// Only sources with an activity column take a date range; others ignore it.
pub fn last_active(clauses: &mut ClauseSet, range: Option<&ActivityRange>) {
    let (Some(range), Some(column)) = (range, clauses.activity_column.clone()) else {
        return;
    };
    if let Some(after) = &range.after {
        clauses.push_where(
            Origin::LastActive,
            Fragment::with_params(format!("{column} >= ?"), vec![Value::Text(format_timestamp(after))]),
        );
    }
    if let Some(before) = &range.before {
        clauses.push_where(
            Origin::LastActive,
            Fragment::with_params(format!("{column} <= ?"), vec![Value::Text(format_timestamp(before))]),
        );
    }
}
