//! The declarative description of one member directory request.

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

lazy_static! {
    static ref LIST_SEPARATOR: Regex = Regex::new(r"[,\s]+").unwrap();
}

/// Sort mode. Also decides which table drives the ID search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    #[default]
    Newest,
    ActiveRecently,
    Online,
    Random,
    Popular,
    Alphabetical,
    ExplicitOrder,
    Unordered,
    /// A mode nobody in this crate knows; assembled like `Unordered`.
    Custom(String),
}

impl Mode {
    pub fn name(&self) -> &str {
        match self {
            Mode::Newest => "newest",
            Mode::ActiveRecently => "active",
            Mode::Online => "online",
            Mode::Random => "random",
            Mode::Popular => "popular",
            Mode::Alphabetical => "alphabetical",
            Mode::ExplicitOrder => "in",
            Mode::Unordered => "",
            Mode::Custom(name) => name,
        }
    }
}

impl FromStr for Mode {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "newest" => Mode::Newest,
            "active" => Mode::ActiveRecently,
            "online" => Mode::Online,
            "random" => Mode::Random,
            "popular" => Mode::Popular,
            "alphabetical" => Mode::Alphabetical,
            "in" => Mode::ExplicitOrder,
            "" => Mode::Unordered,
            other => Mode::Custom(other.to_string()),
        })
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(mode) => mode,
            Err(never) => match never {},
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.name().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where the wildcard goes around a search term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wildcard {
    /// The term ends a word.
    Left,
    /// The term starts a word.
    Right,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStrategy {
    None,
    #[default]
    #[serde(alias = "count_query")]
    SeparateCountQuery,
    #[serde(alias = "sql_calc_found_rows")]
    WindowCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFilter {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl MetaFilter {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// Bounds on the last-activity timestamp, both inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityRange {
    pub after: Option<NaiveDateTime>,
    pub before: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    pub mode: Mode,
    pub page: u32,
    /// Zero means no limit.
    pub per_page: u32,
    /// Restricts results to the confirmed connections of this member.
    pub owner: Option<u64>,
    pub search_terms: Option<String>,
    pub search_wildcard: Wildcard,
    pub include: Vec<u64>,
    pub exclude: Vec<u64>,
    /// When present no ID search happens; these members are hydrated in this order.
    pub user_ids: Option<Vec<u64>>,
    pub member_type: Vec<String>,
    pub member_type_in: Vec<String>,
    pub member_type_not_in: Vec<String>,
    pub meta: Option<MetaFilter>,
    pub last_active: Option<ActivityRange>,
    pub populate_extras: bool,
    pub latest_update: bool,
    pub count_total: CountStrategy,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            mode: Mode::Newest,
            page: 1,
            per_page: 0,
            owner: None,
            search_terms: None,
            search_wildcard: Wildcard::Both,
            include: Vec::new(),
            exclude: Vec::new(),
            user_ids: None,
            member_type: Vec::new(),
            member_type_in: Vec::new(),
            member_type_not_in: Vec::new(),
            meta: None,
            last_active: None,
            populate_extras: true,
            latest_update: false,
            count_total: CountStrategy::SeparateCountQuery,
        }
    }
}

impl QuerySpec {
    pub fn explicit(ids: Vec<u64>) -> Self {
        Self {
            user_ids: Some(ids),
            ..Self::default()
        }
    }

    /// Deduplicates the ID lists and drops blank search terms.
    pub fn normalized(&self) -> Self {
        let mut spec = self.clone();
        spec.include = unique(&spec.include);
        spec.exclude = unique(&spec.exclude);
        spec.user_ids = spec.user_ids.as_deref().map(unique);
        spec.search_terms = spec
            .search_terms
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        spec
    }

    /// Rejects requests that cannot be turned into a query at all.
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(meta) = &self.meta {
            if meta.key.trim().is_empty() {
                return Err(QueryError::InvalidSpec("meta filter needs a key".into()));
            }
        }
        if let Some(ActivityRange { after: Some(after), before: Some(before) }) = &self.last_active {
            if after > before {
                return Err(QueryError::InvalidSpec(format!(
                    "last active range starts after it ends ({after} > {before})"
                )));
            }
        }
        Ok(())
    }

    /// `(offset, count)` of the requested page, or `None` when unpaginated.
    pub fn window(&self) -> Option<(u64, u64)> {
        if self.per_page == 0 || self.page == 0 {
            return None;
        }
        let per_page = u64::from(self.per_page);
        Some((u64::from(self.page - 1) * per_page, per_page))
    }

    /// Popular listings always need friend counts.
    pub fn populates_extras(&self) -> bool {
        self.populate_extras || self.mode == Mode::Popular
    }

    /// Stable digest of the whole request.
    pub fn cache_key(&self) -> String {
        let encoded =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        format!("member_query_{}", blake3::hash(&encoded).to_hex())
    }
}

fn unique(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Parses a comma or whitespace separated list of IDs. Signs are dropped, junk is skipped.
pub fn parse_id_list(raw: &str) -> Vec<u64> {
    let ids: Vec<u64> = LIST_SEPARATOR
        .split(raw)
        .filter_map(|token| token.parse::<i64>().ok())
        .map(i64::unsigned_abs)
        .collect();
    unique(&ids)
}

pub fn split_type_names(raw: &str) -> Vec<String> {
    LIST_SEPARATOR
        .split(raw)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
