//! Working clause state for the ID search.
//!
//! Every fragment carries SQL text with `?` placeholders together with the values
//! bound to them, in order. Values supplied by callers only ever travel as bound
//! parameters.

use std::fmt;

use rusqlite::types::Value;

/// SQL text plus the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// The predicate used whenever a filter resolves to nothing.
    pub fn always_false() -> Self {
        Self::new("0 = 1")
    }

    /// Used when a filter narrows nothing.
    pub fn always_true() -> Self {
        Self::new("1 = 1")
    }

    /// `column IN (..)` or `column NOT IN (..)` over the whole list, bound as one
    /// value. An empty inclusion renders `IN (NULL)` and matches no rows. An empty
    /// exclusion excludes nobody.
    pub fn id_in(column: &str, ids: &[u64], negate: bool) -> Self {
        match (ids.is_empty(), negate) {
            (true, false) => Self::new(format!("{column} IN (NULL)")),
            (true, true) => Self::always_true(),
            (false, false) => Self::with_params(format!("{column} IN {ID_LIST}"), vec![id_list(ids)]),
            (false, true) => {
                Self::with_params(format!("{column} NOT IN {ID_LIST}"), vec![id_list(ids)])
            }
        }
    }

    pub fn is_always_false(&self) -> bool {
        self.sql == "0 = 1"
    }
}

/// Subquery over the IDs of one bound [`id_list`] value.
pub const ID_LIST: &str = "(SELECT value FROM json_each(?))";

/// A whole ID list as a single JSON array, read back with `json_each`. SQLite
/// caps the number of bound variables per statement; a list of any length
/// spends one.
pub fn id_list(ids: &[u64]) -> Value {
    let items = ids
        .iter()
        .map(|id| i64::try_from(*id).unwrap_or(-1).to_string())
        .collect::<Vec<_>>()
        .join(",");
    Value::Text(format!("[{items}]"))
}

pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn id_value(id: u64) -> Value {
    // SQLite rowids are signed; anything past i64::MAX can never match.
    Value::Integer(i64::try_from(id).unwrap_or(-1))
}

/// Where a WHERE fragment came from, so later stages can find or drop it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Base,
    Status,
    Include,
    Exclude,
    Owner,
    Search,
    MemberType,
    Meta,
    LastActive,
    Extension(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub origin: Origin,
    pub fragment: Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: Fragment,
    pub direction: Option<Direction>,
}

impl OrderTerm {
    pub fn asc(expr: impl Into<String>) -> Self {
        Self {
            expr: Fragment::new(expr),
            direction: Some(Direction::Asc),
        }
    }
    pub fn desc(expr: impl Into<String>) -> Self {
        Self {
            expr: Fragment::new(expr),
            direction: Some(Direction::Desc),
        }
    }
    pub fn bare(expr: Fragment) -> Self {
        Self {
            expr,
            direction: None,
        }
    }
    fn render(&self) -> String {
        match self.direction {
            Some(direction) => format!("{} {direction}", self.expr.sql),
            None => self.expr.sql.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum OrderBy {
    #[default]
    None,
    Single(OrderTerm),
    /// Tie-broken ordering, flattened to one comma-joined clause.
    Compound(Vec<OrderTerm>),
}

impl OrderBy {
    pub fn is_compound(&self) -> bool {
        matches!(self, OrderBy::Compound(terms) if terms.len() > 1)
    }

    fn terms(&self) -> &[OrderTerm] {
        match self {
            OrderBy::None => &[],
            OrderBy::Single(term) => std::slice::from_ref(term),
            OrderBy::Compound(terms) => terms,
        }
    }

    fn render(&self) -> Option<Fragment> {
        let terms = self.terms();
        if terms.is_empty() {
            return None;
        }
        let sql = terms
            .iter()
            .map(OrderTerm::render)
            .collect::<Vec<_>>()
            .join(", ");
        let params = terms
            .iter()
            .flat_map(|term| term.expr.params.iter().cloned())
            .collect();
        Some(Fragment::with_params(format!("ORDER BY {sql}"), params))
    }
}

/// The driving table, aliased `u`, and the column holding the member ID.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub table: String,
    pub id_column: String,
    pub join: Option<Fragment>,
}

impl SelectClause {
    pub fn new(table: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            join: None,
        }
    }

    /// The qualified ID column, e.g. `u.ID`.
    pub fn id(&self) -> String {
        format!("u.{}", self.id_column)
    }

    fn render(&self, projection: &str) -> Fragment {
        let mut sql = format!("SELECT {projection} FROM {} u", self.table);
        let mut params = Vec::new();
        if let Some(join) = &self.join {
            sql.push(' ');
            sql.push_str(&join.sql);
            params.extend(join.params.iter().cloned());
        }
        Fragment::with_params(sql, params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSet {
    pub select: SelectClause,
    pub wheres: Vec<WhereClause>,
    pub order: OrderBy,
    pub limit: Option<Limit>,
    /// Column holding the last-activity timestamp, when the driving source has one.
    pub activity_column: Option<String>,
}

impl ClauseSet {
    pub fn new(select: SelectClause) -> Self {
        Self {
            select,
            wheres: Vec::new(),
            order: OrderBy::None,
            limit: None,
            activity_column: None,
        }
    }

    pub fn id(&self) -> String {
        self.select.id()
    }

    pub fn push_where(&mut self, origin: Origin, fragment: Fragment) {
        self.wheres.push(WhereClause { origin, fragment });
    }

    /// Drops every fragment with this origin, returning how many went.
    pub fn remove_where(&mut self, origin: &Origin) -> usize {
        let before = self.wheres.len();
        self.wheres.retain(|clause| &clause.origin != origin);
        before - self.wheres.len()
    }

    pub fn has_where(&self, origin: &Origin) -> bool {
        self.wheres.iter().any(|clause| &clause.origin == origin)
    }

    pub fn wheres_from<'s>(&'s self, origin: &Origin) -> impl Iterator<Item = &'s Fragment> + use<'s> {
        let origin = origin.clone();
        self.wheres
            .iter()
            .filter(move |clause| clause.origin == origin)
            .map(|clause| &clause.fragment)
    }

    /// Whether some fragment guarantees an empty result.
    pub fn is_empty_result(&self) -> bool {
        self.wheres.iter().any(|clause| clause.fragment.is_always_false())
    }

    pub fn freeze(self) -> FrozenClauseSet {
        FrozenClauseSet(self)
    }
}

/// A clause set that no stage may touch any more.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenClauseSet(ClauseSet);

impl FrozenClauseSet {
    pub fn clauses(&self) -> &ClauseSet {
        &self.0
    }

    pub fn has_compound_order(&self) -> bool {
        self.0.order.is_compound()
    }

    fn render_where(&self) -> Option<Fragment> {
        if self.0.wheres.is_empty() {
            return None;
        }
        let sql = self
            .0
            .wheres
            .iter()
            .map(|clause| clause.fragment.sql.as_str())
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = self
            .0
            .wheres
            .iter()
            .flat_map(|clause| clause.fragment.params.iter().cloned())
            .collect();
        Some(Fragment::with_params(format!("WHERE {sql}"), params))
    }

    fn assemble(&self, projection: &str, ordered: bool) -> Fragment {
        let mut query = self.0.select.render(projection);
        let mut tail = vec![self.render_where()];
        if ordered {
            tail.push(self.0.order.render());
            tail.push(self.0.limit.map(|limit| {
                Fragment::with_params(
                    "LIMIT ? OFFSET ?",
                    vec![
                        Value::Integer(i64::try_from(limit.count).unwrap_or(i64::MAX)),
                        Value::Integer(i64::try_from(limit.offset).unwrap_or(i64::MAX)),
                    ],
                )
            }));
        }
        for part in tail.into_iter().flatten() {
            query.sql.push(' ');
            query.sql.push_str(&part.sql);
            query.params.extend(part.params);
        }
        query
    }

    /// The paginated ID query.
    pub fn id_query(&self) -> Fragment {
        self.assemble(&format!("{} AS id", self.0.id()), true)
    }

    /// The paginated ID query with the unpaginated total riding along on every row.
    pub fn windowed_id_query(&self) -> Fragment {
        self.assemble(
            &format!("{} AS id, COUNT(*) OVER () AS total", self.0.id()),
            true,
        )
    }

    /// Same FROM, JOIN and WHERE as the ID query, counting instead of listing.
    pub fn count_query(&self) -> Fragment {
        self.assemble(&format!("COUNT({})", self.0.id()), false)
    }
}
