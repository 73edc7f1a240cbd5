//! member-query – dynamic member directory queries over a SQLite user store.
//!
//! A directory listing is described declaratively by a [`query::QuerySpec`]: a
//! sort mode, paging, and any number of filters. Running it happens in fixed
//! stages:
//! * The [`assembler`] picks the driving table and natural ordering for the mode.
//! * The [`combinators`] layer predicates on top (include / exclude lists, the
//!   owner's connections, display-name search, member types, metadata, and a
//!   last-activity range). Filters that need another table resolve to ID lists
//!   first, so the main query never multiplies rows.
//! * The [`executor`] renders the frozen [`clause::ClauseSet`] into parameterized
//!   SQL and fetches one page of IDs plus, depending on the
//!   [`query::CountStrategy`], the unpaginated total.
//! * The [`hydrator`] loads member records and secondary attributes (last
//!   activity, friend count, latest update, the matched metadata value) in batched
//!   lookups and returns a [`hydrator::ResultSet`].
//!
//! [`member_query::MemberQuery`] coordinates the stages. Explicit ID lists skip
//! straight to hydration and keep their order.
//!
//! ## Modules
//! * [`query`] – The request description, sort modes and input sanitizers.
//! * [`clause`] – Parameterized SQL fragments and the working clause set.
//! * [`assembler`] – Base clauses per sort mode.
//! * [`combinators`] – Predicate builders.
//! * [`executor`] – ID and count queries.
//! * [`hydrator`] – Records and secondary attributes.
//! * [`member_query`] – The facade.
//! * [`extension`] – Clause hooks, order strategies for custom modes, attribute fetchers.
//! * [`store`] – Collaborator traits and the SQLite implementation.
//! * [`settings`] – Site settings read through `config`.
//! * [`error`] – The crate error type.
//! * [`logging`] – Optional console subscriber.
//!
//! ## Extending
//! Collaborators register extensions in an [`extension::Extensions`] and hand it to
//! the facade. Hooks run by ascending priority after the built-in predicates and
//! may add or remove WHERE fragments by their [`clause::Origin`]. A mode name the
//! crate does not know parses to [`query::Mode::Custom`] and is listed unordered
//! unless an order strategy is registered under that name.
//!
//! ## Quick Start
//! ```
//! use rusqlite::Connection;
//! use member_query::{
//!     member_query::MemberQuery,
//!     query::{Mode, QuerySpec},
//!     settings::Settings,
//!     store::{NewMember, SqliteStore},
//! };
//! let conn = Connection::open_in_memory().unwrap();
//! let settings = Settings::default();
//! let store = SqliteStore::new(&conn, &settings).unwrap();
//! store.add_member(&NewMember::named("bo", "Bo")).unwrap();
//! store.add_member(&NewMember::named("al", "Al")).unwrap();
//! let spec = QuerySpec { mode: Mode::Alphabetical, ..Default::default() };
//! let result = MemberQuery::new(&store, &settings).run(&spec).unwrap();
//! assert_eq!(result.display_names(), vec!["Al", "Bo"]);
//! assert_eq!(result.total, 2);
//! ```
//!
//! ## Safety of SQL
//! Every value that reaches a query travels as a bound parameter. Only table and
//! column names chosen by this crate are formatted into SQL text.

pub mod assembler;
pub mod clause;
pub mod combinators;
pub mod error;
pub mod executor;
pub mod extension;
pub mod hydrator;
pub mod logging;
pub mod member_query;
pub mod query;
pub mod settings;
pub mod store;

pub use error::{QueryError, Result};
pub use hydrator::ResultSet;
pub use member_query::MemberQuery;
pub use query::QuerySpec;
