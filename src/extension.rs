//! Registered extension points, run at fixed stages of every query.
//!
//! * [`ClauseHook`]s run after the built-in predicates, before the clause set is
//!   frozen. They may push or remove WHERE fragments.
//! * [`OrderStrategy`]s supply ordering for modes this crate leaves unordered.
//! * [`AttributeFetcher`]s attach extra per-member values during hydration, one
//!   batched call per query.
//!
//! Hooks and fetchers run by ascending priority; equal priorities keep
//! registration order.

use crate::clause::{ClauseSet, OrderBy};
use crate::error::Result;
use crate::query::QuerySpec;
use crate::store::IdMap;

pub const DEFAULT_PRIORITY: i32 = 10;

pub trait ClauseHook {
    fn apply(&self, clauses: &mut ClauseSet, spec: &QuerySpec) -> Result<()>;
}

impl<F> ClauseHook for F
where
    F: Fn(&mut ClauseSet, &QuerySpec) -> Result<()>,
{
    fn apply(&self, clauses: &mut ClauseSet, spec: &QuerySpec) -> Result<()> {
        self(clauses, spec)
    }
}

pub trait OrderStrategy {
    fn order_by(&self, clauses: &ClauseSet, spec: &QuerySpec) -> Option<OrderBy>;
}

impl<F> OrderStrategy for F
where
    F: Fn(&ClauseSet, &QuerySpec) -> Option<OrderBy>,
{
    fn order_by(&self, clauses: &ClauseSet, spec: &QuerySpec) -> Option<OrderBy> {
        self(clauses, spec)
    }
}

/// Extra per-member values attached after the built-in extras. Runs once per
/// query with the whole hydrated batch, and only when extras are populated.
pub trait AttributeFetcher {
    /// Key under which values land in the member's extra attributes.
    fn name(&self) -> &str;
    fn fetch(&self, ids: &[u64]) -> Result<IdMap<String>>;
}

impl<T: AttributeFetcher + ?Sized> AttributeFetcher for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, ids: &[u64]) -> Result<IdMap<String>> {
        (**self).fetch(ids)
    }
}

struct Prioritized<T> {
    priority: i32,
    item: T,
}

fn insert_by_priority<T>(list: &mut Vec<Prioritized<T>>, priority: i32, item: T) {
    let at = list.partition_point(|entry| entry.priority <= priority);
    list.insert(at, Prioritized { priority, item });
}

#[derive(Default)]
pub struct Extensions<'a> {
    hooks: Vec<Prioritized<Box<dyn ClauseHook + 'a>>>,
    orders: Vec<(String, Box<dyn OrderStrategy + 'a>)>,
    fetchers: Vec<Prioritized<Box<dyn AttributeFetcher + 'a>>>,
}

impl<'a> Extensions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&mut self, priority: i32, hook: impl ClauseHook + 'a) -> &mut Self {
        insert_by_priority(&mut self.hooks, priority, Box::new(hook));
        self
    }

    /// Registers ordering for a mode name; a later registration for the same name wins.
    pub fn add_order(&mut self, mode: impl Into<String>, strategy: impl OrderStrategy + 'a) -> &mut Self {
        let mode = mode.into();
        self.orders.retain(|(name, _)| *name != mode);
        self.orders.push((mode, Box::new(strategy)));
        self
    }

    pub fn add_fetcher(&mut self, priority: i32, fetcher: impl AttributeFetcher + 'a) -> &mut Self {
        insert_by_priority(&mut self.fetchers, priority, Box::new(fetcher));
        self
    }

    pub fn hooks(&self) -> impl Iterator<Item = &dyn ClauseHook> {
        self.hooks.iter().map(|entry| entry.item.as_ref() as &dyn ClauseHook)
    }

    pub fn order_for(&self, mode: &str) -> Option<&dyn OrderStrategy> {
        self.orders
            .iter()
            .find(|(name, _)| name == mode)
            .map(|(_, strategy)| strategy.as_ref() as &dyn OrderStrategy)
    }

    pub fn fetchers(&self) -> impl Iterator<Item = &dyn AttributeFetcher> {
        self.fetchers.iter().map(|entry| entry.item.as_ref() as &dyn AttributeFetcher)
    }
}
