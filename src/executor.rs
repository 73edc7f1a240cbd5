use tracing::{debug, trace};

use crate::clause::FrozenClauseSet;
use crate::error::Result;
use crate::query::CountStrategy;
use crate::store::IdQueryRunner;

/// Raw outcome of the ID search, before hydration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Execution {
    pub ids: Vec<u64>,
    /// Unpaginated number of matches; `None` when no count was asked for.
    pub total: Option<u64>,
}

pub struct Executor<'a, R: IdQueryRunner + ?Sized> {
    runner: &'a R,
}

impl<'a, R: IdQueryRunner + ?Sized> Executor<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Window counts are not available for compound orders; those fall back to a
    /// separate count query.
    pub fn strategy_for(clauses: &FrozenClauseSet, requested: CountStrategy) -> CountStrategy {
        match requested {
            CountStrategy::WindowCount if clauses.has_compound_order() => {
                CountStrategy::SeparateCountQuery
            }
            other => other,
        }
    }

    pub fn execute(&self, clauses: &FrozenClauseSet, requested: CountStrategy) -> Result<Execution> {
        if clauses.clauses().is_empty_result() {
            debug!("clause set can match nothing, skipping the id search");
            let total = match requested {
                CountStrategy::None => None,
                _ => Some(0),
            };
            return Ok(Execution { ids: Vec::new(), total });
        }

        let strategy = Self::strategy_for(clauses, requested);
        let execution = match strategy {
            CountStrategy::None => {
                let query = clauses.id_query();
                trace!(sql = %query.sql, "id query");
                Execution {
                    ids: self.runner.select_ids(&query)?,
                    total: None,
                }
            }
            CountStrategy::SeparateCountQuery => {
                let query = clauses.id_query();
                trace!(sql = %query.sql, "id query");
                let ids = self.runner.select_ids(&query)?;
                let total = self.count(clauses)?;
                Execution { ids, total: Some(total) }
            }
            CountStrategy::WindowCount => {
                let query = clauses.windowed_id_query();
                trace!(sql = %query.sql, "windowed id query");
                let (ids, total) = self.runner.select_ids_with_total(&query)?;
                let total = match total {
                    Some(total) => total,
                    // a page past the end carries no rows to read the total from
                    None if Self::is_offset(clauses) => self.count(clauses)?,
                    None => 0,
                };
                Execution { ids, total: Some(total) }
            }
        };
        debug!(
            ?requested,
            ?strategy,
            ids = execution.ids.len(),
            total = ?execution.total,
            "id search executed"
        );
        Ok(execution)
    }

    fn count(&self, clauses: &FrozenClauseSet) -> Result<u64> {
        let query = clauses.count_query();
        trace!(sql = %query.sql, "count query");
        self.runner.select_count(&query)
    }

    fn is_offset(clauses: &FrozenClauseSet) -> bool {
        clauses.clauses().limit.is_some_and(|limit| limit.offset > 0)
    }
}
