//! The public entry point. A `MemberQuery` serves one request: it validates the
//! spec, resolves the ID sequence (or takes the explicit one), and hydrates it.
//!
//! Stages always run in this order:
//!
//! 1. normalize and validate the [`QuerySpec`]
//! 2. assemble the base clauses for the mode
//! 3. apply the built-in predicates
//! 4. run registered clause hooks
//! 5. let a registered order strategy order unordered and custom modes
//! 6. apply the page window, freeze, and execute
//! 7. hydrate
//!
//! Explicit `user_ids` skip stages 2 to 6.

use tracing::{debug, debug_span};

use crate::assembler::assemble;
use crate::clause::{ClauseSet, Limit, OrderBy};
use crate::combinators;
use crate::error::Result;
use crate::executor::Executor;
use crate::extension::Extensions;
use crate::hydrator::{Hydrator, ResultSet};
use crate::query::{Mode, QuerySpec};
use crate::settings::Settings;
use crate::store::{Backend, TenantContext};

pub struct MemberQuery<'a, B: Backend + ?Sized> {
    backend: &'a B,
    settings: &'a Settings,
    tenant: TenantContext,
    extensions: Extensions<'a>,
}

impl<'a, B: Backend + ?Sized> MemberQuery<'a, B> {
    pub fn new(backend: &'a B, settings: &'a Settings) -> Self {
        Self {
            backend,
            settings,
            tenant: TenantContext::new(settings.taxonomy_site_id),
            extensions: Extensions::default(),
        }
    }

    /// Resolves member types against another site's taxonomy.
    pub fn with_tenant(mut self, tenant: TenantContext) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn with_extensions(mut self, extensions: Extensions<'a>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions<'a> {
        &mut self.extensions
    }

    /// The clause set `run` would execute, unfrozen.
    pub fn prepare(&self, spec: &QuerySpec) -> Result<ClauseSet> {
        let spec = spec.normalized();
        spec.validate()?;
        self.build(&spec)
    }

    pub fn run(&self, spec: &QuerySpec) -> Result<ResultSet> {
        let spec = spec.normalized();
        spec.validate()?;
        let span = debug_span!("member_query", cache_key = %spec.cache_key(), mode = %spec.mode);
        let _entered = span.enter();

        let hydrator = Hydrator::new(self.backend, self.settings);
        if let Some(ids) = &spec.user_ids {
            debug!(ids = ids.len(), "explicit ids, no id search");
            return hydrator.hydrate(ids, None, &spec, &self.extensions);
        }

        let clauses = self.build(&spec)?.freeze();
        let execution = Executor::new(self.backend).execute(&clauses, spec.count_total)?;
        hydrator.hydrate(&execution.ids, execution.total, &spec, &self.extensions)
    }

    fn build(&self, spec: &QuerySpec) -> Result<ClauseSet> {
        let mut clauses = assemble(spec, self.settings);

        combinators::include(&mut clauses, &spec.include);
        combinators::exclude(&mut clauses, &spec.exclude);
        combinators::owner_scope(&mut clauses, spec.owner, self.backend, self.settings)?;
        combinators::search(
            &mut clauses,
            spec.search_terms.as_deref(),
            spec.search_wildcard,
            self.backend,
        )?;
        combinators::member_types(&mut clauses, spec, self.backend, self.tenant)?;
        combinators::metadata(&mut clauses, spec.meta.as_ref(), self.backend)?;
        combinators::last_active(&mut clauses, spec.last_active.as_ref());

        for hook in self.extensions.hooks() {
            hook.apply(&mut clauses, spec)?;
        }

        if matches!(spec.mode, Mode::Unordered | Mode::Custom(_)) && clauses.order == OrderBy::None {
            if let Some(strategy) = self.extensions.order_for(spec.mode.name()) {
                if let Some(order) = strategy.order_by(&clauses, spec) {
                    debug!(mode = %spec.mode, "order supplied by extension");
                    clauses.order = order;
                }
            }
        }

        clauses.limit = spec.window().map(|(offset, count)| Limit { offset, count });
        debug!(
            wheres = clauses.wheres.len(),
            limited = clauses.limit.is_some(),
            "clauses prepared"
        );
        Ok(clauses)
    }
}
