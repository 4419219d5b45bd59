//! Per-session spend ceilings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use velox_core::metadata::keys;
use velox_core::{BoxFuture, Error, Layer, Next, RequestContext, Result};

/// Accumulated spend per session, in USD.
///
/// Charges are applied under a lock, so concurrent requests on the same
/// session never lose an update.
#[derive(Debug, Default)]
pub struct SpendLedger {
    sessions: Mutex<HashMap<String, f64>>,
}

impl SpendLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions_guard(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spend recorded for `session_id` (zero when unknown).
    #[must_use]
    pub fn spent(&self, session_id: &str) -> f64 {
        self.sessions_guard()
            .get(session_id)
            .copied()
            .unwrap_or_default()
    }

    /// Adds `amount` to the session, returning the new total.
    pub fn charge(&self, session_id: &str, amount: f64) -> f64 {
        let mut sessions = self.sessions_guard();
        let total = sessions.entry(session_id.to_string()).or_default();
        *total += amount;
        *total
    }

    /// Forgets the spend of `session_id`.
    pub fn reset(&self, session_id: &str) {
        self.sessions_guard().remove(session_id);
    }

    /// Number of sessions with recorded spend.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.sessions_guard().len()
    }
}

/// How the ceiling is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BudgetMode {
    /// Refuse requests once the session's accumulated spend reaches the ceiling.
    #[default]
    PreCharge,
    /// Flag individual requests whose own cost reaches the ceiling.
    PerRequest,
}

/// Layer enforcing a spend ceiling.
///
/// In [`BudgetMode::PreCharge`] the check happens before the backend runs and
/// the charge after it succeeds: concurrent requests of one session may all
/// pass the check and overshoot the ceiling by at most their own cost.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::CostLimiterLayer;
///
/// let layer = CostLimiterLayer::new(0.50);
/// ```
#[derive(Debug, Clone)]
pub struct CostLimiterLayer {
    ledger: Arc<SpendLedger>,
    max_cost_usd: f64,
    mode: BudgetMode,
}

impl CostLimiterLayer {
    /// Session ceiling of `max_cost_usd`, enforced before each request.
    #[must_use]
    pub fn new(max_cost_usd: f64) -> Self {
        Self {
            ledger: Arc::default(),
            max_cost_usd,
            mode: BudgetMode::PreCharge,
        }
    }

    /// Per-request ceiling of `max_cost_usd`, only flagged after the fact.
    #[must_use]
    pub fn per_request(max_cost_usd: f64) -> Self {
        Self {
            mode: BudgetMode::PerRequest,
            ..Self::new(max_cost_usd)
        }
    }

    /// Share `ledger` with other layers or the caller.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<SpendLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// The spend ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<SpendLedger> {
        &self.ledger
    }

    /// The configured ceiling, in USD.
    #[must_use]
    pub const fn max_cost_usd(&self) -> f64 {
        self.max_cost_usd
    }

    /// The enforcement mode.
    #[must_use]
    pub const fn mode(&self) -> BudgetMode {
        self.mode
    }

    async fn pre_charge(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        let spent = self.ledger.spent(ctx.session_id());
        if spent >= self.max_cost_usd {
            warn!(
                session_id = %ctx.session_id(),
                spent,
                limit = self.max_cost_usd,
                "session budget exhausted"
            );
            return Err(Error::budget_exceeded(
                ctx.session_id(),
                spent,
                self.max_cost_usd,
            ));
        }

        let cost_before = ctx.metrics().cost_usd;
        next.run(ctx).await?;

        let cost = (ctx.metrics().cost_usd - cost_before).max(0.0);
        let total = self.ledger.charge(ctx.session_id(), cost);
        debug!(session_id = %ctx.session_id(), cost, total, "charged session");
        Ok(())
    }

    async fn per_request_check(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        next.run(ctx).await?;

        let cost = ctx.metrics().cost_usd;
        if cost >= self.max_cost_usd {
            warn!(
                session_id = %ctx.session_id(),
                cost,
                limit = self.max_cost_usd,
                "request exceeded cost limit"
            );
            ctx.metadata_mut().insert(keys::OVER_BUDGET, true);
        }
        Ok(())
    }
}

impl Layer for CostLimiterLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        match self.mode {
            BudgetMode::PreCharge => Box::pin(self.pre_charge(ctx, next)),
            BudgetMode::PerRequest => Box::pin(self.per_request_check(ctx, next)),
        }
    }

    fn name(&self) -> &str {
        "cost_limiter"
    }
}
