//! Threshold evaluation, cooldown and asynchronous dispatch

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use super::notifier::Notifier;
use super::payload::{AlarmPayload, AlarmSample};
use super::retry::RetryPolicy;
use super::state::{AlarmState, Claim};
use crate::aware::HookDispatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::{NotifyRule, NotifyRuleKind};

/// What one call to [`AlarmEngine::evaluate`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No enabled rule of this kind for the pool
    NoRule,
    /// Counted or sampled value below the rule threshold
    BelowThreshold,
    /// Threshold reached inside the cooldown window
    Suppressed,
    /// Another caller opened the window first
    LostRace,
    /// A dispatch was scheduled
    Dispatched,
}

struct RuleSlot {
    rule: NotifyRule,
    state: AlarmState,
}

/// Rules of one pool; replaced as a whole, never edited
type PoolRules = HashMap<NotifyRuleKind, Arc<RuleSlot>>;

/// Evaluates alarm rules and dispatches notifications
///
/// `evaluate` is called on submitter, worker and timer threads. It only
/// touches atomics and map lookups, and hands dispatch to the runtime
/// captured at construction.
pub struct AlarmEngine {
    rules: DashMap<String, Arc<PoolRules>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    hooks: HookDispatcher,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    runtime: Handle,
}

impl AlarmEngine {
    pub fn new(runtime: Handle, hooks: HookDispatcher, retry: RetryPolicy) -> Self {
        Self {
            rules: DashMap::new(),
            notifiers: RwLock::new(Vec::new()),
            hooks,
            clock: Arc::new(SystemClock::new()),
            retry,
            runtime,
        }
    }

    /// Replace the clock used for cooldown windows
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().push(notifier);
    }

    /// Replace every rule of a pool; counters and cooldowns start over
    pub fn set_rules(&self, pool: &str, rules: Vec<NotifyRule>) {
        let table: PoolRules = rules
            .into_iter()
            .map(|rule| {
                let slot = RuleSlot {
                    rule: rule.clone(),
                    state: AlarmState::new(),
                };
                (rule.kind, Arc::new(slot))
            })
            .collect();
        debug!(pool, rules = table.len(), "notify rules replaced");
        self.rules.insert(pool.to_string(), Arc::new(table));
    }

    /// Forget a pool's rules and state
    pub fn remove_pool(&self, pool: &str) {
        self.rules.remove(pool);
    }

    /// Current rules of a pool
    pub fn rules(&self, pool: &str) -> Vec<NotifyRule> {
        let mut rules: Vec<NotifyRule> = self
            .rules
            .get(pool)
            .map(|table| table.values().map(|slot| slot.rule.clone()).collect())
            .unwrap_or_default();
        rules.sort_by_key(|rule| NotifyRuleKind::ALL.iter().position(|k| *k == rule.kind));
        rules
    }

    /// Events counted towards the next dispatch of a rule
    pub fn pending_count(&self, pool: &str, kind: NotifyRuleKind) -> u64 {
        self.slot(pool, kind).map(|s| s.state.count()).unwrap_or(0)
    }

    /// Dispatches scheduled for a rule since its rules were last replaced
    pub fn dispatch_count(&self, pool: &str, kind: NotifyRuleKind) -> u64 {
        self.slot(pool, kind)
            .map(|s| s.state.dispatched())
            .unwrap_or(0)
    }

    fn slot(&self, pool: &str, kind: NotifyRuleKind) -> Option<Arc<RuleSlot>> {
        self.rules.get(pool)?.get(&kind).cloned()
    }

    /// Run one event or sample through the pool's rule of this kind
    pub fn evaluate(&self, pool: &str, kind: NotifyRuleKind, sample: AlarmSample) -> Evaluation {
        let slot = match self.slot(pool, kind) {
            Some(slot) if slot.rule.enabled => slot,
            _ => return Evaluation::NoRule,
        };

        let value = if kind.is_counted() {
            slot.state.record()
        } else {
            sample.percent_for(kind)
        };
        if value < slot.rule.threshold {
            return Evaluation::BelowThreshold;
        }

        match slot.state.try_claim(self.clock.now_millis(), slot.rule.cooldown) {
            Claim::CoolingDown => {
                debug!(pool, rule = %kind, value, "alarm suppressed by cooldown");
                Evaluation::Suppressed
            }
            Claim::Lost => Evaluation::LostRace,
            Claim::Won => {
                let payload = AlarmPayload::from_sample(pool, kind, sample);
                self.dispatch(payload, slot.rule.recipients.clone());
                Evaluation::Dispatched
            }
        }
    }

    fn dispatch(&self, payload: AlarmPayload, recipients: Vec<String>) {
        let notifiers = self.notifiers.read().clone();
        let hooks = self.hooks.clone();
        let retry = self.retry.clone();

        self.runtime.spawn(async move {
            hooks.before_alarm(&payload);
            for notifier in notifiers {
                deliver(notifier.as_ref(), &recipients, &payload, &retry).await;
            }
        });
    }
}

#[instrument(skip_all, fields(notifier = notifier.name(), pool = %payload.pool_name, rule = %payload.rule_kind))]
async fn deliver(
    notifier: &dyn Notifier,
    recipients: &[String],
    payload: &AlarmPayload,
    retry: &RetryPolicy,
) {
    let mut attempt = 1;
    loop {
        match notifier.notify(recipients, payload).await {
            Ok(()) => {
                info!(attempt, "alarm delivered");
                return;
            }
            Err(e) if e.is_retryable() && retry.allows_retry(attempt) => {
                let delay = retry.backoff(attempt);
                warn!(error = %e, attempt, ?delay, "alarm delivery failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(error = %e, attempt, "alarm delivery failed, giving up");
                return;
            }
        }
    }
}
