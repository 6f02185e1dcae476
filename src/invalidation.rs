//! Dependency-aware cache invalidation: rules, pattern matcher, event queue,
//! and batch executor.
//!
//! Default rule seeding is grounded on
//! `original_source/backend/app/cache/invalidation_strategy.py`'s
//! `CacheInvalidationStrategy.__init__`, which seeds four illustrative
//! rules; callers may clear them (supplement, not contradiction, of
//! spec.md's silence on initial rule seeding).

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::cache::CacheCore;
use crate::clock::Clock;
use crate::config::InvalidationConfig;
use crate::dependency_graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Exact,
    Pattern,
    Cascade,
}

#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pub name: String,
    pub pattern: String,
    pub trigger_set: Vec<String>,
    pub scope: InvalidationScope,
    pub priority: u8,
    pub enabled: bool,
    pub trigger_count: u64,
    pub last_triggered: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub id: Uuid,
    pub trigger: String,
    pub affected_keys: Vec<String>,
    pub created_at: f64,
    pub state: EventState,
    pub cascade_depth: usize,
}

/// Glob-with-trailing-`*` matcher, per Open Question #2's resolution:
/// embedded/multiple `*` match literally, no special meaning.
pub fn matches_pattern(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        key.starts_with(prefix)
    } else {
        key == pattern
    }
}

pub struct InvalidationEngine {
    rules: DashMap<String, InvalidationRule>,
    graph: Arc<DependencyGraph>,
    cache: Arc<CacheCore>,
    clock: Arc<dyn Clock>,
    config: InvalidationConfig,
    queue: AsyncMutex<VecDeque<InvalidationEvent>>,
    events: DashMap<Uuid, InvalidationEvent>,
    fatal_errors: AtomicU64,
    key_delete_failures: AtomicU64,
}

impl InvalidationEngine {
    pub fn new(
        graph: Arc<DependencyGraph>,
        cache: Arc<CacheCore>,
        clock: Arc<dyn Clock>,
        config: InvalidationConfig,
    ) -> Self {
        Self {
            rules: DashMap::new(),
            graph,
            cache,
            clock,
            config,
            queue: AsyncMutex::new(VecDeque::new()),
            events: DashMap::new(),
            fatal_errors: AtomicU64::new(0),
            key_delete_failures: AtomicU64::new(0),
        }
    }

    /// Seeds the four illustrative default rules from the original Python
    /// strategy module. Callers may remove or replace them.
    pub fn seed_default_rules(&self) {
        self.register_rule(InvalidationRule {
            name: "user_profile_update".to_string(),
            pattern: "user_profile:*".to_string(),
            trigger_set: vec!["user_updated".to_string()],
            scope: InvalidationScope::Exact,
            priority: 8,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });
        self.register_rule(InvalidationRule {
            name: "keyword_analysis_update".to_string(),
            pattern: "keyword_analysis:*".to_string(),
            trigger_set: vec!["analysis_updated".to_string()],
            scope: InvalidationScope::Pattern,
            priority: 7,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });
        self.register_rule(InvalidationRule {
            name: "dashboard_data_update".to_string(),
            pattern: "dashboard:*".to_string(),
            trigger_set: vec!["dashboard_updated".to_string()],
            scope: InvalidationScope::Cascade,
            priority: 6,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });
        self.register_rule(InvalidationRule {
            name: "global_config_update".to_string(),
            pattern: "config:*".to_string(),
            trigger_set: vec!["config_updated".to_string()],
            scope: InvalidationScope::Cascade,
            priority: 9,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });
    }

    pub fn register_rule(&self, rule: InvalidationRule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn rule(&self, name: &str) -> Option<InvalidationRule> {
        self.rules.get(name).map(|r| r.clone())
    }

    /// Evaluates all enabled rules against `(key, trigger)`, queues an event
    /// per firing rule, and returns the queued events' ids.
    pub async fn fire(&self, key: &str, trigger: &str) -> Vec<Uuid> {
        let now = self.clock.now();
        let mut fired = Vec::new();

        let matching: Vec<String> = self
            .rules
            .iter()
            .filter(|entry| {
                let rule = entry.value();
                rule.enabled
                    && matches_pattern(key, &rule.pattern)
                    && rule.trigger_set.iter().any(|t| t == trigger)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for name in matching {
            let scope = {
                let mut rule = self.rules.get_mut(&name).expect("rule exists");
                rule.trigger_count += 1;
                rule.last_triggered = now;
                rule.scope
            };

            let affected_keys = match scope {
                InvalidationScope::Exact => vec![key.to_string()],
                InvalidationScope::Pattern => {
                    let pattern = self.rules.get(&name).expect("rule exists").pattern.clone();
                    self.graph.keys_matching(|k| matches_pattern(k, &pattern))
                }
                InvalidationScope::Cascade => {
                    let depth = self.config.max_cascade_depth;
                    let mut affected = self.graph.dependents_of(key, depth);
                    affected.insert(0, key.to_string());
                    affected
                }
            };

            let event = InvalidationEvent {
                id: Uuid::new_v4(),
                trigger: trigger.to_string(),
                affected_keys,
                created_at: now,
                state: EventState::Pending,
                cascade_depth: self.config.max_cascade_depth,
            };
            let id = event.id;
            self.events.insert(id, event.clone());
            self.queue.lock().await.push_back(event);
            fired.push(id);
        }

        fired
    }

    /// Pops and processes the next queued event, batching deletes per
    /// `batch_size` with an inter-batch delay. A per-key delete failure is
    /// counted but doesn't abort the batch; a backend-unavailable error
    /// marks the whole event `Failed` per spec §4.4 point 4. Returns `None`
    /// if the queue is empty.
    pub async fn process_next(&self) -> Option<Uuid> {
        let mut event = self.queue.lock().await.pop_front()?;
        event.state = EventState::Running;
        self.events.insert(event.id, event.clone());

        let mut fatal = false;
        for batch in event.affected_keys.chunks(self.config.batch_size.max(1)) {
            for key in batch {
                match self.cache.delete_checked(key, None).await {
                    Ok(_) => {}
                    Err(e) => {
                        self.key_delete_failures.fetch_add(1, Ordering::Relaxed);
                        if matches!(e, crate::error::CachingError::BackendUnavailable { .. }) {
                            fatal = true;
                        }
                        tracing::warn!(error = %e, key, event = %event.id, "invalidation delete failed");
                    }
                }
            }
            if self.config.delay_seconds > 0.0 {
                tokio::time::sleep(std::time::Duration::from_secs_f64(self.config.delay_seconds))
                    .await;
            }
        }

        event.state = if fatal {
            self.fatal_errors.fetch_add(1, Ordering::Relaxed);
            EventState::Failed
        } else {
            EventState::Completed
        };
        let id = event.id;
        self.events.insert(id, event);
        Some(id)
    }

    pub fn key_delete_failure_count(&self) -> u64 {
        self.key_delete_failures.load(Ordering::Relaxed)
    }

    pub fn event(&self, id: &Uuid) -> Option<InvalidationEvent> {
        self.events.get(id).map(|e| e.clone())
    }

    pub fn fatal_error_count(&self) -> u64 {
        self.fatal_errors.load(Ordering::Relaxed)
    }

    /// Sweeps completed/failed events older than `event_retention_seconds`.
    pub fn reap_events(&self) {
        let now = self.clock.now();
        let retention = self.config.event_retention_seconds as f64;
        self.events.retain(|_, event| {
            matches!(event.state, EventState::Pending | EventState::Running)
                || now - event.created_at < retention
        });
    }

    /// Disables stale rules and promotes hot ones. See spec §4.4.
    pub fn optimize_rules(&self) {
        let now = self.clock.now();
        const SEVEN_DAYS: f64 = 7.0 * 86_400.0;
        for mut rule in self.rules.iter_mut() {
            if rule.trigger_count < 5 && now - rule.last_triggered > SEVEN_DAYS {
                rule.enabled = false;
            }
            if rule.trigger_count > 100 {
                rule.priority = rule.priority.saturating_add(1).min(10);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv_backend::{KvBackend, MemoryKvBackend};

    /// A `KvBackend` whose `del` always reports the backend unreachable, for
    /// exercising `process_next`'s fatal-error path.
    #[derive(Default)]
    struct UnavailableKvBackend;

    #[async_trait::async_trait]
    impl KvBackend for UnavailableKvBackend {
        async fn get(&self, _key: &str) -> crate::error::CachingResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn setex(&self, _key: &str, _ttl_seconds: u64, _value: Vec<u8>) -> crate::error::CachingResult<()> {
            Ok(())
        }
        async fn del(&self, _key: &str) -> crate::error::CachingResult<u64> {
            Err(crate::error::CachingError::BackendUnavailable {
                backend: "test".to_string(),
                message: "unreachable".to_string(),
            })
        }
    }

    fn engine(clock: Arc<ManualClock>) -> InvalidationEngine {
        let graph = Arc::new(DependencyGraph::new());
        let cache = Arc::new(CacheCore::new(
            Arc::new(MemoryKvBackend::new()),
            clock.clone(),
            crate::config::CacheConfig::default(),
        ));
        InvalidationEngine::new(graph, cache, clock, InvalidationConfig::default())
    }

    #[test]
    fn pattern_matching_standardizes_on_trailing_glob() {
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("user:1", "user:*"));
        assert!(!matches_pattern("other:1", "user:*"));
        assert!(matches_pattern("exact", "exact"));
    }

    #[tokio::test]
    async fn exact_scope_affects_only_the_key() {
        let clock = Arc::new(ManualClock::new(0.0));
        let engine = engine(clock);
        engine.register_rule(InvalidationRule {
            name: "r".to_string(),
            pattern: "user_profile:*".to_string(),
            trigger_set: vec!["updated".to_string()],
            scope: InvalidationScope::Exact,
            priority: 5,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });
        let fired = engine.fire("user_profile:1", "updated").await;
        assert_eq!(fired.len(), 1);
        let event = engine.event(&fired[0]).unwrap();
        assert_eq!(event.affected_keys, vec!["user_profile:1".to_string()]);
    }

    #[tokio::test]
    async fn disabled_rule_never_fires() {
        let clock = Arc::new(ManualClock::new(0.0));
        let engine = engine(clock);
        engine.register_rule(InvalidationRule {
            name: "r".to_string(),
            pattern: "*".to_string(),
            trigger_set: vec!["t".to_string()],
            scope: InvalidationScope::Exact,
            priority: 5,
            enabled: false,
            trigger_count: 0,
            last_triggered: 0.0,
        });
        assert!(engine.fire("k", "t").await.is_empty());
    }

    #[tokio::test]
    async fn backend_unavailable_marks_event_failed_and_counts_fatal_error() {
        let clock = Arc::new(ManualClock::new(0.0));
        let graph = Arc::new(DependencyGraph::new());
        let cache = Arc::new(CacheCore::new(
            Arc::new(UnavailableKvBackend),
            clock.clone(),
            crate::config::CacheConfig::default(),
        ));
        let engine = InvalidationEngine::new(graph, cache, clock, InvalidationConfig::default());
        engine.register_rule(InvalidationRule {
            name: "r".to_string(),
            pattern: "k:*".to_string(),
            trigger_set: vec!["t".to_string()],
            scope: InvalidationScope::Exact,
            priority: 5,
            enabled: true,
            trigger_count: 0,
            last_triggered: 0.0,
        });

        let fired = engine.fire("k:1", "t").await;
        assert_eq!(fired.len(), 1);
        engine.process_next().await;

        let event = engine.event(&fired[0]).unwrap();
        assert_eq!(event.state, EventState::Failed);
        assert_eq!(engine.fatal_error_count(), 1);
        assert_eq!(engine.key_delete_failure_count(), 1);
    }

    #[test]
    fn optimizer_disables_stale_and_promotes_hot_rules() {
        let clock = Arc::new(ManualClock::new(8.0 * 86_400.0));
        let engine = engine(clock);
        engine.register_rule(InvalidationRule {
            name: "stale".to_string(),
            pattern: "*".to_string(),
            trigger_set: vec![],
            scope: InvalidationScope::Exact,
            priority: 5,
            enabled: true,
            trigger_count: 1,
            last_triggered: 0.0,
        });
        engine.register_rule(InvalidationRule {
            name: "hot".to_string(),
            pattern: "*".to_string(),
            trigger_set: vec![],
            scope: InvalidationScope::Exact,
            priority: 5,
            enabled: true,
            trigger_count: 101,
            last_triggered: 0.0,
        });
        engine.optimize_rules();
        assert!(!engine.rule("stale").unwrap().enabled);
        assert_eq!(engine.rule("hot").unwrap().priority, 6);
    }
}
