//! Cooldown-gated automation: watches a value cache and a
//! periodically refreshed stats cache, and writes to an actuator
//! sensor whenever a rule's condition evaluates true and its cooldown
//! has elapsed.
//!
//! Evaluation goes through the same sandboxed formula engine used for
//! per-reading data formulas, in multi-variable mode, rather than a
//! narrower condition-only evaluator: a rule's condition or target
//! formula can use the full safe function set (`sqrt`, `sin`, ...),
//! not just comparison and `abs`/`max`/`min`/`round`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::event::ValueEvent;
use domain::{formula, AutomationRule, SensorId, TimeSeriesSink};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{EventBus, ValueSubscriber};
use crate::orchestrator::DriverRegistry;

use super::stats::extract_stat_refs;

pub struct AutomationEngine {
    rules: AsyncMutex<HashMap<i64, AutomationRule>>,
    value_cache: AsyncMutex<HashMap<String, f64>>,
    stats_cache: AsyncMutex<HashMap<String, f64>>,
    sensor_ids_by_name: AsyncMutex<HashMap<String, SensorId>>,
    sink: Arc<dyn TimeSeriesSink>,
    registry: Arc<DriverRegistry>,
}

impl AutomationEngine {
    pub fn new(sink: Arc<dyn TimeSeriesSink>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            rules: AsyncMutex::new(HashMap::new()),
            value_cache: AsyncMutex::new(HashMap::new()),
            stats_cache: AsyncMutex::new(HashMap::new()),
            sensor_ids_by_name: AsyncMutex::new(HashMap::new()),
            sink,
            registry,
        }
    }

    pub async fn register_sensor_id(&self, sensor_name: impl Into<String>, sensor_id: SensorId) {
        self.sensor_ids_by_name
            .lock()
            .await
            .insert(sensor_name.into(), sensor_id);
    }

    pub async fn upsert_rule(&self, rule: AutomationRule) {
        self.rules.lock().await.insert(rule.rule_id, rule);
    }

    pub async fn remove_rule(&self, rule_id: i64) {
        self.rules.lock().await.remove(&rule_id);
    }

    /// Background task refreshing the stats cache every `interval` by
    /// regex-scanning all active rule conditions and target formulas
    /// for `stat_<sensor>_<fn>_<window>` identifiers and querying the
    /// sink once per distinct (sensor, function, window) triple.
    pub async fn run_stats_refresh(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.refresh_stats_once().await,
            }
        }
    }

    async fn refresh_stats_once(&self) {
        let mut refs = Vec::new();
        for rule in self.rules.lock().await.values() {
            refs.extend(extract_stat_refs(&rule.condition));
            if let Some(formula) = &rule.target_formula {
                refs.extend(extract_stat_refs(formula));
            }
        }
        refs.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        refs.dedup_by(|a, b| a.identifier == b.identifier);

        let mut cache = self.stats_cache.lock().await;
        for stat_ref in refs {
            match self
                .sink
                .query_statistics(&stat_ref.sensor_name, &stat_ref.function, stat_ref.window)
                .await
            {
                Ok(Some(value)) => {
                    cache.insert(stat_ref.identifier, value);
                }
                Ok(None) => {
                    cache.remove(&stat_ref.identifier);
                }
                Err(err) => {
                    warn!(stat = %stat_ref.identifier, error = %err, "failed to refresh stat");
                }
            }
        }
    }

    async fn evaluate_rules(&self, sensor_name: &str) {
        let env = {
            let values = self.value_cache.lock().await;
            let stats = self.stats_cache.lock().await;
            let mut env = values.clone();
            env.extend(stats.iter().map(|(k, v)| (k.clone(), *v)));
            env
        };

        let now = Utc::now();
        let due_rules: Vec<AutomationRule> = {
            let rules = self.rules.lock().await;
            rules
                .values()
                .filter(|r| r.is_active && r.condition.contains(sensor_name))
                .filter(|r| r.cooldown_elapsed(now))
                .cloned()
                .collect()
        };

        for rule in due_rules {
            self.try_fire(rule, &env, now).await;
        }
    }

    async fn try_fire(&self, rule: AutomationRule, env: &HashMap<String, f64>, now: chrono::DateTime<Utc>) {
        let condition_true = match formula::evaluate_with_env(&rule.condition, env) {
            Ok(result) => result != 0.0,
            Err(err) => {
                warn!(rule = %rule.name, error = %err, "condition evaluation failed");
                return;
            }
        };
        if !condition_true {
            return;
        }

        let target = if let Some(formula_src) = &rule.target_formula {
            match formula::evaluate_with_env(formula_src, env) {
                Ok(value) => value,
                Err(err) => {
                    warn!(rule = %rule.name, error = %err, "target formula evaluation failed, skipping action");
                    return;
                }
            }
        } else {
            match rule.target_value {
                Some(value) => value,
                None => {
                    warn!(rule = %rule.name, "rule has neither target_value nor target_formula");
                    return;
                }
            }
        };

        match self.registry.write(rule.target_sensor_id, target).await {
            Ok(()) => {
                info!(rule = %rule.name, target_sensor_id = %rule.target_sensor_id, value = target, "automation rule fired");
                let mut rules = self.rules.lock().await;
                if let Some(stored) = rules.get_mut(&rule.rule_id) {
                    stored.last_triggered_ts = Some(now);
                }
            }
            Err(err) => {
                warn!(rule = %rule.name, error = %err, "failed to write actuator target");
            }
        }
    }
}

#[async_trait]
impl ValueSubscriber for AutomationEngine {
    async fn on_value(&self, event: &ValueEvent) {
        self.value_cache
            .lock()
            .await
            .insert(event.sensor_name.clone(), event.value);
        self.evaluate_rules(&event.sensor_name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::orchestrator::{DriverFactory, DriverRegistry};
    use domain::driver::Driver;
    use domain::ports::MockTimeSeriesSink;
    use domain::sensor::{Protocol, SensorDefinition, SensorId};
    use domain::DriverError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingDriver {
        writes: Arc<AsyncMutex<Vec<f64>>>,
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        async fn connect(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn read(&mut self) -> Result<f64, DriverError> {
            Err(DriverError::UnsupportedWrite)
        }
        async fn write(&mut self, value: f64) -> Result<(), DriverError> {
            self.writes.lock().await.push(value);
            Ok(())
        }
    }

    fn actuator_definition(sensor_id: SensorId) -> SensorDefinition {
        SensorDefinition {
            sensor_id,
            sensor_name: "relay1".into(),
            protocol: Protocol::VirtualOutput,
            connection_params: serde_json::json!({}),
            data_formula: "val".into(),
            poll_interval_ms: 1_000,
            timeout_ms: 2_000,
            retry_count: 3,
            is_active: true,
        }
    }

    async fn registry_with_recording_actuator(
        sensor_id: SensorId,
    ) -> (Arc<DriverRegistry>, Arc<AsyncMutex<Vec<f64>>>) {
        let writes = Arc::new(AsyncMutex::new(Vec::new()));
        let writes_for_factory = writes.clone();
        let factory: DriverFactory = Arc::new(move |_def| {
            Ok(Box::new(RecordingDriver {
                writes: writes_for_factory.clone(),
            }) as Box<dyn Driver>)
        });
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(DriverRegistry::new(bus, factory));
        registry
            .add(actuator_definition(sensor_id))
            .await
            .unwrap();
        (registry, writes)
    }

    fn rule(condition: &str, target_sensor_id: SensorId, target_value: f64, cooldown_s: u64) -> AutomationRule {
        AutomationRule {
            rule_id: 1,
            name: "overheat-shutoff".into(),
            condition: condition.into(),
            target_sensor_id,
            target_value: Some(target_value),
            target_formula: None,
            cooldown_s,
            is_active: true,
            last_triggered_ts: None,
        }
    }

    #[tokio::test]
    async fn condition_true_writes_actuator_once_per_cooldown() {
        let sensor_id = SensorId::new(7);
        let (registry, writes) = registry_with_recording_actuator(sensor_id).await;
        let sink = Arc::new(MockTimeSeriesSink::new());
        let engine = AutomationEngine::new(sink, registry);
        engine.upsert_rule(rule("temp1 > 50", sensor_id, 1.0, 10)).await;

        engine
            .on_value(&ValueEvent::new(SensorId::new(1), "temp1", 60.0, 60.0))
            .await;
        engine
            .on_value(&ValueEvent::new(SensorId::new(1), "temp1", 61.0, 61.0))
            .await;

        assert_eq!(writes.lock().await.as_slice(), &[1.0]);
    }

    #[tokio::test]
    async fn condition_false_never_fires() {
        let sensor_id = SensorId::new(7);
        let (registry, writes) = registry_with_recording_actuator(sensor_id).await;
        let sink = Arc::new(MockTimeSeriesSink::new());
        let engine = AutomationEngine::new(sink, registry);
        engine.upsert_rule(rule("temp1 > 50", sensor_id, 1.0, 10)).await;

        engine
            .on_value(&ValueEvent::new(SensorId::new(1), "temp1", 20.0, 20.0))
            .await;

        assert!(writes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn target_formula_overrides_target_value_when_present() {
        let sensor_id = SensorId::new(7);
        let (registry, writes) = registry_with_recording_actuator(sensor_id).await;
        let sink = Arc::new(MockTimeSeriesSink::new());
        let engine = AutomationEngine::new(sink, registry);
        let mut r = rule("temp1 > 50", sensor_id, 1.0, 10);
        r.target_formula = Some("temp1 / 10".into());
        engine.upsert_rule(r).await;

        engine
            .on_value(&ValueEvent::new(SensorId::new(1), "temp1", 90.0, 90.0))
            .await;

        assert_eq!(writes.lock().await.as_slice(), &[9.0]);
    }

    #[tokio::test]
    async fn remove_rule_stops_future_firings() {
        let sensor_id = SensorId::new(7);
        let (registry, writes) = registry_with_recording_actuator(sensor_id).await;
        let sink = Arc::new(MockTimeSeriesSink::new());
        let engine = AutomationEngine::new(sink, registry);
        engine.upsert_rule(rule("temp1 > 50", sensor_id, 1.0, 10)).await;
        engine.remove_rule(1).await;

        engine
            .on_value(&ValueEvent::new(SensorId::new(1), "temp1", 90.0, 90.0))
            .await;

        assert!(writes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stats_refresh_queries_sink_once_per_distinct_stat_and_populates_cache() {
        let sensor_id = SensorId::new(7);
        let (registry, _writes) = registry_with_recording_actuator(sensor_id).await;
        let mut sink = MockTimeSeriesSink::new();
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_for_closure = call_count.clone();
        sink.expect_query_statistics()
            .withf(|sensor_name, function, _window| sensor_name == "temp1" && function == "mean")
            .returning(move |_, _, _| {
                call_count_for_closure.fetch_add(1, Ordering::SeqCst);
                Ok(Some(42.0))
            });
        let engine = AutomationEngine::new(Arc::new(sink), registry);
        engine
            .upsert_rule(rule("stat_temp1_mean_1h > 40", sensor_id, 1.0, 10))
            .await;

        engine.refresh_stats_once().await;

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            *engine.stats_cache.lock().await.get("stat_temp1_mean_1h").unwrap(),
            42.0
        );
    }
}
