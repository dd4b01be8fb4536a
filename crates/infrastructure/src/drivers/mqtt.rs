use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use domain::driver::Driver;
use domain::error::DriverError;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::warn;

fn default_qos() -> u8 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    /// Dot-separated path into a JSON payload, e.g. "data.temperature" or
    /// "$.data.temperature". `None` means the payload has no nested path
    /// and is either a bare number or a top-level `{"value": ...}` object.
    pub json_path: Option<String>,
    /// Topic commands are published to. Defaults to `"<topic>/set"` when
    /// not set.
    pub command_topic: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
}

impl MqttConfig {
    fn resolved_command_topic(&self) -> String {
        self.command_topic
            .clone()
            .unwrap_or_else(|| format!("{}/set", self.topic))
    }
}

fn qos_from(raw: u8) -> QoS {
    match raw {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

fn extract_value(payload: &[u8], json_path: Option<&str>) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?;

    let Ok(root) = serde_json::from_str::<serde_json::Value>(text) else {
        return text.trim().parse::<f64>().ok();
    };

    let mut cursor = &root;
    if let Some(path) = json_path {
        let path = path.trim_start_matches('$').trim_start_matches('.');
        for segment in path.split('.') {
            cursor = cursor.get(segment)?;
        }
    }

    if let Some(value) = cursor.get("value") {
        cursor = value;
    }

    cursor.as_f64()
}

type TopicSlot = (Arc<AtomicU64>, Arc<AtomicBool>, Option<String>);

struct SharedConnection {
    client: AsyncClient,
    cache: StdMutex<HashMap<String, TopicSlot>>,
}

static SHARED_CONNECTIONS: std::sync::OnceLock<
    StdMutex<HashMap<String, Weak<SharedConnection>>>,
> = std::sync::OnceLock::new();

fn shared_connections() -> &'static StdMutex<HashMap<String, Weak<SharedConnection>>> {
    SHARED_CONNECTIONS.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Reads one value out of an MQTT topic. Connection spawns (or joins)
/// one event-loop-driving task per broker, shared across every sensor
/// pointed at that broker, and memoizes each subscribed topic's last
/// decoded value under its own cache slot.
pub struct MqttDriver {
    config: MqttConfig,
    shared: Option<Arc<SharedConnection>>,
    latest_bits: Arc<AtomicU64>,
    has_value: Arc<AtomicBool>,
    _driver_loop: Option<JoinHandle<()>>,
}

impl MqttDriver {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            shared: None,
            latest_bits: Arc::new(AtomicU64::new(0)),
            has_value: Arc::new(AtomicBool::new(false)),
            _driver_loop: None,
        }
    }

    fn broker_key(&self) -> String {
        format!("{}:{}", self.config.broker_host, self.config.broker_port)
    }
}

#[async_trait]
impl Driver for MqttDriver {
    async fn connect(&mut self) -> Result<(), DriverError> {
        let key = self.broker_key();
        let existing = shared_connections()
            .lock()
            .unwrap()
            .get(&key)
            .and_then(Weak::upgrade);

        let shared = if let Some(shared) = existing {
            shared
        } else {
            let client_id = format!("edge-gateway-{key}");
            let mut options = MqttOptions::new(client_id, self.config.broker_host.clone(), self.config.broker_port);
            options.set_keep_alive(Duration::from_secs(30));

            let (client, mut eventloop) = AsyncClient::new(options, 64);
            let shared = Arc::new(SharedConnection {
                client,
                cache: StdMutex::new(HashMap::new()),
            });
            let shared_for_loop = shared.clone();

            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let slot = shared_for_loop
                                .cache
                                .lock()
                                .unwrap()
                                .get(publish.topic.as_str())
                                .cloned();
                            if let Some((bits, has_value, json_path)) = slot {
                                if let Some(value) =
                                    extract_value(&publish.payload, json_path.as_deref())
                                {
                                    bits.store(value.to_bits(), Ordering::SeqCst);
                                    has_value.store(true, Ordering::SeqCst);
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "mqtt event loop error");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            });

            shared_connections()
                .lock()
                .unwrap()
                .insert(key, Arc::downgrade(&shared));
            shared
        };

        shared
            .client
            .subscribe(&self.config.topic, qos_from(self.config.qos))
            .await
            .map_err(|e| DriverError::Connection(format!("subscribe failed: {e}")))?;

        shared.cache.lock().unwrap().insert(
            self.config.topic.clone(),
            (
                self.latest_bits.clone(),
                self.has_value.clone(),
                self.config.json_path.clone(),
            ),
        );

        self.shared = Some(shared);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(shared) = self.shared.take() {
            shared.cache.lock().unwrap().remove(&self.config.topic);
            let _ = shared.client.unsubscribe(&self.config.topic).await;
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<f64, DriverError> {
        if !self.has_value.load(Ordering::SeqCst) {
            return Err(DriverError::Read("no message received yet".into()));
        }
        Ok(f64::from_bits(self.latest_bits.load(Ordering::SeqCst)))
    }

    async fn write(&mut self, value: f64) -> Result<(), DriverError> {
        let shared = self
            .shared
            .as_ref()
            .ok_or_else(|| DriverError::Connection("not connected".into()))?;
        let payload = value.to_string();
        shared
            .client
            .publish(
                self.config.resolved_command_topic(),
                qos_from(self.config.qos),
                false,
                payload,
            )
            .await
            .map_err(|e| DriverError::Write(format!("publish failed: {e}")))
    }

    fn is_event_driven(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_numeric_payload() {
        assert_eq!(extract_value(b"21.5", None), Some(21.5));
    }

    #[test]
    fn json_value_object_with_no_path_resolves_value_key() {
        assert_eq!(extract_value(br#"{"value":7}"#, None), Some(7.0));
    }

    #[test]
    fn extracts_nested_json_path() {
        let payload = br#"{"data":{"temperature":21.5}}"#;
        assert_eq!(extract_value(payload, Some("data.temperature")), Some(21.5));
    }

    #[test]
    fn dollar_prefixed_json_path_resolves_nested_value() {
        let payload = br#"{"a":{"b":3.5}}"#;
        assert_eq!(extract_value(payload, Some("$.a.b")), Some(3.5));
    }

    #[test]
    fn missing_path_segment_yields_none() {
        let payload = br#"{"data":{}}"#;
        assert_eq!(extract_value(payload, Some("data.temperature")), None);
    }

    fn config(topic: &str, command_topic: Option<&str>) -> MqttConfig {
        MqttConfig {
            broker_host: "localhost".into(),
            broker_port: 1883,
            topic: topic.into(),
            json_path: None,
            command_topic: command_topic.map(String::from),
            qos: 0,
        }
    }

    #[test]
    fn command_topic_defaults_to_topic_slash_set() {
        assert_eq!(
            config("sensors/boiler", None).resolved_command_topic(),
            "sensors/boiler/set"
        );
    }

    #[test]
    fn explicit_command_topic_overrides_default() {
        assert_eq!(
            config("sensors/boiler", Some("sensors/boiler/cmd")).resolved_command_topic(),
            "sensors/boiler/cmd"
        );
    }
}
