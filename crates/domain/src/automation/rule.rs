use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorId;

/// A single cooldown-gated automation rule. `condition` is evaluated
/// in multi-variable mode against the value cache and stats cache;
/// when it is true and the cooldown has elapsed, `target_sensor_id`
/// receives either `target_formula`'s result (if present) or the
/// literal `target_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub rule_id: i64,
    pub name: String,
    pub condition: String,
    pub target_sensor_id: SensorId,
    pub target_value: Option<f64>,
    pub target_formula: Option<String>,
    pub cooldown_s: u64,
    pub is_active: bool,
    pub last_triggered_ts: Option<DateTime<Utc>>,
}

impl AutomationRule {
    /// True once `cooldown_s` has elapsed since the last trigger, or
    /// if the rule has never fired.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_ts {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.cooldown_s as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rule(cooldown_s: u64, last_triggered_ts: Option<DateTime<Utc>>) -> AutomationRule {
        AutomationRule {
            rule_id: 1,
            name: "cool-if-hot".into(),
            condition: "temp1 > 30".into(),
            target_sensor_id: SensorId::new(2),
            target_value: Some(1.0),
            target_formula: None,
            cooldown_s,
            is_active: true,
            last_triggered_ts,
        }
    }

    #[test]
    fn never_triggered_is_always_elapsed() {
        assert!(rule(60, None).cooldown_elapsed(Utc::now()));
    }

    #[test]
    fn within_cooldown_is_not_elapsed() {
        let now = Utc::now();
        let r = rule(60, Some(now - Duration::seconds(10)));
        assert!(!r.cooldown_elapsed(now));
    }

    #[test]
    fn past_cooldown_is_elapsed() {
        let now = Utc::now();
        let r = rule(60, Some(now - Duration::seconds(61)));
        assert!(r.cooldown_elapsed(now));
    }
}
