//! Outbound bus messages: per-field state publishes and the one-time
//! discovery announcement the automation hub uses to register entities.

use serde_json::json;

use crate::config::PumpConfig;
use crate::protocol::PumpMode;
use crate::session::DeviceState;

use super::topics::{availability_topic, command_topic, state_topic, TopicField};

/// One message for the bus connector to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

fn on_off(value: bool) -> String {
    if value { "ON" } else { "OFF" }.to_string()
}

/// Per-field publishes for one state snapshot.
///
/// Connectivity always publishes — failures must be observable through the
/// bus, not only in logs. The other fields are held back until the pump has
/// confirmed real state, so defaults are never presented as measurements.
pub fn state_messages(root: &str, pump_id: &str, state: &DeviceState) -> Vec<BusMessage> {
    let mut messages = vec![BusMessage {
        topic: state_topic(root, pump_id, TopicField::Connected),
        payload: on_off(state.connected),
        retained: true,
    }];
    if !state.synced() {
        return messages;
    }

    messages.push(BusMessage {
        topic: state_topic(root, pump_id, TopicField::Power),
        payload: on_off(state.power),
        retained: true,
    });
    messages.push(BusMessage {
        topic: state_topic(root, pump_id, TopicField::Feed),
        payload: on_off(state.feed),
        retained: true,
    });
    messages.push(BusMessage {
        topic: state_topic(root, pump_id, TopicField::Flow),
        payload: state.flow.to_string(),
        retained: true,
    });
    messages.push(BusMessage {
        topic: state_topic(root, pump_id, TopicField::Frequency),
        payload: state.frequency.to_string(),
        retained: true,
    });
    messages.push(BusMessage {
        topic: state_topic(root, pump_id, TopicField::Mode),
        payload: state.mode.display_name().to_string(),
        retained: true,
    });
    messages
}

/// Home-Assistant-style discovery announcement for one pump.
///
/// Published retained, once per session's first Ready transition; a
/// late-joining hub recovers the entity set from the broker without any
/// bridge-side event.
pub fn discovery_messages(
    discovery_prefix: &str,
    root: &str,
    pump: &PumpConfig,
) -> Vec<BusMessage> {
    let node_id = format!("wavebridge_{}", pump.id);
    let device = json!({
        "identifiers": [node_id],
        "name": pump.name,
        "manufacturer": "Jebao",
        "model": "DMP series wavemaker",
    });
    let availability = availability_topic(root);

    let entity = |component: &str, object: &str, config: serde_json::Value| {
        let mut map = match config {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("device".into(), device.clone());
        map.insert("availability_topic".into(), json!(availability));
        map.insert("unique_id".into(), json!(format!("{node_id}_{object}")));
        BusMessage {
            topic: format!("{discovery_prefix}/{component}/{node_id}/{object}/config"),
            payload: serde_json::Value::Object(map).to_string(),
            retained: true,
        }
    };

    vec![
        entity(
            "switch",
            "power",
            json!({
                "name": "Power",
                "command_topic": command_topic(root, &pump.id, TopicField::Power),
                "state_topic": state_topic(root, &pump.id, TopicField::Power),
                "payload_on": "ON",
                "payload_off": "OFF",
                "icon": "mdi:power",
            }),
        ),
        entity(
            "switch",
            "feed",
            json!({
                "name": "Feed Mode",
                "command_topic": command_topic(root, &pump.id, TopicField::Feed),
                "state_topic": state_topic(root, &pump.id, TopicField::Feed),
                "payload_on": "ON",
                "payload_off": "OFF",
                "icon": "mdi:fish",
            }),
        ),
        entity(
            "number",
            "flow",
            json!({
                "name": "Flow",
                "command_topic": command_topic(root, &pump.id, TopicField::Flow),
                "state_topic": state_topic(root, &pump.id, TopicField::Flow),
                "min": pump.flow_min,
                "max": pump.flow_max,
                "step": 1,
                "unit_of_measurement": "%",
                "icon": "mdi:waves",
            }),
        ),
        entity(
            "number",
            "frequency",
            json!({
                "name": "Frequency",
                "command_topic": command_topic(root, &pump.id, TopicField::Frequency),
                "state_topic": state_topic(root, &pump.id, TopicField::Frequency),
                "min": pump.frequency_min,
                "max": pump.frequency_max,
                "step": 1,
                "unit_of_measurement": "s",
                "icon": "mdi:timer",
            }),
        ),
        entity(
            "select",
            "mode",
            json!({
                "name": "Mode",
                "command_topic": command_topic(root, &pump.id, TopicField::Mode),
                "state_topic": state_topic(root, &pump.id, TopicField::Mode),
                "options": PumpMode::ALL.map(PumpMode::display_name),
                "icon": "mdi:waves-arrow-right",
            }),
        ),
        entity(
            "binary_sensor",
            "connected",
            json!({
                "name": "Connected",
                "state_topic": state_topic(root, &pump.id, TopicField::Connected),
                "payload_on": "ON",
                "payload_off": "OFF",
                "device_class": "connectivity",
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn pump() -> PumpConfig {
        PumpConfig {
            name: "Tank Left".into(),
            address: "tank:1".into(),
            id: "tank_left".into(),
            passcode: 0,
            flow_min: 30,
            flow_max: 90,
            frequency_min: 5,
            frequency_max: 20,
        }
    }

    #[test]
    fn unsynced_state_publishes_connectivity_only() {
        let state = DeviceState {
            connected: true,
            ..DeviceState::default()
        };
        let messages = state_messages("wavebridge", "tank_left", &state);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "wavebridge/tank_left/connected");
        assert_eq!(messages[0].payload, "ON");
    }

    #[test]
    fn synced_state_publishes_every_field() {
        let state = DeviceState {
            power: true,
            feed: false,
            mode: PumpMode::SineWave,
            flow: 72,
            frequency: 11,
            connected: true,
            last_sync: Some(Utc::now()),
        };
        let messages = state_messages("wavebridge", "tank_left", &state);
        let find = |topic: &str| {
            messages
                .iter()
                .find(|m| m.topic == topic)
                .map(|m| m.payload.as_str())
        };
        assert_eq!(find("wavebridge/tank_left/power"), Some("ON"));
        assert_eq!(find("wavebridge/tank_left/flow"), Some("72"));
        assert_eq!(find("wavebridge/tank_left/mode"), Some("Sine Wave"));
        assert!(messages.iter().all(|m| m.retained));
    }

    #[test]
    fn discovery_carries_configured_ranges() {
        let messages = discovery_messages("homeassistant", "wavebridge", &pump());
        let flow = messages
            .iter()
            .find(|m| m.topic == "homeassistant/number/wavebridge_tank_left/flow/config")
            .unwrap();
        let config: serde_json::Value = serde_json::from_str(&flow.payload).unwrap();
        assert_eq!(config["min"], 30);
        assert_eq!(config["max"], 90);
        assert_eq!(
            config["command_topic"],
            "wavebridge/tank_left/flow/set"
        );
        assert_eq!(config["device"]["manufacturer"], "Jebao");
        assert!(flow.retained);
    }

    #[test]
    fn discovery_mode_options_are_display_names() {
        let messages = discovery_messages("homeassistant", "wavebridge", &pump());
        let mode = messages
            .iter()
            .find(|m| m.topic.contains("/select/"))
            .unwrap();
        let config: serde_json::Value = serde_json::from_str(&mode.payload).unwrap();
        let options: Vec<&str> = config["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            options,
            vec!["Classic Wave", "Cross-flow", "Sine Wave", "Random", "Constant"]
        );
    }
}
