//! Home Assistant MQTT discovery configs
//!
//! One retained config per entity; all entities share one device registry
//! entry so they group under "SMS Gateway" in the UI.

use super::messages::BUTTON_PRESS;
use super::topics::{CommandTopic, TopicScheme, NODE_ID};
use crate::config::SmsSection;
use serde_json::{json, Value};

/// Retained config message for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub topic: String,
    pub payload: Value,
}

fn device() -> Value {
    json!({
        "identifiers": [NODE_ID],
        "name": "SMS Gateway",
        "model": "GSM Modem",
        "manufacturer": "SMS Gateway",
        "sw_version": env!("CARGO_PKG_VERSION"),
    })
}

/// Build the config for one entity, filling in the shared fields
fn entity(
    topics: &TopicScheme,
    component: &str,
    object_id: &str,
    mut config: Value,
) -> DiscoveryConfig {
    if let Some(fields) = config.as_object_mut() {
        fields.insert(
            "unique_id".to_string(),
            Value::String(format!("{NODE_ID}_{object_id}")),
        );
        fields.insert("device".to_string(), device());
    }
    DiscoveryConfig {
        topic: topics.discovery_config(component, object_id),
        payload: config,
    }
}

/// Every entity the gateway exposes; the cost sensor only when a price is set
pub fn discovery_configs(topics: &TopicScheme, sms: &SmsSection) -> Vec<DiscoveryConfig> {
    let mut configs = vec![
        entity(
            topics,
            "sensor",
            "signal",
            json!({
                "name": "GSM Signal Strength",
                "state_topic": topics.signal_state(),
                "value_template": "{{ value_json.SignalPercent }}",
                "unit_of_measurement": "%",
                "icon": "mdi:signal-cellular-3",
            }),
        ),
        entity(
            topics,
            "sensor",
            "network",
            json!({
                "name": "GSM Network",
                "state_topic": topics.network_state(),
                "value_template": "{{ value_json.NetworkName }}",
                "json_attributes_topic": topics.network_state(),
                "icon": "mdi:network",
            }),
        ),
        entity(
            topics,
            "sensor",
            "last_sms",
            json!({
                "name": "Last SMS Received",
                "state_topic": topics.sms_state(),
                "value_template": "{{ value_json.Text }}",
                "json_attributes_topic": topics.sms_state(),
                "icon": "mdi:message-text",
            }),
        ),
        entity(
            topics,
            "sensor",
            "send_status",
            json!({
                "name": "SMS Send Status",
                "state_topic": topics.send_status(),
                "value_template": "{{ value_json.status }}",
                "json_attributes_topic": topics.send_status(),
                "icon": "mdi:send",
            }),
        ),
        entity(
            topics,
            "sensor",
            "modem_status",
            json!({
                "name": "Modem Status",
                "state_topic": topics.device_status(),
                "value_template": "{{ value_json.status }}",
                "json_attributes_topic": topics.device_status(),
                "icon": "mdi:connection",
            }),
        ),
        entity(
            topics,
            "sensor",
            "sent_count",
            json!({
                "name": "SMS Sent Count",
                "state_topic": topics.sms_counter(),
                "value_template": "{{ value_json.count }}",
                "state_class": "total_increasing",
                "icon": "mdi:counter",
            }),
        ),
        entity(
            topics,
            "sensor",
            "modem_imei",
            json!({
                "name": "Modem IMEI",
                "state_topic": topics.modem_info(),
                "value_template": "{{ value_json.IMEI }}",
                "icon": "mdi:identifier",
            }),
        ),
        entity(
            topics,
            "sensor",
            "modem_model",
            json!({
                "name": "Modem Model",
                "state_topic": topics.modem_info(),
                "value_template": "{{ value_json.Manufacturer }} {{ value_json.Model }}",
                "json_attributes_topic": topics.modem_info(),
                "icon": "mdi:cellphone",
            }),
        ),
        entity(
            topics,
            "sensor",
            "sim_imsi",
            json!({
                "name": "SIM IMSI",
                "state_topic": topics.sim_info(),
                "value_template": "{{ value_json.IMSI }}",
                "icon": "mdi:sim",
            }),
        ),
        entity(
            topics,
            "sensor",
            "sms_capacity",
            json!({
                "name": "SMS Storage Used",
                "state_topic": topics.sms_capacity(),
                "value_template": "{{ value_json.SIMUsed }}",
                "json_attributes_topic": topics.sms_capacity(),
                "unit_of_measurement": "messages",
                "icon": "mdi:email-multiple",
            }),
        ),
        entity(
            topics,
            "button",
            "send_button",
            json!({
                "name": "Send SMS",
                "command_topic": topics.command(CommandTopic::SendButton),
                "payload_press": BUTTON_PRESS,
                "icon": "mdi:message-plus",
            }),
        ),
        entity(
            topics,
            "button",
            "reset_counter",
            json!({
                "name": "Reset SMS Counter",
                "command_topic": topics.command(CommandTopic::ResetCounterButton),
                "payload_press": BUTTON_PRESS,
                "icon": "mdi:restart",
            }),
        ),
        entity(
            topics,
            "button",
            "delete_all_sms",
            json!({
                "name": "Delete All SMS",
                "command_topic": topics.command(CommandTopic::DeleteAllSmsButton),
                "payload_press": BUTTON_PRESS,
                "icon": "mdi:delete-sweep",
            }),
        ),
        entity(
            topics,
            "text",
            "phone_number",
            json!({
                "name": "Phone Number",
                "command_topic": topics.command(CommandTopic::PhoneNumberSet),
                "state_topic": topics.phone_number_state(),
                "mode": "text",
                "pattern": r"^\+?[\d\s\-\(\)]+$",
                "icon": "mdi:phone",
            }),
        ),
        entity(
            topics,
            "text",
            "message_text",
            json!({
                "name": "Message Text",
                "command_topic": topics.command(CommandTopic::MessageTextSet),
                "state_topic": topics.message_text_state(),
                "mode": "text",
                "max": 255,
                "icon": "mdi:message-text",
            }),
        ),
    ];

    if sms.cost_per_message > 0.0 {
        configs.push(entity(
            topics,
            "sensor",
            "total_cost",
            json!({
                "name": "SMS Total Cost",
                "state_topic": topics.sms_counter(),
                "value_template": "{{ value_json.cost }}",
                "unit_of_measurement": sms.cost_currency,
                "state_class": "total",
                "icon": "mdi:cash",
            }),
        ));
    }

    configs
}
