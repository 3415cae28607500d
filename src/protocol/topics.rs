//! Topic layout for state, command and discovery topics
//!
//! Every state and command topic hangs off one configurable root `P`
//! (default `homeassistant/sensor/sms_gateway`); discovery configs live under
//! the Home Assistant discovery root.

use crate::config::MqttSection;

/// Node id shared by every discovery object id and the device registry entry
pub const NODE_ID: &str = "sms_gateway";

/// Normalize a topic root: no leading or trailing slash, no empty levels
pub fn normalize_topic_root(root: &str) -> String {
    root.split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Inbound topics the gateway subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTopic {
    Send,
    SendButton,
    ResetCounterButton,
    DeleteAllSmsButton,
    PhoneNumberSet,
    MessageTextSet,
    PhoneNumberState,
    MessageTextState,
}

impl CommandTopic {
    pub const ALL: [CommandTopic; 8] = [
        CommandTopic::Send,
        CommandTopic::SendButton,
        CommandTopic::ResetCounterButton,
        CommandTopic::DeleteAllSmsButton,
        CommandTopic::PhoneNumberSet,
        CommandTopic::MessageTextSet,
        CommandTopic::PhoneNumberState,
        CommandTopic::MessageTextState,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            CommandTopic::Send => "send",
            CommandTopic::SendButton => "send_button",
            CommandTopic::ResetCounterButton => "reset_counter_button",
            CommandTopic::DeleteAllSmsButton => "delete_all_sms_button",
            CommandTopic::PhoneNumberSet => "phone_number/set",
            CommandTopic::MessageTextSet => "message_text/set",
            CommandTopic::PhoneNumberState => "phone_number/state",
            CommandTopic::MessageTextState => "message_text/state",
        }
    }

    /// Topics that trigger a modem action; retained copies of these are stale
    pub fn triggers_action(&self) -> bool {
        matches!(
            self,
            CommandTopic::Send
                | CommandTopic::SendButton
                | CommandTopic::ResetCounterButton
                | CommandTopic::DeleteAllSmsButton
        )
    }
}

/// Topic construction for one gateway instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    discovery_prefix: String,
}

impl TopicScheme {
    pub fn new(prefix: &str, discovery_prefix: &str) -> Self {
        Self {
            prefix: normalize_topic_root(prefix),
            discovery_prefix: normalize_topic_root(discovery_prefix),
        }
    }

    pub fn from_config(config: &MqttSection) -> Self {
        Self::new(&config.topic_prefix, &config.discovery_prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    pub fn command(&self, command: CommandTopic) -> String {
        self.topic(command.suffix())
    }

    /// Every topic to subscribe to after a (re)connect
    pub fn subscriptions(&self) -> Vec<String> {
        CommandTopic::ALL
            .iter()
            .map(|command| self.command(*command))
            .collect()
    }

    /// Map an inbound topic back to its command
    pub fn classify(&self, topic: &str) -> Option<CommandTopic> {
        let suffix = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        CommandTopic::ALL
            .into_iter()
            .find(|command| command.suffix() == suffix)
    }

    pub fn signal_state(&self) -> String {
        self.topic("signal/state")
    }

    pub fn network_state(&self) -> String {
        self.topic("network/state")
    }

    pub fn sms_state(&self) -> String {
        self.topic("sms/state")
    }

    pub fn send_status(&self) -> String {
        self.topic("send_status")
    }

    pub fn device_status(&self) -> String {
        self.topic("device_status/state")
    }

    pub fn sms_counter(&self) -> String {
        self.topic("sms_counter/state")
    }

    pub fn modem_info(&self) -> String {
        self.topic("modem_info/state")
    }

    pub fn sim_info(&self) -> String {
        self.topic("sim_info/state")
    }

    pub fn sms_capacity(&self) -> String {
        self.topic("sms_capacity/state")
    }

    pub fn delete_sms_status(&self) -> String {
        self.topic("delete_sms_status")
    }

    pub fn phone_number_state(&self) -> String {
        self.command(CommandTopic::PhoneNumberState)
    }

    pub fn message_text_state(&self) -> String {
        self.command(CommandTopic::MessageTextState)
    }

    /// `{discovery}/{component}/sms_gateway_{object}/config`
    pub fn discovery_config(&self, component: &str, object_id: &str) -> String {
        format!(
            "{}/{}/{}_{}/config",
            self.discovery_prefix, component, NODE_ID, object_id
        )
    }
}
