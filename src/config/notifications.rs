//! LISTEN/NOTIFY hub limits (spec.md §4.3, §6 "notifications:").

use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notifications {
    #[serde(default = "Notifications::default_max_channels")]
    pub max_channels: usize,

    #[serde(default = "Notifications::default_max_listeners_per_channel")]
    pub max_listeners_per_channel: usize,

    #[serde(default = "Notifications::default_channel_name_max_length")]
    pub channel_name_max_length: usize,

    #[serde(default = "Notifications::default_payload_max_length")]
    pub payload_max_length: usize,
}

impl Notifications {
    pub fn default_max_channels() -> usize {
        1000
    }
    pub fn default_max_listeners_per_channel() -> usize {
        100
    }
    pub fn default_channel_name_max_length() -> usize {
        63
    }
    pub fn default_payload_max_length() -> usize {
        8000
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications {
            max_channels: Notifications::default_max_channels(),
            max_listeners_per_channel: Notifications::default_max_listeners_per_channel(),
            channel_name_max_length: Notifications::default_channel_name_max_length(),
            payload_max_length: Notifications::default_payload_max_length(),
        }
    }
}
