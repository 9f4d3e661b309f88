use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Identifies a stream and, optionally, one of its partitions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDefinition {
    /// The stream id.
    pub id: String,

    /// The partition to read. `None` means the default partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<u32>,
}

impl StreamDefinition {
    /// Creates a definition for the default partition of a stream.
    pub fn new<K>(id: K) -> Self
    where
        K: Into<String>,
    {
        Self {
            id: id.into(),
            partition: None,
        }
    }

    /// Selects a partition.
    #[must_use]
    pub const fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// The partition, with the default partition resolved to `0`.
    #[must_use]
    pub fn partition_or_default(&self) -> u32 {
        self.partition.unwrap_or_default()
    }
}

impl From<&str> for StreamDefinition {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StreamDefinition {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl Display for StreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Some(partition) => write!(f, "{}#{partition}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Which historical messages to replay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResendOptions {
    /// The last `count` messages.
    Last {
        /// How many messages to replay.
        count: u64,
    },

    /// Every message at or after the given position.
    From {
        /// Timestamp in milliseconds since the epoch.
        timestamp: u64,

        /// Sequence number within the timestamp.
        #[serde(default)]
        sequence: u64,
    },

    /// Every message with a timestamp in `from..=to` (milliseconds).
    Range {
        /// Lower bound, inclusive.
        from: u64,

        /// Upper bound, inclusive.
        to: u64,
    },
}

impl Default for ResendOptions {
    fn default() -> Self {
        Self::Last { count: 1 }
    }
}

/// What to subscribe to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// The stream to subscribe to.
    pub stream: StreamDefinition,

    /// Historical messages to deliver before live ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resend: Option<ResendOptions>,
}

impl SubscribeParams {
    /// Live messages only.
    pub fn new<S>(stream: S) -> Self
    where
        S: Into<StreamDefinition>,
    {
        Self {
            stream: stream.into(),
            resend: None,
        }
    }

    /// Replays history before switching to live messages.
    #[must_use]
    pub fn with_resend(mut self, resend: ResendOptions) -> Self {
        self.resend = Some(resend);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_str() {
        let stream = StreamDefinition::from("sensors/temperature");

        assert_eq!(stream.id, "sensors/temperature");
        assert_eq!(stream.partition, None);
        assert_eq!(stream.partition_or_default(), 0);
        assert_eq!(stream.to_string(), "sensors/temperature");
        assert_eq!(stream.with_partition(3).to_string(), "sensors/temperature#3");
    }

    #[test]
    fn test_resend_defaults_to_last_message() {
        assert_eq!(ResendOptions::default(), ResendOptions::Last { count: 1 });
    }

    #[test]
    fn test_params_deserialize_without_resend() {
        let params: SubscribeParams =
            serde_json::from_str(r#"{"stream":{"id":"prices"}}"#).unwrap();

        assert_eq!(params, SubscribeParams::new("prices"));
    }

    #[test]
    fn test_resend_options_wire_names() {
        let options: ResendOptions =
            serde_json::from_str(r#"{"from":{"timestamp":1700000000000}}"#).unwrap();

        assert_eq!(
            options,
            ResendOptions::From {
                timestamp: 1_700_000_000_000,
                sequence: 0
            }
        );
    }
}
