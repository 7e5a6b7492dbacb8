//! Knobs for the broker. Everything has a sensible default, so `BrokerConfig::default()` is
//! usually all you need.

use crate::error::Error;
use derive_builder::Builder;
use getset::CopyGetters;
use std::time::Duration;

#[derive(Builder, Clone, Debug, CopyGetters)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
#[getset(get_copy = "pub")]
pub struct BrokerConfig {
    /// Jobs with a priority below this count as urgent in stats
    #[builder(default = "1024")]
    urgent_threshold: u32,
    /// TTRs shorter than this are raised to it
    #[builder(default = "Duration::from_secs(1)")]
    min_ttr: Duration,
    /// How many commands can queue up in a tube's inbox before senders have to wait
    #[builder(default = "1024")]
    inbox_capacity: usize,
}

impl BrokerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.inbox_capacity == Some(0) {
            return Err("inbox_capacity must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            urgent_threshold: 1024,
            min_ttr: Duration::from_secs(1),
            inbox_capacity: 1024,
        }
    }
}

impl From<BrokerConfigBuilderError> for Error {
    fn from(err: BrokerConfigBuilderError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let config = BrokerConfigBuilder::default().build().unwrap();
        assert_eq!(config.urgent_threshold(), 1024);
        assert_eq!(config.min_ttr(), Duration::from_secs(1));
        assert_eq!(config.inbox_capacity(), 1024);

        let config = BrokerConfigBuilder::default()
            .urgent_threshold(10)
            .min_ttr(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.urgent_threshold(), 10);
        assert_eq!(config.min_ttr(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_empty_inbox() {
        let res = BrokerConfigBuilder::default().inbox_capacity(0).build();
        let err = Error::from(res.unwrap_err());
        assert!(matches!(err, Error::Config(msg) if msg.contains("inbox_capacity")));
    }
}
