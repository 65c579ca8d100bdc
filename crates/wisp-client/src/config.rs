use std::time::Duration;

use wisp_common::helpers::env_parse;
use wisp_common::{Error, Result};
use wisp_core::{Framing, ProtocolLevel};
use wisp_crypto::PreSharedSecret;

use crate::negotiator::build_target;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base WebSocket URI; `l` and `k` are appended per dial.
    pub url: String,
    /// Protocol level, 0 to 2.
    pub level: u8,
    /// Required for levels 1 and 2.
    pub psk: Option<PreSharedSecret>,
    /// Period of the reconnect check.
    pub retry_interval: Duration,
    pub framing: Framing,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, level: u8) -> Self {
        Self {
            url: url.into(),
            level,
            psk: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            framing: Framing::default(),
        }
    }

    pub fn with_psk(mut self, psk: PreSharedSecret) -> Self {
        self.psk = Some(psk);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Check everything a dial would need, without dialing.
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(Error::config("retry interval must be non-zero"));
        }
        build_target(&self.url, self.level, self.psk.as_ref(), self.framing)?;
        Ok(())
    }

    /// Load from `WISP_*` environment variables.
    ///
    /// `WISP_URL` is required. `WISP_PSK_KEY` and `WISP_PSK_IV` must be set
    /// together.
    pub fn from_env() -> Result<Self> {
        let url: String = env_parse("WISP_URL")
            .map_err(Error::config)?
            .ok_or_else(|| Error::config("WISP_URL is not set"))?;
        let level = env_parse::<ProtocolLevel>("WISP_LEVEL")
            .map_err(Error::config)?
            .unwrap_or(ProtocolLevel::HandshakeV2);

        let mut config = SessionConfig::new(url, level.as_u8());

        let key: Option<String> = env_parse("WISP_PSK_KEY").map_err(Error::config)?;
        let iv: Option<String> = env_parse("WISP_PSK_IV").map_err(Error::config)?;
        match (key, iv) {
            (Some(key), Some(iv)) => {
                let psk = PreSharedSecret::new(key, iv).map_err(Error::config)?;
                config = config.with_psk(psk);
            }
            (None, None) => {}
            _ => {
                return Err(Error::config(
                    "WISP_PSK_KEY and WISP_PSK_IV must be set together",
                ))
            }
        }

        if let Some(ms) = env_parse::<u64>("WISP_RETRY_MS").map_err(Error::config)? {
            config = config.with_retry_interval(Duration::from_millis(ms));
        }
        if let Some(framing) = env_parse::<Framing>("WISP_FRAMING").map_err(Error::config)? {
            config = config.with_framing(framing);
        }

        config.validate()?;
        Ok(config)
    }
}
