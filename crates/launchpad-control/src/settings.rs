use std::net::SocketAddr;

use anyhow::Context;
use launchpad_agent::AgentSettings;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub bind: SocketAddr,
    pub agent: AgentSettings,
}

impl ControlSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("LAUNCHPAD_BIND")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = raw
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid LAUNCHPAD_BIND: {raw}"))?;

        Ok(Self {
            bind,
            agent: AgentSettings::from_env(),
        })
    }
}
