pub const DEFAULT_MOTD: &str = "A Minecraft Server";
pub const DEFAULT_MAX_PLAYERS: u32 = 20;
pub const DEFAULT_PORT: u16 = 25565;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Survival => "survival",
            GameMode::Creative => "creative",
            GameMode::Adventure => "adventure",
            GameMode::Spectator => "spectator",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Peaceful,
    #[default]
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Peaceful => "peaceful",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        }
    }
}

/// Settings applied to the game server on start.
///
/// Only these five values are user-controlled; everything else written to
/// `server.properties` is fixed policy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    pub motd: String,
    pub gamemode: GameMode,
    pub difficulty: Difficulty,
    pub max_players: u32,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            motd: DEFAULT_MOTD.to_string(),
            gamemode: GameMode::default(),
            difficulty: Difficulty::default(),
            max_players: DEFAULT_MAX_PLAYERS,
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("maxPlayers must be a positive integer (got {0})")]
    MaxPlayers(i64),
    #[error("port must be in 1..65535 (got {0})")]
    Port(i64),
}

/// Partial config as sent by clients. Absent fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ServerConfigPatch {
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default)]
    pub gamemode: Option<GameMode>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default, alias = "maxPlayers")]
    pub max_players: Option<i64>,
    #[serde(default)]
    pub port: Option<i64>,
}

impl ServerConfigPatch {
    pub fn apply_to(self, base: &ServerConfig) -> Result<ServerConfig, ConfigError> {
        let max_players = match self.max_players {
            None => base.max_players,
            Some(v) => u32::try_from(v)
                .ok()
                .filter(|v| *v >= 1)
                .ok_or(ConfigError::MaxPlayers(v))?,
        };
        let port = match self.port {
            None => base.port,
            Some(v) => u16::try_from(v)
                .ok()
                .filter(|v| *v >= 1)
                .ok_or(ConfigError::Port(v))?,
        };

        Ok(ServerConfig {
            motd: self.motd.unwrap_or_else(|| base.motd.clone()),
            gamemode: self.gamemode.unwrap_or(base.gamemode),
            difficulty: self.difficulty.unwrap_or(base.difficulty),
            max_players,
            port,
        })
    }

    /// Fills absent fields with the declared defaults.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        self.apply_to(&ServerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitSummary {
    pub exit_code: Option<i32>,
    pub message: String,
    pub at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerStatus {
    pub state: ServerState,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub config: Option<ServerConfig>,
    pub started_at_unix_ms: Option<u64>,
    pub last_exit: Option<ExitSummary>,
}

impl ServerStatus {
    pub fn stopped(last_exit: Option<ExitSummary>) -> Self {
        Self {
            state: ServerState::Stopped,
            pid: None,
            port: None,
            config: None,
            started_at_unix_ms: None,
            last_exit,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ServerState::Running)
    }
}

pub fn unix_ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_yields_declared_defaults() {
        let cfg = ServerConfigPatch::default().into_config().unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.motd, "A Minecraft Server");
        assert_eq!(cfg.gamemode, GameMode::Survival);
        assert_eq!(cfg.difficulty, Difficulty::Easy);
        assert_eq!(cfg.max_players, 20);
        assert_eq!(cfg.port, 25565);
    }

    #[test]
    fn patch_accepts_camel_case_max_players() {
        let patch: ServerConfigPatch =
            serde_json::from_str(r#"{"motd":"Hi","maxPlayers":5}"#).unwrap();
        let cfg = patch.into_config().unwrap();
        assert_eq!(cfg.motd, "Hi");
        assert_eq!(cfg.max_players, 5);
        assert_eq!(cfg.difficulty, Difficulty::Easy);
    }

    #[test]
    fn patch_keeps_base_for_absent_fields() {
        let base = ServerConfig {
            motd: "base".to_string(),
            gamemode: GameMode::Creative,
            difficulty: Difficulty::Normal,
            max_players: 8,
            port: 25570,
        };
        let patch: ServerConfigPatch = serde_json::from_str(r#"{"difficulty":"hard"}"#).unwrap();
        let cfg = patch.apply_to(&base).unwrap();
        assert_eq!(cfg.difficulty, Difficulty::Hard);
        assert_eq!(cfg.motd, "base");
        assert_eq!(cfg.gamemode, GameMode::Creative);
        assert_eq!(cfg.max_players, 8);
        assert_eq!(cfg.port, 25570);
    }

    #[test]
    fn patch_rejects_non_positive_max_players() {
        let patch = ServerConfigPatch {
            max_players: Some(0),
            ..Default::default()
        };
        assert_eq!(patch.into_config(), Err(ConfigError::MaxPlayers(0)));

        let patch = ServerConfigPatch {
            max_players: Some(-3),
            ..Default::default()
        };
        assert_eq!(patch.into_config(), Err(ConfigError::MaxPlayers(-3)));
    }

    #[test]
    fn patch_rejects_out_of_range_port() {
        for bad in [0, 65536, -1] {
            let patch = ServerConfigPatch {
                port: Some(bad),
                ..Default::default()
            };
            assert_eq!(patch.into_config(), Err(ConfigError::Port(bad)));
        }
    }

    #[test]
    fn unknown_gamemode_is_rejected() {
        let res = serde_json::from_str::<ServerConfigPatch>(r#"{"gamemode":"hardcore"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn config_serializes_with_snake_case_keys() {
        let v = serde_json::to_value(ServerConfig::default()).unwrap();
        assert_eq!(v["max_players"], 20);
        assert_eq!(v["gamemode"], "survival");
        assert_eq!(v["difficulty"], "easy");
    }
}
