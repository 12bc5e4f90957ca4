use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct SimConfig {
    pub nodes: usize,
    pub messages: usize,
    pub topic: String,
    pub channel: String,
    pub partitions: u32,
    pub concurrency_limit: usize,
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub inactive_channel_lifetime: Duration,
}

impl SimConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("nodes", 3)?
            .set_default("messages", 10)?
            .set_default("topic", "chat")?
            .set_default("channel", "/chat/room1")?
            .set_default("partitions", 3)?
            .set_default("concurrency_limit", 2)?
            .set_default("poll_timeout", "100ms")?
            .set_default("startup_grace", "5s")?
            .set_default("settle_timeout", "5s")?
            .set_default("inactive_channel_lifetime", "30m")?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("FANOUT_SIM").try_parsing(true));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_applied() {
        let cfg = SimConfig::new(None).expect("failed to build config");

        assert_eq!(cfg.nodes, 3);
        assert_eq!(cfg.messages, 10);
        assert_eq!(cfg.topic, "chat");
        assert_eq!(cfg.channel, "/chat/room1");
        assert_eq!(cfg.poll_timeout, Duration::from_millis(100));
        assert_eq!(cfg.startup_grace, Duration::from_secs(5));
        assert_eq!(cfg.inactive_channel_lifetime, Duration::from_secs(30 * 60));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "nodes = 5\nchannel = \"/sim/*\"\nsettle_timeout = \"250ms\"").expect("write");

        let cfg = SimConfig::new(Some(file.path().to_path_buf())).expect("config");
        assert_eq!(cfg.nodes, 5);
        assert_eq!(cfg.channel, "/sim/*");
        assert_eq!(cfg.settle_timeout, Duration::from_millis(250));
        assert_eq!(cfg.messages, 10);
    }
}
