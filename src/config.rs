use std::collections::HashMap;
use std::fs;

#[derive(Debug)]
pub struct Config {
    pub globals: HashMap<String, String>,
    pub sections: HashMap<String, HashMap<String, String>>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Error reading file {path}: {e}"))?;

        let mut globals = HashMap::new();
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = &line[1..line.len() - 1];
                current_section = Some(name.to_string());
                continue;
            }

            if let Some(pos) = line.find('=') {
                let key = line[..pos].trim().to_string();
                let value = line[pos + 1..].trim().trim_matches('"').to_string();

                match &current_section {
                    None => {
                        globals.insert(key, value);
                    }
                    Some(sec) => {
                        sections.entry(sec.clone()).or_default().insert(key, value);
                    }
                }
            }
        }
        Ok(Config { globals, sections })
    }

    pub fn empty() -> Self {
        Self {
            globals: HashMap::new(),
            sections: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|sec| sec.get(key))
            .map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_or_default<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key)
            .or_else(|| self.get_global(key))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn get_non_empty_or_default<'a>(
        &'a self,
        section: &str,
        key: &str,
        default: &'a str,
    ) -> &'a str {
        self.get_non_empty(section, key)
            .or_else(|| self.get_global(key).filter(|s| !s.is_empty()))
            .unwrap_or(default)
    }

    fn get_u64(&self, vhost: &str, key: &str, default: u64) -> u64 {
        self.get_or_default(vhost, key, "")
            .parse()
            .unwrap_or(default)
    }

    fn get_bool(&self, vhost: &str, key: &str, default: bool) -> bool {
        match self.get(vhost, key) {
            Some("on" | "true" | "1") => true,
            Some("off" | "false" | "0") => false,
            _ => default,
        }
    }

    /// Milliseconds to wait for the first publisher packet before kicking it off.
    #[must_use]
    pub fn publish_1stpkt_timeout_ms(&self, vhost: &str) -> u64 {
        self.get_u64(vhost, "publish_1stpkt_timeout", 20_000)
    }

    /// Milliseconds of publisher silence tolerated once steady-state has begun.
    #[must_use]
    pub fn publish_normal_timeout_ms(&self, vhost: &str) -> u64 {
        self.get_u64(vhost, "publish_normal_timeout", 5_000)
    }

    /// Merged-write sleep, in milliseconds, applied when a consumer's batch is empty.
    #[must_use]
    pub fn mw_sleep_ms(&self, vhost: &str) -> u64 {
        self.get_u64(vhost, "mw_sleep", 10)
    }

    /// Maximum number of messages pulled per merged-write batch.
    #[must_use]
    pub fn mw_msgs(&self, vhost: &str) -> usize {
        self.get_u64(vhost, "mw_msgs", 128) as usize
    }

    /// Whether this vhost runs in edge mode (proxy publish/play upstream).
    #[must_use]
    pub fn is_edge(&self, vhost: &str) -> bool {
        self.get_bool(vhost, "edge", false)
    }

    /// Whether origin-cluster redirect discovery is enabled for this vhost.
    #[must_use]
    pub fn origin_cluster(&self, vhost: &str) -> bool {
        self.get_bool(vhost, "origin_cluster", false)
    }

    /// Whether edge publishers must be authorized via token-traverse.
    #[must_use]
    pub fn token_traverse(&self, vhost: &str) -> bool {
        self.get_bool(vhost, "token_traverse", false)
    }

    /// Number of frames retained in the GOP cache, 0 disables it.
    #[must_use]
    pub fn gop_cache_frames(&self, vhost: &str) -> usize {
        self.get_u64(vhost, "gop_cache_frames", 256) as usize
    }

    /// Seconds an idle, publisher-less, consumer-less source lingers before death.
    #[must_use]
    pub fn stream_death_delay_secs(&self, vhost: &str) -> u64 {
        self.get_u64(vhost, "stream_death_delay", 3)
    }

    /// Whether this vhost is explicitly disabled.
    #[must_use]
    pub fn vhost_enabled(&self, vhost: &str) -> bool {
        self.get_bool(vhost, "enabled", true)
    }
}
