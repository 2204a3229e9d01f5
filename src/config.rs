use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_STREAM_URL: &str = "https://usa11.fastcast4u.com/proxy/sebmsiwt?mp=/1";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Static player configuration, loaded once and shared read-only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream_url: String,
    pub app_name: String,
    pub enable_background_playback: bool,
    pub enable_notifications: bool,
    pub enable_android_auto: bool,
    pub enable_chromecast: bool,
    pub enable_dark_mode: bool,
    pub sleep_timer: bool,
    pub reconnect_on_disconnect: bool,
    pub enable_bluetooth_controls: bool,
    pub social_links: SocialLinks,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            app_name: "MiRadioApp".to_string(),
            enable_background_playback: true,
            enable_notifications: true,
            enable_android_auto: true,
            enable_chromecast: false,
            enable_dark_mode: true,
            sleep_timer: false,
            reconnect_on_disconnect: true,
            enable_bluetooth_controls: true,
            social_links: SocialLinks::default(),
        }
    }
}

/// Social profile links. An empty string means the link is hidden.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SocialLinks {
    pub facebook: String,
    pub instagram: String,
    pub twitter: String,
    pub website: String,
}

impl Default for SocialLinks {
    fn default() -> Self {
        Self {
            facebook: "https://facebook.com/mi-radio".to_string(),
            instagram: "https://instagram.com/mi-radio".to_string(),
            twitter: String::new(),
            website: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialNetwork {
    Facebook,
    Instagram,
    Twitter,
    Website,
}

impl SocialNetwork {
    pub fn label(&self) -> &'static str {
        match self {
            SocialNetwork::Facebook => "Facebook",
            SocialNetwork::Instagram => "Instagram",
            SocialNetwork::Twitter => "Twitter",
            SocialNetwork::Website => "Website",
        }
    }
}

impl SocialLinks {
    /// Links that should be shown, in display order.
    pub fn visible(&self) -> Vec<(SocialNetwork, &str)> {
        [
            (SocialNetwork::Facebook, self.facebook.as_str()),
            (SocialNetwork::Instagram, self.instagram.as_str()),
            (SocialNetwork::Twitter, self.twitter.as_str()),
            (SocialNetwork::Website, self.website.as_str()),
        ]
        .into_iter()
        .filter(|(_, url)| !url.trim().is_empty())
        .collect()
    }
}

/// Parse a configuration document. Fields missing from the document keep
/// their default values.
pub fn parse(content: &str) -> Result<AppConfig> {
    let mut config: AppConfig = serde_json::from_str(content).context("invalid config JSON")?;
    if config.stream_url.trim().is_empty() {
        warn!("Config has an empty stream_url, using {}", DEFAULT_STREAM_URL);
        config.stream_url = DEFAULT_STREAM_URL.to_string();
    }
    Ok(config)
}

fn try_load(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse(&content)
}

/// Load the configuration, substituting the defaults on any failure.
pub fn load(path: &Path) -> AppConfig {
    match try_load(path) {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Using default config: {:#}", e);
            AppConfig::default()
        }
    }
}

/// Load the configuration on the blocking pool.
pub async fn load_async(path: PathBuf) -> AppConfig {
    match tokio::task::spawn_blocking(move || load(&path)).await {
        Ok(config) => config,
        Err(e) => {
            warn!("Config loader task failed: {}", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.stream_url, "https://usa11.fastcast4u.com/proxy/sebmsiwt?mp=/1");
        assert_eq!(config.app_name, "MiRadioApp");
        assert!(config.enable_background_playback);
        assert!(config.enable_notifications);
        assert!(config.enable_android_auto);
        assert!(!config.enable_chromecast);
        assert!(config.enable_dark_mode);
        assert!(!config.sleep_timer);
        assert!(config.reconnect_on_disconnect);
        assert!(config.enable_bluetooth_controls);
        assert_eq!(config.social_links.facebook, "https://facebook.com/mi-radio");
        assert_eq!(config.social_links.instagram, "https://instagram.com/mi-radio");
        assert_eq!(config.social_links.twitter, "");
        assert_eq!(config.social_links.website, "");
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"stream_url\": \"http://x\", ").unwrap();

        assert_eq!(load(file.path()), AppConfig::default());
    }

    #[test]
    fn test_wrong_types_yield_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "enable_dark_mode": "yes" }}"#).unwrap();

        assert_eq!(load(file.path()), AppConfig::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.json"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = parse(
            r#"{
                "stream_url": "http://radio.example.com/live",
                "reconnect_on_disconnect": false,
                "social_links": { "twitter": "https://twitter.com/mi-radio" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.stream_url, "http://radio.example.com/live");
        assert!(!config.reconnect_on_disconnect);
        assert_eq!(config.app_name, "MiRadioApp");
        assert_eq!(config.social_links.twitter, "https://twitter.com/mi-radio");
        assert_eq!(config.social_links.facebook, "https://facebook.com/mi-radio");
    }

    #[test]
    fn test_empty_stream_url_falls_back() {
        let config = parse(r#"{ "stream_url": "" }"#).unwrap();
        assert_eq!(config.stream_url, DEFAULT_STREAM_URL);
    }

    #[test]
    fn test_social_links_hide_empty_entries() {
        let config = parse(
            r#"{
                "social_links": {
                    "facebook": "https://facebook.com/station",
                    "instagram": "https://instagram.com/station",
                    "twitter": "",
                    "website": ""
                }
            }"#,
        )
        .unwrap();

        let visible: Vec<SocialNetwork> = config
            .social_links
            .visible()
            .into_iter()
            .map(|(network, _)| network)
            .collect();
        assert_eq!(visible, vec![SocialNetwork::Facebook, SocialNetwork::Instagram]);
    }

    #[tokio::test]
    async fn test_load_async_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "app_name": "Night Owl FM" }}"#).unwrap();

        let config = load_async(file.path().to_path_buf()).await;
        assert_eq!(config.app_name, "Night Owl FM");
    }
}
