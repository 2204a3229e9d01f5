use anyhow::Result;
use log::debug;

/// Playlist formats a station may publish instead of a direct stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
}

impl PlaylistKind {
    /// Guess the playlist kind from the URL path, ignoring any query string
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".pls") {
            Some(PlaylistKind::Pls)
        } else if path.ends_with(".m3u") || path.ends_with(".m3u8") {
            Some(PlaylistKind::M3u)
        } else {
            None
        }
    }
}

/// Parse a .pls playlist and return the first stream URL
pub fn parse_pls_content(content: &str) -> Result<String> {
    for line in content.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once('=') {
            if key.starts_with("File") && !value.trim().is_empty() {
                return Ok(value.trim().to_string());
            }
        }
    }
    anyhow::bail!("No stream URL found in .pls file")
}

/// Parse an .m3u/.m3u8 playlist and return the first non-comment entry
pub fn parse_m3u_content(content: &str) -> Result<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("No stream URL found in m3u playlist"))
}

/// Resolve a playlist URL to the stream it points at. Direct stream URLs are
/// returned unchanged.
pub async fn resolve_stream_url(client: &reqwest::Client, url: &str) -> Result<String> {
    let Some(kind) = PlaylistKind::from_url(url) else {
        return Ok(url.to_string());
    };

    debug!("Resolving {:?} playlist: {}", kind, url);
    let content = client.get(url).send().await?.error_for_status()?.text().await?;

    let resolved = match kind {
        PlaylistKind::Pls => parse_pls_content(&content)?,
        PlaylistKind::M3u => parse_m3u_content(&content)?,
    };
    debug!("Playlist resolved to {}", resolved);
    Ok(resolved)
}
