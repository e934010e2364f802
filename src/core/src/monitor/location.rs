use std::path::Path;

/// Maps a remote address to a human-readable location.
///
/// The engine only needs "a label or nothing"; deployments without a
/// location table use [`UnknownLocation`].
pub trait LocationResolver: Send + Sync + 'static {
    fn resolve(&self, remote_address: &str) -> Option<String>;
}

/// Resolver used when no location data source is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownLocation;

impl LocationResolver for UnknownLocation {
    fn resolve(&self, _remote_address: &str) -> Option<String> {
        None
    }
}

/// Longest-prefix lookup over a `prefix,location` table.
///
/// ```text
/// # comment
/// 10.0.,Home LAN
/// 203.0.113.,Office
/// ```
#[derive(Debug, Clone, Default)]
pub struct PrefixTableResolver {
    entries: Vec<(String, String)>,
}

impl PrefixTableResolver {
    pub fn parse(raw: &str) -> Self {
        let mut entries: Vec<(String, String)> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (prefix, label) = line.split_once(',')?;
                let (prefix, label) = (prefix.trim(), label.trim());
                if prefix.is_empty() || label.is_empty() {
                    return None;
                }
                Some((prefix.to_string(), label.to_string()))
            })
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read location table {}: {e}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocationResolver for PrefixTableResolver {
    fn resolve(&self, remote_address: &str) -> Option<String> {
        let addr = remote_address.trim();
        self.entries
            .iter()
            .find(|(prefix, _)| addr.starts_with(prefix.as_str()))
            .map(|(_, label)| label.clone())
    }
}
