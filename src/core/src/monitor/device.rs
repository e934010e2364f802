use playwatch_protocol::DeviceCategory;

/// Keyword table checked in order; the first category with a hit wins.
const RULES: &[(DeviceCategory, &[&str])] = &[
    (
        DeviceCategory::Tv,
        &[
            "tv", "roku", "tizen", "webos", "chromecast", "kodi", "shield", "firestick",
        ],
    ),
    (
        DeviceCategory::Web,
        &["web", "chrome", "firefox", "safari", "edge", "opera", "browser"],
    ),
    (
        DeviceCategory::Mobile,
        &["iphone", "ipad", "ios", "android", "mobile"],
    ),
    (
        DeviceCategory::Desktop,
        &[
            "windows",
            "macos",
            "mac os",
            "linux",
            "desktop",
            "vlc",
            "mpv",
            "media player",
            "theater",
        ],
    ),
];

/// Bucket a session by its client and device names (case-insensitive
/// substring match). Falls back to [`DeviceCategory::Other`].
pub fn classify_device(client_name: &str, device_name: &str) -> DeviceCategory {
    let haystack = format!("{client_name} {device_name}").to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| haystack.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(DeviceCategory::Other)
}
