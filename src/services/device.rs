//! Coarse device description from a `User-Agent` header.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

fn browser_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
    RE.get_or_init(|| {
        Regex::new(r"(?i)(Edg|OPR|Firefox|Chrome|CriOS|Safari)/(\d+)").expect("Invalid regex")
    })
}

fn classify_browser(user_agent: &str) -> Option<String> {
    let found: Vec<&str> = browser_regex()
        .captures_iter(user_agent)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let has = |token: &str| found.iter().any(|f| f.eq_ignore_ascii_case(token));

    let name = if has("Edg") {
        "Edge"
    } else if has("OPR") {
        "Opera"
    } else if has("Firefox") {
        "Firefox"
    } else if has("Chrome") || has("CriOS") {
        "Chrome"
    } else if has("Safari") {
        "Safari"
    } else if user_agent.to_ascii_lowercase().contains("curl/") {
        "curl"
    } else {
        return None;
    };

    Some(name.to_string())
}

fn classify_os(user_agent: &str) -> Option<String> {
    let ua = user_agent.to_ascii_lowercase();

    let name = if ua.contains("iphone") || ua.contains("ipad") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("cros") {
        "ChromeOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        return None;
    };

    Some(name.to_string())
}

fn classify_type(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();

    if ua.contains("ipad") || ua.contains("tablet") {
        "tablet"
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else if ua.contains("bot") || ua.contains("curl/") {
        "bot"
    } else {
        "desktop"
    }
}

#[must_use]
pub fn parse_user_agent(user_agent: Option<&str>) -> DeviceInfo {
    let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return DeviceInfo::default();
    };

    let browser = classify_browser(ua);
    let os = classify_os(ua);
    let device_type = classify_type(ua).to_string();

    let device_name = match (&browser, &os) {
        (Some(b), Some(o)) => Some(format!("{b} on {o}")),
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (None, None) => None,
    };

    DeviceInfo {
        device_name,
        device_type: Some(device_type),
        browser,
        os,
    }
}

/// Humanized label such as `"Chrome on macOS"`.
#[must_use]
pub fn describe(browser: Option<&str>, os: Option<&str>) -> String {
    match (browser, os) {
        (Some(b), Some(o)) => format!("{b} on {o}"),
        (Some(b), None) => b.to_string(),
        (None, Some(o)) => format!("Unknown browser on {o}"),
        (None, None) => "Unknown device".to_string(),
    }
}
