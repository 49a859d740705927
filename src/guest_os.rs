// Guest identifier -> readable OS label, e.g. "rhel7_64Guest" -> "RHEL 7 (64-bit)".

use crate::models::UNKNOWN;
use regex::Regex;
use std::sync::LazyLock;

/// Leading letters, then a version that starts with digits.
static NAME_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)(\d+\w*)$").expect("guest-id pattern is a valid regex")
});

/// Format a guest identifier. Pure and deterministic.
///
/// Rules in order: absent or empty -> "Unknown"; anything containing "coreos" ->
/// "CoreOS"; drop a trailing "Guest"; a trailing "64"/"32" becomes the bitness
/// suffix; underscores are removed; `<letters><digits...>` renders as
/// `"<LETTERS> <version><bitness>"` with "WIN"/"WINDOWS" shown as "Windows";
/// anything else is capitalized and gets the bitness suffix.
pub fn format_guest_id(guest_id: Option<&str>) -> String {
    let Some(guest_id) = guest_id.filter(|s| !s.is_empty()) else {
        return UNKNOWN.to_string();
    };
    if guest_id.to_ascii_lowercase().contains("coreos") {
        return "CoreOS".to_string();
    }

    let mut id = guest_id.strip_suffix("Guest").unwrap_or(guest_id);
    let mut bitness = "";
    if let Some(rest) = id.strip_suffix("64") {
        bitness = " (64-bit)";
        id = rest;
    } else if let Some(rest) = id.strip_suffix("32") {
        bitness = " (32-bit)";
        id = rest;
    }
    let id = id.replace('_', "");

    if let Some(caps) = NAME_VERSION.captures(&id) {
        let name = caps[1].to_ascii_uppercase();
        let name = match name.as_str() {
            "WINDOWS" | "WIN" => "Windows".to_string(),
            _ => name,
        };
        return format!("{} {}{}", name, &caps[2], bitness);
    }

    format!("{}{}", capitalize(&id), bitness)
}

/// First character uppercased, the rest lowercased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
