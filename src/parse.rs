use once_cell::sync::Lazy;
use regex::Regex;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static HOURS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*h").unwrap());

static MINUTES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*min").unwrap());

static GRAMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*g").unwrap());

static BACKGROUND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"background:\s*([^;]+)").unwrap());

/// Separator MakerWorld renders between the material name and the mass.
const MATERIAL_SEPARATOR: char = '｜';

// ── Durations ────────────────────────────────────────────────────────────────

/// Parse a plate duration such as `"2 h 15 min"`, `"1.5 h"` or `"45 min"`
/// into whole minutes. Unrecognised text yields 0.
pub fn parse_duration_minutes(text: &str) -> u32 {
    let text = text.trim();
    if text.contains('h') {
        let hours = HOURS_RE
            .captures(text)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(|h| (h * 60.0).round() as u32)
            .unwrap_or(0);
        hours.saturating_add(capture_u32(&MINUTES_RE, text).unwrap_or(0))
    } else if text.contains("min") {
        capture_u32(&MINUTES_RE, text).unwrap_or(0)
    } else {
        0
    }
}

/// Inverse of [`parse_duration_minutes`] for whole minutes.
pub fn format_minutes(total: u32) -> String {
    if total >= 60 {
        let hours = total / 60;
        let minutes = total % 60;
        if minutes > 0 {
            format!("{} h {} min", hours, minutes)
        } else {
            format!("{} h", hours)
        }
    } else {
        format!("{} min", total)
    }
}

// ── Masses ───────────────────────────────────────────────────────────────────

/// Parse `"230 g"` into 230. Returns `None` when no gram figure is present.
pub fn parse_grams(text: &str) -> Option<u32> {
    capture_u32(&GRAMS_RE, text.trim())
}

pub fn format_grams(grams: u32) -> String {
    format!("{} g", grams)
}

// ── Filament chips ───────────────────────────────────────────────────────────

/// Pull the colour expression out of an inline style like
/// `"background: rgb(255, 0, 0); width: 12px"`.
pub fn parse_background(style: &str) -> Option<String> {
    BACKGROUND_RE
        .captures(style)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `"PLA｜"` → `"PLA"`.
pub fn clean_material(text: &str) -> String {
    text.replacen(MATERIAL_SEPARATOR, "", 1).trim().to_string()
}

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text).and_then(|c| c[1].parse().ok())
}
