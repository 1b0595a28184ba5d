/*
Simple i18n helper for customer-facing push copy.

This module provides:
- A tiny embedded translations store for HR/EN (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- `resolve_language` to map stored brand language tags onto a catalog.

Usage:
    use crate::i18n;
    let title = i18n::tr(None, "messages.appointment_reminder_title", None);
    let body = i18n::tr(Some("hr"), "messages.appointment_reminder_body_named", Some(&[("venue", "Centar"), ("staff", "Ivan"), ("time", "14:30")]));

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `hr`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "hr";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const HR_JSON: &str = r#"
{
  "messages.visit_reminder_title": "Nedostaješ nam!",
  "messages.visit_reminder_title_named": "{name}, nedostaješ nam!",
  "messages.visit_reminder_body": "Čekamo te i veselimo se tvom povratku. Rezerviraj termin – brzo i jednostavno!",
  "messages.visit_reminder_body_named": "{staff} te čeka i veseli se tvom povratku. Rezerviraj termin – brzo i jednostavno!",
  "messages.appointment_reminder_title": "Vidimo se za 2 sata!",
  "messages.appointment_reminder_body": "Tvoj termin u {venue} kreće u {time}.",
  "messages.appointment_reminder_body_named": "Tvoj termin u {venue} s {staff} kreće u {time}.",
  "messages.cancellation_staff_title": "Termin otkazan",
  "messages.cancellation_staff_body": "Termin u {time} ({customer}) je otkazan.",
  "fallback.venue_name": "lokacija",
  "app.name": "Salon Automation"
}
"#;

const EN_JSON: &str = r#"
{
  "messages.visit_reminder_title": "We miss you!",
  "messages.visit_reminder_title_named": "{name}, we miss you!",
  "messages.visit_reminder_body": "We're waiting for you and looking forward to your return. Book an appointment – quick and easy!",
  "messages.visit_reminder_body_named": "{staff} is waiting for you and looking forward to your return. Book an appointment – quick and easy!",
  "messages.appointment_reminder_title": "See you in 2 hours!",
  "messages.appointment_reminder_body": "Your appointment at {venue} starts at {time}.",
  "messages.appointment_reminder_body_named": "Your appointment at {venue} with {staff} starts at {time}.",
  "messages.cancellation_staff_title": "Appointment cancelled",
  "messages.cancellation_staff_body": "The {time} appointment ({customer}) was cancelled.",
  "fallback.venue_name": "the salon",
  "app.name": "Salon Automation"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let hr_map: HashMap<String, String> = serde_json::from_str(HR_JSON).unwrap_or_else(|e| {
        panic!("failed to parse HR_JSON in i18n module: {}", e);
    });
    out.insert("hr".to_string(), hr_map);

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has a translation catalog.
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Resolve a stored language tag (e.g. a brand's `locale` column, possibly
/// written by external tooling as "en-US") into a supported catalog code.
/// Returns None when unset or unsupported; `tr` then falls back to the
/// default language.
pub fn resolve_language(lang: Option<&str>) -> Option<String> {
    let normalized = normalize_language(lang?);
    if is_supported_language(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

/// Translate a key using an explicit language (or default if None).
///
/// - `lang`: optional language code (`"hr"`, `"en"`, ...). If None, DEFAULT_LANG is used.
/// - `key`: translation key (flat string, e.g. "messages.visit_reminder_title").
/// - `params`: optional slice of (name, value) for placeholder replacement. Replacements use single-brace placeholders `{name}`.
///
/// Returns the translated and parameter-substituted string. If no translation is found,
/// returns a sensible fallback (default language value or the key itself).
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        // Fallback to default language
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        // If still missing, return the key itself (useful in logs)
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}
