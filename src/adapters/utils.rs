//! Shared helpers for adapter-layer validation and parsing.

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
///
/// Used to validate WiFi SSIDs and portal-submitted credentials.
pub(super) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Value of `key` in an `application/x-www-form-urlencoded` body.
///
/// Invalid `%` escapes are kept literally, as browsers do.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
pub(super) fn form_value(body: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(body.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
