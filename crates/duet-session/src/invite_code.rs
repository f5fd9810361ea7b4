//! Invite codes and links.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

/// Length of an invite code.
pub const INVITE_CODE_LENGTH: usize = 8;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

static INVITE_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{8}$").expect("Invalid regex"));

/// Generates a random upper-case alphanumeric code.
pub fn generate_invite_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a supplied code, or `None` if it is malformed.
pub fn normalize_invite_code(code: &str) -> Option<String> {
    let code = code.trim();
    INVITE_CODE_REGEX
        .is_match(code)
        .then(|| code.to_ascii_uppercase())
}

/// `{base_url}/collaborate/join/{code}`
pub fn invite_link(base_url: &str, code: &str) -> String {
    format!("{}/collaborate/join/{}", base_url.trim_end_matches('/'), code)
}
