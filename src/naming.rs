//! Isolation naming
//!
//! Each test case gets its own namespace so parallel cases never touch the
//! same cluster resources. Generated names are valid DNS-1123 labels:
//! lowercase alphanumerics and `-`, at most 63 characters, starting and
//! ending with an alphanumeric.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use rand::Rng;

/// Maximum length of a namespace name
pub const MAX_NAME_LEN: usize = 63;

/// Length of the random part of the suffix
const RANDOM_LEN: usize = 5;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Label used when the given one has no usable characters
const FALLBACK_LABEL: &str = "test";

static GLOBAL: Lazy<NameGenerator> = Lazy::new(NameGenerator::new);

/// Generate a namespace name unique within this process
pub fn generate(label: &str) -> String {
    GLOBAL.next(label)
}

/// Produces collision-free names: a random token plus a monotonic counter
///
/// The counter makes names from one generator distinct by construction;
/// the random token keeps separate runs against the same cluster apart.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counter: AtomicU64,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, label: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = format!("{}{}", random_token(RANDOM_LEN), to_base36(n));

        let budget = MAX_NAME_LEN - suffix.len() - 1;
        let mut label = sanitize_label(label);
        label.truncate(budget);
        let label = label.trim_end_matches('-');
        let label = if label.is_empty() { FALLBACK_LABEL } else { label };

        format!("{}-{}", label, suffix)
    }
}

/// Whether `name` is usable as a namespace name
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

/// Lowercase, map everything else to `-`, collapse and trim dashes
fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(SUFFIX_CHARSET[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
