//! Quota guard for primary-backend writes.
//!
//! Storage areas account usage in UTF-8 bytes while callers hand us text
//! that the host measured in UTF-16 code units, so the byte length is
//! computed over code units with explicit surrogate handling.

use tracing::{debug, warn};

use crate::backend::StorageArea;
use crate::error::{Result, StowError};
use crate::storage::BaseStorage;

/// Quota assumed when the backend does not report one (Firefox sync area).
pub const FALLBACK_QUOTA_BYTES: u64 = 102_400;

/// Usage ratio above which a warning is returned.
pub const WARNING_RATIO: f64 = 0.8;

/// Usage ratio above which the write is refused.
pub const HARD_LIMIT_RATIO: f64 = 1.0;

/// Usage figures gathered immediately before a write. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub bytes_in_use: u64,
    pub quota_bytes: u64,
}

impl QuotaSnapshot {
    pub fn ratio(&self) -> f64 {
        self.bytes_in_use as f64 / self.quota_bytes as f64
    }
}

/// UTF-8 byte length of a sequence of UTF-16 code units.
///
/// Scans from the end: a trailing surrogate adds two bytes on top of its
/// own unit and then skips its lead surrogate, so an astral character is
/// counted as exactly four bytes.
pub fn byte_length_utf16(units: &[u16]) -> usize {
    let mut size = units.len();
    let mut i = units.len();
    while i > 0 {
        i -= 1;
        let code = units[i];
        if code > 0x7f && code <= 0x7ff {
            size += 1;
        } else if code > 0x7ff {
            size += 2;
        }
        if (0xdc00..=0xdfff).contains(&code) && i > 0 {
            i -= 1;
        }
    }
    size
}

/// UTF-8 byte length of `value`, measured through its UTF-16 encoding.
pub fn byte_length(value: &str) -> usize {
    let units: Vec<u16> = value.encode_utf16().collect();
    byte_length_utf16(&units)
}

/// Evaluate a snapshot plus the bytes about to be written.
///
/// Returns the warning text (possibly empty) or `QuotaExceeded`.
pub fn evaluate(snapshot: QuotaSnapshot) -> Result<String> {
    let ratio = snapshot.ratio();

    if ratio > HARD_LIMIT_RATIO {
        return Err(StowError::QuotaExceeded {
            projected: snapshot.bytes_in_use,
            quota: snapshot.quota_bytes,
        });
    }

    if ratio > WARNING_RATIO {
        return Ok(format!(
            "Storage quota is almost full. {}/{}, {}%",
            snapshot.bytes_in_use,
            snapshot.quota_bytes,
            ratio * 100.0
        ));
    }

    Ok(String::new())
}

/// Check whether writing `value` under `ns_key` fits the area quota.
///
/// Skipped (empty warning) in web-app mode, for the managed area, and when
/// the primary client is unreachable or cannot report byte usage.
///
/// The check is not atomic with the write that follows it: two concurrent
/// writers can both pass and jointly exceed the quota.
pub async fn check_quota(storage: &BaseStorage, ns_key: &str, value: &str) -> Result<String> {
    if storage.is_web_app() || storage.area() == StorageArea::Managed {
        return Ok(String::new());
    }

    let client = match storage.primary_client() {
        Some(client) if client.supports_bytes_in_use() => client,
        _ => return Ok(String::new()),
    };

    let quota_bytes = client
        .quota_bytes()
        .filter(|quota| *quota > 0)
        .unwrap_or(FALLBACK_QUOTA_BYTES);
    let new_value_bytes = byte_length(value) as u64;

    let key_list = [ns_key.to_string()];
    let (total_bytes, old_value_bytes) = tokio::try_join!(
        client.get_bytes_in_use(None),
        client.get_bytes_in_use(Some(&key_list[..]))
    )?;

    let snapshot = QuotaSnapshot {
        bytes_in_use: (total_bytes + new_value_bytes).saturating_sub(old_value_bytes),
        quota_bytes,
    };
    debug!(
        key = ns_key,
        bytes_in_use = snapshot.bytes_in_use,
        quota_bytes = snapshot.quota_bytes,
        "quota check"
    );

    let warning = evaluate(snapshot)?;
    if !warning.is_empty() {
        warn!(key = ns_key, "{}", warning);
    }
    Ok(warning)
}
