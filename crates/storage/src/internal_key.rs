//! Physical key encoding for versioned keys
//!
//! Layout: `MVCCKEY_<user_key>_<hex16(!ts)>_<flag>` where `flag` is `1` for
//! deletion markers and `0` otherwise. Inverting the timestamp makes newer
//! versions sort first, so a forward seek to `encode(key, ts)` lands on the
//! newest version of `key` committed at or before `ts`.
//!
//! Decoding works from the right, so user keys may contain any byte. The
//! versions of one user key stay contiguous unless another user key extends
//! it with `_`.

use txkv_core::{Error, Result, Timestamp, MIN_TIMESTAMP};

const PREFIX: &[u8] = b"MVCCKEY_";
/// `_` + 16 hex digits + `_` + flag
const SUFFIX_LEN: usize = 1 + 16 + 1 + 1;

/// A decoded physical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    user_key: Vec<u8>,
    ts: Timestamp,
    is_delete: bool,
}

impl InternalKey {
    /// Key for the version of `user_key` committed at `ts`
    pub fn new(user_key: impl Into<Vec<u8>>, ts: Timestamp, is_delete: bool) -> Self {
        Self {
            user_key: user_key.into(),
            ts,
            is_delete,
        }
    }

    /// Physical byte representation
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX.len() + self.user_key.len() + SUFFIX_LEN);
        out.extend_from_slice(PREFIX);
        out.extend_from_slice(&self.user_key);
        out.extend_from_slice(format!("_{:016x}_", !self.ts).as_bytes());
        out.push(if self.is_delete { b'1' } else { b'0' });
        out
    }

    /// Parse a physical key
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if `raw` is not a well-formed physical key.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let corrupt = || {
            Error::Corruption(format!(
                "malformed mvcc key: {}",
                String::from_utf8_lossy(raw)
            ))
        };
        if raw.len() < PREFIX.len() + SUFFIX_LEN || !raw.starts_with(PREFIX) {
            return Err(corrupt());
        }
        let (body, suffix) = raw.split_at(raw.len() - SUFFIX_LEN);
        let user_key = &body[PREFIX.len()..];

        if suffix[0] != b'_' || suffix[17] != b'_' {
            return Err(corrupt());
        }
        let is_delete = match suffix[18] {
            b'1' => true,
            b'0' => false,
            _ => return Err(corrupt()),
        };
        let hex = std::str::from_utf8(&suffix[1..17]).map_err(|_| corrupt())?;
        let inverted = u64::from_str_radix(hex, 16).map_err(|_| corrupt())?;

        Ok(Self {
            user_key: user_key.to_vec(),
            ts: !inverted,
            is_delete,
        })
    }

    /// The logical key
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Commit timestamp of the version
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Whether the version is a deletion marker
    pub fn is_delete(&self) -> bool {
        self.is_delete
    }

    /// Whether `raw` carries the physical key prefix
    pub fn is_versioned(raw: &[u8]) -> bool {
        raw.starts_with(PREFIX)
    }

    /// Smallest physical key after every version of `user_key`
    pub fn past_versions(user_key: &[u8]) -> Vec<u8> {
        let mut out = Self::new(user_key, MIN_TIMESTAMP, true).encode();
        out.push(0);
        out
    }

    /// Lowest physical key any user key `>= left` can have
    ///
    /// `encode(left, ..)` is not enough: `left0` sorts before `left_` in
    /// physical order.
    pub fn lower_bound(left: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX.len() + left.len());
        out.extend_from_slice(PREFIX);
        out.extend_from_slice(left);
        out
    }

    /// Exclusive physical bound for every user key `< right`
    ///
    /// An empty `right` is unbounded. A user key that is a proper prefix of
    /// `right` may sort after `right` itself, so the bound covers the
    /// versions of each prefix too.
    pub fn upper_bound(right: &[u8]) -> Option<Vec<u8>> {
        if right.is_empty() {
            return None;
        }
        (0..right.len())
            .map(|len| {
                let mut prefix_end = Self::lower_bound(&right[..len]);
                prefix_end.extend_from_slice(&[b'_', u8::MAX]);
                prefix_end
            })
            .chain(std::iter::once(Self::lower_bound(right)))
            .max()
    }
}
