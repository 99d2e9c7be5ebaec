// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic tunnel id derivation (C1).
//!
//! `derive` maps a `(client_secret, server_secret)` pair to a 16-character
//! base-36 public id via `HMAC-SHA-256` plus rejection sampling. The mapping
//! is pure and never stored as authoritative state — it is always
//! recomputable from the two secrets.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Wire-contract domain separator. Changing this invalidates every
/// previously issued tunnel id.
const DOMAIN: &[u8] = b"tunnel-id-v1";

/// Length of a rendered tunnel id, in base-36 characters.
pub const ID_LEN: usize = 16;

const BASE: u128 = 36;

/// Upper bound on HMAC candidates drawn before giving up. Each MAC yields two
/// candidate integers (first/last 16 bytes), so this bounds both halves.
const MAX_CANDIDATES: u32 = 1000;

/// Opaque 16-character base-36 tunnel id (`[0-9a-z]{16}`).
///
/// Equality is byte-wise. Always derived via [`derive`]; never constructed
/// from arbitrary strings outside this module's control (see
/// [`TunnelId::parse`] for the one exception — validating ids already seen
/// on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(String);

impl TunnelId {
    /// Validate that `s` looks like a tunnel id (`[0-9a-z]{16}`) without
    /// claiming it was actually derived from any secret pair. Used by the
    /// edge front door to sanity-check ids extracted from the wire before
    /// looking them up in the session table.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()) {
            Some(Self(s.to_owned()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of candidate integers, `N`, a valid integer must land in:
/// `N = 36^16`, the size of the output alphabet.
fn modulus() -> u128 {
    BASE.pow(ID_LEN as u32)
}

/// Largest multiple of `N` that fits in `u128`, used to reject biased
/// candidates via rejection sampling.
fn rejection_limit() -> u128 {
    let n = modulus();
    (u128::MAX / n) * n
}

/// Derive the public tunnel id for a `(client_secret, server_secret)` pair.
///
/// Computes `HMAC-SHA-256(key = server_secret, msg = DOMAIN || 0x00 ||
/// client_secret || 0x00 || counter)` for increasing `counter`, treating the
/// first and last 16 bytes of each MAC as big-endian `u128` candidates.
/// Rejection sampling discards biased candidates so the result is exactly
/// uniform over `[0, 36^16)`.
///
/// # Panics
///
/// Never, in practice: the probability of exhausting [`MAX_CANDIDATES`]
/// candidates without an accepted one is astronomically small. Exhausting
/// the bound is treated as a bug and panics rather than returning a bad id.
#[allow(clippy::panic)]
pub fn derive(client_secret: &[u8], server_secret: &[u8]) -> TunnelId {
    let limit = rejection_limit();
    let n = modulus();

    let mut candidates_tried: u32 = 0;
    for counter in 0u64.. {
        let mac = mac_for_counter(server_secret, client_secret, counter);
        for half in [&mac[..16], &mac[16..]] {
            candidates_tried += 1;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(half);
            let x = u128::from_be_bytes(buf);
            if x < limit {
                return TunnelId(render_base36(x % n));
            }
            if candidates_tried >= MAX_CANDIDATES {
                panic!("tunnel id rejection sampling exceeded {MAX_CANDIDATES} candidates");
            }
        }
    }
    unreachable!("counter is u64, loop body always returns or panics first")
}

/// Recompute the id for `(client_secret, server_secret)` and compare it
/// byte-wise against `id`.
pub fn verify(id: &TunnelId, client_secret: &[u8], server_secret: &[u8]) -> bool {
    derive(client_secret, server_secret) == *id
}

fn mac_for_counter(server_secret: &[u8], client_secret: &[u8], counter: u64) -> [u8; 32] {
    // HMAC accepts keys of any length, including the empty key used by some
    // deployments; `new_from_slice` never fails for Sha256-backed HMAC.
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(server_secret).expect("HMAC accepts any key length");
    mac.update(DOMAIN);
    mac.update(&[0u8]);
    mac.update(client_secret);
    mac.update(&[0u8]);
    mac.update(counter.to_string().as_bytes());
    mac.finalize().into_bytes().into()
}

/// Render `x` (which must be `< 36^16`) as a left-padded, lowercase base-36
/// string of exactly [`ID_LEN`] characters.
fn render_base36(mut x: u128) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut chars = [b'0'; ID_LEN];
    for slot in chars.iter_mut().rev() {
        *slot = ALPHABET[(x % BASE) as usize];
        x /= BASE;
    }
    // SAFETY-free: all bytes come from ALPHABET, which is ASCII.
    String::from_utf8(chars.to_vec()).unwrap_or_default()
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
