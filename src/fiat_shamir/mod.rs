pub mod crypto;

use std::fmt;

use num_bigint::BigUint;
use num_integer::Integer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ParamError;
use crate::message::decimal;

pub use crypto::*;

pub const MIN_MODULUS_BITS: u64 = 16;

/// Public composite modulus `N = p * q`. The factors never leave the
/// constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modulus(BigUint);

impl Modulus {
    pub fn generate(bits: u64) -> Result<Self, ParamError> {
        if bits < MIN_MODULUS_BITS {
            return Err(ParamError::TooSmall { bits, min: MIN_MODULUS_BITS });
        }
        let (_p, _q, n) = generate_modulus(bits);
        Ok(Self(n))
    }

    pub fn from_primes(p: &BigUint, q: &BigUint) -> Result<Self, ParamError> {
        let valid = |f: &BigUint| f.is_odd() && is_probably_prime(f, PRIMALITY_ROUNDS);
        if p == q || !valid(p) || !valid(q) {
            return Err(ParamError::InvalidFactors);
        }
        Ok(Self(p * q))
    }

    /// Wraps a modulus received from a server.
    pub fn from_public(n: BigUint) -> Result<Self, ParamError> {
        if n.is_even() || n <= BigUint::from(3u32) {
            return Err(ParamError::InvalidModulus);
        }
        Ok(Self(n))
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn bits(&self) -> u64 {
        self.0.bits()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    /// `true` when `1 < v < N`.
    pub fn contains_public_value(&self, v: &BigUint) -> bool {
        v > &BigUint::from(1u32) && v < &self.0
    }

    /// `true` when `0 < x < N`.
    pub fn contains_residue(&self, x: &BigUint) -> bool {
        x > &BigUint::from(0u32) && x < &self.0
    }
}

/// Short hex digest of a modulus, for logs and key listings.
pub fn fingerprint(n: &BigUint) -> String {
    let digest = Sha256::digest(n.to_bytes_be());
    hex::encode(&digest[..8])
}

/// Verifier's one-bit challenge `e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeBit {
    Zero,
    One,
}

impl ChallengeBit {
    pub fn flipped(self) -> Self {
        match self {
            ChallengeBit::Zero => ChallengeBit::One,
            ChallengeBit::One => ChallengeBit::Zero,
        }
    }
}

impl From<ChallengeBit> for u8 {
    fn from(e: ChallengeBit) -> Self {
        match e {
            ChallengeBit::Zero => 0,
            ChallengeBit::One => 1,
        }
    }
}

impl TryFrom<u64> for ChallengeBit {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChallengeBit::Zero),
            1 => Ok(ChallengeBit::One),
            other => Err(other),
        }
    }
}

impl fmt::Display for ChallengeBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Client-side identity: `v = s^2 mod N` with `gcd(s, N) = 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    #[serde(skip)]
    pub username: String,
    #[serde(with = "decimal")]
    pub s: BigUint,
    #[serde(rename = "N", with = "decimal")]
    pub n: BigUint,
    #[serde(with = "decimal")]
    pub v: BigUint,
}

impl KeyMaterial {
    pub fn generate(username: &str, modulus: &Modulus) -> Self {
        let n = modulus.value().clone();
        let s = generate_secret(&n);
        let v = public_value(&s, &n);
        Self {
            username: username.to_string(),
            s,
            n,
            v,
        }
    }

    /// Re-derives `v` for a different modulus. Returns `None` when `s` is not
    /// a unit modulo the new `N`.
    pub fn rebind(&self, modulus: &Modulus) -> Option<Self> {
        let n = modulus.value();
        if !is_coprime(&self.s, n) {
            return None;
        }
        Some(Self {
            username: self.username.clone(),
            s: self.s.clone(),
            n: n.clone(),
            v: public_value(&self.s, n),
        })
    }
}

/// Per-round secret nonce. Kept out of `Debug` output.
pub struct Nonce(BigUint);

#[derive(Debug, Clone)]
pub struct Prover {
    key: KeyMaterial,
}

impl Prover {
    pub fn new(key: KeyMaterial) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Draws `r` and returns it with the commitment `x = r^2 mod N`.
    pub fn commit(&self) -> (Nonce, BigUint) {
        let r = generate_nonce(&self.key.n);
        let x = compute_commitment(&r, &self.key.n);
        (Nonce(r), x)
    }

    pub fn respond(&self, nonce: &Nonce, e: ChallengeBit) -> BigUint {
        compute_response(&nonce.0, &self.key.s, e, &self.key.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modulus() -> Modulus {
        Modulus::from_primes(&BigUint::from(1_000_000_007u64), &BigUint::from(998_244_353u64))
            .unwrap()
    }

    #[test]
    fn from_primes_rejects_bad_factors() {
        let p = BigUint::from(1_000_000_007u64);
        assert!(Modulus::from_primes(&p, &p).is_err());
        assert!(Modulus::from_primes(&p, &BigUint::from(15u32)).is_err());
        assert!(Modulus::from_primes(&p, &BigUint::from(2u32)).is_err());
    }

    #[test]
    fn generate_enforces_minimum_size() {
        assert!(matches!(Modulus::generate(8), Err(ParamError::TooSmall { .. })));
        let m = Modulus::generate(64).unwrap();
        assert!(m.value().is_odd());
    }

    #[test]
    fn key_material_satisfies_public_value_relation() {
        let m = modulus();
        let key = KeyMaterial::generate("alice", &m);
        assert_eq!(key.v, key.s.modpow(&BigUint::from(2u32), m.value()));
        assert!(m.contains_public_value(&key.v));
    }

    #[test]
    fn rebind_recomputes_public_value() {
        let key = KeyMaterial::generate("alice", &modulus());
        let other = Modulus::from_primes(&BigUint::from(1_000_000_009u64), &BigUint::from(999_999_937u64))
            .unwrap();
        let rebound = key.rebind(&other).expect("s is a unit modulo the other modulus");
        assert_eq!(&rebound.n, other.value());
        assert_eq!(rebound.v, public_value(&key.s, other.value()));
        assert_eq!(rebound.s, key.s);
        assert_eq!(rebound.username, "alice");

        // a secret sharing a factor with N cannot be rebound
        let shared = KeyMaterial {
            s: BigUint::from(1_000_000_009u64),
            ..key
        };
        assert!(shared.rebind(&other).is_none());
    }

    #[test]
    fn challenge_bit_conversions() {
        assert_eq!(ChallengeBit::try_from(0u64), Ok(ChallengeBit::Zero));
        assert_eq!(ChallengeBit::try_from(1u64), Ok(ChallengeBit::One));
        assert_eq!(ChallengeBit::try_from(2u64), Err(2));
        assert_eq!(ChallengeBit::One.flipped(), ChallengeBit::Zero);
    }

    #[test]
    fn fingerprint_is_stable() {
        let m = modulus();
        assert_eq!(m.fingerprint(), modulus().fingerprint());
        assert_eq!(m.fingerprint().len(), 16);
    }
}
