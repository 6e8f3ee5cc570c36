use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use rand::rngs::OsRng;

use super::ChallengeBit;

const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

pub const PRIMALITY_ROUNDS: usize = 40;

pub fn generate_prime(bits: u64) -> BigUint {
    let mut rng = OsRng;
    let top = BigUint::one() << (bits - 1);
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= &top;
        if candidate.is_even() {
            candidate += 1u32;
        }

        if is_probably_prime(&candidate, PRIMALITY_ROUNDS) {
            return candidate;
        }
    }
}

/// Generates `N = p * q` from two distinct primes of `bits / 2` bits each.
/// The factors are returned so callers can drop them explicitly.
pub fn generate_modulus(bits: u64) -> (BigUint, BigUint, BigUint) {
    let half = bits / 2;
    let p = generate_prime(half);
    loop {
        let q = generate_prime(half);
        if q != p {
            let n = &p * &q;
            return (p, q, n);
        }
    }
}

// Miller-Rabin with a quick trial division pass
pub fn is_probably_prime(n: &BigUint, rounds: usize) -> bool {
    if n < &BigUint::from(2u32) {
        return false;
    }
    if n == &BigUint::from(2u32) || n == &BigUint::from(3u32) {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // Write n-1 as d * 2^r
    let n_minus_1 = n - 1u32;
    let mut d = n_minus_1.clone();
    let mut r = 0u32;
    while d.is_even() {
        d >>= 1;
        r += 1;
    }

    let mut rng = OsRng;
    let two = BigUint::from(2u32);

    'witness_loop: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);

        if x.is_one() || x == n_minus_1 {
            continue 'witness_loop;
        }

        for _ in 0..r - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness_loop;
            }
        }
        return false;
    }
    true
}

/// Returns `(g, x, y)` with `a*x + b*y = g = gcd(a, b)`.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_x, mut x) = (BigInt::one(), BigInt::zero());
    let (mut old_y, mut y) = (BigInt::zero(), BigInt::one());

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_x = &old_x - &q * &x;
        old_x = std::mem::replace(&mut x, next_x);
        let next_y = &old_y - &q * &y;
        old_y = std::mem::replace(&mut y, next_y);
    }
    (old_r, old_x, old_y)
}

pub fn is_coprime(a: &BigUint, n: &BigUint) -> bool {
    let (g, _, _) = extended_gcd(&to_signed(a), &to_signed(n));
    g.is_one()
}

pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let (g, x, _) = extended_gcd(&to_signed(a), &to_signed(m));
    if !g.is_one() {
        return None;
    }
    x.mod_floor(&to_signed(m)).to_biguint()
}

fn to_signed(value: &BigUint) -> BigInt {
    BigInt::from_biguint(Sign::Plus, value.clone())
}

/// Uniform sample from `[low, high)`.
pub fn random_in_range(low: &BigUint, high: &BigUint) -> BigUint {
    let mut rng = OsRng;
    rng.gen_biguint_range(low, high)
}

/// Private key `s` uniform in `[2, N-2]` with `gcd(s, N) = 1`.
pub fn generate_secret(n: &BigUint) -> BigUint {
    let low = BigUint::from(2u32);
    let high = n - 1u32;
    loop {
        let s = random_in_range(&low, &high);
        if is_coprime(&s, n) {
            return s;
        }
    }
}

pub fn public_value(s: &BigUint, n: &BigUint) -> BigUint {
    s.modpow(&BigUint::from(2u32), n)
}

/// Commitment randomness `r` uniform in `[1, N-1]`.
pub fn generate_nonce(n: &BigUint) -> BigUint {
    random_in_range(&BigUint::one(), n)
}

pub fn compute_commitment(r: &BigUint, n: &BigUint) -> BigUint {
    r.modpow(&BigUint::from(2u32), n)
}

pub fn compute_response(r: &BigUint, s: &BigUint, e: ChallengeBit, n: &BigUint) -> BigUint {
    match e {
        ChallengeBit::Zero => r % n,
        ChallengeBit::One => (r * s) % n,
    }
}

pub fn random_challenge() -> ChallengeBit {
    let mut rng = OsRng;
    if rng.gen_bool(0.5) {
        ChallengeBit::One
    } else {
        ChallengeBit::Zero
    }
}

/// Checks `y^2 = x * v^e (mod N)`.
pub fn verify_round(n: &BigUint, v: &BigUint, x: &BigUint, e: ChallengeBit, y: &BigUint) -> bool {
    let left = y.modpow(&BigUint::from(2u32), n);
    let right = match e {
        ChallengeBit::Zero => x % n,
        ChallengeBit::One => (x * v) % n,
    };
    left == right
}
