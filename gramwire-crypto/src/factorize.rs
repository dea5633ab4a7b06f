//! Pollard-rho factorization in Lopatin's formulation, used for the PQ step.

/// Error returned when `pq` cannot be split.
#[derive(Clone, Debug, PartialEq)]
pub enum FactorizeError {
    /// `pq` is below 4 and has no non-trivial factorization.
    TooSmall { pq: u64 },
    /// No factor was found within the iteration budget (`pq` is likely prime).
    NoFactor { pq: u64 },
}

impl std::fmt::Display for FactorizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSmall { pq } => write!(f, "pq {pq} is too small to factorize"),
            Self::NoFactor { pq } => write!(f, "no factor found for pq {pq}"),
        }
    }
}
impl std::error::Error for FactorizeError {}

const ATTEMPTS: u32 = 3;
const TRIAL_LIMIT: u64 = 1 << 22;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn ordered(p: u64, q: u64) -> (u64, u64) {
    (p.min(q), p.max(q))
}

/// Factorize `pq` into `(p, q)` with `p <= q` and `p * q == pq`.
pub fn factorize(pq: u64) -> Result<(u64, u64), FactorizeError> {
    let mut seed = [0u8; 8];
    getrandom::getrandom(&mut seed).expect("getrandom failed");
    factorize_seeded(pq, u64::from_le_bytes(seed))
}

// xorshift64*; quality only affects how quickly rho finds a cycle.
fn next_rand(state: &mut u64) -> u64 {
    *state ^= *state >> 12;
    *state ^= *state << 25;
    *state ^= *state >> 27;
    state.wrapping_mul(0x2545_f491_4f6c_dd1d)
}

pub(crate) fn factorize_seeded(pq: u64, seed: u64) -> Result<(u64, u64), FactorizeError> {
    if pq < 4 {
        return Err(FactorizeError::TooSmall { pq });
    }
    if pq % 2 == 0 {
        return Ok(ordered(2, pq / 2));
    }

    let mut state = seed | 1;
    let n = pq as u128;

    for attempt in 0..ATTEMPTS {
        let c = (next_rand(&mut state) & 15) as u128 + 17;
        let mut x = (next_rand(&mut state) % (pq - 1)) as u128 + 1;
        let mut y = x;
        let limit = 1u64 << (18 + attempt);

        for j in 1..limit {
            x = (x * x + c) % n;
            let diff = x.abs_diff(y) as u64;
            let g = gcd(diff, pq);
            if g != 1 && g != pq {
                return Ok(ordered(g, pq / g));
            }
            if j & (j - 1) == 0 {
                y = x;
            }
        }
    }

    trial_division(pq)
}

fn trial_division(pq: u64) -> Result<(u64, u64), FactorizeError> {
    let mut d = 3u64;
    let mut steps = 0u64;
    while d.saturating_mul(d) <= pq && steps < TRIAL_LIMIT {
        if pq % d == 0 {
            return Ok((d, pq / d));
        }
        d += 2;
        steps += 1;
    }
    Err(FactorizeError::NoFactor { pq })
}
