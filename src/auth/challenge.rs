//! Login challenge material.
//!
//! The server hands out a fresh random challenge per login attempt. The client
//! proves it knows the salted password hash by returning
//! `SHA-256(hash || challenge)`; the server computes the same digest and
//! compares the two in constant time.

use crate::config::CHALLENGE_LENGTH;
use crate::core::packet::{PASSWORD_HASH_LEN, SOLUTION_LEN};
use crate::error::{constants, ProtocolError, Result};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// A single-use login challenge. Wiped from memory when dropped.
pub type Challenge = Zeroizing<[u8; CHALLENGE_LENGTH]>;

/// Draws a new challenge from the operating system's random source.
pub fn generate_challenge() -> Result<Challenge> {
    let mut challenge = Zeroizing::new([0u8; CHALLENGE_LENGTH]);
    getrandom::fill(&mut challenge[..]).map_err(|e| {
        ProtocolError::Random(format!("{}: {e}", constants::ERR_RANDOM_SOURCE))
    })?;
    Ok(challenge)
}

/// The answer a client holding `password_hash` gives to `challenge`.
pub fn solution_for(
    password_hash: &[u8; PASSWORD_HASH_LEN],
    challenge: &[u8; CHALLENGE_LENGTH],
) -> [u8; SOLUTION_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(password_hash);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Checks a client's answer without leaking where the first mismatch is.
pub fn verify_solution(
    password_hash: &[u8; PASSWORD_HASH_LEN],
    challenge: &[u8; CHALLENGE_LENGTH],
    solution: &[u8; SOLUTION_LEN],
) -> bool {
    let expected = Zeroizing::new(solution_for(password_hash, challenge));
    constant_time_eq(&expected[..], solution)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_challenges_are_unique() {
        let a = generate_challenge().unwrap();
        let b = generate_challenge().unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_correct_solution_verifies() {
        let hash = [7u8; PASSWORD_HASH_LEN];
        let challenge = generate_challenge().unwrap();
        let solution = solution_for(&hash, &challenge);
        assert!(verify_solution(&hash, &challenge, &solution));
    }

    #[test]
    fn test_wrong_hash_or_challenge_fails() {
        let hash = [7u8; PASSWORD_HASH_LEN];
        let challenge = [1u8; CHALLENGE_LENGTH];
        let solution = solution_for(&hash, &challenge);

        let mut other_hash = hash;
        other_hash[63] ^= 1;
        assert!(!verify_solution(&other_hash, &challenge, &solution));

        let other_challenge = [2u8; CHALLENGE_LENGTH];
        assert!(!verify_solution(&hash, &other_challenge, &solution));
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq(&[1, 2], &[1, 2, 3]));
        assert!(constant_time_eq(&[], &[]));
    }
}
