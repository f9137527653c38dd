//! Candidate generation and hashing.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a candidate string.
pub fn sha256_hex(candidate: &str) -> String {
    hex::encode(Sha256::digest(candidate.as_bytes()))
}

/// Visit every permutation of `chars` (iterative Heap's algorithm). The
/// visitor returns false to stop early.
pub fn for_each_permutation(chars: &[char], mut visit: impl FnMut(&[char]) -> bool) {
    let mut items = chars.to_vec();
    let n = items.len();
    if !visit(&items) {
        return;
    }

    let mut counters = vec![0usize; n];
    let mut i = 1;
    while i < n {
        if counters[i] < i {
            if i % 2 == 0 {
                items.swap(0, i);
            } else {
                items.swap(counters[i], i);
            }
            if !visit(&items) {
                return;
            }
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

/// Visit every string of exactly `length` characters drawn from `chars`,
/// repetition allowed. The visitor returns false to stop early.
pub fn for_each_word(chars: &[char], length: usize, mut visit: impl FnMut(&str) -> bool) {
    if chars.is_empty() && length > 0 {
        return;
    }
    let mut digits = vec![0usize; length];
    let mut word = String::with_capacity(length * 4);
    loop {
        word.clear();
        word.extend(digits.iter().map(|&d| chars[d]));
        if !visit(&word) {
            return;
        }

        // odometer increment, rightmost digit first
        let mut pos = length;
        loop {
            if pos == 0 {
                return;
            }
            pos -= 1;
            digits[pos] += 1;
            if digits[pos] < chars.len() {
                break;
            }
            digits[pos] = 0;
        }
    }
}
