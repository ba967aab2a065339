// Credential and hostname generation for baseline provisioning

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use rand::Rng;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()_-+=";

/// Shortest password that can hold one character of every class
pub const MIN_GENERATED_LENGTH: usize = 4;

/// Generate a random password with at least one uppercase letter, one
/// lowercase letter, one digit and one special character.
pub fn generate_password(length: usize) -> String {
    let length = length.max(MIN_GENERATED_LENGTH);
    let mut rng = rand::thread_rng();

    let pick = |rng: &mut rand::rngs::ThreadRng, set: &[u8]| set[rng.gen_range(0..set.len())];

    let mut chars: Vec<u8> = vec![
        pick(&mut rng, UPPER),
        pick(&mut rng, LOWER),
        pick(&mut rng, DIGITS),
        pick(&mut rng, SPECIAL),
    ];

    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    while chars.len() < length {
        chars.push(pick(&mut rng, &all));
    }

    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// Hands out provisioning hostnames like `SKY-INT-SDL-01`, `SKY-INT-SDL-02`, ...
pub struct HostnameSequence {
    prefix: String,
    counter: AtomicUsize,
}

impl HostnameSequence {
    pub fn new(prefix: impl Into<String>) -> Self {
        HostnameSequence {
            prefix: prefix.into(),
            counter: AtomicUsize::new(1),
        }
    }

    /// Keep `current` if it already carries the prefix, otherwise allocate the next name
    pub fn hostname_for(&self, current: &str) -> String {
        if !self.prefix.is_empty() && current.starts_with(&self.prefix) {
            return current.to_string();
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}0{}", self.prefix, n)
    }
}
