// Unique token generator for inbox subjects.
//
// A token is 22 base-62 characters: a 12-character prefix seeded from a
// cryptographically strong source plus a 10-character counter. The
// counter advances by a random stride so successive tokens are lexically
// increasing but not predictable; when it would overflow, the prefix is
// reseeded and the counter re-randomized.
use rand::{Rng, RngCore};

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u64 = 62;
const PREFIX_LEN: usize = 12;
const SEQ_LEN: usize = 10;
// 62^10.
const MAX_SEQ: u64 = 839_299_365_868_340_224;
const MIN_INC: u64 = 33;
const MAX_INC: u64 = 333;

pub const TOKEN_LEN: usize = PREFIX_LEN + SEQ_LEN;

/// Generator state. One per client instance; not synchronized, per the
/// single-threaded dispatch contract.
#[derive(Debug)]
pub struct Nuid {
    prefix: [u8; PREFIX_LEN],
    seq: u64,
    inc: u64,
}

impl Nuid {
    pub fn new() -> Self {
        let mut nuid = Self {
            prefix: [0; PREFIX_LEN],
            seq: 0,
            inc: 0,
        };
        nuid.reseed();
        nuid
    }

    /// The next token. Lexically greater than the previous one as long
    /// as the prefix has not been reseeded.
    pub fn next(&mut self) -> String {
        self.seq += self.inc;
        if self.seq >= MAX_SEQ {
            self.reseed();
        }
        let mut token = String::with_capacity(TOKEN_LEN);
        for &byte in &self.prefix {
            token.push(byte as char);
        }
        let mut digits = [0u8; SEQ_LEN];
        let mut value = self.seq;
        for slot in digits.iter_mut().rev() {
            *slot = ALPHABET[(value % BASE) as usize];
            value /= BASE;
        }
        for byte in digits {
            token.push(byte as char);
        }
        token
    }

    fn reseed(&mut self) {
        let mut rng = rand::thread_rng();
        let mut raw = [0u8; PREFIX_LEN];
        rng.fill_bytes(&mut raw);
        for (slot, byte) in self.prefix.iter_mut().zip(raw) {
            *slot = ALPHABET[byte as usize % ALPHABET.len()];
        }
        self.seq = rng.gen_range(0..MAX_SEQ);
        self.inc = rng.gen_range(MIN_INC..=MAX_INC);
    }
}

impl Default for Nuid {
    fn default() -> Self {
        Self::new()
    }
}
