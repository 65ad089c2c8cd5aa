//! Bloom filter over content signatures.
//!
//! The filter sits in front of the similarity search: a record whose
//! signature was never added is certainly new, while a hit only means
//! "possibly seen" and has to be confirmed against the exact signature table
//! kept by the resolver. Bits are only ever set, so there is no removal.

use crate::error::{CoreError, CoreResult};

/// 64-bit content hash of a record's normalized text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentSignature(pub u64);

const MAX_HASHES: u32 = 16;

/// Bloom filter sized from an expected capacity and a target false-positive
/// rate.
#[derive(Clone, Debug)]
pub struct MembershipFilter {
    words: Vec<u64>,
    bit_count: usize,
    hash_count: u32,
    added: usize,
}

impl MembershipFilter {
    /// `m = ceil(-n ln p / ln(2)^2)` bits and `k = round(m / n * ln 2)` hashes.
    pub fn new(capacity: usize, false_positive_rate: f64) -> CoreResult<Self> {
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(CoreError::invalid(format!(
                "false positive rate must be in (0, 1), got {false_positive_rate}"
            )));
        }
        let capacity = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bits = (-capacity * false_positive_rate.ln() / (ln2 * ln2)).ceil() as usize;
        let words = bits.max(64).div_ceil(64);
        let bit_count = words * 64;
        let hash_count = ((bit_count as f64 / capacity) * ln2)
            .round()
            .clamp(1.0, MAX_HASHES as f64) as u32;

        Ok(Self {
            words: vec![0; words],
            bit_count,
            hash_count,
            added: 0,
        })
    }

    pub fn might_contain(&self, signature: ContentSignature) -> bool {
        self.bit_positions(signature).all(|idx| {
            let (word, mask) = locate(idx);
            self.words[word] & mask != 0
        })
    }

    /// Returns `false` when every bit was already set, i.e. the signature was
    /// probably present before.
    pub fn add(&mut self, signature: ContentSignature) -> bool {
        let mut inserted = false;
        let positions: Vec<usize> = self.bit_positions(signature).collect();
        for idx in positions {
            let (word, mask) = locate(idx);
            if self.words[word] & mask == 0 {
                inserted = true;
                self.words[word] |= mask;
            }
        }
        self.added += 1;
        inserted
    }

    pub fn len_bits(&self) -> usize {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Number of `add` calls so far.
    pub fn added(&self) -> usize {
        self.added
    }

    /// Fraction of bits set.
    pub fn approximate_fill(&self) -> f64 {
        let set: u32 = self.words.iter().map(|word| word.count_ones()).sum();
        f64::from(set) / self.bit_count as f64
    }

    /// Double hashing: `h1 + i * h2` for `i in 0..k`.
    fn bit_positions(&self, signature: ContentSignature) -> impl Iterator<Item = usize> + '_ {
        let h1 = signature.0;
        let h2 = mix(signature.0) | 1;
        (0..u64::from(self.hash_count)).map(move |i| {
            (h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count as u64) as usize
        })
    }
}

fn locate(idx: usize) -> (usize, u64) {
    (idx / 64, 1u64 << (idx % 64))
}

fn mix(value: u64) -> u64 {
    let mut hash = value ^ 0x9e37_79b1_85eb_ca87;
    hash = (hash ^ (hash >> 33)).wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash = (hash ^ (hash >> 33)).wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^ (hash >> 33)
}
