//! Value hashing and hash table sizing
//!
//! Placeholders hash to 0 and containers fold their children with rotated
//! XOR, so a tuple whose trailing fields are Free hashes exactly like its
//! defined prefix. Prefix hash tables rely on this.

use crc::{Crc, CRC_64_ECMA_182};

use super::Value;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Hash tables are filled to at most this load factor
pub const HASH_LOAD_FACTOR: f64 = 0.75;

const HASH_SIZES: [u64; 38] = [
    97, 193, 389, 457, 569, 709, 887, 1109, 1381, 1723, 2153, 2693, 3371, 4211, 5261, 6569, 8209,
    10259, 12823, 16033, 20047, 25057, 31307, 39133, 48907, 61141, 76421, 95527, 119417, 149249,
    186569, 233201, 291503, 364373, 455466, 569369, 711679, 889581,
];

pub fn get_hash(value: &Value) -> u64 {
    match value {
        Value::Free(_) | Value::Tombstone | Value::Void => 0,
        Value::Blob(bytes) => CRC64.checksum(bytes),
        Value::Str(s) => CRC64.checksum(s.as_bytes()),
        Value::Desc(inner) => get_hash(inner),
        Value::Opt(_, elem) => elem.as_deref().map_or(0, get_hash),
        Value::Set(_, elems) | Value::Vector(_, elems) | Value::Tuple(elems) => fold(elems.iter()),
        Value::Record(fields) => fold(fields.iter().map(|(_, v)| v)),
        Value::Map(_, _, pairs) => pairs.iter().enumerate().fold(0, |acc, (i, (k, v))| {
            acc ^ get_hash(k).rotate_right(rot(i, 5)) ^ get_hash(v).rotate_right(rot(i, 7))
        }),
        scalar => match scalar.inline_bytes() {
            Some((bytes, len)) => CRC64.checksum(&bytes[..len]),
            None => 0,
        },
    }
}

fn fold<'a>(elems: impl Iterator<Item = &'a Value>) -> u64 {
    elems
        .enumerate()
        .fold(0, |acc, (i, v)| acc ^ get_hash(v).rotate_right(rot(i, 5)))
}

fn rot(idx: usize, step: usize) -> u32 {
    ((idx * step) % 64) as u32
}

/// Number of slots for a table holding `num_entries` keys
pub fn suggest_hash_size(num_entries: u64) -> u64 {
    let ideal = (num_entries as f64 / HASH_LOAD_FACTOR) as u64;
    match HASH_SIZES.iter().find(|&&size| size > ideal) {
        Some(&size) => size,
        None => next_prime(ideal + 1),
    }
}

fn next_prime(mut n: u64) -> u64 {
    while !is_prime(n) {
        n += 1;
    }
    n
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}
