use crate::models::{Namespace, VariationRange};

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x01000193;

/// 32-bit FNV-1a over the UTF-16 code units of `input`.
///
/// UTF-16 is deliberate: assignments must line up with the browser SDKs, which hash
/// JavaScript strings code unit by code unit.
pub fn fnv1a32(input: &str) -> u32 {
    input.encode_utf16().fold(FNV_OFFSET_BASIS, |hval, unit| {
        (hval ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Calculates a deterministic hash value between 0 and 1 for a seed and an identifier.
///
/// Two algorithms are supported so that existing assignments never shift:
/// * version 1 hashes `value + seed` and keeps three decimal places
/// * version 2 hashes `seed + value`, hashes the decimal rendering of that result again,
///   and keeps four decimal places
///
/// Any other version, or an empty value, yields `None`, which callers treat as "exclude".
pub fn hash(seed: &str, value: &str, version: u32) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    match version {
        1 => {
            let n = fnv1a32(&format!("{value}{seed}"));
            Some(f64::from(n % 1000) / 1000.0)
        }
        2 => {
            let first = fnv1a32(&format!("{seed}{value}"));
            let n = fnv1a32(&first.to_string());
            Some(f64::from(n % 10000) / 10000.0)
        }
        _ => None,
    }
}

pub fn in_range(n: f64, range: &VariationRange) -> bool {
    n >= range.0 && n < range.1
}

/// Checks whether the user falls in the slice of the hash space reserved by `namespace`.
pub fn in_namespace(hash_value: &str, namespace: &Namespace) -> bool {
    match hash(&format!("__{}", namespace.id), hash_value, 1) {
        Some(n) => n >= namespace.start && n < namespace.end,
        None => false,
    }
}

pub fn get_equal_weights(num_variations: usize) -> Vec<f64> {
    if num_variations == 0 {
        return Vec::new();
    }
    vec![1.0 / num_variations as f64; num_variations]
}

/// Lays out one contiguous range per variation, starting at 0 and scaled by `coverage`.
///
/// Weights summing to less than 1 are laid out as given and simply leave part of the hash
/// space unassigned. Weights that don't line up with the number of variations, or that sum
/// to more than 1, fall back to an even split.
pub fn get_bucket_ranges(
    num_variations: usize,
    coverage: f64,
    weights: Option<&[f64]>,
) -> Vec<VariationRange> {
    let coverage = coverage.clamp(0.0, 1.0);

    let equal = get_equal_weights(num_variations);
    let weights = match weights {
        Some(weights) if weights.len() == num_variations => {
            let total: f64 = weights.iter().sum();
            if total <= 1.01 {
                weights.to_vec()
            } else {
                equal
            }
        }
        _ => equal,
    };

    let mut cumulative = 0.0;
    weights
        .iter()
        .map(|weight| {
            let start = cumulative;
            cumulative += weight;
            (start, start + coverage * weight)
        })
        .collect()
}

/// Returns the index of the first range containing `n`.
pub fn choose_variation(n: f64, ranges: &[VariationRange]) -> Option<usize> {
    ranges.iter().position(|range| in_range(n, range))
}
