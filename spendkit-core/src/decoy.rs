//! Decoy change outputs
//!
//! A single change output is easy to spot: it is usually the one with the
//! "unround" amount. Splitting change into several randomized outputs makes the
//! real change indistinguishable from the decoys, and from the payment.
//!
//! Every bucket receives the dust floor plus a random share of the surplus.
//! Shares are proportional to weights drawn from `[0.3, 1.0]` and jittered by up
//! to 3%; the last bucket takes the exact remainder so the split is lossless.
//! The buckets are permuted before they are returned.

use rand::seq::SliceRandom;
use rand::Rng;

/// Fewest decoy outputs a request may ask for
pub const MIN_DECOYS: usize = 2;

/// Most decoy outputs a request may ask for
pub const MAX_DECOYS: usize = 4;

const MIN_WEIGHT: f64 = 0.3;
const MAX_WEIGHT: f64 = 1.0;
const JITTER: f64 = 0.03;

/// Whether `count` is an accepted decoy count
pub fn is_valid_decoy_count(count: usize) -> bool {
    (MIN_DECOYS..=MAX_DECOYS).contains(&count)
}

/// Split `total` into `count` randomized amounts of at least `dust` each
///
/// # Returns
/// * `None` when `count` is zero or `total < count * dust`
/// * Otherwise exactly `count` amounts, each `>= dust`, summing to `total`
pub fn generate_decoy_amounts<R: Rng>(
    total: u64,
    count: usize,
    dust: u64,
    rng: &mut R,
) -> Option<Vec<u64>> {
    if count == 0 {
        return None;
    }
    let floor = dust.checked_mul(count as u64)?;
    let surplus = total.checked_sub(floor)?;

    let weights: Vec<f64> = (0..count)
        .map(|_| rng.random_range(MIN_WEIGHT..=MAX_WEIGHT))
        .collect();
    let weight_sum: f64 = weights.iter().sum();

    let mut remaining = surplus;
    let mut amounts = Vec::with_capacity(count);
    for weight in &weights[..count - 1] {
        let share = (surplus as f64 * weight / weight_sum).floor();
        let jitter = rng.random_range(-JITTER..=JITTER);
        let jittered = (share * (1.0 + jitter)).floor().max(0.0) as u64;

        let extra = jittered.min(remaining);
        remaining -= extra;
        amounts.push(dust + extra);
    }
    amounts.push(dust + remaining);

    amounts.shuffle(rng);
    Some(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn amounts_sum_to_total() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in MIN_DECOYS..=MAX_DECOYS {
            let amounts = generate_decoy_amounts(148_540, count, 546, &mut rng).unwrap();
            assert_eq!(amounts.len(), count);
            assert_eq!(amounts.iter().sum::<u64>(), 148_540);
            assert!(amounts.iter().all(|&a| a >= 546));
        }
    }

    #[test]
    fn exact_floor_gives_all_dust() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(generate_decoy_amounts(1_638, 3, 546, &mut rng), Some(vec![546; 3]));
    }

    #[test]
    fn below_floor_is_infeasible() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(generate_decoy_amounts(1_637, 3, 546, &mut rng), None);
        assert_eq!(generate_decoy_amounts(10_000, 0, 546, &mut rng), None);
    }

    #[test]
    fn same_seed_same_split() {
        let first = generate_decoy_amounts(90_000, 4, 546, &mut StdRng::seed_from_u64(42));
        let second = generate_decoy_amounts(90_000, 4, 546, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn count_bounds() {
        assert!(!is_valid_decoy_count(1));
        assert!(is_valid_decoy_count(2));
        assert!(is_valid_decoy_count(4));
        assert!(!is_valid_decoy_count(5));
    }
}
