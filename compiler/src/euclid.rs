// euclid.rs — Euclidean rhythm generation
//
// Bucket accumulation: add `hits / steps` per step and place a hit whenever
// the bucket reaches 1. The bucket is kept in units of `1 / steps` so the
// hit count is exact. Shared by the sequence compiler and the eager
// evaluator so both paths agree on hit placement.

/// Hit mask for `hits` over `steps`, rotated left by `rotation` steps.
///
/// `hits >= steps` saturates to every step hit. Zero hits or zero steps
/// yields an all-rest (or empty) pattern.
pub fn pattern(hits: u32, steps: u32, rotation: u32) -> Vec<bool> {
    let n = steps as usize;
    if n == 0 {
        return Vec::new();
    }
    if hits == 0 {
        return vec![false; n];
    }
    if hits >= steps {
        return vec![true; n];
    }

    let mut bucket = 0u32;
    let mut raw = Vec::with_capacity(n);
    for _ in 0..n {
        bucket += hits;
        if bucket >= steps {
            bucket -= steps;
            raw.push(true);
        } else {
            raw.push(false);
        }
    }

    raw.rotate_left(rotation as usize % n);
    raw
}

/// Same pattern packed into a bitmask (bit i = step i). `steps` must be ≤ 32.
pub fn bitmask(hits: u32, steps: u32, rotation: u32) -> u32 {
    pattern(hits, steps.min(32), rotation)
        .iter()
        .enumerate()
        .filter(|(_, &hit)| hit)
        .fold(0u32, |mask, (i, _)| mask | (1 << i))
}

/// Render as `1`/`0` characters, step 0 first.
pub fn render(pattern: &[bool]) -> String {
    pattern.iter().map(|&h| if h { '1' } else { '0' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_over_eight() {
        // bucket: .375 .75 1.125* .5 .875 1.25* .625 1.0*
        assert_eq!(render(&pattern(3, 8, 0)), "00100101");
    }

    #[test]
    fn rotation_shifts_left() {
        assert_eq!(render(&pattern(3, 8, 2)), "10010100");
        assert_eq!(pattern(3, 8, 10), pattern(3, 8, 2));
    }

    #[test]
    fn saturates_and_empties() {
        assert_eq!(pattern(9, 8, 0), vec![true; 8]);
        assert_eq!(pattern(0, 4, 1), vec![false; 4]);
        assert!(pattern(3, 0, 0).is_empty());
    }

    #[test]
    fn hit_count_matches() {
        for steps in 1..=16 {
            for hits in 0..=steps {
                let p = pattern(hits, steps, 0);
                assert_eq!(p.iter().filter(|&&h| h).count() as u32, hits);
            }
        }
    }

    #[test]
    fn bitmask_agrees_with_pattern() {
        assert_eq!(bitmask(3, 8, 0), 0b1010_0100);
        assert_eq!(bitmask(4, 4, 0), 0b1111);
    }
}
