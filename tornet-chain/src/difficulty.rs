//! Block threshold retargeting
//!
//! After every block the acceptance threshold is rescaled toward one block
//! per ten minutes, using the median of the last eleven inter-block deltas.
//! The scale factor is clamped to [1/4, 4] per step, and the threshold never
//! drops below the transaction threshold (a block can always be won by a
//! single solved transaction).
//!
//! A larger threshold admits more digests, so fast blocks shrink it and
//! slow blocks grow it: the threshold scales by `observed / target`.

use tornet_core::digest::Digest;

/// Number of most recent inter-block deltas fed into the median.
pub const RETARGET_WINDOW: usize = 11;

/// Scale a 160-bit threshold by `num / den`, saturating at `Digest::MAX`.
pub fn scale_threshold(threshold: &Digest, num: u64, den: u64) -> Digest {
    debug_assert!(den > 0);
    let bytes = threshold.as_bytes();
    let mut limbs = [0u32; 5];
    for (i, limb) in limbs.iter_mut().enumerate() {
        *limb = u32::from_be_bytes([
            bytes[i * 4],
            bytes[i * 4 + 1],
            bytes[i * 4 + 2],
            bytes[i * 4 + 3],
        ]);
    }

    // multiply, least-significant limb first; the carry is the part of the
    // product above 160 bits
    let mut carry: u128 = 0;
    for limb in limbs.iter_mut().rev() {
        let t = *limb as u128 * num as u128 + carry;
        *limb = (t & 0xffff_ffff) as u32;
        carry = t >> 32;
    }

    // schoolbook divide, most-significant limb first, with the carry as two
    // extra high limbs; a non-zero quotient there means the result exceeds
    // 160 bits
    let mut rem: u128 = 0;
    for high in [(carry >> 32) as u32, carry as u32] {
        let cur = (rem << 32) | high as u128;
        if cur / den as u128 != 0 {
            return Digest::MAX;
        }
        rem = cur % den as u128;
    }
    for limb in limbs.iter_mut() {
        let cur = (rem << 32) | *limb as u128;
        *limb = (cur / den as u128) as u32;
        rem = cur % den as u128;
    }

    let mut out = [0u8; 20];
    for (i, limb) in limbs.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&limb.to_be_bytes());
    }
    Digest::from_bytes(out)
}

/// Median of the window; `deltas` need not be sorted.
fn median(deltas: &[u64]) -> u64 {
    let mut sorted = deltas.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

/// Compute the next block threshold from the recent inter-block deltas.
pub fn retarget(
    current: &Digest,
    deltas: &[u64],
    target_interval_us: u64,
    floor: &Digest,
) -> Digest {
    if deltas.is_empty() {
        return *current;
    }
    let window = &deltas[deltas.len().saturating_sub(RETARGET_WINDOW)..];
    let observed = median(window).max(1);

    // clamp the step to [1/4, 4]
    let (num, den) = if observed as u128 >= 4 * target_interval_us as u128 {
        (4, 1)
    } else if 4 * observed as u128 <= target_interval_us as u128 {
        (1, 4)
    } else {
        (observed, target_interval_us)
    };

    let scaled = scale_threshold(current, num, den);
    if scaled < *floor {
        *floor
    } else {
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TARGET_BLOCK_INTERVAL_US;

    fn threshold(msb: u8) -> Digest {
        let mut bytes = [0u8; 20];
        bytes[0] = msb;
        Digest::from_bytes(bytes)
    }

    #[test]
    fn test_scale_identity() {
        let t = Digest::compute(b"threshold");
        assert_eq!(scale_threshold(&t, 3, 3), t);
    }

    #[test]
    fn test_scale_halves_and_doubles() {
        let t = threshold(0x80);
        assert_eq!(scale_threshold(&t, 1, 2), threshold(0x40));
        assert_eq!(scale_threshold(&threshold(0x40), 2, 1), threshold(0x80));
    }

    #[test]
    fn test_scale_saturates() {
        assert_eq!(scale_threshold(&Digest::MAX, 4, 1), Digest::MAX);
    }

    #[test]
    fn test_fast_blocks_tighten() {
        let current = threshold(0x80);
        // blocks at half the target interval
        let deltas = vec![TARGET_BLOCK_INTERVAL_US / 2; 11];
        let next = retarget(&current, &deltas, TARGET_BLOCK_INTERVAL_US, &Digest::default());
        assert!(next < current);
        assert_eq!(next, threshold(0x40));
    }

    #[test]
    fn test_slow_blocks_loosen() {
        let current = threshold(0x40);
        let deltas = vec![TARGET_BLOCK_INTERVAL_US * 2; 11];
        let next = retarget(&current, &deltas, TARGET_BLOCK_INTERVAL_US, &Digest::default());
        assert!(next > current);
        assert_eq!(next, threshold(0x80));
    }

    #[test]
    fn test_step_clamped_to_quarter() {
        let current = threshold(0x80);
        // pathologically fast blocks still shrink by at most 4x
        let deltas = vec![1u64; 11];
        let next = retarget(&current, &deltas, TARGET_BLOCK_INTERVAL_US, &Digest::default());
        assert_eq!(next, threshold(0x20));
    }

    #[test]
    fn test_floored_at_trx_threshold() {
        let current = threshold(0x02);
        let floor = threshold(0x01);
        let deltas = vec![1u64; 11];
        let next = retarget(&current, &deltas, TARGET_BLOCK_INTERVAL_US, &floor);
        assert_eq!(next, floor);
    }

    #[test]
    fn test_median_window_uses_last_eleven() {
        let current = threshold(0x40);
        // old slow deltas must be ignored in favour of the last 11 on-target ones
        let mut deltas = vec![TARGET_BLOCK_INTERVAL_US * 4; 5];
        deltas.extend(vec![TARGET_BLOCK_INTERVAL_US; 11]);
        let next = retarget(&current, &deltas, TARGET_BLOCK_INTERVAL_US, &Digest::default());
        assert_eq!(next, current);
    }
}
