use std::fmt;
use std::ops::Range;

/// Digest of the pitch data a segment's synthesis consumed. A cached result is
/// valid only while the fingerprint of its padded F0 range is unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditFingerprint([u8; 32]);

impl EditFingerprint {
    /// Hash `f0[padded]` together with the range itself. All NaNs hash alike.
    pub fn compute(padded: &Range<usize>, f0: &[f32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(padded.start as u64).to_le_bytes());
        hasher.update(&(padded.end as u64).to_le_bytes());
        for &v in &f0[padded.clone()] {
            let bits = if v.is_nan() { f32::NAN.to_bits() } else { v.to_bits() };
            hasher.update(&bits.to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for EditFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_data_equal_fingerprint() {
        let f0 = vec![60.0, 61.0, f32::NAN, 62.0];
        let mut other = f0.clone();
        other[2] = -f32::NAN;
        assert_eq!(
            EditFingerprint::compute(&(0..4), &f0),
            EditFingerprint::compute(&(0..4), &other)
        );
    }

    #[test]
    fn changes_with_values_and_range() {
        let f0 = vec![60.0, 61.0, 62.0, 63.0];
        let base = EditFingerprint::compute(&(0..3), &f0);
        let mut edited = f0.clone();
        edited[1] = 61.5;
        assert_ne!(base, EditFingerprint::compute(&(0..3), &edited));
        assert_ne!(base, EditFingerprint::compute(&(1..4), &f0));
        // Values outside the range do not matter.
        edited = f0.clone();
        edited[3] = 10.0;
        assert_eq!(base, EditFingerprint::compute(&(0..3), &edited));
    }
}
