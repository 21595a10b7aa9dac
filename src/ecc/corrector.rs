//! Enrollment and recovery on top of a pluggable code.

use super::{BchCode, EccError, HelperData};
use crate::bits::Signature;

/// A binary code that turns a reference signature into helper data and
/// corrects noisy re-reads against it.
///
/// Implemented by [`BchCode`]; tests can substitute their own.
pub trait Codec {
    /// Computes helper data for `data`.
    fn encode(&self, data: &Signature) -> Result<HelperData, EccError>;

    /// Corrects `data` against `helper`, returning the detected error
    /// count and the corrected bits.
    fn decode(&self, data: &Signature, helper: &HelperData)
        -> Result<(usize, Signature), EccError>;

    /// Maximum number of bit errors `decode` can correct.
    fn correction_capacity(&self) -> usize;

    /// Signature length the code accepts.
    fn data_bits(&self) -> usize;
}

impl Codec for BchCode {
    fn encode(&self, data: &Signature) -> Result<HelperData, EccError> {
        BchCode::encode(self, data)
    }

    fn decode(
        &self,
        data: &Signature,
        helper: &HelperData,
    ) -> Result<(usize, Signature), EccError> {
        BchCode::decode(self, data, helper)
    }

    fn correction_capacity(&self) -> usize {
        BchCode::correction_capacity(self)
    }

    fn data_bits(&self) -> usize {
        BchCode::data_bits(self)
    }
}

/// Successful recovery of an enrolled signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// Bit errors the decoder corrected.
    pub errors: usize,
    /// The recovered reference signature.
    pub signature: Signature,
}

/// Remembers helper data for one chip and recovers its reference.
#[derive(Debug)]
pub struct ErrorCorrector<C: Codec> {
    codec: C,
    helper: Option<HelperData>,
}

impl<C: Codec> ErrorCorrector<C> {
    /// Wraps `codec` with no enrollment yet.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            helper: None,
        }
    }

    /// Computes and remembers helper data for `signature`.
    pub fn enroll(&mut self, signature: &Signature) -> Result<HelperData, EccError> {
        let helper = self.codec.encode(signature)?;
        tracing::debug!(parity_bits = helper.len(), "Enrolled helper data");
        self.helper = Some(helper.clone());
        Ok(helper)
    }

    /// Recovers the enrolled signature from `noisy` using `helper`.
    pub fn decode(&self, noisy: &Signature, helper: &HelperData) -> Result<Recovery, EccError> {
        let (errors, signature) = match self.codec.decode(noisy, helper) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, "Helper data decode failed");
                return Err(e);
            }
        };
        if signature.len() != noisy.len() {
            return Err(EccError::LengthMismatch {
                expected: noisy.len(),
                found: signature.len(),
            });
        }
        if errors > self.codec.correction_capacity() {
            return Err(EccError::Uncorrectable {
                capacity: self.codec.correction_capacity(),
            });
        }
        Ok(Recovery { errors, signature })
    }

    /// Recovers the enrolled signature with the remembered helper data.
    pub fn regenerate(&self, noisy: &Signature) -> Result<Recovery, EccError> {
        let helper = self.helper.as_ref().ok_or(EccError::NotEnrolled)?;
        self.decode(noisy, helper)
    }

    /// Helper data from the last `enroll`, if any.
    pub fn helper(&self) -> Option<&HelperData> {
        self.helper.as_ref()
    }

    /// Correction capacity of the wrapped code.
    pub fn correction_capacity(&self) -> usize {
        self.codec.correction_capacity()
    }

    /// Signature length of the wrapped code.
    pub fn data_bits(&self) -> usize {
        self.codec.data_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::BchParams;

    /// Stand-in codec whose helper data is the reference itself.
    struct Mirror;

    impl Codec for Mirror {
        fn encode(&self, data: &Signature) -> Result<HelperData, EccError> {
            Ok(HelperData::new(data.clone()))
        }

        fn decode(
            &self,
            data: &Signature,
            helper: &HelperData,
        ) -> Result<(usize, Signature), EccError> {
            let errors = data.xor(helper.parity()).map(|d| d.count_ones()).unwrap_or(0);
            Ok((errors, helper.parity().clone()))
        }

        fn correction_capacity(&self) -> usize {
            2
        }

        fn data_bits(&self) -> usize {
            8
        }
    }

    fn small_bch() -> BchCode {
        BchCode::new(BchParams {
            m: 6,
            t: 4,
            k: 32,
            primitive_poly: 0x43,
        })
        .unwrap()
    }

    #[test]
    fn test_regenerate_before_enroll() {
        let corrector = ErrorCorrector::new(small_bch());
        assert!(matches!(
            corrector.regenerate(&Signature::zeros(32)),
            Err(EccError::NotEnrolled)
        ));
    }

    #[test]
    fn test_enroll_then_regenerate() {
        let mut corrector = ErrorCorrector::new(small_bch());
        let reference = Signature::from_hex("deadbeef").unwrap();
        corrector.enroll(&reference).unwrap();
        assert_eq!(corrector.correction_capacity(), 4);

        let mut noisy = reference.clone();
        noisy.flip(0);
        noisy.flip(17);
        noisy.flip(31);
        let recovery = corrector.regenerate(&noisy).unwrap();
        assert_eq!(recovery.errors, 3);
        assert_eq!(recovery.signature, reference);
    }

    #[test]
    fn test_codec_over_capacity_rejected() {
        let mut corrector = ErrorCorrector::new(Mirror);
        let reference = Signature::from_hex("00").unwrap();
        let helper = corrector.enroll(&reference).unwrap();

        let one_off = Signature::from_hex("01").unwrap();
        assert_eq!(corrector.decode(&one_off, &helper).unwrap().errors, 1);

        let far = Signature::from_hex("0f").unwrap();
        assert!(matches!(
            corrector.decode(&far, &helper),
            Err(EccError::Uncorrectable { capacity: 2 })
        ));
    }

    #[test]
    fn test_decoded_length_checked() {
        let corrector = ErrorCorrector::new(Mirror);
        let helper = HelperData::new(Signature::zeros(16));
        assert!(matches!(
            corrector.decode(&Signature::zeros(8), &helper),
            Err(EccError::LengthMismatch { expected: 8, found: 16 })
        ));
    }
}
