//! Single measurement rounds against a live source.

use super::SessionError;
use crate::bits::{hamming_distance, Signature};
use crate::ecc::{BchCode, ChipKey, EccError, ErrorCorrector, HelperData, KeyDeriver};
use crate::identify::{ChipIdentifier, Classification, IdentifyError, Match};
use crate::source::{EccConfig, SignatureSource};
use std::collections::BTreeMap;

/// Result of the error-correction step for one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum EccOutcome {
    /// Helper data was computed from the chip's enrolled signature.
    Enrolled {
        /// Key derived from the enrolled signature.
        key: ChipKey,
    },
    /// The reading decoded back to a signature.
    Recovered {
        /// Bit errors corrected.
        errors: usize,
        /// Whether the recovered bits equal the enrolled signature.
        matches_reference: bool,
        /// Key derived from the recovered bits.
        key: ChipKey,
    },
    /// The reading could not be decoded.
    Failed(EccError),
}

/// What one measurement round did.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementOutcome {
    /// Chip the reading was attributed to.
    pub name: String,
    /// True when the reading enrolled a new chip.
    pub is_new: bool,
    /// Closest chips before attribution, nearest first.
    pub matches: Vec<Match>,
    /// Bits differing from the enrolled signature; `None` for new chips.
    pub bit_flips: Option<usize>,
    /// Error-correction result, when enabled.
    pub ecc: Option<EccOutcome>,
}

impl MeasurementOutcome {
    /// The closest match found before attribution.
    pub fn best_match(&self) -> Option<&Match> {
        self.matches.first()
    }
}

struct EccState {
    corrector: ErrorCorrector<BchCode>,
    deriver: KeyDeriver,
    helpers: BTreeMap<String, HelperData>,
}

/// Drives measurement rounds from a source into an identifier.
pub struct Session<S: SignatureSource> {
    source: S,
    identifier: ChipIdentifier,
    match_scores: usize,
    ecc: Option<EccState>,
}

impl<S: SignatureSource> Session<S> {
    /// Creates a session without error correction.
    pub fn new(source: S, identifier: ChipIdentifier) -> Self {
        Self {
            source,
            identifier,
            match_scores: 8,
            ecc: None,
        }
    }

    /// Sets how many closest matches each outcome lists.
    pub fn with_match_scores(mut self, count: usize) -> Self {
        self.match_scores = count.max(1);
        self
    }

    /// Enables helper-data recovery when `config.enabled` is set.
    pub fn with_ecc(mut self, config: &EccConfig) -> Result<Self, SessionError> {
        if !config.enabled {
            self.ecc = None;
            return Ok(self);
        }
        let code = BchCode::new(config.bch)?;
        tracing::info!(
            t = code.correction_capacity(),
            parity_bits = code.parity_bits(),
            "Error correction enabled"
        );
        self.ecc = Some(EccState {
            corrector: ErrorCorrector::new(code),
            deriver: KeyDeriver::new(config.key_algorithm),
            helpers: BTreeMap::new(),
        });
        Ok(self)
    }

    /// Performs one measurement round.
    ///
    /// A reading within the noise threshold of an enrolled chip is
    /// attributed to it. Otherwise the reading is enrolled under
    /// `name_hint`, or under the next free `chip-NNN` name.
    pub fn measure(&mut self, name_hint: Option<&str>) -> Result<MeasurementOutcome, SessionError> {
        let sig = self.source.next()?;
        let matches = self.identifier.best_matches(&sig, self.match_scores)?;

        let (name, is_new) = match self.identifier.classify(&sig)? {
            Classification::Known(best) => (best.name, false),
            Classification::Unknown(best) => {
                let name = name_hint
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.next_free_name());
                if self.identifier.record(&name).is_some() {
                    tracing::warn!(chip = %name, "Re-enrolling chip, statistics reset");
                    if let Some(ecc) = self.ecc.as_mut() {
                        ecc.helpers.remove(&name);
                    }
                }
                tracing::info!(
                    chip = %name,
                    closest = best.as_ref().map(|m| m.distance),
                    "Unknown chip, enrolling"
                );
                self.identifier.add(&name, sig.clone())?;
                (name, true)
            }
        };

        self.identifier.process(&name, &sig)?;

        let bit_flips = if is_new {
            None
        } else {
            self.identifier
                .signature(&name)
                .map(|reference| hamming_distance(&sig, reference))
                .transpose()
                .map_err(IdentifyError::from)?
        };

        let ecc = self.recover(&name, &sig);

        tracing::info!(
            chip = %name,
            is_new,
            bit_flips,
            meas_count = self.identifier.meas_count(&name),
            "Measurement processed"
        );
        Ok(MeasurementOutcome {
            name,
            is_new,
            matches,
            bit_flips,
            ecc,
        })
    }

    fn recover(&mut self, name: &str, sig: &Signature) -> Option<EccOutcome> {
        let ecc = self.ecc.as_mut()?;
        let reference = self.identifier.signature(name)?;

        let Some(helper) = ecc.helpers.get(name) else {
            return Some(match ecc.corrector.enroll(reference) {
                Ok(helper) => {
                    ecc.helpers.insert(name.to_string(), helper);
                    EccOutcome::Enrolled {
                        key: ecc.deriver.derive(reference),
                    }
                }
                Err(e) => EccOutcome::Failed(e),
            });
        };

        Some(match ecc.corrector.decode(sig, helper) {
            Ok(recovery) => {
                let matches_reference = &recovery.signature == reference;
                if !matches_reference {
                    tracing::warn!(chip = name, "Recovered signature differs from enrollment");
                }
                EccOutcome::Recovered {
                    errors: recovery.errors,
                    matches_reference,
                    key: ecc.deriver.derive(&recovery.signature),
                }
            }
            Err(e) => EccOutcome::Failed(e),
        })
    }

    fn next_free_name(&self) -> String {
        (1..)
            .map(|i| format!("chip-{i:03}"))
            .find(|name| self.identifier.record(name).is_none())
            .unwrap_or_default()
    }

    /// The identifier being updated.
    pub fn identifier(&self) -> &ChipIdentifier {
        &self.identifier
    }

    /// Mutable access to the identifier.
    pub fn identifier_mut(&mut self) -> &mut ChipIdentifier {
        &mut self.identifier
    }

    /// The signature source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the signature source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Saves the database.
    pub fn save(&self) -> Result<(), SessionError> {
        self.identifier.save()?;
        Ok(())
    }

    /// Closes the source, saves the database and returns the identifier.
    pub fn finish(mut self) -> Result<ChipIdentifier, SessionError> {
        self.source.close();
        self.identifier.save()?;
        Ok(self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::BchParams;
    use crate::identify::IdentifierConfig;
    use crate::source::{SimulatorConfig, VirtualChips};

    fn chips(n_bits: usize, flip_probability: f64) -> VirtualChips {
        VirtualChips::new(
            n_bits,
            &SimulatorConfig {
                chips: 4,
                seed: 11,
                flip_probability,
            },
        )
        .unwrap()
    }

    fn identifier(n_bits: usize) -> ChipIdentifier {
        ChipIdentifier::new(IdentifierConfig::new("unused.xml", n_bits))
    }

    #[test]
    fn test_first_reading_enrolls() {
        let mut session = Session::new(chips(256, 0.02), identifier(256));
        let outcome = session.measure(Some("bench-a")).unwrap();
        assert_eq!(outcome.name, "bench-a");
        assert!(outcome.is_new);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.bit_flips, None);
        assert_eq!(session.identifier().meas_count("bench-a"), 1);
    }

    #[test]
    fn test_repeat_reading_matches() {
        let mut session = Session::new(chips(256, 0.02), identifier(256));
        session.measure(None).unwrap();
        let outcome = session.measure(Some("ignored")).unwrap();
        assert_eq!(outcome.name, "chip-001");
        assert!(!outcome.is_new);
        assert!(outcome.best_match().unwrap().distance < 0.25);
        assert!(outcome.bit_flips.is_some());
        assert_eq!(session.identifier().meas_count("chip-001"), 2);
    }

    #[test]
    fn test_new_chip_gets_next_free_name() {
        let mut session = Session::new(chips(256, 0.0), identifier(256));
        session.measure(None).unwrap();
        session.source_mut().select("v002").unwrap();
        let outcome = session.measure(None).unwrap();
        assert_eq!(outcome.name, "chip-002");
        assert!(outcome.is_new);
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn test_ecc_enrolls_then_recovers() {
        let params = BchParams {
            m: 9,
            t: 8,
            k: 256,
            primitive_poly: 0x211,
        };
        let config = EccConfig {
            enabled: true,
            bch: params,
            ..Default::default()
        };
        let mut session = Session::new(chips(256, 0.005), identifier(256))
            .with_ecc(&config)
            .unwrap();

        let first = session.measure(None).unwrap();
        let enrolled_key = match first.ecc {
            Some(EccOutcome::Enrolled { key }) => key,
            other => panic!("expected enrollment, got {other:?}"),
        };

        let second = session.measure(None).unwrap();
        match second.ecc {
            Some(EccOutcome::Recovered {
                errors,
                matches_reference,
                key,
            }) => {
                assert_eq!(Some(errors), second.bit_flips);
                assert!(matches_reference);
                assert_eq!(key, enrolled_key);
            }
            other => panic!("expected recovery, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_source_propagates() {
        let mut session = Session::new(chips(64, 0.0), identifier(64));
        session.source_mut().close();
        assert!(matches!(
            session.measure(None),
            Err(SessionError::Source(_))
        ));
    }

    #[test]
    fn test_finish_saves() {
        let dir = tempfile::tempdir().unwrap();
        let config = IdentifierConfig::new(dir.path().join("sigs.xml"), 64);
        let mut session = Session::new(chips(64, 0.0), ChipIdentifier::new(config.clone()));
        session.measure(None).unwrap();
        let identifier = session.finish().unwrap();
        assert_eq!(identifier.len(), 1);
        assert_eq!(ChipIdentifier::load(config).unwrap().len(), 1);
    }
}
