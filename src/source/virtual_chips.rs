//! Deterministic population of simulated chips.

use super::{SignatureSource, SimulatorConfig, SourceError};
use crate::bits::Signature;
use crate::identify::{ChipIdentifier, IdentifyError};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// ChaCha stream carrying the reference responses.
const REFERENCE_STREAM: u64 = 0;
/// First stream used for noisy reads; forks use the ones after it.
const READ_STREAM: u64 = 1;

/// Simulated chips named `v001`, `v002`, ...
///
/// Every chip has a fixed reference response drawn from the seed. Each
/// read returns that reference with every bit flipped independently with
/// probability `flip_probability`. The same seed always yields the same
/// population and the same sequence of reads.
#[derive(Debug, Clone)]
pub struct VirtualChips {
    n_bits: usize,
    seed: u64,
    references: Vec<Signature>,
    /// Flip threshold scaled to the full `u32` range.
    flip_threshold: u64,
    flip_probability: f64,
    rng: ChaCha20Rng,
    selected: usize,
    open: bool,
}

impl VirtualChips {
    /// Generates the population described by `config`.
    pub fn new(n_bits: usize, config: &SimulatorConfig) -> Result<Self, SourceError> {
        if n_bits == 0 {
            return Err(SourceError::InvalidSetup(
                "signature length must be positive".to_string(),
            ));
        }
        if config.chips == 0 || config.chips > 999 {
            return Err(SourceError::InvalidSetup(format!(
                "chip count {} outside 1..=999",
                config.chips
            )));
        }
        if !(0.0..0.5).contains(&config.flip_probability) {
            return Err(SourceError::InvalidSetup(format!(
                "flip probability {} outside [0, 0.5)",
                config.flip_probability
            )));
        }

        let mut reference_rng = ChaCha20Rng::seed_from_u64(config.seed);
        reference_rng.set_stream(REFERENCE_STREAM);
        let references = (0..config.chips)
            .map(|_| {
                let mut bytes = vec![0u8; n_bits.div_ceil(8)];
                reference_rng.fill_bytes(&mut bytes);
                Signature::from_bits(Signature::from_bytes(bytes).iter().take(n_bits))
            })
            .collect();

        let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
        rng.set_stream(READ_STREAM);

        tracing::info!(
            chips = config.chips,
            n_bits,
            flip_probability = config.flip_probability,
            seed = config.seed,
            "Generated virtual chip population"
        );

        Ok(Self {
            n_bits,
            seed: config.seed,
            references,
            flip_threshold: (config.flip_probability * (u32::MAX as f64 + 1.0)) as u64,
            flip_probability: config.flip_probability,
            rng,
            selected: 0,
            open: true,
        })
    }

    /// Name of the chip at `index`.
    pub fn chip_name(index: usize) -> String {
        format!("v{:03}", index + 1)
    }

    /// Index of the chip called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let index = name.strip_prefix('v')?.parse::<usize>().ok()?.checked_sub(1)?;
        (index < self.references.len() && Self::chip_name(index) == name).then_some(index)
    }

    /// All chip names in index order.
    pub fn names(&self) -> Vec<String> {
        (0..self.references.len()).map(Self::chip_name).collect()
    }

    /// Number of chips.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Returns true if the population is empty.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Per-bit flip probability of every read.
    pub fn flip_probability(&self) -> f64 {
        self.flip_probability
    }

    /// Noise-free response of the chip at `index`.
    pub fn reference(&self, index: usize) -> Option<&Signature> {
        self.references.get(index)
    }

    /// Makes the chip called `name` the target of `next`.
    pub fn select(&mut self, name: &str) -> Result<(), SourceError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| SourceError::UnknownChip(name.to_string()))?;
        self.selected = index;
        Ok(())
    }

    /// Makes the chip at `index` the target of `next`.
    pub fn select_index(&mut self, index: usize) -> Result<(), SourceError> {
        if index >= self.references.len() {
            return Err(SourceError::UnknownChip(Self::chip_name(index)));
        }
        self.selected = index;
        Ok(())
    }

    /// Name of the chip `next` reads.
    pub fn selected_name(&self) -> String {
        Self::chip_name(self.selected)
    }

    /// Reads the chip at `index` without changing the selection.
    pub fn read(&mut self, index: usize) -> Result<Signature, SourceError> {
        if !self.open {
            return Err(SourceError::Closed);
        }
        let reference = self
            .references
            .get(index)
            .ok_or_else(|| SourceError::UnknownChip(Self::chip_name(index)))?;
        let mut sig = reference.clone();
        for bit in 0..self.n_bits {
            if u64::from(self.rng.next_u32()) < self.flip_threshold {
                sig.flip(bit);
            }
        }
        Ok(sig)
    }

    /// Independent copy of the population whose reads come from their
    /// own stream. Forks with different `stream` values never share
    /// random draws with each other or with the original.
    pub fn fork(&self, stream: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(READ_STREAM + 1 + stream);
        Self {
            rng,
            open: true,
            ..self.clone()
        }
    }

    /// Enrolls every chip's reference response in `identifier`.
    pub fn enroll_references(&self, identifier: &mut ChipIdentifier) -> Result<(), IdentifyError> {
        for (index, reference) in self.references.iter().enumerate() {
            identifier.add(&Self::chip_name(index), reference.clone())?;
        }
        Ok(())
    }
}

impl SignatureSource for VirtualChips {
    fn next(&mut self) -> Result<Signature, SourceError> {
        self.read(self.selected)
    }

    fn close(&mut self) {
        self.open = false;
        tracing::info!("Virtual chip source closed");
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn n_bits(&self) -> usize {
        self.n_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::hamming_distance;

    fn config(chips: usize, flip_probability: f64) -> SimulatorConfig {
        SimulatorConfig {
            chips,
            seed: 7,
            flip_probability,
        }
    }

    #[test]
    fn test_names_and_selection() {
        let mut chips = VirtualChips::new(64, &config(12, 0.0)).unwrap();
        assert_eq!(chips.names()[..3], ["v001", "v002", "v003"]);
        assert_eq!(chips.index_of("v012"), Some(11));
        assert_eq!(chips.index_of("v013"), None);
        assert_eq!(chips.index_of("v1"), None);

        chips.select("v004").unwrap();
        assert_eq!(chips.selected_name(), "v004");
        assert_eq!(&chips.next().unwrap(), chips.reference(3).unwrap());
        assert!(matches!(
            chips.select("chip-1"),
            Err(SourceError::UnknownChip(_))
        ));
    }

    #[test]
    fn test_same_seed_same_population() {
        let mut a = VirtualChips::new(128, &config(4, 0.05)).unwrap();
        let mut b = VirtualChips::new(128, &config(4, 0.05)).unwrap();
        assert_eq!(a.reference(2), b.reference(2));
        assert_eq!(a.read(1).unwrap(), b.read(1).unwrap());
    }

    #[test]
    fn test_noise_rate_near_configured() {
        let mut chips = VirtualChips::new(1024, &config(1, 0.05)).unwrap();
        let reference = chips.reference(0).unwrap().clone();
        let total: usize = (0..50)
            .map(|_| hamming_distance(&reference, &chips.next().unwrap()).unwrap())
            .sum();
        let rate = total as f64 / (50.0 * 1024.0);
        assert!((rate - 0.05).abs() < 0.01, "rate = {rate}");
    }

    #[test]
    fn test_references_differ() {
        let chips = VirtualChips::new(256, &config(3, 0.0)).unwrap();
        let d = hamming_distance(chips.reference(0).unwrap(), chips.reference(1).unwrap()).unwrap();
        assert!(d > 64 && d < 192);
    }

    #[test]
    fn test_forks_are_independent() {
        let chips = VirtualChips::new(512, &config(1, 0.1)).unwrap();
        let mut a = chips.fork(0);
        let mut b = chips.fork(1);
        let mut a_again = chips.fork(0);
        let first = a.next().unwrap();
        assert_eq!(first, a_again.next().unwrap());
        assert_ne!(first, b.next().unwrap());
    }

    #[test]
    fn test_closed_source_fails() {
        let mut chips = VirtualChips::new(32, &config(2, 0.0)).unwrap();
        chips.close();
        assert!(!chips.is_open());
        assert_eq!(chips.next(), Err(SourceError::Closed));
    }

    #[test]
    fn test_invalid_setup_rejected() {
        assert!(VirtualChips::new(0, &config(2, 0.0)).is_err());
        assert!(VirtualChips::new(32, &config(0, 0.0)).is_err());
        assert!(VirtualChips::new(32, &config(2, 0.5)).is_err());
    }

    #[test]
    fn test_enroll_references() {
        use crate::identify::IdentifierConfig;

        let chips = VirtualChips::new(32, &config(3, 0.0)).unwrap();
        let mut identifier = ChipIdentifier::new(IdentifierConfig::new("unused.xml", 32));
        chips.enroll_references(&mut identifier).unwrap();
        assert_eq!(identifier.names(), ["v001", "v002", "v003"]);
        assert_eq!(identifier.meas_count("v002"), 0);
    }
}
