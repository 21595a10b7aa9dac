//! Batch characterization of a virtual population.

use super::SessionError;
use crate::bits::{relative_distance, Signature};
use crate::identify::ChipIdentifier;
use crate::source::{SourceError, VirtualChips};
use rayon::prelude::*;

/// Summary of a characterization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Characterization {
    /// Chips measured.
    pub chips: usize,
    /// Readings processed in total.
    pub reads: usize,
    /// Mean relative distance of each chip's readings from its noise-free
    /// reference, in chip order.
    pub noise_by_chip: Vec<(String, f64)>,
}

impl Characterization {
    /// Mean relative noise over all chips.
    pub fn mean_noise(&self) -> f64 {
        if self.noise_by_chip.is_empty() {
            return 0.0;
        }
        self.noise_by_chip.iter().map(|(_, n)| n).sum::<f64>() / self.noise_by_chip.len() as f64
    }
}

/// Reads every chip `reads_per_chip` times and feeds the readings to
/// `identifier`.
///
/// Chips the identifier does not know yet are first enrolled with their
/// noise-free reference, so every chip's inter-chip windows cover the
/// whole population from its first reading on. Chips already enrolled
/// keep their record.
///
/// Readings are generated in parallel, one worker per chip, each on an
/// independent fork of the population. They are then processed
/// sequentially in chip-name order, so the resulting database does not
/// depend on thread scheduling.
pub fn characterize(
    chips: &VirtualChips,
    identifier: &mut ChipIdentifier,
    reads_per_chip: usize,
) -> Result<Characterization, SessionError> {
    tracing::info!(chips = chips.len(), reads_per_chip, "Characterizing population");

    for index in 0..chips.len() {
        let name = VirtualChips::chip_name(index);
        if identifier.record(&name).is_some() {
            continue;
        }
        let reference = chips
            .reference(index)
            .ok_or_else(|| SourceError::UnknownChip(name.clone()))?;
        identifier.add(&name, reference.clone())?;
    }

    let batches = (0..chips.len())
        .into_par_iter()
        .map(|index| read_chip(chips, index, reads_per_chip))
        .collect::<Result<Vec<_>, SourceError>>()?;

    let mut noise_by_chip = Vec::with_capacity(batches.len());
    let mut reads = 0;
    for (name, batch, noise) in batches {
        for sig in &batch {
            identifier.process(&name, sig)?;
        }
        reads += batch.len();
        tracing::debug!(chip = %name, noise, "Chip characterized");
        noise_by_chip.push((name, noise));
    }

    let summary = Characterization {
        chips: noise_by_chip.len(),
        reads,
        noise_by_chip,
    };
    tracing::info!(
        chips = summary.chips,
        reads = summary.reads,
        mean_noise = summary.mean_noise(),
        "Characterization complete"
    );
    Ok(summary)
}

fn read_chip(
    chips: &VirtualChips,
    index: usize,
    reads_per_chip: usize,
) -> Result<(String, Vec<Signature>, f64), SourceError> {
    let mut fork = chips.fork(index as u64);
    let name = VirtualChips::chip_name(index);
    let reference = chips
        .reference(index)
        .ok_or_else(|| SourceError::UnknownChip(name.clone()))?;

    let batch = (0..reads_per_chip)
        .map(|_| fork.read(index))
        .collect::<Result<Vec<_>, _>>()?;

    let total: f64 = batch
        .iter()
        .map(|sig| relative_distance(reference, sig).unwrap_or(0.0))
        .sum();
    let noise = total / reads_per_chip.max(1) as f64;
    Ok((name, batch, noise))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::IdentifierConfig;
    use crate::source::SimulatorConfig;

    fn population(flip_probability: f64) -> VirtualChips {
        VirtualChips::new(
            256,
            &SimulatorConfig {
                chips: 5,
                seed: 3,
                flip_probability,
            },
        )
        .unwrap()
    }

    fn identifier() -> ChipIdentifier {
        ChipIdentifier::new(IdentifierConfig::new("unused.xml", 256))
    }

    #[test]
    fn test_every_chip_measured() {
        let chips = population(0.03);
        let mut id = identifier();
        let summary = characterize(&chips, &mut id, 6).unwrap();

        assert_eq!(summary.chips, 5);
        assert_eq!(summary.reads, 30);
        assert_eq!(id.names(), chips.names());
        for name in chips.names() {
            assert_eq!(id.meas_count(&name), 6);
            assert!(id.unstable_bits_valid(&name));
        }
        assert!((summary.mean_noise() - 0.03).abs() < 0.02);
    }

    #[test]
    fn test_result_independent_of_scheduling() {
        let chips = population(0.05);
        let mut first = identifier();
        let mut second = identifier();
        characterize(&chips, &mut first, 4).unwrap();
        characterize(&chips, &mut second, 4).unwrap();
        assert_eq!(first.database(), second.database());
    }

    #[test]
    fn test_aliasing_after_characterization() {
        let chips = population(0.03);
        let mut id = identifier();
        characterize(&chips, &mut id, 8).unwrap();

        assert!(id.aliasing_ready());
        let estimate = id.probability_of_aliasing().unwrap();
        assert!(estimate.threshold < 64.0);
        assert!(estimate.probability < 1e-3);
    }

    #[test]
    fn test_zero_reads() {
        let chips = population(0.0);
        let mut id = identifier();
        let summary = characterize(&chips, &mut id, 0).unwrap();
        assert_eq!(summary.reads, 0);
        assert_eq!(id.len(), 5);
        for name in chips.names() {
            assert_eq!(id.meas_count(&name), 0);
        }
        assert_eq!(summary.mean_noise(), 0.0);
    }

    #[test]
    fn test_inter_chip_windows_cover_population() {
        let chips = population(0.03);
        let mut id = identifier();
        characterize(&chips, &mut id, 3).unwrap();

        for name in chips.names() {
            let record = id.record(&name).unwrap();
            assert_eq!(record.inter_chip().len(), 4, "chip {name}");
            for window in record.inter_chip().values() {
                assert_eq!(window.len(), 3);
            }
            // No noise sample for the first reading after enrollment.
            assert_eq!(record.noise().len(), 2);
            let index = chips.index_of(&name).unwrap();
            assert_eq!(record.signature(), chips.reference(index).unwrap());
        }
    }

    #[test]
    fn test_existing_records_kept() {
        let chips = population(0.03);
        let mut id = identifier();
        characterize(&chips, &mut id, 2).unwrap();
        characterize(&chips, &mut id, 2).unwrap();
        for name in chips.names() {
            assert_eq!(id.meas_count(&name), 4);
        }
    }
}
