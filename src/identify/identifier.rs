//! Matching readings against enrolled chips and tracking statistics.

use super::aliasing::{estimate_aliasing, AliasError, AliasEstimate};
use super::{IdentifierConfig, IdentifyError};
use crate::bits::{hamming_distance, Signature};
use crate::store::{ChipDatabase, ChipRecord, DistanceWindow, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Closest enrolled chip for a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Chip name.
    pub name: String,
    /// Hamming distance divided by the signature length.
    pub distance: f64,
}

/// Outcome of comparing a reading with the noise threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Best match lies within the noise threshold.
    Known(Match),
    /// Empty database, or the best match is too far away.
    Unknown(Option<Match>),
}

/// In-memory signature database with matching and statistics.
pub struct ChipIdentifier {
    config: IdentifierConfig,
    db: ChipDatabase,
}

impl ChipIdentifier {
    /// Creates an empty identifier without touching the filesystem.
    pub fn new(config: IdentifierConfig) -> Self {
        let db = ChipDatabase::new(config.n_bits, config.max_distances);
        Self { config, db }
    }

    /// Opens the database at `config.path`.
    ///
    /// A missing file starts an empty database (its directory is
    /// created). A malformed file is logged and also starts empty.
    /// Only filesystem failures while creating the directory propagate.
    pub fn open(config: IdentifierConfig) -> Result<Self, IdentifyError> {
        if config.path.is_file() {
            return match Self::load(config.clone()) {
                Ok(identifier) => Ok(identifier),
                Err(e) => {
                    tracing::error!(
                        path = %config.path.display(),
                        error = %e,
                        "Could not load signature database, starting empty"
                    );
                    Ok(Self::new(config))
                }
            };
        }

        tracing::warn!(
            path = %config.path.display(),
            "No chip signatures found"
        );
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::from)?;
            }
        }
        Ok(Self::new(config))
    }

    /// Loads the database at `config.path`, propagating every error.
    pub fn load(config: IdentifierConfig) -> Result<Self, IdentifyError> {
        let db = ChipDatabase::load(&config.path, config.n_bits, config.max_distances)?;
        tracing::info!(
            path = %config.path.display(),
            chips = db.len(),
            "Using signature database"
        );
        Ok(Self { config, db })
    }

    /// Writes the database to its backing file.
    pub fn save(&self) -> Result<(), IdentifyError> {
        self.db.save(&self.config.path)?;
        Ok(())
    }

    /// Writes the database to `path` and makes it the backing file.
    pub fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<(), IdentifyError> {
        self.config.path = path.into();
        self.save()
    }

    /// Drops every record and saves the empty database.
    pub fn clear(&mut self) -> Result<(), IdentifyError> {
        self.db.clear();
        tracing::info!(path = %self.config.path.display(), "Cleared signature database");
        self.save()
    }

    /// Active configuration.
    pub fn config(&self) -> &IdentifierConfig {
        &self.config
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Signature length in bits.
    pub fn n_bits(&self) -> usize {
        self.config.n_bits
    }

    /// Underlying record set.
    pub fn database(&self) -> &ChipDatabase {
        &self.db
    }

    /// Number of enrolled chips.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Returns true if no chip is enrolled.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Enrolled chip names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.db.names().map(str::to_owned).collect()
    }

    /// Record for `name`, if enrolled.
    pub fn record(&self, name: &str) -> Option<&ChipRecord> {
        self.db.get(name)
    }

    /// Reference signature for `name`, if enrolled.
    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.db.get(name).map(ChipRecord::signature)
    }

    /// Relative distance from `sig` to every enrolled chip.
    pub fn match_map(&self, sig: &Signature) -> Result<BTreeMap<String, f64>, IdentifyError> {
        self.check_length(sig)?;
        let n_bits = self.config.n_bits.max(1) as f64;
        self.db
            .iter()
            .map(|(name, record)| {
                let distance = hamming_distance(sig, record.signature())? as f64 / n_bits;
                Ok((name.clone(), distance))
            })
            .collect()
    }

    /// The `count` closest chips, nearest first. Equal distances keep
    /// name order.
    pub fn best_matches(&self, sig: &Signature, count: usize) -> Result<Vec<Match>, IdentifyError> {
        let mut matches: Vec<Match> = self
            .match_map(sig)?
            .into_iter()
            .map(|(name, distance)| Match { name, distance })
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(count);
        Ok(matches)
    }

    /// Closest enrolled chip, or `None` for an empty database.
    ///
    /// Ties go to the lexicographically smallest name.
    pub fn identify(&self, sig: &Signature) -> Result<Option<Match>, IdentifyError> {
        let mut best: Option<Match> = None;
        for (name, distance) in self.match_map(sig)? {
            if best.as_ref().map_or(true, |b| distance < b.distance) {
                best = Some(Match { name, distance });
            }
        }
        Ok(best)
    }

    /// Identifies `sig` and applies the configured noise threshold.
    pub fn classify(&self, sig: &Signature) -> Result<Classification, IdentifyError> {
        Ok(match self.identify(sig)? {
            Some(best) if best.distance <= self.config.noise_threshold => {
                Classification::Known(best)
            }
            other => Classification::Unknown(other),
        })
    }

    /// Enrolls `sig` as the reference for `name` with no measurements.
    ///
    /// An existing record under the same name is replaced, statistics
    /// included; re-enrolling a chip starts it over.
    pub fn add(&mut self, name: &str, sig: Signature) -> Result<(), IdentifyError> {
        self.check_length(&sig)?;
        let replaced = self
            .db
            .insert(name, ChipRecord::enrolled(sig, self.config.max_distances))
            .is_some();
        tracing::info!(chip = name, replaced, "Enrolled chip");
        Ok(())
    }

    /// Records one measurement of `name`.
    ///
    /// Unknown chips are enrolled with `sig` as their reference. For a
    /// known chip that has been measured before, the bits differing from
    /// the reference join the unstable mask and the distance to the
    /// reference joins the noise window. The distance from `sig` to every
    /// other chip's reference joins the matching inter-chip window.
    pub fn process(&mut self, name: &str, sig: &Signature) -> Result<(), IdentifyError> {
        self.check_length(sig)?;
        let n_bits = self.config.n_bits;
        let capacity = self.config.max_distances;

        let others = self
            .db
            .iter()
            .filter(|(other, _)| other.as_str() != name)
            .map(|(other, record)| Ok((other.clone(), hamming_distance(sig, record.signature())?)))
            .collect::<Result<Vec<_>, IdentifyError>>()?;

        let (record, existed) = self.db.entry_or_enroll(name, sig);
        if !existed {
            tracing::info!(chip = name, "Enrolled new chip from measurement");
        }
        let prior_count = record.meas_count;

        if existed {
            let mask = record
                .unstable_bits
                .get_or_insert_with(|| Signature::zeros(n_bits));
            if prior_count > 0 {
                let diff = record.signature.xor(sig)?;
                mask.or_assign(&diff)?;
            }
        }

        record.meas_count += 1;

        if existed && prior_count > 0 {
            let noise = hamming_distance(sig, &record.signature)?;
            record.noise.push(noise);
        }

        for (other, distance) in others {
            record
                .inter_chip
                .entry(other)
                .or_insert_with(|| DistanceWindow::new(capacity))
                .push(distance);
        }

        tracing::debug!(
            chip = name,
            meas_count = record.meas_count,
            noise_samples = record.noise.len(),
            "Processed measurement"
        );
        Ok(())
    }

    /// Measurements processed for `name`; zero for unknown chips.
    pub fn meas_count(&self, name: &str) -> u64 {
        self.db.get(name).map_or(0, ChipRecord::meas_count)
    }

    /// True once `name` has been measured more than once.
    pub fn unstable_bits_valid(&self, name: &str) -> bool {
        self.meas_count(name) > 1
    }

    /// Number of bit positions of `name` seen to flip.
    pub fn num_unstable_bits(&self, name: &str) -> usize {
        self.db
            .get(name)
            .and_then(ChipRecord::unstable_bits)
            .map_or(0, Signature::count_ones)
    }

    /// Mean noise distance for `name`; zero without samples.
    pub fn noise_distance_average(&self, name: &str) -> f64 {
        self.db.get(name).map_or(0.0, |record| {
            record.noise().sum() as f64 / record.noise().len().max(1) as f64
        })
    }

    /// Mean distance from `name`'s readings to all other chips; zero
    /// without samples.
    pub fn inter_chip_distance_average(&self, name: &str) -> f64 {
        self.db.get(name).map_or(0.0, |record| {
            let (sum, count) = record
                .inter_chip()
                .values()
                .fold((0usize, 0usize), |(sum, count), window| {
                    (sum + window.sum(), count + window.len())
                });
            sum as f64 / count.max(1) as f64
        })
    }

    /// Every stored noise distance across all chips.
    pub fn all_noise_distances(&self) -> Vec<usize> {
        self.db
            .iter()
            .flat_map(|(_, record)| record.noise().iter())
            .collect()
    }

    /// Every stored inter-chip distance across all chips.
    pub fn all_inter_chip_distances(&self) -> Vec<usize> {
        self.db
            .iter()
            .flat_map(|(_, record)| record.inter_chip().values())
            .flat_map(DistanceWindow::iter)
            .collect()
    }

    /// True when the population is large enough for a meaningful
    /// aliasing estimate: more than two chips and more than two noise
    /// distances.
    pub fn aliasing_ready(&self) -> bool {
        self.len() > 2 && self.all_noise_distances().len() > 2
    }

    /// Fits the pooled noise and inter-chip distances and returns the
    /// 99.7% noise threshold with the probability that another chip
    /// falls inside it.
    pub fn probability_of_aliasing(&self) -> Result<AliasEstimate, AliasError> {
        estimate_aliasing(&self.all_noise_distances(), &self.all_inter_chip_distances())
    }

    fn check_length(&self, sig: &Signature) -> Result<(), IdentifyError> {
        if sig.len() != self.config.n_bits {
            return Err(IdentifyError::SignatureLength {
                expected: self.config.n_bits,
                found: sig.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChipIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipIdentifier")
            .field("path", &self.config.path)
            .field("n_bits", &self.config.n_bits)
            .field("chips", &self.db.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::hamming_weight;

    fn sig(hex: &str) -> Signature {
        Signature::from_hex(hex).unwrap()
    }

    fn identifier(n_bits: usize) -> ChipIdentifier {
        ChipIdentifier::new(IdentifierConfig::new("unused.xml", n_bits))
    }

    #[test]
    fn test_identify_empty_returns_none() {
        let ci = identifier(32);
        assert_eq!(ci.identify(&sig("deadbeef")).unwrap(), None);
        assert_eq!(
            ci.classify(&sig("deadbeef")).unwrap(),
            Classification::Unknown(None)
        );
    }

    #[test]
    fn test_identify_selects_minimum() {
        let mut ci = ChipIdentifier::new(IdentifierConfig::new("unused.xml", 32));
        ci.add("d1", sig("deadbeef")).unwrap();
        ci.add("d2", sig("fa1afe13")).unwrap();
        ci.add("d3", sig("00010203")).unwrap();

        let query = sig("deedbeaf");
        let map = ci.match_map(&query).unwrap();
        assert!((map["d1"] - 2.0 / 32.0).abs() < 1e-12);
        assert!((map["d2"] - 15.0 / 32.0).abs() < 1e-12);
        assert!((map["d3"] - 20.0 / 32.0).abs() < 1e-12);

        let best = ci.identify(&query).unwrap().unwrap();
        assert_eq!(best.name, "d1");
        assert!(best.distance <= map["d2"] && best.distance <= map["d3"]);
    }

    #[test]
    fn test_best_matches_sorted() {
        let mut ci = identifier(32);
        ci.add("d1", sig("deadbeef")).unwrap();
        ci.add("d2", sig("fa1afe13")).unwrap();
        ci.add("d3", sig("00010203")).unwrap();

        let matches = ci.best_matches(&sig("deedbeaf"), 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].name, "d1");
        assert!(matches[0].distance <= matches[1].distance);
    }

    #[test]
    fn test_tie_breaks_by_name() {
        let mut ci = identifier(8);
        ci.add("zeta", sig("0f")).unwrap();
        ci.add("alpha", sig("f0")).unwrap();
        // Equidistant from both references.
        let best = ci.identify(&sig("00")).unwrap().unwrap();
        assert_eq!(best.name, "alpha");
    }

    #[test]
    fn test_classify_applies_threshold() {
        let mut config = IdentifierConfig::new("unused.xml", 8);
        config.noise_threshold = 0.25;
        let mut ci = ChipIdentifier::new(config);
        ci.add("a", sig("00")).unwrap();

        assert!(matches!(
            ci.classify(&sig("01")).unwrap(),
            Classification::Known(Match { .. })
        ));
        assert!(matches!(
            ci.classify(&sig("ff")).unwrap(),
            Classification::Unknown(Some(_))
        ));
    }

    #[test]
    fn test_add_starts_at_zero() {
        let mut ci = identifier(32);
        ci.add("a", sig("deadbeef")).unwrap();
        assert_eq!(ci.meas_count("a"), 0);
        assert_eq!(ci.signature("a"), Some(&sig("deadbeef")));
    }

    #[test]
    fn test_add_replaces_statistics() {
        let mut ci = identifier(8);
        ci.process("a", &sig("00")).unwrap();
        ci.process("a", &sig("01")).unwrap();
        ci.add("a", sig("ff")).unwrap();

        let record = ci.record("a").unwrap();
        assert_eq!(record.meas_count(), 0);
        assert!(record.noise().is_empty());
        assert!(record.unstable_bits().is_none());
    }

    #[test]
    fn test_first_process_enrolls() {
        let mut ci = identifier(32);
        ci.process("a", &sig("deadbeef")).unwrap();
        assert_eq!(ci.meas_count("a"), 1);
        assert!(!ci.unstable_bits_valid("a"));
        assert!(ci.record("a").unwrap().noise().is_empty());
    }

    #[test]
    fn test_second_process_tracks_unstable_bits() {
        let mut ci = identifier(32);
        let s1 = sig("deadbeef");
        let s2 = sig("deedbeaf");
        ci.process("a", &s1).unwrap();
        ci.process("a", &s2).unwrap();

        assert!(ci.unstable_bits_valid("a"));
        assert_eq!(
            ci.num_unstable_bits("a"),
            hamming_weight(&s1.xor(&s2).unwrap())
        );
        assert_eq!(ci.all_noise_distances(), vec![2]);
        assert!((ci.noise_distance_average("a") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_unstable_mask_only_grows() {
        let mut ci = identifier(8);
        ci.process("a", &sig("00")).unwrap();
        ci.process("a", &sig("01")).unwrap();
        ci.process("a", &sig("80")).unwrap();
        ci.process("a", &sig("00")).unwrap();
        assert_eq!(ci.num_unstable_bits("a"), 2);
        assert_eq!(ci.record("a").unwrap().unstable_bits(), Some(&sig("81")));
    }

    #[test]
    fn test_inter_chip_excludes_self() {
        let mut ci = identifier(8);
        ci.process("a", &sig("00")).unwrap();
        ci.process("b", &sig("ff")).unwrap();
        ci.process("a", &sig("01")).unwrap();

        let a = ci.record("a").unwrap();
        assert!(!a.inter_chip().contains_key("a"));
        assert_eq!(a.inter_chip()["b"].iter().collect::<Vec<_>>(), vec![7]);

        let b = ci.record("b").unwrap();
        assert!(!b.inter_chip().contains_key("b"));
        assert_eq!(b.inter_chip()["a"].iter().collect::<Vec<_>>(), vec![8]);

        assert!((ci.inter_chip_distance_average("a") - 7.0).abs() < 1e-12);
        let mut all = ci.all_inter_chip_distances();
        all.sort_unstable();
        assert_eq!(all, vec![7, 8]);
    }

    #[test]
    fn test_windows_capped_at_capacity() {
        let mut ci = identifier(8);
        ci.process("b", &sig("ff")).unwrap();
        for i in 0..200u32 {
            let value = if i % 2 == 0 { "00" } else { "03" };
            ci.process("a", &sig(value)).unwrap();
        }
        let record = ci.record("a").unwrap();
        assert_eq!(record.meas_count(), 200);
        assert_eq!(record.noise().len(), 64);
        assert_eq!(record.inter_chip()["b"].len(), 64);
    }

    #[test]
    fn test_unknown_chip_queries() {
        let ci = identifier(8);
        assert_eq!(ci.meas_count("nobody"), 0);
        assert!(!ci.unstable_bits_valid("nobody"));
        assert_eq!(ci.num_unstable_bits("nobody"), 0);
        assert_eq!(ci.noise_distance_average("nobody"), 0.0);
        assert_eq!(ci.inter_chip_distance_average("nobody"), 0.0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut ci = identifier(32);
        assert!(matches!(
            ci.process("a", &sig("00")),
            Err(IdentifyError::SignatureLength { expected: 32, found: 8 })
        ));
        assert!(ci.identify(&sig("00")).is_err());
        assert!(ci.add("a", sig("00")).is_err());
        assert!(ci.is_empty());
    }

    #[test]
    fn test_aliasing_gate() {
        let mut ci = identifier(8);
        ci.process("a", &sig("00")).unwrap();
        ci.process("b", &sig("ff")).unwrap();
        assert!(!ci.aliasing_ready());
        assert!(matches!(
            ci.probability_of_aliasing(),
            Err(AliasError::InsufficientSamples { .. })
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = IdentifierConfig::new(dir.path().join("db").join("signatures.xml"), 32);
        let mut ci = ChipIdentifier::open(config.clone()).unwrap();

        let reads = [
            ("chip-a", ["deadbeef", "deadbeee"]),
            ("chip-b", ["fa1afe13", "fa1afe93"]),
            ("chip-c", ["00010203", "00010207"]),
        ];
        for (name, pair) in &reads {
            ci.add(name, sig(pair[0])).unwrap();
        }
        for (name, pair) in &reads {
            for hex in pair {
                ci.process(name, &sig(hex)).unwrap();
            }
        }
        ci.save().unwrap();

        let reloaded = ChipIdentifier::load(config).unwrap();
        assert_eq!(reloaded.database(), ci.database());
        assert_eq!(reloaded.meas_count("chip-b"), 2);
        assert_eq!(reloaded.num_unstable_bits("chip-b"), 1);
    }

    #[test]
    fn test_open_malformed_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.xml");
        std::fs::write(&path, "<not_a_chip_list/>").unwrap();

        let config = IdentifierConfig::new(&path, 32);
        assert!(ChipIdentifier::load(config.clone()).is_err());
        let ci = ChipIdentifier::open(config).unwrap();
        assert!(ci.is_empty());
    }

    #[test]
    fn test_clear_persists_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = IdentifierConfig::new(dir.path().join("signatures.xml"), 8);
        let mut ci = ChipIdentifier::open(config.clone()).unwrap();
        ci.process("a", &sig("00")).unwrap();
        ci.save().unwrap();

        ci.clear().unwrap();
        assert!(ci.is_empty());
        assert!(ChipIdentifier::load(config).unwrap().is_empty());
    }
}
