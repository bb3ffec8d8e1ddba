//! Per-iteration randomised prompt and seed selection.
//!
//! Each generated image draws one defect description and one background
//! independently (with replacement) from fixed vocabularies, plus a seed
//! from `[SEED_MIN, SEED_MAX]`. Duplicates across iterations are expected.

use rand::Rng;

use crate::error::CoreError;

/// Defect descriptions understood by the trained LoRA.
pub const DEFECT_DETAILS: &[&str] = &[
    "insulator miss_1",
    "insulator miss_2",
    "insulator miss_3",
    "insulator miss_more",
];

/// Background environments mixed into the prompt.
pub const BACKGROUNDS: &[&str] = &[
    "brown earthy outdoor backdrop",
    "lush green outdoor backdrop",
    "mountainous outdoor backdrop",
    "overcast grey outdoor backdrop",
];

pub const SEED_MIN: u64 = 1;
pub const SEED_MAX: u64 = 1_000_000_000_000_000_000;

/// Randomised parameters for one generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    /// Zero-based iteration index within the run.
    pub index: usize,
    pub defect: String,
    pub background: String,
    pub seed: u64,
}

impl Variation {
    /// The dynamic part of the prompt written into the text node.
    pub fn prompt_suffix(&self) -> String {
        format!(
            "{}, connected to wires against {},",
            self.defect, self.background
        )
    }

    /// Trigger word plus suffix, as the sampler ultimately sees it.
    pub fn full_prompt(&self, prefix: &str) -> String {
        format!("{prefix}, {}", self.prompt_suffix())
    }

    /// One-based position, used in output filenames.
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }
}

/// Draws [`Variation`]s from two fixed vocabularies.
#[derive(Debug, Clone)]
pub struct VariationGenerator<'a> {
    defects: &'a [&'a str],
    backgrounds: &'a [&'a str],
}

impl Default for VariationGenerator<'static> {
    fn default() -> Self {
        Self {
            defects: DEFECT_DETAILS,
            backgrounds: BACKGROUNDS,
        }
    }
}

impl<'a> VariationGenerator<'a> {
    /// Build a generator over custom vocabularies. Both must be non-empty.
    pub fn new(defects: &'a [&'a str], backgrounds: &'a [&'a str]) -> Result<Self, CoreError> {
        if defects.is_empty() || backgrounds.is_empty() {
            return Err(CoreError::Validation(
                "Variation vocabularies must not be empty".to_string(),
            ));
        }
        Ok(Self {
            defects,
            backgrounds,
        })
    }

    /// Draw the variation for iteration `index`.
    pub fn generate<R: Rng>(&self, index: usize, rng: &mut R) -> Variation {
        // Both vocabularies are non-empty by construction.
        let defect = self.defects[rng.random_range(0..self.defects.len())];
        let background = self.backgrounds[rng.random_range(0..self.backgrounds.len())];
        let seed = rng.random_range(SEED_MIN..=SEED_MAX);

        Variation {
            index,
            defect: defect.to_string(),
            background: background.to_string(),
            seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn prompt_suffix_format() {
        let v = Variation {
            index: 0,
            defect: "insulator miss_2".into(),
            background: "lush green outdoor backdrop".into(),
            seed: 7,
        };
        assert_eq!(
            v.prompt_suffix(),
            "insulator miss_2, connected to wires against lush green outdoor backdrop,"
        );
        assert_eq!(
            v.full_prompt("k4s4"),
            "k4s4, insulator miss_2, connected to wires against lush green outdoor backdrop,"
        );
        assert_eq!(v.ordinal(), 1);
    }

    #[test]
    fn draws_stay_within_vocabularies_and_seed_range() {
        let generator = VariationGenerator::default();
        let mut rng = StdRng::seed_from_u64(42);

        for i in 0..2_000 {
            let v = generator.generate(i, &mut rng);
            assert_eq!(v.index, i);
            assert!(DEFECT_DETAILS.contains(&v.defect.as_str()));
            assert!(BACKGROUNDS.contains(&v.background.as_str()));
            assert!((SEED_MIN..=SEED_MAX).contains(&v.seed));
        }
    }

    #[test]
    fn covers_all_sixteen_suffixes() {
        let generator = VariationGenerator::default();
        let mut rng = StdRng::seed_from_u64(7);

        let suffixes: HashSet<String> = (0..2_000)
            .map(|i| generator.generate(i, &mut rng).prompt_suffix())
            .collect();
        assert_eq!(suffixes.len(), DEFECT_DETAILS.len() * BACKGROUNDS.len());
    }

    #[test]
    fn same_seed_same_sequence() {
        let generator = VariationGenerator::default();
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);

        for i in 0..10 {
            assert_eq!(generator.generate(i, &mut a), generator.generate(i, &mut b));
        }
    }

    #[test]
    fn custom_vocabularies() {
        let defects = ["crack"];
        let backgrounds = ["snow"];
        let generator = VariationGenerator::new(&defects, &backgrounds).unwrap();
        let v = generator.generate(3, &mut StdRng::seed_from_u64(1));
        assert_eq!(v.prompt_suffix(), "crack, connected to wires against snow,");
    }

    #[test]
    fn empty_vocabulary_rejected() {
        let backgrounds = ["snow"];
        assert!(VariationGenerator::new(&[], &backgrounds).is_err());
        assert!(VariationGenerator::new(&backgrounds, &[]).is_err());
    }
}
