//! Per-marker, per-sample copy-number resolution.
//!
//! Every sample starts diploid. Markers with a male/female exception remap
//! by gender (policy decides where unknown genders go), explicit
//! marker+sample overrides win over gender, and trust checking forces
//! fully untrusted samples out of the fit entirely.

use luma_core::{
    CopyNumber, CopyOverrideMap, Gender, Result, SampleId, SpecialSnp, SpecialSnpMap, TrustMap,
    UnknownGenderPolicy,
};

pub struct CopyNumberResolver<'a> {
    special: &'a SpecialSnpMap,
    overrides: &'a CopyOverrideMap,
    trust: &'a TrustMap,
    trust_check: bool,
    policy: UnknownGenderPolicy,
}

impl<'a> CopyNumberResolver<'a> {
    pub fn new(
        special: &'a SpecialSnpMap,
        overrides: &'a CopyOverrideMap,
        trust: &'a TrustMap,
        trust_check: bool,
        policy: UnknownGenderPolicy,
    ) -> Self {
        CopyNumberResolver {
            special,
            overrides,
            trust,
            trust_check,
            policy,
        }
    }

    /// Expected copy number for every sample at one marker.
    pub fn resolve(
        &self,
        marker: &str,
        genders: &[Gender],
        sample_ids: &[SampleId],
    ) -> Result<Vec<CopyNumber>> {
        debug_assert_eq!(genders.len(), sample_ids.len());
        let special = self
            .special
            .get(marker)
            .copied()
            .unwrap_or_else(SpecialSnp::default);

        let mut copies = Vec::with_capacity(genders.len());
        for &gender in genders {
            let count = match gender {
                Gender::Female => special.female_copy,
                Gender::Male => special.male_copy,
                Gender::Unknown => match self.policy {
                    UnknownGenderPolicy::MimicMale => special.male_copy,
                    UnknownGenderPolicy::MimicFemale => special.female_copy,
                },
            };
            copies.push(CopyNumber::from_count(count)?);
        }

        if let Some(forced) = self.overrides.get(marker) {
            for (copy, &count) in copies.iter_mut().zip(forced) {
                *copy = CopyNumber::from_count(count)?;
            }
        }

        if self.trust_check && !self.trust.is_empty() {
            for (copy, sample) in copies.iter_mut().zip(sample_ids) {
                if !self.trust.is_trusted(sample, marker) {
                    *copy = CopyNumber::Untrusted;
                }
            }
        }

        Ok(copies)
    }
}

/// Non-empty subsets by copy number, highest copy first. Untrusted samples
/// belong to no subset.
pub fn subsets(copies: &[CopyNumber]) -> Vec<(CopyNumber, Vec<usize>)> {
    let mut out = Vec::new();
    for target in [CopyNumber::Diploid, CopyNumber::Haploid] {
        let members: Vec<usize> = copies
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == target)
            .map(|(i, _)| i)
            .collect();
        if !members.is_empty() {
            out.push((target, members));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ids(n: usize) -> Vec<SampleId> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    fn chr_x() -> SpecialSnpMap {
        let mut m = HashMap::new();
        m.insert(
            "X_SNP".to_string(),
            SpecialSnp {
                male_copy: 1,
                female_copy: 2,
            },
        );
        m
    }

    #[test]
    fn autosomal_markers_are_all_diploid() {
        let special = HashMap::new();
        let overrides = HashMap::new();
        let trust = TrustMap::new();
        let resolver = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            false,
            UnknownGenderPolicy::MimicFemale,
        );
        let genders = [Gender::Male, Gender::Female, Gender::Unknown];
        let copies = resolver.resolve("SNP_1", &genders, &ids(3)).unwrap();
        assert!(copies.iter().all(|&c| c == CopyNumber::Diploid));
        let subs = subsets(&copies);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].0, CopyNumber::Diploid);
    }

    #[test]
    fn gender_routes_chr_x_and_policy_moves_only_unknowns() {
        let special = chr_x();
        let overrides = HashMap::new();
        let trust = TrustMap::new();
        let genders = [Gender::Male, Gender::Female, Gender::Unknown];

        let as_female = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            false,
            UnknownGenderPolicy::MimicFemale,
        )
        .resolve("X_SNP", &genders, &ids(3))
        .unwrap();
        assert_eq!(
            as_female,
            vec![CopyNumber::Haploid, CopyNumber::Diploid, CopyNumber::Diploid]
        );

        let as_male = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            false,
            UnknownGenderPolicy::MimicMale,
        )
        .resolve("X_SNP", &genders, &ids(3))
        .unwrap();
        // Only the unknown sample moved.
        assert_eq!(as_male[0], as_female[0]);
        assert_eq!(as_male[1], as_female[1]);
        assert_eq!(as_male[2], CopyNumber::Haploid);

        let subs = subsets(&as_female);
        assert_eq!(subs[0], (CopyNumber::Diploid, vec![1, 2]));
        assert_eq!(subs[1], (CopyNumber::Haploid, vec![0]));
    }

    #[test]
    fn overrides_beat_gender() {
        let special = chr_x();
        let mut overrides = HashMap::new();
        overrides.insert("X_SNP".to_string(), vec![2u8, 1, 0]);
        let trust = TrustMap::new();
        let resolver = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            false,
            UnknownGenderPolicy::MimicFemale,
        );
        let genders = [Gender::Male, Gender::Female, Gender::Female];
        let copies = resolver.resolve("X_SNP", &genders, &ids(3)).unwrap();
        assert_eq!(
            copies,
            vec![CopyNumber::Diploid, CopyNumber::Haploid, CopyNumber::Untrusted]
        );
    }

    #[test]
    fn zero_trust_forces_untrusted() {
        let special = HashMap::new();
        let overrides = HashMap::new();
        let mut trust = TrustMap::new();
        trust
            .insert("s0".to_string(), "SNP_1".to_string(), 0)
            .unwrap();
        trust
            .insert("s1".to_string(), "SNP_1".to_string(), 5)
            .unwrap();
        let resolver = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            true,
            UnknownGenderPolicy::MimicFemale,
        );
        let genders = [Gender::Female, Gender::Female];
        let copies = resolver.resolve("SNP_1", &genders, &ids(2)).unwrap();
        assert_eq!(copies, vec![CopyNumber::Untrusted, CopyNumber::Diploid]);

        // Trust checking off leaves everyone in.
        let lax = CopyNumberResolver::new(
            &special,
            &overrides,
            &trust,
            false,
            UnknownGenderPolicy::MimicFemale,
        );
        let copies = lax.resolve("SNP_1", &genders, &ids(2)).unwrap();
        assert!(copies.iter().all(|&c| c == CopyNumber::Diploid));
    }
}
