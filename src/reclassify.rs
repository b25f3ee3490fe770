//src/reclassify.rs

use ahash::AHashMap;
use std::fmt::Write;

use crate::config::ConfidencePolicy;
use crate::error::{RecordError, TaxonomyError};
use crate::taxdb::TaxonomyTree;
use crate::types::{ClassificationRecord, RefinedCall, TaxId, UNCLASSIFIED};

/// Hit keys that mark ambiguous k-mers. `A` is what the classifier writes.
pub const AMBIGUOUS_KEYS: [&str; 2] = ["ambiguous", "A"];

/// Slack allowed when comparing a fraction to the threshold.
pub const THRESHOLD_EPSILON: f64 = 1e-5;

/// Per-record k-mer counts keyed by taxon, with ambiguous hits kept apart.
#[derive(Debug, Default, Clone)]
pub struct HitProfile {
    pub ambiguous: u64,
    pub taxa: AHashMap<TaxId, u64>,
}

impl HitProfile {
    /// Parse a space separated `key:count` list. Repeated keys are summed.
    pub fn parse(hitlist: &str) -> Result<Self, RecordError> {
        let mut profile = HitProfile::default();
        // Every taxon entry and every lineage sum is bounded by this.
        let mut unambiguous: u64 = 0;

        for token in hitlist.split(' ').filter(|t| !t.is_empty()) {
            let (key, count) = token
                .split_once(':')
                .ok_or_else(|| RecordError::MalformedHit {
                    token: token.to_string(),
                })?;
            let count: u64 = count.parse().map_err(|_| RecordError::InvalidCount {
                token: token.to_string(),
            })?;

            let overflow = || RecordError::CountOverflow {
                token: token.to_string(),
            };

            if AMBIGUOUS_KEYS.contains(&key) {
                profile.ambiguous = profile.ambiguous.checked_add(count).ok_or_else(overflow)?;
                continue;
            }
            let tax_id: TaxId = key.parse().map_err(|_| RecordError::MalformedHit {
                token: token.to_string(),
            })?;
            unambiguous = unambiguous.checked_add(count).ok_or_else(overflow)?;
            *profile.taxa.entry(tax_id).or_insert(0) += count;
        }

        Ok(profile)
    }

    /// All non-ambiguous k-mers, including those that matched nothing (key `0`).
    pub fn total_unambiguous(&self) -> u64 {
        self.taxa.values().fold(0, |total, &count| total.saturating_add(count))
    }

    /// For every node on a hit lineage: the hits on itself plus its hit descendants.
    pub fn hit_sums(&self, tree: &TaxonomyTree) -> Result<AHashMap<TaxId, u64>, TaxonomyError> {
        let mut sums: AHashMap<TaxId, u64> = AHashMap::new();
        for (&taxon, &count) in &self.taxa {
            if taxon == UNCLASSIFIED || count == 0 {
                continue;
            }
            for ancestor in tree.ancestors(taxon) {
                let sum = sums.entry(ancestor?).or_insert(0);
                *sum = sum.saturating_add(count);
            }
        }
        Ok(sums)
    }
}

/// Re-anchors classifier calls at the lowest ancestor with enough support.
#[derive(Debug, Clone, Copy)]
pub struct Reclassifier<'a> {
    tree: &'a TaxonomyTree,
    threshold: f64,
    policy: ConfidencePolicy,
}

/// The refined call for one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reclassified {
    pub call: RefinedCall,
    /// The lineage walk hit an undefined node, so the call fell back to unclassified.
    pub missing_ancestor: bool,
}

/// What became of one input line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineOutcome {
    pub line: String,
    pub call: RefinedCall,
    pub missing_ancestor: bool,
}

impl<'a> Reclassifier<'a> {
    pub fn new(tree: &'a TaxonomyTree, threshold: f64, policy: ConfidencePolicy) -> Self {
        Self {
            tree,
            threshold,
            policy,
        }
    }

    /// Walk up from `called` and stop at the first node whose clade holds
    /// at least `threshold` of the unambiguous hits.
    pub fn resolve(&self, called: TaxId, profile: &HitProfile) -> Result<RefinedCall, TaxonomyError> {
        let total = profile.total_unambiguous();
        if total == 0 {
            return Ok(RefinedCall::unclassified(0.0));
        }
        let sums = profile.hit_sums(self.tree)?;

        // Only updated on nodes that were hit; otherwise the previous value stands.
        let mut pct = 0.0;
        for taxon in self.tree.ancestors(called) {
            let taxon = taxon?;
            if let Some(&sum) = sums.get(&taxon) {
                pct = sum as f64 / total as f64;
            }
            if pct >= self.threshold - THRESHOLD_EPSILON {
                return Ok(RefinedCall::classified(taxon, pct));
            }
        }

        let confidence = match self.policy {
            ConfidencePolicy::CarryLast => pct,
            ConfidencePolicy::StrictZero => 0.0,
        };
        Ok(RefinedCall::unclassified(confidence))
    }

    /// Reclassify a parsed record. A broken lineage makes the record unclassified.
    pub fn reclassify(&self, record: &ClassificationRecord) -> Result<Reclassified, RecordError> {
        let profile = HitProfile::parse(&record.hitlist)?;
        match self.resolve(record.tax_id, &profile) {
            Ok(call) => Ok(Reclassified {
                call,
                missing_ancestor: false,
            }),
            Err(err) => {
                log::debug!("Read {}: {}; reporting unclassified", record.read_id, err);
                Ok(Reclassified {
                    call: RefinedCall::unclassified(0.0),
                    missing_ancestor: true,
                })
            }
        }
    }

    /// Parse, reclassify and format one classifier output line.
    pub fn process_line(&self, line: &str) -> Result<LineOutcome, RecordError> {
        let record = parse_classification_line(line)?;
        let Reclassified {
            call,
            missing_ancestor,
        } = self.reclassify(&record)?;
        Ok(LineOutcome {
            line: format_refined_line(&record, &call),
            call,
            missing_ancestor,
        })
    }
}

/// `status <tab> read_id <tab> taxon <tab> length <tab> hitlist [<tab> ...]`
pub fn parse_classification_line(line: &str) -> Result<ClassificationRecord, RecordError> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    let mut next = |field: &'static str| fields.next().ok_or(RecordError::MissingField { field });

    let status = next("status")?.to_string();
    let read_id = next("read_id")?.to_string();
    let tax_field = next("taxon")?;
    let tax_id: TaxId = tax_field.trim().parse().map_err(|_| RecordError::InvalidTaxon {
        value: tax_field.to_string(),
    })?;
    let length = next("length")?.to_string();
    let hitlist = next("hitlist")?.to_string();

    Ok(ClassificationRecord {
        status,
        read_id,
        tax_id,
        length,
        hitlist,
    })
}

/// `C/U <tab> read_id <tab> taxon <tab> length <tab> P=x.xxx <tab> hitlist`
pub fn format_refined_line(record: &ClassificationRecord, call: &RefinedCall) -> String {
    let mut out = String::with_capacity(record.hitlist.len() + record.read_id.len() + 32);
    let _ = write!(
        out,
        "{}\t{}\t{}\t{}\tP={:.3}\t{}",
        call.status_char(),
        record.read_id,
        call.tax_id(),
        record.length,
        call.confidence,
        record.hitlist
    );
    out
}
