// src/lib.rs
pub mod classifications_stats;
pub mod classify_stream;
pub mod config;
pub mod error;
pub mod io;
pub mod progress;
pub mod reclassify;
pub mod taxdb;
pub mod types;

use std::io::{BufRead, Write};

pub use crate::classifications_stats::{CladeAggregator, CladeCounts, ReportRenderer, ScanStats};
pub use crate::classify_stream::{reclassify_batch, ClassificationStreamProcessor, StreamStats};
pub use crate::config::{ConfidencePolicy, FilterConfig, OutputOrder, ReportConfig};
pub use crate::error::{PostprocessError, RecordError, Result, TaxonomyError};
pub use crate::reclassify::{HitProfile, Reclassified, Reclassifier};
pub use crate::taxdb::TaxonomyTree;
pub use crate::types::{Assignment, ClassificationRecord, RefinedCall, ReportRow, TaxId};

/// Re-anchor every classification in `input` against the confidence
/// threshold and write the filtered lines to `output`.
pub fn filter_classifications<R, W>(
    tree: &TaxonomyTree,
    config: &FilterConfig,
    input: R,
    output: W,
) -> Result<StreamStats>
where
    R: BufRead,
    W: Write + Send,
{
    ClassificationStreamProcessor::new(tree, config).run(input, output)
}

/// Count assignments in `input`, sum them over clades and write the report.
pub fn report_classifications<R, W>(
    tree: &TaxonomyTree,
    config: &ReportConfig,
    input: R,
    mut output: W,
) -> Result<ScanStats>
where
    R: BufRead,
    W: Write,
{
    check_taxonomy(tree, config.strict_taxonomy)?;

    let mut aggregator = CladeAggregator::new(tree);
    let stats = aggregator.scan(input)?;
    let counts = aggregator.aggregate();
    ReportRenderer::new(&counts, config.show_zeros).render(&mut output)?;
    output.flush()?;
    Ok(stats)
}

/// Log every integrity problem; fail on any if `strict`.
pub fn check_taxonomy(tree: &TaxonomyTree, strict: bool) -> Result<()> {
    let issues = tree.validate();
    if issues.is_empty() {
        return Ok(());
    }
    for issue in &issues {
        if strict {
            log::error!("{issue}");
        } else {
            log::warn!("{issue}");
        }
    }
    if strict {
        return Err(PostprocessError::InvalidTaxonomy(issues.len()));
    }
    Ok(())
}
