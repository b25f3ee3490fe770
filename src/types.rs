//src/types.rs

/// Numeric taxon identifier as written in `nodes.dmp` and classifier output.
pub type TaxId = u32;

/// Taxon id used by the classifier for "no call"; never a real node.
pub const UNCLASSIFIED: TaxId = 0;

/// The root of every NCBI-style taxonomy.
pub const ROOT: TaxId = 1;

/// Where a read ended up: on a real taxon, or nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assignment {
    Unclassified,
    Taxon(TaxId),
}

impl Assignment {
    /// Map the classifier's numeric convention (0 = unclassified) onto an assignment.
    pub fn from_tax_id(tax_id: TaxId) -> Self {
        if tax_id == UNCLASSIFIED {
            Assignment::Unclassified
        } else {
            Assignment::Taxon(tax_id)
        }
    }

    /// Numeric form used in output files.
    pub fn tax_id(self) -> TaxId {
        match self {
            Assignment::Unclassified => UNCLASSIFIED,
            Assignment::Taxon(tax_id) => tax_id,
        }
    }

    pub fn is_classified(self) -> bool {
        matches!(self, Assignment::Taxon(_))
    }
}

/// A structured representation of one Kraken output line:
/// `C/U <tab> read_id <tab> taxon <tab> length <tab> hitlist`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRecord {
    pub status: String,
    pub read_id: String,
    pub tax_id: TaxId,
    /// Kept as text; echoed verbatim.
    pub length: String,
    /// Space separated `key:count` tokens, echoed verbatim.
    pub hitlist: String,
}

/// Result of re-anchoring one record against a confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinedCall {
    pub assignment: Assignment,
    /// Fraction of unambiguous k-mers supporting `assignment`'s clade.
    pub confidence: f64,
}

impl RefinedCall {
    pub fn classified(tax_id: TaxId, confidence: f64) -> Self {
        Self {
            assignment: Assignment::from_tax_id(tax_id),
            confidence,
        }
    }

    pub fn unclassified(confidence: f64) -> Self {
        Self {
            assignment: Assignment::Unclassified,
            confidence,
        }
    }

    pub fn tax_id(&self) -> TaxId {
        self.assignment.tax_id()
    }

    pub fn status_char(&self) -> char {
        if self.assignment.is_classified() {
            'C'
        } else {
            'U'
        }
    }
}

/// First three fields of a (possibly filtered) Kraken output line, which is
/// all the clade report needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub read_id: String,
    pub status: String,
    pub assignment: Assignment,
}

/// A structured representation of one row in the clade report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub pct: f64,
    pub clade_reads: u64,
    pub tax_reads: u64,
    pub rank_code: &'static str,
    pub tax_id: TaxId,
    pub depth: usize, // indentation level
    pub tax_name: String,
}
