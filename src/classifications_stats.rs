// src/classifications_stats.rs

use ahash::{AHashMap, AHashSet};
use std::cmp::Reverse;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use crate::error::RecordError;
use crate::taxdb::TaxonomyTree;
use crate::types::{Assignment, AssignmentRecord, ReportRow, TaxId, ROOT, UNCLASSIFIED};

/// Single-letter code printed for a rank; `-` for anything not listed.
pub fn rank_code(rank: &str) -> &'static str {
    match rank {
        "species" => "S",
        "genus" => "G",
        "family" => "F",
        "order" => "O",
        "class" => "C",
        "phylum" => "P",
        "kingdom" => "K",
        "superkingdom" => "D",
        _ => "-",
    }
}

/// `status <tab> read_id <tab> taxon [<tab> ...]` is all a report needs.
pub fn parse_assignment_line(line: &str) -> Result<AssignmentRecord, RecordError> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    let mut next = |field: &'static str| fields.next().ok_or(RecordError::MissingField { field });

    let status = next("status")?.to_string();
    let read_id = next("read_id")?.to_string();
    let tax_field = next("taxon")?;
    let tax_id: TaxId = tax_field.trim().parse().map_err(|_| RecordError::InvalidTaxon {
        value: tax_field.to_string(),
    })?;

    Ok(AssignmentRecord {
        read_id,
        status,
        assignment: Assignment::from_tax_id(tax_id),
    })
}

/// Totals for one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub records: u64,
    pub skipped: u64,
}

/// Scan phase: tallies how many reads land directly on each taxon.
pub struct CladeAggregator<'a> {
    tree: &'a TaxonomyTree,
    direct: AHashMap<TaxId, u64>,
    unclassified: u64,
    total_records: u64,
}

impl<'a> CladeAggregator<'a> {
    pub fn new(tree: &'a TaxonomyTree) -> Self {
        Self {
            tree,
            direct: AHashMap::new(),
            unclassified: 0,
            total_records: 0,
        }
    }

    pub fn add(&mut self, assignment: Assignment) {
        match assignment {
            Assignment::Unclassified => self.unclassified += 1,
            Assignment::Taxon(tax_id) => *self.direct.entry(tax_id).or_insert(0) += 1,
        }
        self.total_records += 1;
    }

    pub fn add_line(&mut self, line: &str) -> Result<(), RecordError> {
        let record = parse_assignment_line(line)?;
        self.add(record.assignment);
        Ok(())
    }

    /// Consume a whole stream. Unparsable lines, including ones that are not
    /// UTF-8, are skipped; blank lines ignored. Only read failures are fatal.
    pub fn scan<R: BufRead>(&mut self, mut input: R) -> io::Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut buf = Vec::new();
        let mut line_no = 0u64;
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let parsed = std::str::from_utf8(&buf)
                .map_err(|_| RecordError::InvalidUtf8)
                .and_then(|line| {
                    if line.trim().is_empty() {
                        return Ok(false);
                    }
                    self.add_line(line).map(|()| true)
                });
            match parsed {
                Ok(true) => stats.records += 1,
                Ok(false) => {}
                Err(err) => {
                    if stats.skipped == 0 {
                        log::warn!("Skipping malformed record on line {}: {}", line_no, err);
                    } else {
                        log::debug!("Skipping malformed record on line {}: {}", line_no, err);
                    }
                    stats.skipped += 1;
                }
            }
        }
        if stats.skipped > 0 {
            log::info!("Skipped {} malformed record(s)", stats.skipped);
        }
        Ok(stats)
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn direct_count(&self, tax_id: TaxId) -> u64 {
        if tax_id == UNCLASSIFIED {
            return self.unclassified;
        }
        self.direct.get(&tax_id).copied().unwrap_or(0)
    }

    /// Aggregation phase: one postorder pass from the root.
    pub fn aggregate(mut self) -> CladeCounts<'a> {
        // Named taxa are reported even without reads of their own.
        for tax_id in self.tree.named_taxa() {
            if tax_id != UNCLASSIFIED {
                self.direct.entry(tax_id).or_insert(0);
            }
        }

        let clade = accumulate_clade_counts(self.tree, &self.direct);

        let counts = CladeCounts {
            tree: self.tree,
            direct: self.direct,
            clade,
            unclassified: self.unclassified,
            total_records: self.total_records,
        };

        let placed = counts.clade_count(ROOT) + counts.unclassified;
        if placed < counts.total_records {
            log::warn!(
                "{} record(s) were assigned to taxa outside the taxonomy",
                counts.total_records - placed
            );
        }
        counts
    }
}

/// `clade[n] = direct[n] + sum(clade[child])`, computed with an explicit
/// stack so deep lineages cannot overflow the call stack. A node reached a
/// second time is not descended into again.
fn accumulate_clade_counts(
    tree: &TaxonomyTree,
    direct: &AHashMap<TaxId, u64>,
) -> AHashMap<TaxId, u64> {
    let mut clade: AHashMap<TaxId, u64> = AHashMap::new();
    let mut visited: AHashSet<TaxId> = AHashSet::new();
    let mut stack: Vec<(TaxId, bool)> = vec![(ROOT, false)];

    while let Some((tax_id, children_done)) = stack.pop() {
        let kids = tree.children_of(tax_id);
        if children_done {
            let below: u64 = kids.iter().map(|c| clade.get(c).copied().unwrap_or(0)).sum();
            let own = direct.get(&tax_id).copied().unwrap_or(0);
            clade.insert(tax_id, own + below);
            continue;
        }

        if !visited.insert(tax_id) {
            log::warn!("Taxon {tax_id} reached twice while summing clades; ignoring repeat");
            continue;
        }
        stack.push((tax_id, true));
        for &child in kids.iter().rev() {
            stack.push((child, false));
        }
    }
    clade
}

/// Direct and clade counts once the scan is over. Read-only.
pub struct CladeCounts<'a> {
    tree: &'a TaxonomyTree,
    direct: AHashMap<TaxId, u64>,
    clade: AHashMap<TaxId, u64>,
    unclassified: u64,
    total_records: u64,
}

impl<'a> CladeCounts<'a> {
    pub fn tree(&self) -> &'a TaxonomyTree {
        self.tree
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn unclassified_count(&self) -> u64 {
        self.unclassified
    }

    pub fn direct_count(&self, tax_id: TaxId) -> u64 {
        if tax_id == UNCLASSIFIED {
            return self.unclassified;
        }
        self.direct.get(&tax_id).copied().unwrap_or(0)
    }

    /// Zero for anything not reachable from the root. The unclassified
    /// bucket has no descendants, so its clade is its direct count.
    pub fn clade_count(&self, tax_id: TaxId) -> u64 {
        if tax_id == UNCLASSIFIED {
            return self.unclassified;
        }
        self.clade.get(&tax_id).copied().unwrap_or(0)
    }

    /// Whether a taxon has a direct-count entry (hit, or named).
    pub fn has_direct_entry(&self, tax_id: TaxId) -> bool {
        tax_id == UNCLASSIFIED || self.direct.contains_key(&tax_id)
    }

    pub fn percent_of_total(&self, count: u64) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total_records as f64
        }
    }
}

/// Depth-indented, clade-sorted rendering of a [`CladeCounts`].
pub struct ReportRenderer<'c, 'a> {
    counts: &'c CladeCounts<'a>,
    show_zeros: bool,
}

impl<'c, 'a> ReportRenderer<'c, 'a> {
    pub fn new(counts: &'c CladeCounts<'a>, show_zeros: bool) -> Self {
        Self { counts, show_zeros }
    }

    /// The unclassified row, then a preorder walk from the root with children
    /// in descending clade order (ties keep child-list order). A zero clade
    /// hides its whole subtree unless zeros are shown.
    pub fn rows(&self) -> Vec<ReportRow> {
        let counts = self.counts;
        let tree = counts.tree;
        let mut rows = Vec::new();

        let unclassified = counts.unclassified_count();
        rows.push(ReportRow {
            pct: counts.percent_of_total(unclassified),
            clade_reads: unclassified,
            tax_reads: unclassified,
            rank_code: "U",
            tax_id: UNCLASSIFIED,
            depth: 0,
            tax_name: "unclassified".to_string(),
        });

        let mut stack: Vec<(TaxId, usize)> = vec![(ROOT, 0)];
        while let Some((tax_id, depth)) = stack.pop() {
            let clade = counts.clade_count(tax_id);
            if clade == 0 && !self.show_zeros {
                continue;
            }

            rows.push(ReportRow {
                pct: counts.percent_of_total(clade),
                clade_reads: clade,
                tax_reads: counts.direct_count(tax_id),
                rank_code: rank_code(tree.rank_of(tax_id)),
                tax_id,
                depth,
                tax_name: tree.name_of(tax_id).to_string(),
            });

            // sort_by_key is stable
            let mut kids = tree.children_of(tax_id).to_vec();
            kids.sort_by_key(|&child| Reverse(counts.clade_count(child)));
            for child in kids.into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        rows
    }

    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for row in self.rows() {
            writeln!(out, "{}", format_report_row(&row))?;
        }
        Ok(())
    }

    pub fn render_to_string(&self) -> String {
        let mut output = String::new();
        for row in self.rows() {
            output.push_str(&format_report_row(&row));
            output.push('\n');
        }
        output
    }
}

/// ` pct <tab> clade <tab> direct <tab> rank <tab> taxon <tab> <indent>name`
pub fn format_report_row(row: &ReportRow) -> String {
    let mut line = String::new();
    let _ = write!(
        line,
        " {:.2}\t{}\t{}\t{}\t{}\t",
        row.pct, row.clade_reads, row.tax_reads, row.rank_code, row.tax_id
    );
    for _ in 0..row.depth {
        line.push_str("  ");
    }
    line.push_str(&row.tax_name);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 -> 2 -> {3, 4}; 1 -> 5 -> 6; 1 -> 7
    fn tree() -> TaxonomyTree {
        TaxonomyTree::from_records(
            [
                (1, 1, "no rank"),
                (2, 1, "genus"),
                (3, 2, "species"),
                (4, 2, "species"),
                (5, 1, "family"),
                (6, 5, "genus"),
                (7, 1, "order"),
            ],
            [
                (1, "root", "scientific name"),
                (2, "Alpha", "scientific name"),
                (3, "Alpha one", "scientific name"),
                (4, "Alpha two", "scientific name"),
                (5, "Beta", "scientific name"),
                (6, "Beta one", "scientific name"),
                (7, "Gamma", "scientific name"),
            ],
        )
    }

    fn counts_from<'a>(tree: &'a TaxonomyTree, lines: &str) -> CladeCounts<'a> {
        let mut agg = CladeAggregator::new(tree);
        agg.scan(lines.as_bytes()).unwrap();
        agg.aggregate()
    }

    /// 4 reads on 3, 6 on 4; nothing under 5 or 7.
    fn sample_input() -> String {
        let mut s = String::new();
        for i in 0..4 {
            s.push_str(&format!("C\tr{i}\t3\t100\tP=1.000\t3:5\n"));
        }
        for i in 4..10 {
            s.push_str(&format!("C\tr{i}\t4\t100\tP=1.000\t4:5\n"));
        }
        s
    }

    #[test]
    fn scan_skips_non_utf8_lines() {
        let tree = tree();
        let mut input = b"C\tr1\t3\t100\tP=1.000\t3:5\n".to_vec();
        input.extend_from_slice(b"C\tr\xff\xfe\t4\t100\tP=1.000\t4:5\n");
        input.extend_from_slice(b"\n");
        input.extend_from_slice(b"C\tr3\t3\t100\tP=1.000\t3:5");

        let mut agg = CladeAggregator::new(&tree);
        let stats = agg.scan(&input[..]).unwrap();
        assert_eq!(stats, ScanStats { records: 2, skipped: 1 });
        assert_eq!(agg.direct_count(3), 2);
        assert_eq!(agg.direct_count(4), 0);
    }

    struct FailingReader;

    impl io::Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn scan_propagates_read_failures() {
        let tree = tree();
        let mut agg = CladeAggregator::new(&tree);
        let err = agg.scan(io::BufReader::new(FailingReader)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn clade_counts_sum_children() {
        let tree = tree();
        let counts = counts_from(&tree, &sample_input());
        assert_eq!(counts.clade_count(1), 10);
        assert_eq!(counts.clade_count(2), 10);
        assert_eq!(counts.clade_count(3), 4);
        assert_eq!(counts.clade_count(4), 6);
        assert_eq!(counts.clade_count(5), 0);
        assert_eq!(counts.direct_count(2), 0);
    }

    #[test]
    fn clade_counts_dominate_direct_and_children() {
        let tree = tree();
        let input = "C\ta\t1\t1\nC\tb\t2\t1\nC\tc\t6\t1\nC\td\t6\t1\nC\te\t7\t1\nU\tf\t0\t1\nC\tg\t4\t1\n";
        let counts = counts_from(&tree, input);
        for tax_id in 1..=7 {
            assert!(counts.clade_count(tax_id) >= counts.direct_count(tax_id));
            for &child in tree.children_of(tax_id) {
                assert!(counts.clade_count(tax_id) >= counts.clade_count(child));
            }
        }
        assert_eq!(
            counts.clade_count(ROOT) + counts.unclassified_count(),
            counts.total_records()
        );
    }

    #[test]
    fn named_taxa_get_zero_entries() {
        let tree = tree();
        let counts = counts_from(&tree, "C\tr\t3\t1\n");
        assert!(counts.has_direct_entry(7));
        assert_eq!(counts.direct_count(7), 0);
        assert!(!counts.has_direct_entry(99));
    }

    #[test]
    fn children_render_by_descending_clade() {
        let tree = tree();
        let counts = counts_from(&tree, &sample_input());
        let rows = ReportRenderer::new(&counts, false).rows();
        let ids: Vec<TaxId> = rows.iter().map(|r| r.tax_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 4, 3]);
        let depths: Vec<usize> = rows.iter().map(|r| r.depth).collect();
        assert_eq!(depths, vec![0, 0, 1, 2, 2]);
    }

    #[test]
    fn ties_keep_child_list_order() {
        let tree = tree();
        // 3 and 4 tie under 2; 2, 5 and 7 tie under 1.
        let input = "C\ta\t3\t1\nC\tb\t4\t1\nC\tc\t5\t1\nC\td\t5\t1\nC\te\t7\t1\nC\tf\t7\t1\n";
        let counts = counts_from(&tree, input);
        let ids: Vec<TaxId> = ReportRenderer::new(&counts, false)
            .rows()
            .iter()
            .map(|r| r.tax_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 7]);
    }

    #[test]
    fn zero_clades_hide_their_subtree() {
        let tree = tree();
        let counts = counts_from(&tree, &sample_input());
        let hidden = ReportRenderer::new(&counts, false).rows();
        assert!(hidden.iter().all(|r| ![5, 6, 7].contains(&r.tax_id)));

        let shown = ReportRenderer::new(&counts, true).rows();
        let ids: Vec<TaxId> = shown.iter().map(|r| r.tax_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 4, 3, 5, 6, 7]);
    }

    #[test]
    fn renders_kraken_report_lines() {
        let tree = tree();
        let mut input = sample_input();
        input.push_str("U\tr10\t0\t100\tP=0.000\t0:5\n");
        input.push_str("not\ta\tnumber\n");
        let mut agg = CladeAggregator::new(&tree);
        let stats = agg.scan(input.as_bytes()).unwrap();
        assert_eq!(stats, ScanStats { records: 11, skipped: 1 });
        let counts = agg.aggregate();

        let text = ReportRenderer::new(&counts, false).render_to_string();
        let expected = " 9.09\t1\t1\tU\t0\tunclassified\n\
                        \x2090.91\t10\t0\t-\t1\troot\n\
                        \x2090.91\t10\t0\tG\t2\t  Alpha\n\
                        \x2054.55\t6\t6\tS\t4\t    Alpha two\n\
                        \x2036.36\t4\t4\tS\t3\t    Alpha one\n";
        assert_eq!(text, expected);

        let mut buf = Vec::new();
        ReportRenderer::new(&counts, false).render(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[test]
    fn empty_input_reports_zero_percent() {
        let tree = tree();
        let counts = counts_from(&tree, "");
        let rows = ReportRenderer::new(&counts, false).rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pct, 0.0);
        assert_eq!(format_report_row(&rows[0]), " 0.00\t0\t0\tU\t0\tunclassified");
    }

    #[test]
    fn reads_on_unknown_taxa_stay_out_of_the_tree() {
        let tree = tree();
        let counts = counts_from(&tree, "C\ta\t3\t1\nC\tb\t999\t1\n");
        assert_eq!(counts.total_records(), 2);
        assert_eq!(counts.clade_count(ROOT), 1);
        assert_eq!(counts.direct_count(999), 1);
    }

    #[test]
    fn rank_codes() {
        assert_eq!(rank_code("species"), "S");
        assert_eq!(rank_code("superkingdom"), "D");
        assert_eq!(rank_code("no rank"), "-");
        assert_eq!(rank_code(""), "-");
    }

    #[test]
    fn deep_lineage_does_not_overflow() {
        let depth: TaxId = 200_000;
        let nodes: Vec<(TaxId, TaxId, &str)> = (1..=depth)
            .map(|id| (id, id.saturating_sub(1), "no rank"))
            .collect();
        let tree = TaxonomyTree::from_records(nodes, Vec::<(TaxId, &str, &str)>::new());
        let counts = counts_from(&tree, &format!("C\tr\t{depth}\t1\n"));
        assert_eq!(counts.clade_count(ROOT), 1);
        assert_eq!(ReportRenderer::new(&counts, false).rows().len(), depth as usize + 1);
    }
}
