use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use kraken_postprocess::io::open_text;
use kraken_postprocess::{
    filter_classifications, report_classifications, ConfidencePolicy, FilterConfig, OutputOrder,
    PostprocessError, ReportConfig, TaxonomyError, TaxonomyTree,
};

const NODES: &str = "\
1\t|\t1\t|\tno rank\t|\t\t|
2\t|\t1\t|\tsuperkingdom\t|\t\t|
1224\t|\t2\t|\tphylum\t|\t\t|
543\t|\t1224\t|\tfamily\t|\t\t|
561\t|\t543\t|\tgenus\t|\t\t|
562\t|\t561\t|\tspecies\t|\t\t|
620\t|\t543\t|\tgenus\t|\t\t|
";

const NAMES: &str = "\
1\t|\troot\t|\t\t|\tscientific name\t|
2\t|\tBacteria\t|\tBacteria <bacteria>\t|\tscientific name\t|
2\t|\teubacteria\t|\t\t|\tgenbank common name\t|
1224\t|\tProteobacteria\t|\t\t|\tscientific name\t|
543\t|\tEnterobacteriaceae\t|\t\t|\tscientific name\t|
561\t|\tEscherichia\t|\t\t|\tscientific name\t|
562\t|\tEscherichia coli\t|\t\t|\tscientific name\t|
620\t|\tShigella\t|\t\t|\tscientific name\t|
";

const CLASSIFIED: &str = "\
C\tread1\t562\t150\t562:40 A:10
C\tread2\t562\t150\t562:10 620:10 561:5
C\tread3\t620\t150\t620:30 0:5
U\tread4\t0\t150\t0:116
C\tread5\t562\t150\t562:3 0:97
";

fn write_db(dir: &Path) {
    let tax = dir.join("taxonomy");
    fs::create_dir_all(&tax).unwrap();
    fs::write(tax.join("nodes.dmp"), NODES).unwrap();
    fs::write(tax.join("names.dmp"), NAMES).unwrap();
}

fn run_filter(tree: &TaxonomyTree, config: &FilterConfig, input: &Path) -> String {
    let mut out = Vec::new();
    filter_classifications(tree, config, open_text(input).unwrap(), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn filters_gzipped_input_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    write_db(dir.path());

    let input = dir.path().join("reads.kraken.gz");
    let mut enc = GzEncoder::new(File::create(&input).unwrap(), Compression::default());
    enc.write_all(CLASSIFIED.as_bytes()).unwrap();
    enc.finish().unwrap();

    let tree = TaxonomyTree::load_dir(dir.path()).unwrap();
    assert_eq!(tree.len(), 7);
    assert_eq!(tree.name_of(2), "Bacteria");
    assert!(tree.validate().is_empty());

    let config = FilterConfig::new(dir.path(), 0.6)
        .with_workers(3)
        .with_output_order(OutputOrder::Input);
    let filtered = run_filter(&tree, &config, &input);
    assert_eq!(
        filtered,
        "C\tread1\t562\t150\tP=1.000\t562:40 A:10\n\
         C\tread2\t561\t150\tP=0.600\t562:10 620:10 561:5\n\
         C\tread3\t620\t150\tP=0.857\t620:30 0:5\n\
         U\tread4\t0\t150\tP=0.000\t0:116\n\
         U\tread5\t0\t150\tP=0.030\t562:3 0:97\n"
    );

    let mut report = Vec::new();
    let stats = report_classifications(
        &tree,
        &ReportConfig::new(dir.path()),
        filtered.as_bytes(),
        &mut report,
    )
    .unwrap();
    assert_eq!(stats.records, 5);

    let report = String::from_utf8(report).unwrap();
    let expected = [
        " 40.00\t2\t2\tU\t0\tunclassified",
        " 60.00\t3\t0\t-\t1\troot",
        " 60.00\t3\t0\tD\t2\t  Bacteria",
        " 60.00\t3\t0\tP\t1224\t    Proteobacteria",
        " 60.00\t3\t0\tF\t543\t      Enterobacteriaceae",
        " 40.00\t2\t1\tG\t561\t        Escherichia",
        " 20.00\t1\t1\tS\t562\t          Escherichia coli",
        " 20.00\t1\t1\tG\t620\t        Shigella",
    ];
    assert_eq!(report.lines().collect::<Vec<_>>(), expected);
}

#[test]
fn strict_confidence_zeroes_failed_walks() {
    let dir = tempfile::tempdir().unwrap();
    write_db(dir.path());
    let input = dir.path().join("reads.kraken");
    fs::write(&input, CLASSIFIED).unwrap();

    let tree = TaxonomyTree::load_dir(dir.path()).unwrap();
    let config = FilterConfig::new(dir.path(), 0.6)
        .with_workers(1)
        .with_confidence_policy(ConfidencePolicy::StrictZero);
    let filtered = run_filter(&tree, &config, &input);
    assert!(filtered.contains("U\tread5\t0\t150\tP=0.000\t562:3 0:97\n"));
}

#[test]
fn arrival_order_holds_the_same_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_db(dir.path());
    let input = dir.path().join("reads.kraken");
    fs::write(&input, CLASSIFIED.repeat(50)).unwrap();

    let tree = TaxonomyTree::load_dir(dir.path()).unwrap();
    let base = FilterConfig::new(dir.path(), 0.6).with_channel_capacity(4);
    let ordered = run_filter(
        &tree,
        &base.clone().with_workers(1).with_output_order(OutputOrder::Input),
        &input,
    );
    let unordered = run_filter(&tree, &base.with_workers(6), &input);

    let mut a: Vec<&str> = ordered.lines().collect();
    let mut b: Vec<&str> = unordered.lines().collect();
    assert_eq!(a.len(), 250);
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
}

#[test]
fn show_zeros_lists_empty_clades() {
    let dir = tempfile::tempdir().unwrap();
    write_db(dir.path());
    let tree = TaxonomyTree::load_dir(dir.path()).unwrap();

    let mut config = ReportConfig::new(dir.path());
    config.show_zeros = true;
    let mut report = Vec::new();
    report_classifications(&tree, &config, "C\tr\t562\t10\n".as_bytes(), &mut report).unwrap();
    let report = String::from_utf8(report).unwrap();
    assert!(report.contains(" 0.00\t0\t0\tG\t620\t        Shigella\n"));
    assert_eq!(report.lines().count(), 8);
}

#[test]
fn missing_taxonomy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = TaxonomyTree::load_dir(dir.path()).unwrap_err();
    assert!(matches!(err, TaxonomyError::MissingFile { .. }));

    let err: PostprocessError = err.into();
    assert!(err.to_string().contains("nodes.dmp"));
}
