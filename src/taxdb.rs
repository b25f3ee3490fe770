//src/taxdb.rs

use ahash::{AHashMap, AHashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::TaxonomyError;
use crate::io::open_text;
use crate::types::{TaxId, ROOT, UNCLASSIFIED};

/// Only names of this class label nodes in reports.
pub const SCIENTIFIC_NAME: &str = "scientific name";

/// Parent link of a node. The root, and anything whose parent is the
/// `0` sentinel, has `Root`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    Root,
    Node(TaxId),
}

#[derive(Debug, Clone)]
struct TaxNode {
    parent: ParentLink,
    rank: String,
}

/// Counts gathered while loading the two tables.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub nodes: usize,
    pub names: usize,
    pub skipped_lines: usize,
}

/// In-memory taxonomy: parent links, ranks, scientific names and child lists.
///
/// Built once, read-only afterwards, so it can be shared by reference across
/// worker threads without locking.
#[derive(Debug, Default, Clone)]
pub struct TaxonomyTree {
    nodes: AHashMap<TaxId, TaxNode>,
    names: AHashMap<TaxId, String>,
    /// Ids that received a scientific name, in input order.
    named: Vec<TaxId>,
    children: AHashMap<TaxId, Vec<TaxId>>,
}

impl TaxonomyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. The root is parentless whatever the record says.
    /// A repeated id replaces the earlier record.
    pub fn add_node(&mut self, tax_id: TaxId, parent_id: TaxId, rank: &str) {
        let parent_id = if tax_id == ROOT { UNCLASSIFIED } else { parent_id };
        let parent = if parent_id == UNCLASSIFIED {
            ParentLink::Root
        } else {
            ParentLink::Node(parent_id)
        };

        if let Some(old) = self.nodes.get(&tax_id) {
            let old_parent = match old.parent {
                ParentLink::Root => UNCLASSIFIED,
                ParentLink::Node(p) => p,
            };
            if let Some(kids) = self.children.get_mut(&old_parent) {
                kids.retain(|&c| c != tax_id);
            }
        }

        self.nodes.insert(
            tax_id,
            TaxNode {
                parent,
                rank: rank.to_string(),
            },
        );
        self.children.entry(parent_id).or_default().push(tax_id);
    }

    /// Record a name; anything but a scientific name is ignored.
    pub fn add_name(&mut self, tax_id: TaxId, name: &str, name_class: &str) {
        if name_class != SCIENTIFIC_NAME {
            return;
        }
        if self.names.insert(tax_id, name.to_string()).is_none() {
            self.named.push(tax_id);
        }
    }

    /// Build a tree from already-split records.
    pub fn from_records<'a, N, M>(nodes: N, names: M) -> Self
    where
        N: IntoIterator<Item = (TaxId, TaxId, &'a str)>,
        M: IntoIterator<Item = (TaxId, &'a str, &'a str)>,
    {
        let mut tree = Self::new();
        for (tax_id, parent_id, rank) in nodes {
            tree.add_node(tax_id, parent_id, rank);
        }
        for (tax_id, name, class) in names {
            tree.add_name(tax_id, name, class);
        }
        tree
    }

    /// Parse a node table and a name table. Unparsable lines are skipped.
    pub fn from_readers<N: BufRead, M: BufRead>(
        nodes: N,
        names: M,
    ) -> Result<(Self, LoadStats), TaxonomyError> {
        let mut tree = Self::new();
        let mut stats = LoadStats::default();

        for line in nodes.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_node_line(&line) {
                Some((tax_id, parent_id, rank)) => {
                    tree.add_node(tax_id, parent_id, rank);
                    stats.nodes += 1;
                }
                None => {
                    log::debug!("Skipping malformed node line: {line}");
                    stats.skipped_lines += 1;
                }
            }
        }

        for line in names.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_name_line(&line) {
                Some((tax_id, name, class)) => {
                    tree.add_name(tax_id, name, class);
                    if class == SCIENTIFIC_NAME {
                        stats.names += 1;
                    }
                }
                None => {
                    log::debug!("Skipping malformed name line: {line}");
                    stats.skipped_lines += 1;
                }
            }
        }

        Ok((tree, stats))
    }

    /// Load `<db>/taxonomy/nodes.dmp` and `<db>/taxonomy/names.dmp`.
    pub fn load_dir<P: AsRef<Path>>(db: P) -> Result<Self, TaxonomyError> {
        let (nodes_path, names_path) = taxonomy_paths(db.as_ref());
        for path in [&nodes_path, &names_path] {
            if !path.exists() {
                return Err(TaxonomyError::MissingFile { path: path.clone() });
            }
        }

        let (tree, stats) = Self::from_readers(open_text(&nodes_path)?, open_text(&names_path)?)?;
        log::info!(
            "Loaded taxonomy with {} nodes, {} scientific names ({} lines skipped)",
            stats.nodes,
            stats.names,
            stats.skipped_lines
        );
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, tax_id: TaxId) -> bool {
        self.nodes.contains_key(&tax_id)
    }

    /// Parent of a taxon. `None` only for the unclassified sentinel; the root
    /// reports the sentinel as its parent.
    pub fn parent_of(&self, tax_id: TaxId) -> Result<Option<TaxId>, TaxonomyError> {
        if tax_id == UNCLASSIFIED {
            return Ok(None);
        }
        match self.nodes.get(&tax_id) {
            Some(node) => Ok(Some(match node.parent {
                ParentLink::Root => UNCLASSIFIED,
                ParentLink::Node(p) => p,
            })),
            None => Err(TaxonomyError::MissingAncestor { taxon: tax_id }),
        }
    }

    /// Children in input order. Unknown ids have no children rather than
    /// being an error.
    pub fn children_of(&self, tax_id: TaxId) -> &[TaxId] {
        self.children
            .get(&tax_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rank_of(&self, tax_id: TaxId) -> &str {
        self.nodes
            .get(&tax_id)
            .map(|n| n.rank.as_str())
            .unwrap_or("")
    }

    pub fn name_of(&self, tax_id: TaxId) -> &str {
        self.names.get(&tax_id).map(String::as_str).unwrap_or("")
    }

    /// Every id that carries a scientific name, whether or not it has a node record.
    pub fn named_taxa(&self) -> impl Iterator<Item = TaxId> + '_ {
        self.named.iter().copied()
    }

    /// Lineage of `tax_id`, itself first, ending at the root.
    pub fn ancestors(&self, tax_id: TaxId) -> Lineage<'_> {
        Lineage {
            tree: self,
            start: tax_id,
            next: (tax_id != UNCLASSIFIED).then_some(tax_id),
            seen: AHashSet::new(),
        }
    }

    /// Report every dangling parent and every lineage that never reaches the root.
    pub fn validate(&self) -> Vec<TaxonomyError> {
        let mut issues = Vec::new();

        let mut ids: Vec<TaxId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();

        for &tax_id in &ids {
            if let ParentLink::Node(parent) = self.nodes[&tax_id].parent {
                if !self.nodes.contains_key(&parent) {
                    issues.push(TaxonomyError::DanglingParent { taxon: tax_id, parent });
                }
            }
        }

        // Ids known to reach the root, or known not to.
        let mut settled: AHashSet<TaxId> = AHashSet::new();
        for &tax_id in &ids {
            if settled.contains(&tax_id) {
                continue;
            }
            let mut path = Vec::new();
            for step in self.ancestors(tax_id) {
                match step {
                    Ok(t) if settled.contains(&t) => break,
                    Ok(t) => path.push(t),
                    Err(err @ TaxonomyError::Cycle { .. }) => {
                        issues.push(err);
                        break;
                    }
                    // Already reported as a dangling parent.
                    Err(_) => break,
                }
            }
            settled.extend(path);
        }

        issues
    }
}

/// Iterator over a lineage; yields an error and stops on a missing node or a loop.
pub struct Lineage<'a> {
    tree: &'a TaxonomyTree,
    start: TaxId,
    next: Option<TaxId>,
    seen: AHashSet<TaxId>,
}

impl Iterator for Lineage<'_> {
    type Item = Result<TaxId, TaxonomyError>;

    fn next(&mut self) -> Option<Self::Item> {
        let tax_id = self.next.take()?;
        // The first repeated id closes a loop.
        if !self.seen.insert(tax_id) {
            return Some(Err(TaxonomyError::Cycle { taxon: self.start }));
        }

        match self.tree.nodes.get(&tax_id) {
            Some(node) => {
                self.next = match node.parent {
                    ParentLink::Root => None,
                    ParentLink::Node(p) => Some(p),
                };
                Some(Ok(tax_id))
            }
            None => Some(Err(TaxonomyError::MissingAncestor { taxon: tax_id })),
        }
    }
}

/// `(<db>/taxonomy/nodes.dmp, <db>/taxonomy/names.dmp)`
pub fn taxonomy_paths(db: &Path) -> (PathBuf, PathBuf) {
    let dir = db.join("taxonomy");
    (dir.join("nodes.dmp"), dir.join("names.dmp"))
}

/// Split a `.dmp` line. NCBI dumps separate fields with `\t|\t`; plain
/// tab-separated tables are accepted too.
fn split_dmp_fields(line: &str) -> Vec<&str> {
    if line.contains('|') {
        line.split('|').map(str::trim).collect()
    } else {
        line.split('\t').map(str::trim).collect()
    }
}

/// `taxid | parent | rank | ...`
pub fn parse_node_line(line: &str) -> Option<(TaxId, TaxId, &str)> {
    let fields = split_dmp_fields(line);
    if fields.len() < 3 {
        return None;
    }
    let tax_id: TaxId = fields[0].parse().ok()?;
    let parent_id: TaxId = fields[1].parse().ok()?;
    Some((tax_id, parent_id, fields[2]))
}

/// `taxid | name | unique name | name class |`, the unique name being optional.
pub fn parse_name_line(line: &str) -> Option<(TaxId, &str, &str)> {
    let fields = split_dmp_fields(line);
    if fields.len() < 3 {
        return None;
    }
    let tax_id: TaxId = fields[0].parse().ok()?;
    let class = match fields.get(3) {
        Some(c) if !c.is_empty() => *c,
        _ => fields[2],
    };
    Some((tax_id, fields[1], class))
}
