use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::{BufRead, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::config::{FilterConfig, OutputOrder};
use crate::error::{PostprocessError, RecordError, Result};
use crate::reclassify::Reclassifier;
use crate::taxdb::TaxonomyTree;
use crate::types::{ClassificationRecord, RefinedCall};

/// Totals for one pass over a classification stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub read: u64,
    pub written: u64,
    pub skipped: u64,
    pub classified: u64,
    pub unclassified: u64,
    pub missing_ancestor: u64,
}

/// Sent from a worker to the writer for every input line it claimed.
enum WorkerMessage {
    Line {
        seq: u64,
        text: String,
        classified: bool,
        missing_ancestor: bool,
    },
    Skipped {
        seq: u64,
    },
}

impl WorkerMessage {
    fn seq(&self) -> u64 {
        match self {
            WorkerMessage::Line { seq, .. } | WorkerMessage::Skipped { seq } => *seq,
        }
    }
}

/// Applies the reclassifier to a line stream with a fixed pool of workers.
///
/// The calling thread reads lines into a bounded channel. Workers take turns
/// claiming a line under one lock, reclassify it without holding any lock, and
/// push the result into a second bounded channel drained by a single writer
/// thread, so output lines never interleave. With [`OutputOrder::Arrival`]
/// lines are written as they finish; with [`OutputOrder::Input`] the writer
/// holds them back until every earlier line has been written.
pub struct ClassificationStreamProcessor<'a> {
    tree: &'a TaxonomyTree,
    config: &'a FilterConfig,
    warned: AtomicBool,
}

impl<'a> ClassificationStreamProcessor<'a> {
    pub fn new(tree: &'a TaxonomyTree, config: &'a FilterConfig) -> Self {
        Self {
            tree,
            config,
            warned: AtomicBool::new(false),
        }
    }

    pub fn run<R, W>(&self, input: R, output: W) -> Result<StreamStats>
    where
        R: BufRead,
        W: Write + Send,
    {
        self.config.validate()?;

        let capacity = self.config.channel_capacity;
        let order = self.config.output_order;
        let (line_tx, line_rx) = mpsc::sync_channel::<(u64, Vec<u8>)>(capacity);
        let (out_tx, out_rx) = mpsc::sync_channel::<WorkerMessage>(capacity);
        // Shared by the workers only, so the reader sees a closed channel
        // as soon as the last worker stops.
        let line_rx = Arc::new(Mutex::new(line_rx));

        let (read_result, worker_result, writer_result) = thread::scope(|scope| {
            let writer = scope.spawn(move || write_results(out_rx, output, order));

            let workers: Vec<_> = (0..self.config.workers)
                .map(|_| {
                    let out_tx = out_tx.clone();
                    let line_rx = Arc::clone(&line_rx);
                    scope.spawn(move || self.work(&line_rx, out_tx))
                })
                .collect();
            drop(out_tx);
            drop(line_rx);

            let read_result = feed_lines(input, line_tx);

            let mut worker_result = Ok(());
            for worker in workers {
                if worker.join().is_err() {
                    worker_result = Err(PostprocessError::ThreadPanicked("worker"));
                }
            }
            let writer_result = writer
                .join()
                .unwrap_or(Err(PostprocessError::ThreadPanicked("writer")));
            (read_result, worker_result, writer_result)
        });

        worker_result?;
        let mut stats = writer_result?;
        stats.read = read_result?;

        if stats.skipped > 0 {
            log::info!("Skipped {} malformed record(s)", stats.skipped);
        }
        if stats.missing_ancestor > 0 {
            log::warn!(
                "{} record(s) reached an undefined taxon and were reported unclassified",
                stats.missing_ancestor
            );
        }
        log::info!(
            "Processed {} records: {} classified, {} unclassified",
            stats.read,
            stats.classified,
            stats.unclassified
        );
        Ok(stats)
    }

    /// Worker loop: claim, process, hand off, until the input is exhausted.
    fn work(&self, line_rx: &Mutex<Receiver<(u64, Vec<u8>)>>, out_tx: SyncSender<WorkerMessage>) {
        let reclassifier = Reclassifier::new(
            self.tree,
            self.config.threshold,
            self.config.confidence_policy,
        );

        loop {
            let claimed = line_rx.lock().recv();
            let Ok((seq, line)) = claimed else {
                break;
            };

            let processed = std::str::from_utf8(&line)
                .map_err(|_| RecordError::InvalidUtf8)
                .and_then(|text| reclassifier.process_line(text));
            let message = match processed {
                Ok(outcome) => WorkerMessage::Line {
                    seq,
                    text: outcome.line,
                    classified: outcome.call.assignment.is_classified(),
                    missing_ancestor: outcome.missing_ancestor,
                },
                Err(err) => {
                    if !self.warned.swap(true, Ordering::Relaxed) {
                        log::warn!("Skipping malformed record on line {}: {}", seq + 1, err);
                    } else {
                        log::debug!("Skipping malformed record on line {}: {}", seq + 1, err);
                    }
                    WorkerMessage::Skipped { seq }
                }
            };

            if out_tx.send(message).is_err() {
                // Writer is gone; nothing more can be written.
                break;
            }
        }
    }
}

/// Push non-blank lines into the work channel, numbered from 0. Returns the count.
///
/// Lines travel as raw bytes; decoding is left to the workers so that a line
/// that is not UTF-8 is skipped like any other malformed record.
fn feed_lines<R: BufRead>(mut input: R, line_tx: SyncSender<(u64, Vec<u8>)>) -> Result<u64> {
    let mut seq = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let trimmed = trim_line_end(&buf);
        if trimmed.is_empty() {
            continue;
        }
        if line_tx.send((seq, trimmed.to_vec())).is_err() {
            // Every worker has stopped.
            break;
        }
        seq += 1;
    }
    Ok(seq)
}

fn trim_line_end(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Single writer: the only owner of the output.
fn write_results<W: Write>(
    out_rx: Receiver<WorkerMessage>,
    output: W,
    order: OutputOrder,
) -> Result<StreamStats> {
    let mut out = BufWriter::new(output);
    let mut stats = StreamStats::default();
    let mut pending: BTreeMap<u64, WorkerMessage> = BTreeMap::new();
    let mut next_seq = 0u64;

    for message in out_rx {
        match order {
            OutputOrder::Arrival => emit(&mut out, message, &mut stats)?,
            OutputOrder::Input => {
                pending.insert(message.seq(), message);
                while let Some(ready) = pending.remove(&next_seq) {
                    emit(&mut out, ready, &mut stats)?;
                    next_seq += 1;
                }
            }
        }
    }

    // Only non-empty if a worker died mid-stream.
    for (_, message) in pending {
        emit(&mut out, message, &mut stats)?;
    }

    out.flush()?;
    Ok(stats)
}

fn emit<W: Write>(out: &mut W, message: WorkerMessage, stats: &mut StreamStats) -> Result<()> {
    match message {
        WorkerMessage::Line {
            text,
            classified,
            missing_ancestor,
            ..
        } => {
            writeln!(out, "{}", text)?;
            stats.written += 1;
            if classified {
                stats.classified += 1;
            } else {
                stats.unclassified += 1;
            }
            if missing_ancestor {
                stats.missing_ancestor += 1;
            }
        }
        WorkerMessage::Skipped { .. } => stats.skipped += 1,
    }
    Ok(())
}

/// Reclassify an in-memory batch in parallel, keeping input order.
///
/// Malformed hit lists and broken lineages both come back unclassified.
pub fn reclassify_batch(
    records: &[ClassificationRecord],
    tree: &TaxonomyTree,
    config: &FilterConfig,
) -> Vec<RefinedCall> {
    let reclassifier = Reclassifier::new(tree, config.threshold, config.confidence_policy);
    records
        .par_iter()
        .map(|record| match reclassifier.reclassify(record) {
            Ok(reclassified) => reclassified.call,
            Err(err) => {
                log::debug!("Read {}: {}", record.read_id, err);
                RefinedCall::unclassified(0.0)
            }
        })
        .collect()
}
