use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, trace};

use crate::bounded_buffer::{BoundedBuffer, Token};
use crate::error::Result;
use crate::stats::LogHistogram;

#[derive(Debug, Default)]
pub struct AggregatorReport {
    pub consumed: u64,
    pub distinct: usize,
    pub batches: LogHistogram,
    pub wait: LogHistogram,
}

/// Second stage of a replica: sole consumer of the tokenizer's buffer and
/// sole writer of the replica's frequency table.
pub struct Aggregator<'a> {
    input: &'a BoundedBuffer,
    output: &'a BoundedBuffer,
    /// word -> position in `output`
    index: HashMap<Bytes, usize>,
}

impl<'a> Aggregator<'a> {
    pub fn new(input: &'a BoundedBuffer, output: &'a BoundedBuffer) -> Self {
        Aggregator {
            input,
            output,
            index: HashMap::new(),
        }
    }

    fn add(&mut self, token: Token) -> Result<()> {
        match self.index.get(&token.word) {
            Some(&position) => self.output.increment(position, token.count),
            None => {
                let word = token.word.clone();
                let position = self.output.append(token)?;
                self.index.insert(word, position);
                Ok(())
            }
        }
    }

    /// Drains the input until it is completed and empty, then completes the
    /// output. On error the output is left incomplete.
    pub fn run(mut self) -> Result<AggregatorReport> {
        let mut report = AggregatorReport::default();
        let replica = self.output.replica();

        loop {
            let start = Instant::now();
            let batch = match self.input.take_batch()? {
                Some(batch) => batch,
                None => break,
            };
            report.wait.sample_now(&start);
            report.batches.add_sample(batch.len() as u64);
            trace!("aggregator {}: batch of {}", replica, batch.len());

            for token in batch {
                self.add(token)?;
                report.consumed += 1;
            }
        }

        report.distinct = self.index.len();
        self.output.complete()?;
        debug!(
            "aggregator {}: {} tokens, {} distinct words",
            replica, report.consumed, report.distinct
        );
        Ok(report)
    }
}
