//! Runs N replicas of tokenizer -> aggregator, waits for all of them and
//! merges their frequency tables.
//!
//! Each stage gets its own OS thread and reports back through a oneshot
//! channel. The first stage that fails aborts every buffer of every replica,
//! so no stage is left waiting on a peer that will never complete.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use futures::future::{join, join_all};
use log::{debug, error, info};
use tokio::sync::oneshot;

use crate::aggregator::{Aggregator, AggregatorReport};
use crate::bounded_buffer::{BoundedBuffer, Token};
use crate::error::{PipelineError, Result, Stage};
use crate::partition::{partition_all, validate_partitions, Partition};
use crate::reducer::{reduce, GlobalResult, MergeStrategy};
use crate::stats::{LogHistogram, ReplicaStats};
use crate::tokenizer::{count_words, words, Delimiters, Tokenizer, TokenizerReport};
use crate::util::DEFAULT_CAPACITY;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub replicas: usize,
    /// entries per tokenizer -> aggregator buffer
    pub capacity: usize,
    /// entries per frequency table; twice the input's word count when unset
    pub table_capacity: Option<usize>,
    pub delimiters: Delimiters,
    pub merge: MergeStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::new(1, DEFAULT_CAPACITY)
    }
}

impl PipelineConfig {
    pub fn new(replicas: usize, capacity: usize) -> Self {
        PipelineConfig {
            replicas,
            capacity,
            table_capacity: None,
            delimiters: Delimiters::default(),
            merge: MergeStrategy::Scan,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str| {
            Err(PipelineError::InvalidConfig(format!("{} must be at least 1", what)))
        };
        if self.replicas == 0 {
            return invalid("replica count");
        }
        if self.capacity == 0 {
            return invalid("buffer capacity");
        }
        if self.table_capacity == Some(0) {
            return invalid("table capacity");
        }
        Ok(())
    }

    pub fn table_capacity_for(&self, text: &Bytes) -> usize {
        self.table_capacity
            .unwrap_or_else(|| 2 * count_words(text, &self.delimiters).max(1))
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    pub result: GlobalResult,
    pub replicas: Vec<ReplicaStats>,
}

type Buffers = Arc<Vec<Arc<BoundedBuffer>>>;

fn abort_all(buffers: &Buffers) {
    for buffer in buffers.iter() {
        buffer.abort();
    }
}

/// Runs `work` on a named thread; its outcome, panics included, lands in `done`.
fn spawn_worker<T, F>(
    name: String,
    buffers: Buffers,
    done: oneshot::Sender<Result<T>>,
    work: F,
) -> Result<()>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let thread_name = name.clone();
    thread::Builder::new().name(thread_name).spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|_| Err(PipelineError::WorkerPanicked(name.clone())));
        if let Err(ref err) = outcome {
            if !err.is_cancellation() {
                error!("{}: {}", name, err);
            }
            abort_all(&buffers);
        }
        let _ = done.send(outcome);
    })?;
    Ok(())
}

/// Keeps the first real failure; `Cancelled` only wins if nothing else failed.
fn first_failure(current: Option<PipelineError>, err: PipelineError) -> Option<PipelineError> {
    match current {
        Some(existing) => {
            if existing.is_cancellation() && !err.is_cancellation() {
                Some(err)
            } else {
                Some(existing)
            }
        }
        None => Some(err),
    }
}

/// The reducer may only start once every buffer of every replica is completed.
fn all_completed(buffers: &[Arc<BoundedBuffer>]) -> Result<()> {
    match buffers.iter().find(|buffer| !buffer.is_completed()) {
        Some(buffer) => Err(PipelineError::IncompleteBuffer {
            replica: buffer.replica(),
            stage: buffer.stage(),
        }),
        None => Ok(()),
    }
}

pub struct WordCountPipeline {
    config: PipelineConfig,
}

impl WordCountPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        WordCountPipeline { config }
    }

    pub async fn run(&self, text: Bytes) -> Result<PipelineReport> {
        self.config.validate()?;
        if text.is_empty() {
            return Err(PipelineError::InvalidInput("input is empty".to_owned()));
        }

        let replicas = self.config.replicas;
        let partitions = partition_all(&text, replicas, &self.config.delimiters);
        validate_partitions(&partitions, text.len())?;
        let table_capacity = self.config.table_capacity_for(&text);
        info!(
            "counting {} bytes with {} replicas (buffer capacity {}, table capacity {})",
            text.len(),
            replicas,
            self.config.capacity,
            table_capacity
        );

        let token_buffers: Vec<Arc<BoundedBuffer>> = partitions
            .iter()
            .map(|p| Arc::new(BoundedBuffer::new(p.replica, Stage::Tokens, self.config.capacity)))
            .collect();
        let table_buffers: Vec<Arc<BoundedBuffer>> = partitions
            .iter()
            .map(|p| Arc::new(BoundedBuffer::new(p.replica, Stage::Table, table_capacity)))
            .collect();
        let all_buffers: Buffers = Arc::new(
            token_buffers
                .iter()
                .chain(table_buffers.iter())
                .cloned()
                .collect(),
        );

        let delimiters = Arc::new(self.config.delimiters.clone());
        let mut tokenizers = Vec::with_capacity(replicas);
        let mut aggregators = Vec::with_capacity(replicas);

        for (i, &part) in partitions.iter().enumerate() {
            debug!("replica {}: bytes {}..{}", part.replica, part.start, part.end);

            let (tx, rx) = oneshot::channel::<Result<TokenizerReport>>();
            let output = token_buffers[i].clone();
            let text = text.clone();
            let delimiters = delimiters.clone();
            let spawned = spawn_worker(
                format!("tokenizer-{}", part.replica),
                all_buffers.clone(),
                tx,
                move || Tokenizer::new(&text, part, &delimiters).run(&output),
            );
            if let Err(err) = spawned {
                abort_all(&all_buffers);
                return Err(err);
            }
            tokenizers.push(rx);

            let (tx, rx) = oneshot::channel::<Result<AggregatorReport>>();
            let input = token_buffers[i].clone();
            let output = table_buffers[i].clone();
            let spawned = spawn_worker(
                format!("aggregator-{}", part.replica),
                all_buffers.clone(),
                tx,
                move || Aggregator::new(&input, &output).run(),
            );
            if let Err(err) = spawned {
                abort_all(&all_buffers);
                return Err(err);
            }
            aggregators.push(rx);
        }

        // barrier: every stage of every replica has reported
        let (tokenizer_outcomes, aggregator_outcomes) =
            join(join_all(tokenizers), join_all(aggregators)).await;

        let mut failure = None;
        let mut stats: Vec<ReplicaStats> =
            partitions.iter().map(|&p| ReplicaStats::new(p)).collect();
        for (i, outcome) in tokenizer_outcomes.into_iter().enumerate() {
            let outcome = outcome.unwrap_or_else(|_| {
                Err(PipelineError::WorkerPanicked(format!("tokenizer-{}", i + 1)))
            });
            match outcome {
                Ok(report) => {
                    stats[i].tokens = report.tokens;
                    stats[i].producer_wait = report.wait;
                }
                Err(err) => failure = first_failure(failure, err),
            }
        }
        for (i, outcome) in aggregator_outcomes.into_iter().enumerate() {
            let outcome = outcome.unwrap_or_else(|_| {
                Err(PipelineError::WorkerPanicked(format!("aggregator-{}", i + 1)))
            });
            match outcome {
                Ok(report) => {
                    stats[i].distinct = report.distinct;
                    stats[i].batches = report.batches;
                    stats[i].consumer_wait = report.wait;
                }
                Err(err) => failure = first_failure(failure, err),
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        all_completed(&all_buffers)?;

        let mut producer_wait = LogHistogram::new();
        let mut consumer_wait = LogHistogram::new();
        for replica in stats.iter() {
            debug!("{}", replica);
            producer_wait.merge(&replica.producer_wait);
            consumer_wait.merge(&replica.consumer_wait);
        }
        debug!(
            "all replicas: producer wait {} consumer wait {}",
            producer_wait.format_time(),
            consumer_wait.format_time()
        );

        let tables = table_buffers
            .iter()
            .map(|buffer| buffer.into_table())
            .collect::<Result<Vec<_>>>()?;
        let merge = self.config.merge;
        let result = tokio::task::spawn_blocking(move || reduce(tables, merge))
            .await
            .map_err(|_| PipelineError::WorkerPanicked("reducer".to_owned()))?;
        info!("{} distinct words, {} in total", result.len(), result.total());

        Ok(PipelineReport {
            result,
            replicas: stats,
        })
    }
}

/// Word counts of `text` as one partition, for checking pipeline results.
pub fn count_sequential(text: &Bytes, delimiters: &Delimiters) -> GlobalResult {
    let part = Partition::new(1, 0, text.len());
    let mut positions: HashMap<Bytes, usize> = HashMap::new();
    let mut tokens: Vec<Token> = Vec::new();
    for word in words(text, part.range(), delimiters) {
        match positions.get(&word) {
            Some(&position) => tokens[position].count += 1,
            None => {
                positions.insert(word.clone(), tokens.len());
                tokens.push(Token::new(word));
            }
        }
    }
    GlobalResult::new(tokens)
}
