use std::fmt;
use std::time::{Duration, Instant};

use crate::partition::Partition;

const BINS: usize = 65;
const BARS: &[char; 9] = &['_', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const BARS_MAX: i32 = 8;

fn format_nanos(t: f32) -> String {
    if t < 500.0 {
        format!("{:0.3}ns", t)
    } else if t < 500_000.0 {
        format!("{:0.3}us", t / 1000.0)
    } else if t < 500_000_000.0 {
        format!("{:0.3}ms", t / 1000_000.0)
    } else {
        format!("{:0.3}s", t / 1000_000_000.0)
    }
}

/// Histogram with one bin per power of two.
#[derive(Clone)]
pub struct LogHistogram {
    min: u64,
    max: u64,
    sum: u64,
    hist: [u64; BINS],
}

impl Default for LogHistogram {
    fn default() -> Self {
        LogHistogram::new()
    }
}

impl LogHistogram {
    pub fn new() -> Self {
        LogHistogram {
            min: u64::MAX,
            max: 0,
            sum: 0,
            hist: [0; BINS],
        }
    }

    pub fn add_sample(&mut self, value: u64) {
        self.sum = self.sum.saturating_add(value);
        self.max = value.max(self.max);
        self.min = value.min(self.min);
        self.hist[(64 - value.leading_zeros()) as usize] += 1;
    }

    pub fn add_duration(&mut self, d: Duration) {
        self.add_sample(d.as_nanos() as u64);
    }

    pub fn sample_now(&mut self, ref_time: &Instant) {
        self.add_duration(ref_time.elapsed());
    }

    pub fn merge(&mut self, other: &LogHistogram) {
        self.sum = self.sum.saturating_add(other.sum);
        self.max = self.max.max(other.max);
        self.min = self.min.min(other.min);
        for (bin, other_bin) in self.hist.iter_mut().zip(other.hist.iter()) {
            *bin += other_bin;
        }
    }

    pub fn size(&self) -> u64 {
        self.hist.iter().sum()
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Log-interpolated estimate; coarse for narrow distributions.
    pub fn percentile(&self, p: f32) -> f32 {
        assert!((0.0..=1.0).contains(&p));
        if self.is_empty() {
            return 0.0;
        }

        let p_count = (self.size() as f32) * p;
        let mut samples: u64 = 0;
        for (i, &c_bin) in self.hist.iter().enumerate() {
            let samples_incl = samples + c_bin;
            if samples_incl > p_count as u64 {
                if i == 0 {
                    return 0.0;
                }
                let d_bin = (p_count - samples as f32) / c_bin as f32;
                let log_val = (i - 1) as f32 + d_bin;
                return log_val.exp2();
            }
            samples = samples_incl;
        }
        self.max as f32
    }

    fn sparkline(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let f_max = self.hist.iter().copied().max().unwrap_or(0);
        let log_f_max = 64 - f_max.leading_zeros() as i32;

        let mut spark_line = String::with_capacity(BINS);
        for (i, &f) in self.hist.iter().enumerate() {
            let bin_value = if i == 0 { 0 } else { 1u128 << (i - 1) };
            if (self.min as u128) > bin_value * 2 || (self.max as u128) < bin_value {
                continue;
            }

            let log_f = 64 - f.leading_zeros() as i32;
            let b = if log_f_max > BARS_MAX {
                log_f - (log_f_max - BARS_MAX)
            } else {
                log_f
            };
            if b < 0 {
                spark_line.push(if f > 0 { '.' } else { ' ' });
            } else {
                spark_line.push(BARS[b as usize]);
            }
        }
        spark_line
    }

    /// One-line summary treating samples as nanoseconds.
    pub fn format_time(&self) -> String {
        if self.is_empty() {
            return "no samples".to_owned();
        }
        format!(
            "n: {} acc: {} med: {} 95%: {} |{}| max: {}",
            self.size(),
            format_nanos(self.sum as f32),
            format_nanos(self.percentile(0.5)),
            format_nanos(self.percentile(0.95)),
            self.sparkline(),
            format_nanos(self.max as f32)
        )
    }
}

impl fmt::Debug for LogHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHistogram")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("sum", &self.sum)
            .field("hist", &format_args!("{}", self.sparkline()))
            .finish()
    }
}

/// What one replica did during a run.
#[derive(Debug, Clone)]
pub struct ReplicaStats {
    pub partition: Partition,
    /// tokens the tokenizer pushed
    pub tokens: u64,
    /// distinct words in the replica's frequency table
    pub distinct: usize,
    pub batches: LogHistogram,
    /// time the tokenizer spent blocked on a full buffer
    pub producer_wait: LogHistogram,
    /// time the aggregator spent blocked on an empty buffer
    pub consumer_wait: LogHistogram,
}

impl ReplicaStats {
    pub fn new(partition: Partition) -> Self {
        ReplicaStats {
            partition,
            tokens: 0,
            distinct: 0,
            batches: LogHistogram::new(),
            producer_wait: LogHistogram::new(),
            consumer_wait: LogHistogram::new(),
        }
    }
}

impl fmt::Display for ReplicaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[replica {}] bytes {}..{} tokens: {} distinct: {} batches: {} (mean {:.1})\n producer wait: {}\n consumer wait: {}",
            self.partition.replica,
            self.partition.start,
            self.partition.end,
            self.tokens,
            self.distinct,
            self.batches.size(),
            if self.batches.is_empty() {
                0.0
            } else {
                self.batches.sum() as f64 / self.batches.size() as f64
            },
            self.producer_wait.format_time(),
            self.consumer_wait.format_time()
        )
    }
}
