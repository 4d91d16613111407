pub mod error;
pub mod logging;
pub mod util;
pub mod partition;
pub mod bounded_buffer;
pub mod tokenizer;
pub mod aggregator;
pub mod reducer;
pub mod stats;
pub mod parallel_pipeline;
pub mod output;

pub use crate::bounded_buffer::{BoundedBuffer, FrequencyTable, Token};
pub use crate::error::{PipelineError, Stage};
pub use crate::parallel_pipeline::{PipelineConfig, PipelineReport, WordCountPipeline};
pub use crate::reducer::{GlobalResult, MergeStrategy};
pub use crate::stats::LogHistogram;
pub use crate::tokenizer::Delimiters;
