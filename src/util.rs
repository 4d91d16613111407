use argparse::{ArgumentParser, Print, Store, StoreOption, StoreTrue};
use bytes::Bytes;
use log::LevelFilter;
use tokio::io::AsyncReadExt;

use crate::error::{PipelineError, Result};
use crate::output::OutputMode;
use crate::parallel_pipeline::PipelineConfig;
use crate::reducer::MergeStrategy;
use crate::tokenizer::Delimiters;

pub const DEFAULT_CAPACITY: usize = 1024;

use libc::{getrusage, rusage, RUSAGE_SELF};

/// User and system CPU time of this process in microseconds.
pub fn get_cputime_usecs() -> (u64, u64) {
    let mut usage: rusage = unsafe { std::mem::zeroed() };
    unsafe {
        getrusage(RUSAGE_SELF, &mut usage as *mut rusage);
    }

    let u_time = (usage.ru_utime.tv_sec as u64 * 1_000_000) + usage.ru_utime.tv_usec as u64;
    let s_time = (usage.ru_stime.tv_sec as u64 * 1_000_000) + usage.ru_stime.tv_usec as u64;

    (u_time, s_time)
}

pub struct Config {
    pub output: Option<String>,
    pub input: Option<String>,
    pub replicas: usize,
    pub capacity: usize,
    pub table_capacity: Option<usize>,
    pub delimiters: Option<String>,
    pub merge: MergeStrategy,
    pub replace: bool,
    pub sort: bool,
    pub log: String,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let delimiters = match self.delimiters {
            Some(ref list) => Delimiters::parse_escaped(list)?,
            None => Delimiters::default(),
        };
        let config = PipelineConfig {
            replicas: self.replicas,
            capacity: self.capacity,
            table_capacity: self.table_capacity,
            delimiters,
            merge: self.merge,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.replace {
            OutputMode::Replace
        } else {
            OutputMode::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output: None,
            input: None,
            replicas: 1,
            capacity: DEFAULT_CAPACITY,
            table_capacity: None,
            delimiters: None,
            merge: MergeStrategy::Scan,
            replace: false,
            sort: false,
            log: "-".to_owned(),
            log_level: LevelFilter::Warn,
        }
    }
}

pub fn parse_args(description: &str) -> Config {
    let mut conf = Config::default();

    {
        // this block limits scope of borrows by ap.refer() method
        let mut ap = ArgumentParser::new();

        ap.set_description(description);
        ap.add_option(
            &["-V", "--version"],
            Print(env!("CARGO_PKG_VERSION").to_string()),
            "Show version",
        );

        ap.refer(&mut conf.input)
            .add_argument("input", StoreOption, "input file - default: stdin");

        ap.refer(&mut conf.output).add_argument(
            "output",
            StoreOption,
            "output file - default: stdout",
        );

        ap.refer(&mut conf.replicas).add_option(
            &["-n", "--replicas", "-t", "--threads"],
            Store,
            "replica count - default: 1",
        );

        ap.refer(&mut conf.capacity).add_option(
            &["-c", "--capacity"],
            Store,
            "entries per tokenizer buffer - default: 1024",
        );

        ap.refer(&mut conf.table_capacity).add_option(
            &["--table-capacity"],
            StoreOption,
            "entries per replica frequency table - default: twice the input word count",
        );

        ap.refer(&mut conf.delimiters).add_option(
            &["--delimiters"],
            StoreOption,
            "word delimiter bytes, \\n \\t \\r \\\\ escapes allowed",
        );

        ap.refer(&mut conf.merge).add_option(
            &["--merge"],
            Store,
            "global merge: scan | indexed - default: scan",
        );

        ap.refer(&mut conf.replace).add_option(
            &["--replace", "--truncate"],
            StoreTrue,
            "drop existing output file contents - default: append",
        );

        ap.refer(&mut conf.sort).add_option(
            &["--sort"],
            StoreTrue,
            "sort output by count",
        );

        ap.refer(&mut conf.log)
            .add_option(&["--log"], Store, "log file, - for stderr");

        ap.refer(&mut conf.log_level).add_option(
            &["--log-level"],
            Store,
            "off | error | warn | info | debug | trace - default: warn",
        );

        ap.parse_args_or_exit();
    }

    conf
}

/// Reads the whole input up front; the partitioner needs its exact length.
pub async fn read_input(input: &Option<String>) -> Result<Bytes> {
    let data = match input {
        Some(filename) => tokio::fs::read(filename).await.map_err(|e| {
            PipelineError::InvalidInput(format!("can't read \"{}\": {}", filename, e))
        })?,
        None => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            data
        }
    };

    if data.is_empty() {
        return Err(PipelineError::InvalidInput("input is empty".to_owned()));
    }
    Ok(Bytes::from(data))
}
