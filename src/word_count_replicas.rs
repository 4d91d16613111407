use std::path::Path;
use std::process::exit;
use std::time::Instant;

use log::{error, info};
use tokio::runtime::Runtime;

use replica_word_count::error::PipelineError;
use replica_word_count::logging::{set_logger_or_exit, LogTarget};
use replica_word_count::output::write_result;
use replica_word_count::util::*;
use replica_word_count::WordCountPipeline;

async fn count(conf: &Config) -> Result<(), PipelineError> {
    let pipeline = WordCountPipeline::new(conf.pipeline_config()?);
    let text = read_input(&conf.input).await?;

    let mut result = pipeline.run(text).await?.result;
    if conf.sort {
        result.sort_by_count();
    }

    write_result(&result, conf.output.as_ref().map(Path::new), conf.output_mode()).await
}

fn main() {
    let conf = parse_args("word count with replicated tokenizer/aggregator pipelines");
    let log_target = LogTarget::parse(&conf.log);
    set_logger_or_exit(&log_target, conf.log_level);

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: can't create runtime: {}", err);
            exit(1);
        }
    };

    let (start_usr_time, start_sys_time) = get_cputime_usecs();
    let start_time = Instant::now();

    if let Err(err) = runtime.block_on(count(&conf)) {
        if !log_target.is_terminal() {
            error!("{}", err);
        }
        eprintln!("error: {}", err);
        exit(1);
    }

    let difference = start_time.elapsed();
    let (end_usr_time, end_sys_time) = get_cputime_usecs();
    let usr_time = (end_usr_time - start_usr_time) as f64 / 1000_000.0;
    let sys_time = (end_sys_time - start_sys_time) as f64 / 1000_000.0;
    info!("walltime: {:?} (usr: {:.3}s sys: {:.3}s)", difference, usr_time, sys_time);
}
