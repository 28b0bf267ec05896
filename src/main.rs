use std::fs;
use std::io;
use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use rand::Rng;

use ext_merge_sort::{ExternalSorter, ExternalSorterBuilder, Record, RecordWriter};

/// Upper bound (exclusive) of generated record values.
const GENERATED_VALUE_LIMIT: i32 = 1_000_000;

fn main() {
    let arg_parser = build_arg_parser();

    match arg_parser.subcommand() {
        Some(("generate", args)) => {
            init_logger(args.value_of_t_or_exit("log_level"));
            run_generate(args);
        }
        Some(("sort", args)) => {
            init_logger(args.value_of_t_or_exit("log_level"));
            run_sort(args);
        }
        _ => unreachable!("subcommand is required"),
    }
}

fn run_generate(args: &clap::ArgMatches) {
    let output = args.value_of("output").expect("value is required");
    let size = args
        .value_of("size")
        .expect("value is required")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64();

    let started = Instant::now();
    if let Err(err) = generate_file(path::Path::new(output), size) {
        log::error!("input generation error: {}", err);
        process::exit(1);
    }

    log::info!(
        "file '{}' generated in {:.2} seconds",
        output,
        started.elapsed().as_secs_f64()
    );
}

fn generate_file(output: &path::Path, size: u64) -> io::Result<()> {
    let file = fs::File::create(output)?;
    let records = size / i32::WIDTH as u64;

    let mut rng = rand::thread_rng();
    let mut writer = RecordWriter::<i32, _>::new(file);
    for _ in 0..records {
        writer.push(rng.gen_range(0..GENERATED_VALUE_LIMIT))?;
    }
    writer.finish()?;

    return Ok(());
}

fn run_sort(args: &clap::ArgMatches) {
    let record_type: RecordType = args.value_of_t_or_exit("record_type");
    match record_type {
        RecordType::I32 => sort_records::<i32>(args),
        RecordType::U32 => sort_records::<u32>(args),
        RecordType::I64 => sort_records::<i64>(args),
        RecordType::U64 => sort_records::<u64>(args),
    }
}

fn sort_records<T: Record>(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let tmp_dir: Option<&str> = args.value_of("tmp_dir");
    let memory = args.value_of("memory").expect("value has default");
    let merge_buffer: usize = args.value_of_t_or_exit("merge_buffer");
    let threads: Option<usize> = args
        .is_present("threads")
        .then(|| args.value_of_t_or_exit("threads"));

    let mut sorter_builder = ExternalSorterBuilder::<T>::new();
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let memory_budget = match parse_memory_budget(memory) {
        Ok(memory_budget) => memory_budget,
        Err(err) => {
            log::error!("memory budget error: {}", err);
            process::exit(1);
        }
    };

    sorter_builder = sorter_builder
        .with_memory_budget(memory_budget)
        .with_merge_buffer_capacity(merge_buffer);

    let sorter: ExternalSorter<T> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let started = Instant::now();
    match sorter.sort_file(path::Path::new(input), path::Path::new(output)) {
        Ok(count) => log::info!(
            "sorting done, output file: '{}' ({} records, total {:.2} seconds)",
            output,
            count,
            started.elapsed().as_secs_f64()
        ),
        Err(err) => {
            log::error!("data sorting error: {} (kind: {:?})", err, err.kind());
            process::exit(1);
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum RecordType {
    I32,
    U32,
    I64,
    U64,
}

impl RecordType {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        RecordType::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <RecordType as clap::ArgEnum>::from_str(s, false)
    }
}

fn parse_memory_budget(value: &str) -> Result<usize, String> {
    let bytes = value
        .parse::<ByteSize>()
        .map_err(|err| format!("size format incorrect: {}", err))?
        .as_u64();

    usize::try_from(bytes).map_err(|_| format!("{} is not addressable on this platform", value))
}

fn validate_size(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn log_level_arg() -> clap::Arg<'static> {
    clap::Arg::new("log_level")
        .short('l')
        .long("loglevel")
        .help("logging level")
        .takes_value(true)
        .default_value("info")
        .possible_values(LogLevel::possible_values())
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge-sort")
        .about("external merge sort of fixed-width binary records")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            clap::App::new("generate")
                .about("generate a file of random 4-byte signed records")
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("file to be generated")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("size")
                        .short('s')
                        .long("size")
                        .help("generated file size")
                        .required(true)
                        .takes_value(true)
                        .validator(validate_size),
                )
                .arg(log_level_arg()),
        )
        .subcommand(
            clap::App::new("sort")
                .about("split a file into sorted runs and merge them")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("record_type")
                        .short('r')
                        .long("record-type")
                        .help("record type")
                        .takes_value(true)
                        .default_value("i32")
                        .possible_values(RecordType::possible_values()),
                )
                .arg(
                    clap::Arg::new("memory")
                        .short('m')
                        .long("memory")
                        .help("memory budget of a single run")
                        .takes_value(true)
                        .default_value("100MiB")
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("merge_buffer")
                        .short('b')
                        .long("merge-buffer")
                        .help("number of records buffered per run while merging")
                        .takes_value(true)
                        .default_value("1024"),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for parallel sorting")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store runs")
                        .takes_value(true),
                )
                .arg(log_level_arg()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod test {
    use super::parse_memory_budget;

    #[test]
    fn test_parse_memory_budget() {
        assert_eq!(parse_memory_budget("1KiB"), Ok(1024));
        assert_eq!(parse_memory_budget("100MiB"), Ok(100 * 1024 * 1024));
        assert!(parse_memory_budget("lots").is_err());
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_parse_memory_budget_overflow() {
        assert!(parse_memory_budget("8GiB").is_err());
    }
}
