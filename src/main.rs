use clap::Parser;
use eyre::Context;
use hiptrace::DecodedEvent;
use hiptrace::HipTrace;
use hiptrace::TraceOptions;
use std::io::Write;

mod cli {
    use std::path::PathBuf;

    #[derive(clap_derive::Parser)]
    #[command(version, about)]
    /// Decode a hiptrace file into JSON lines, one object per rank
    pub struct Cli {
        #[clap(short, long)]
        pub verbose: bool,
        /// Kernel configuration (JSON) for traces that do not embed it
        #[clap(long)]
        pub kernel_config: Option<PathBuf>,
        /// Size of the read window in bytes
        #[clap(long, default_value_t = hiptrace::source::DEFAULT_CHUNK_SIZE)]
        pub chunk_size: usize,
        /// The trace file to decode
        pub input: PathBuf,
        /// The name of the output file to write
        pub output: Option<PathBuf>,
    }
}

/// One output line.
#[derive(serde_derive::Serialize)]
struct RankedEvent<'a> {
    rank: u64,
    #[serde(flatten)]
    event: &'a DecodedEvent,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = cli::Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let options = TraceOptions {
        kernel_config: cli.kernel_config,
        chunk_size: cli.chunk_size,
    };
    let mut trace = HipTrace::open(&cli.input, &options)
        .wrap_err_with(|| format!("Failed to open {}", cli.input.display()))?;

    let file: &mut dyn Write = match &cli.output {
        Some(output) => &mut std::fs::File::create(output)
            .wrap_err_with(|| format!("Failed to create {}", output.display()))?,
        None => &mut std::io::stdout().lock(),
    };
    let mut writer = std::io::BufWriter::new(file);

    let mut failed = 0u64;
    for (rank, event) in trace.events() {
        match event {
            Ok(event) => {
                serde_json::to_writer(&mut writer, &RankedEvent { rank, event: &event })?;
                writer.write_all(b"\n")?;
            }
            Err(err) => {
                log::warn!("Failed to decode rank {rank}: {err}");
                failed += 1;
            }
        }
    }
    writer.flush()?;
    if failed > 0 {
        log::warn!("{failed} of {} ranks could not be decoded", trace.rank_count());
    }
    trace.close();

    Ok(())
}
