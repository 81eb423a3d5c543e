use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use memsleuth::options::Options;
use memsleuth::report::Output;
use memsleuth::trace::Replayer;
use tracing::info;

#[derive(Debug, clap::Parser)]
pub(crate) struct ReplayCommand {
    /// Event trace, JSON lines as produced by a recording front end.
    trace: PathBuf,

    /// Directory receiving results.txt, global.log and
    /// suggested_suppressions.txt.
    #[clap(long, default_value = "memsleuth-out")]
    out_dir: PathBuf,

    #[clap(long)]
    suppress_file: Option<PathBuf>,

    /// Skip the suppressions shipped with the tool.
    #[clap(long)]
    no_default_suppress: bool,

    /// Non-leak errors rendered before throttling; negative for unlimited.
    #[clap(long)]
    report_max: Option<i32>,

    /// Leaks rendered before throttling; negative for unlimited.
    #[clap(long)]
    report_leak_max: Option<i32>,

    #[clap(long)]
    callstack_max_frames: Option<usize>,

    /// Also report still-reachable allocations at leak scans.
    #[clap(long)]
    show_reachable: bool,

    /// Keep the exit summary off stderr.
    #[clap(long)]
    no_summary: bool,
}

impl ReplayCommand {
    pub(crate) fn run(self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("Creating {}", self.out_dir.display()))?;
        let output = Output {
            results: Box::new(BufWriter::new(
                File::create(self.out_dir.join("results.txt")).context("Creating results file")?,
            )),
            log: Box::new(BufWriter::new(
                File::create(self.out_dir.join("global.log")).context("Creating log file")?,
            )),
            suggested: Some(Box::new(BufWriter::new(
                File::create(self.out_dir.join("suggested_suppressions.txt"))
                    .context("Creating suggestions file")?,
            ))),
        };
        let options = Options {
            use_default_suppress: !self.no_default_suppress,
            suppress_file: self.suppress_file.clone(),
            report_max: self.report_max.unwrap_or(Options::default().report_max),
            report_leak_max: self
                .report_leak_max
                .unwrap_or(Options::default().report_leak_max),
            callstack_max_frames: self
                .callstack_max_frames
                .unwrap_or(Options::default().callstack_max_frames),
            show_reachable: self.show_reachable,
            summary: !self.no_summary,
            ..Options::default()
        };
        let reader = BufReader::new(
            File::open(&self.trace)
                .with_context(|| format!("Opening trace {}", self.trace.display()))?,
        );
        let mut replayer = Replayer::new(options, output).context("Initializing the detector")?;
        let stats = replayer.run(reader).context("Replaying the trace")?;
        info!(
            events = stats.events,
            syscalls = stats.syscalls,
            unique_errors = stats.unique_errors,
            "replay finished"
        );
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
