use std::{fs, path::PathBuf, process::ExitCode};

use cache_sim::{
    config::CacheConfigPatch,
    report::Report,
    sim::{self, RunControl},
    sweep,
    trace::{self, Trace},
    AllocatePolicy, Error, HierarchyConfig, WritePolicy,
};

const USAGE: &str = "\
Two-Level Cache & Memory Hierarchy Simulator

Required:
  -t, --trace <file>              text trace, `.xz` is decompressed

L1 options:
  --l1_size <bytes> --l1_block <bytes> --l1_assoc <ways>
L2 options:
  --l2_size <bytes> --l2_block <bytes> --l2_assoc <ways>

Policies (both levels):
  --l1_wb 1|0 --l1_wa 1|0
  --l2_wb 1|0 --l2_wa 1|0

Prefetch:
  --l1_pfb <entries> --l1_nlp 1|0   (nlp = next-line prefetch)
  --l2_pfb <entries> --l2_nlp 1|0

Configuration:
  --config <json>                 inline JSON, e.g. '{\"l1\": {\"assoc\": 4}}'
  -p <path>                       JSON file instead of --config
                                  flags above override either one

Run control:
  -w, --warmup <n>                clear statistics after n accesses
  -i, --limit <n>                 stop after n measured accesses (0 = all)
  --heartbeat <n>                 log progress every n accesses
  --buffer-size <n>               accesses per trace chunk
  --queue-size <n>                trace chunks read ahead
  --json <path>                   also write statistics as JSON

Sweep:
  --sweep                         grid search over L1/L2 size, assoc and prefetch depth
  --jobs <n>                      sweep worker threads

Example:
  cache_sim --trace traces/t.txt --l1_size 32768 --l1_block 64 --l1_assoc 8 --l1_wb 1 --l1_wa 1 --l1_pfb 8 --l1_nlp 1 --l2_size 262144 --l2_block 64 --l2_assoc 8 --l2_wb 1 --l2_wa 1 --l2_pfb 16 --l2_nlp 1
";

struct LevelFlags {
    size: &'static str,
    block: &'static str,
    assoc: &'static str,
    wb: &'static str,
    wa: &'static str,
    pfb: &'static str,
    nlp: &'static str,
}

const L1_FLAGS: LevelFlags = LevelFlags {
    size: "--l1_size",
    block: "--l1_block",
    assoc: "--l1_assoc",
    wb: "--l1_wb",
    wa: "--l1_wa",
    pfb: "--l1_pfb",
    nlp: "--l1_nlp",
};

const L2_FLAGS: LevelFlags = LevelFlags {
    size: "--l2_size",
    block: "--l2_block",
    assoc: "--l2_assoc",
    wb: "--l2_wb",
    wa: "--l2_wa",
    pfb: "--l2_pfb",
    nlp: "--l2_nlp",
};

fn parse_switch(s: &str) -> Result<bool, String> {
    s.parse::<u64>()
        .map(|v| v != 0)
        .map_err(|_| format!("expected 1 or 0, got {s:?}"))
}

fn level_patch(
    args: &mut pico_args::Arguments,
    flags: &LevelFlags,
) -> Result<CacheConfigPatch, pico_args::Error> {
    let write_back = args.opt_value_from_fn(flags.wb, parse_switch)?;
    let write_allocate = args.opt_value_from_fn(flags.wa, parse_switch)?;
    Ok(CacheConfigPatch {
        size_bytes: args.opt_value_from_str(flags.size)?,
        block_bytes: args.opt_value_from_str(flags.block)?,
        assoc: args.opt_value_from_str(flags.assoc)?,
        write_policy: write_back.map(|wb| {
            if wb {
                WritePolicy::WriteBack
            } else {
                WritePolicy::WriteThrough
            }
        }),
        allocate_policy: write_allocate.map(|wa| {
            if wa {
                AllocatePolicy::WriteAllocate
            } else {
                AllocatePolicy::NoWriteAllocate
            }
        }),
        prefetch_buf_entries: args.opt_value_from_str(flags.pfb)?,
        next_line_prefetch: args.opt_value_from_fn(flags.nlp, parse_switch)?,
        ..Default::default()
    })
}

struct Options {
    config: HierarchyConfig,
    trace_path: PathBuf,
    control: RunControl,
    ops_per_chunk: usize,
    chunks_per_queue: usize,
    stats_path: Option<PathBuf>,
    sweep: bool,
    jobs: usize,
}

fn parse_options(mut args: pico_args::Arguments) -> Result<Options, Error> {
    let inline_config: Option<String> = args.opt_value_from_str("--config")?;
    let config_path: Option<PathBuf> = args.opt_value_from_str("-p")?;
    let mut config = match (inline_config, config_path) {
        (Some(_), Some(_)) => return Err(Error::ConfigConflict),
        (Some(json), None) => HierarchyConfig::from_json(&json)?,
        (None, Some(path)) => {
            let json = fs::read_to_string(&path)
                .map_err(|source| Error::ConfigFile { path, source })?;
            HierarchyConfig::from_json(&json)?
        }
        (None, None) => HierarchyConfig::default(),
    };
    level_patch(&mut args, &L1_FLAGS)?.apply(&mut config.l1);
    level_patch(&mut args, &L2_FLAGS)?.apply(&mut config.l2);

    let default_jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let options = Options {
        config,
        trace_path: args
            .opt_value_from_str(["-t", "--trace"])?
            .ok_or(Error::MissingTrace)?,
        control: RunControl {
            n_warm: args.opt_value_from_str(["-w", "--warmup"])?.unwrap_or(0),
            n_limit: args.opt_value_from_str(["-i", "--limit"])?.unwrap_or(0),
            heartbeat: args.opt_value_from_str("--heartbeat")?.unwrap_or(0),
        },
        ops_per_chunk: args
            .opt_value_from_str("--buffer-size")?
            .unwrap_or(1024 * 16),
        chunks_per_queue: args.opt_value_from_str("--queue-size")?.unwrap_or(32),
        stats_path: args.opt_value_from_str("--json")?,
        sweep: args.contains("--sweep"),
        jobs: args.opt_value_from_str("--jobs")?.unwrap_or(default_jobs),
    };

    if let Some(unknown) = args.finish().into_iter().next() {
        return Err(Error::UnknownArg(unknown.to_string_lossy().into_owned()));
    }
    Ok(options)
}

fn simulate(opts: &Options) -> Result<(), Error> {
    let mut hierarchy = opts.config.to_hierarchy()?;
    let mut trace = Trace::read(
        opts.trace_path.clone(),
        opts.ops_per_chunk,
        opts.chunks_per_queue,
    )?;

    let summary = sim::run_trace(&mut hierarchy, trace.ops(), &opts.control)?;

    let report = Report::new(&hierarchy, summary.measured);
    print!("{report}");

    if let Some(path) = &opts.stats_path {
        report.to_writer_json(fs::File::create(path)?)?;
    }
    Ok(())
}

fn run_sweep(opts: &Options) -> Result<(), Error> {
    let ops = trace::read_all(&opts.trace_path)?;
    let points = sweep::grid();
    let result = sweep::run(&opts.config, &points, &ops, opts.jobs)
        .map_err(|(index, source)| Error::Sweep { index, source })?;

    let Some(best) = result.best() else {
        log::warn!("sweep produced no results");
        return Ok(());
    };
    println!("=== BEST CONFIG ===");
    println!("miss_rate= {}", best.l1_miss_rate());
    println!(
        "cfg= --l1_size {} --l1_assoc {} --l2_size {} --l2_assoc {} --l1_pfb {p} --l1_nlp 1 --l2_pfb {p} --l2_nlp 1",
        best.point.l1_size,
        best.point.l1_assoc,
        best.point.l2_size,
        best.point.l2_assoc,
        p = best.point.prefetch_entries,
    );
    print!("{}", best.report);

    if let Some(path) = &opts.stats_path {
        serde_json::to_writer_pretty(fs::File::create(path)?, &result)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    if std::env::args_os().len() <= 1 {
        eprint!("{USAGE}");
        return ExitCode::FAILURE;
    }

    let res = parse_options(args).and_then(|opts| {
        if opts.sweep {
            run_sweep(&opts)
        } else {
            simulate(&opts)
        }
    });

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}\n");
            eprint!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}
