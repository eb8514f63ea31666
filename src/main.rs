use std::process;

use clap::Parser;

use ramcheck::orchestrator::{CancellationToken, ComprehensiveRamTest};
use ramcheck::report::{self, KeyValueFileSink, ReportSink, EXIT_ERROR};
use ramcheck::utils::Args;
use ramcheck::{cpu_utils, logger, signals, utils, SystemMemory};
use ramcheck::{log_error_fmt, log_info_fmt, log_warn_fmt};

fn run(args: &Args) -> ramcheck::Result<i32> {
    let token = CancellationToken::new();
    if let Err(e) = signals::install_handlers(&token) {
        log_warn_fmt!("Failed to install signal handlers, Ctrl-C will kill the run: {}", e);
    }

    cpu_utils::log_cpu_info();
    if let Some(core) = args.core {
        cpu_utils::pin_test_thread(core);
    }
    utils::check_memory_request(args.memory_mb);

    let mut suite = ComprehensiveRamTest::new(args.to_run_config(), SystemMemory);
    let report = suite.run(&token)?;
    report::log_summary(&report);

    let mut sink = KeyValueFileSink::new(&args.result_file);
    sink.write_report(&report)?;
    Ok(report.exit_code())
}

fn main() {
    let args = Args::parse();

    let log_file_path = args.log_file_path();
    match logger::init_logger(Some(&log_file_path), args.verbose) {
        Ok(true) => log_info_fmt!("Log path: {}", log_file_path),
        Ok(false) => log_warn_fmt!("Cannot open {}, logging to console only", log_file_path),
        Err(e) => eprintln!("Failed to initialize logger: {}", e),
    }

    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            log_error_fmt!("{}", e);
            EXIT_ERROR
        }
    };
    process::exit(code);
}
