//! Global shutdown only happens at process exit, so each scenario runs in a
//! child copy of this test binary and reports the stand-in counters from an
//! exit hook registered before the library is initialized.

use std::process::Command;

use ireec_dl::{Error, GlobalInit, Output, Session, testing};
use pretty_assertions::assert_eq;

const SCENARIO_ENV: &str = "IREEC_LIFECYCLE_SCENARIO";
const REPORT_PREFIX: &str = "global-lifecycle:";

#[derive(Debug, PartialEq, Eq)]
struct Report {
	initialized: usize,
	shut_down: usize,
	acquire_after_exit: String,
}

/// Runs in the child once every handler registered after it (the library's own
/// exit hook included) has run.
extern "C" fn report_counts() {
	let acquire_after_exit = match GlobalInit::acquire() {
		Ok(_) => "active".to_string(),
		Err(Error::ShutDown) => "shut-down".to_string(),
		Err(e) => format!("error: {e}"),
	};
	println!(
		"{REPORT_PREFIX} init={} shutdown={} acquire={acquire_after_exit}",
		testing::global_initialize_calls(),
		testing::global_shutdown_calls(),
	);
}

fn run_scenario(scenario: &str) -> Report {
	let exe = std::env::current_exe().expect("test binary path should be known");
	let output = Command::new(exe)
		.args(["--exact", "lifecycle_scenario", "--nocapture", "--test-threads=1"])
		.env(SCENARIO_ENV, scenario)
		.output()
		.expect("child test binary should run");
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(output.status.success(), "{scenario} failed:\n{stdout}\n{}", String::from_utf8_lossy(&output.stderr));

	let line = stdout
		.lines()
		.find_map(|line| line.strip_prefix(REPORT_PREFIX))
		.unwrap_or_else(|| panic!("{scenario} printed no report:\n{stdout}"));
	let field = |name: &str| {
		line.split_whitespace()
			.find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
			.unwrap_or_else(|| panic!("report is missing {name}: {line}"))
			.to_string()
	};
	Report {
		initialized: field("init").parse().expect("init count should be a number"),
		shut_down: field("shutdown").parse().expect("shutdown count should be a number"),
		acquire_after_exit: field("acquire"),
	}
}

/// Entry point of the child process; a no-op in the parent.
#[test]
fn lifecycle_scenario() {
	let Ok(scenario) = std::env::var(SCENARIO_ENV) else { return };
	testing::install();
	// SAFETY: `report_counts` is a plain `extern "C" fn()`.
	assert_eq!(unsafe { libc::atexit(report_counts) }, 0);

	let session = Session::new().expect("session should be created");
	let output = Output::open_membuffer().expect("membuffer should open");
	assert_eq!(testing::global_initialize_calls(), 1);

	drop(session);
	match scenario.as_str() {
		"released" => drop(output),
		"output-outlives-exit" => std::mem::forget(output),
		other => panic!("unknown scenario {other}"),
	}

	// The process reference keeps the library initialized until exit.
	assert_eq!(testing::global_shutdown_calls(), 0);
	assert!(ireec_dl::global::is_initialized());
}

#[test]
fn shutdown_runs_once_after_last_holder_at_exit() {
	assert_eq!(
		run_scenario("released"),
		Report {
			initialized: 1,
			shut_down: 1,
			acquire_after_exit: "shut-down".to_string(),
		}
	);
}

#[test]
fn live_holder_defers_shutdown_past_exit_hook() {
	assert_eq!(
		run_scenario("output-outlives-exit"),
		Report {
			initialized: 1,
			shut_down: 0,
			acquire_after_exit: "shut-down".to_string(),
		}
	);
}
