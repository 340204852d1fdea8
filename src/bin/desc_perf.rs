use std::process::ExitCode;

use log::error;
use xfer_desc::{
    mem::HostAllocator,
    perf::{BenchParams, DescBench, MonotonicClock},
    Agent,
};

fn main() -> ExitCode {
    env_logger::init();

    let run = || -> xfer_desc::Result<()> {
        let agent = Agent::new("test", None)?;
        let mut bench = DescBench::new(&agent, MonotonicClock, HostAllocator::new());
        let report = bench.run(&BenchParams::default())?;
        println!("{report}");
        Ok(())
    };

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("descriptor benchmark failed: {err}");
            eprintln!("{err}");
            ExitCode::from(u8::try_from(err.to_errno()).unwrap_or(1))
        }
    }
}
