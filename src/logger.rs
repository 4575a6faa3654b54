use log::LevelFilter;
use std::io::Write;

/// Install the console logger on stderr.
///
/// The level is `warn` by default, `debug` with `--verbose` and `error` with
/// `--quiet`. `RUST_LOG` overrides all of them.
pub fn init(verbose: bool, quiet: bool) {
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or_else(|| level_for(verbose, quiet));

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok();
}

fn level_for(verbose: bool, quiet: bool) -> LevelFilter {
    match (verbose, quiet) {
        (_, true) => LevelFilter::Error,
        (true, false) => LevelFilter::Debug,
        (false, false) => LevelFilter::Warn,
    }
}
