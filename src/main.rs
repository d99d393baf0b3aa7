use clap::Parser;
use tracing_subscriber::EnvFilter;

use rust_sqlcmd::Args;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let code = match rust_sqlcmd::run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    };
    std::process::exit(code);
}
