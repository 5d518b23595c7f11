use debstrap::cli;
use std::process;
use tracing::error;

fn main() {
    let args = cli::parse_args();

    if let Err(e) = debstrap::init_logging(args.log_level()) {
        eprintln!("failed to set up logging: {e}");
        process::exit(2);
    }

    if let Err(e) = debstrap::run(&args) {
        if args.debug {
            error!("{e:?}");
        } else {
            error!("{e}");
        }
        process::exit(1);
    }
}
