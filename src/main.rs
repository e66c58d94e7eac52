mod cli;

use clap::Parser;
use cli::Cli;
use facility_booking::error::ErrorKind;
use facility_booking::logger;

fn main() {
    let cli = Cli::parse();

    let config = match cli::resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    logger::init(config.get_log_level(), config.log_json);

    if let Err(e) = cli::run(cli, config) {
        eprintln!("Error: {}", e);
        let code = match e.kind() {
            ErrorKind::Config => 2,
            ErrorKind::PersistenceInconsistency => 3,
            _ => 1,
        };
        std::process::exit(code);
    }
}
