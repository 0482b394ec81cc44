use clap::Parser;
use cnc_cli::{cli::Cli, config::Config, console, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let result = match Config::resolve(cli.config.as_deref()) {
		Ok(config) => console::run(cli, config).await,
		Err(err) => Err(err),
	};
	if let Err(err) = result {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}
