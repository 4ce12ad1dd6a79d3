use clap::Parser;

use medrag_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	medrag_eval::run(args).await
}
