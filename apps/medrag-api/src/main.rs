use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = medrag_api::Args::parse();

	medrag_api::run(args).await
}
