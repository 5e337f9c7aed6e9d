use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = quarry_index::cli::run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
