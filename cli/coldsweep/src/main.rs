use clap::Parser;
use coldsweep::{run_coldsweep, CliArgs};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(err) = run_coldsweep(args).await {
        eprintln!("\n❌ Error: {}", err);

        if let Some(cause) = err.source() {
            eprintln!("\nCaused by:");
            let mut current = Some(cause);
            let mut i = 0;
            while let Some(e) = current {
                eprintln!("  {}: {}", i, e);
                current = e.source();
                i += 1;
            }
        }
        std::process::exit(1);
    }
}
