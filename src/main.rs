mod commands;

use clap::Parser;
use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help and version are not failures
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = cli.run().await {
        if let Some(usage) = e.downcast_ref::<clap::Error>() {
            let _ = usage.print();
            std::process::exit(1);
        }

        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}
