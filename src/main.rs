use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use gust::commands::receive::{self, ReceiveOptions};
use gust::commands::send::{self, SendOptions};
use gust::DEFAULT_TIMEOUT_SECS;

#[derive(Parser)]
#[command(name = "gust")]
#[command(about = "Send files across the local network, paired by a code phrase", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    receive: ReceiveArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Share files or folders with a receiver on the same network
    Send {
        /// Files or folders to send
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Port for the transfer server (probed automatically when omitted)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds to wait for a receiver to connect
        #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },
}

#[derive(Args)]
struct ReceiveArgs {
    /// Code phrase shown on the sending machine
    code_phrase: Option<String>,

    /// Directory to write received files into
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Accept the transfer without prompting
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Seconds to wait for the sender to appear
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
        log::info!("Verbose logging enabled");
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let outcome = match cli.command {
        Some(Commands::Send { paths, port, timeout }) => {
            send::run(SendOptions {
                paths,
                port,
                timeout: Duration::from_secs(timeout),
            })
            .await
        }
        None => match cli.receive.code_phrase {
            Some(code_phrase) => {
                receive::run(ReceiveOptions {
                    code_phrase,
                    output_dir: cli.receive.output,
                    auto_accept: cli.receive.yes,
                    timeout: Duration::from_secs(cli.receive.timeout),
                })
                .await
            }
            None => {
                eprintln!("Usage: gust send <paths...>  |  gust <code-phrase>");
                eprintln!("Run gust --help for details.");
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
