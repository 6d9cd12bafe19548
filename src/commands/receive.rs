use std::path::PathBuf;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;

use super::print_discovery_tips;
use crate::beacon::Listener;
use crate::client::TransferClient;
use crate::identity::Identity;
use crate::{phrase, Error, Result};

pub struct ReceiveOptions {
    pub code_phrase: String,
    pub output_dir: PathBuf,
    pub auto_accept: bool,
    pub timeout: Duration,
}

/// Receiver orchestration:
///     - Validate the phrase and derive its canonical form
///     - Listen for an authenticated beacon, bounded by the timeout
///     - Hand the verified peer to the pinned transfer client
pub async fn run(options: ReceiveOptions) -> Result<()> {
    if !phrase::validate(&options.code_phrase) {
        return Err(Error::Config(format!(
            "\"{}\" is not a valid code phrase (expected something like swift-ocean)",
            options.code_phrase
        )));
    }
    let canonical = phrase::normalize(&options.code_phrase);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Preparing session keys");
    let identity = Identity::generate()?;
    spinner.finish_and_clear();

    let mut listener = Listener::start(&canonical)?;

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Looking for the sender");

    let device = match tokio::time::timeout(options.timeout, listener.recv()).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            spinner.finish_and_clear();
            return Err(Error::Discovery(
                "the beacon listener stopped unexpectedly".to_string(),
            ));
        }
        Err(_) => {
            spinner.finish_and_clear();
            print_discovery_tips();
            return Err(Error::Discovery(format!(
                "no sender found within {} seconds",
                options.timeout.as_secs()
            )));
        }
    };
    spinner.finish_and_clear();
    listener.stop();
    debug!("Peer fingerprint: {}", device.fingerprint);
    println!("Found {} at {}", device.alias, device.addr);

    let client = TransferClient::new(
        canonical,
        options.output_dir,
        options.auto_accept,
        &identity,
    );
    client.run(&device).await
}
