use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;

use super::{print_discovery_tips, AbortOnDrop};
use crate::beacon::Broadcaster;
use crate::catalog::FileCatalog;
use crate::identity::Identity;
use crate::protocol::default_alias;
use crate::server::{self, ServerState};
use crate::{phrase, Error, Result, PORT_RANGE_END, PORT_RANGE_START};

pub struct SendOptions {
    pub paths: Vec<PathBuf>,
    pub port: Option<u16>,
    pub timeout: Duration,
}

/// Sender orchestration:
///     - Scan the requested paths into the catalog
///     - Generate the session identity and the pairing phrase
///     - Start the TLS transfer server and the beacon broadcaster
///     - Wait (bounded) for a receiver to handshake, then for completion
pub async fn run(options: SendOptions) -> Result<()> {
    let catalog = FileCatalog::scan(&options.paths)?;
    println!(
        "Sending {} file(s), {} bytes total",
        catalog.len(),
        catalog.total_size()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Preparing session keys");
    let identity = Identity::generate()?;
    spinner.finish_and_clear();

    let code_phrase = phrase::generate();
    let port = match options.port {
        Some(port) => port,
        None => find_available_port()?,
    };
    debug!("Serving on port {}", port);

    let listener = tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|e| Error::Config(format!("cannot bind port {}: {}", port, e)))?;
    let tls = identity.server_tls_config()?;
    let (state, connected_rx, done_rx) = ServerState::new(
        phrase::normalize(&code_phrase),
        default_alias(),
        identity.fingerprint().to_string(),
        catalog,
    );

    let _server = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = server::serve(listener, tls, state).await {
            debug!("Transfer server stopped: {}", e);
        }
    }));
    let broadcaster = Broadcaster::start(&code_phrase, identity.fingerprint(), port).await?;

    println!("\nOn the receiving machine, run:\n");
    println!("    gust \x1b[1m{}\x1b[0m\n", code_phrase);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Waiting for a receiver");

    let peer_alias = match tokio::time::timeout(options.timeout, connected_rx).await {
        Ok(Ok(alias)) => alias,
        Ok(Err(_)) => {
            spinner.finish_and_clear();
            return Err(Error::Discovery(
                "the transfer server stopped before a receiver connected".to_string(),
            ));
        }
        Err(_) => {
            spinner.finish_and_clear();
            print_discovery_tips();
            return Err(Error::Discovery(format!(
                "no receiver connected within {} seconds",
                options.timeout.as_secs()
            )));
        }
    };
    spinner.finish_and_clear();
    println!("Receiver connected: {}", peer_alias);

    // No mid-transfer deadline: the receiver drives the downloads and the
    // completion barrier fires once the last body has drained.
    match done_rx.await {
        Ok(()) => {
            broadcaster.stop();
            println!("Transfer complete!");
            Ok(())
        }
        Err(_) => Err(Error::Transfer(
            "the transfer server stopped before all files were delivered".to_string(),
        )),
    }
}

/// Bind-and-close probe across the advertised port range.
fn find_available_port() -> Result<u16> {
    for port in PORT_RANGE_START..PORT_RANGE_END {
        if std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(Error::Config(format!(
        "no free port between {} and {}",
        PORT_RANGE_START, PORT_RANGE_END
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_available_port_is_in_range() {
        let port = find_available_port().unwrap();
        assert!((PORT_RANGE_START..PORT_RANGE_END).contains(&port));
    }
}
