pub mod receive;
pub mod send;

/// Background tasks tied to an orchestrator run; aborted on every exit path,
/// panics and timeouts included.
pub(crate) struct AbortOnDrop(pub tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn print_discovery_tips() {
    eprintln!("Tips:");
    eprintln!("  - both machines must be on the same network");
    eprintln!("  - double-check the code phrase");
    eprintln!("  - a firewall may be blocking UDP port {}", crate::MULTICAST_PORT);
}
