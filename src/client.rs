use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use uuid::Uuid;

use crate::beacon::Device;
use crate::identity::{pinned_client_config, Identity};
use crate::protocol::{
    default_alias, CliAuth, DeviceInfo, FileMetadata, PrepareUploadRequest, PrepareUploadResponse,
    TransferProtocol,
};
use crate::sink::{self, FileSink, StdinPrompt};
use crate::{crypto, Error, Result};

/// Receiver side of a transfer: a fingerprint-pinned HTTPS client that
/// handshakes with the discovered sender and streams every advertised file
/// through the sink pipeline.
pub struct TransferClient {
    phrase: String,
    output_dir: PathBuf,
    auto_accept: bool,
    fingerprint: String,
}

impl TransferClient {
    pub fn new(
        canonical_phrase: String,
        output_dir: PathBuf,
        auto_accept: bool,
        identity: &Identity,
    ) -> Self {
        Self {
            phrase: canonical_phrase,
            output_dir,
            auto_accept,
            fingerprint: identity.fingerprint().to_string(),
        }
    }

    /// Full receive flow against one verified peer.
    pub async fn run(&self, device: &Device) -> Result<()> {
        let client = self.build_client(device)?;
        let manifest = self.handshake(&client, device).await?;

        let files: Vec<FileMetadata> = manifest.files.values().cloned().collect();
        println!("\n{} is offering {} file(s):", device.alias, files.len());
        for file in &files {
            println!("  {} ({} bytes)", file.file_name, file.size);
        }

        if !self.auto_accept && !confirm_transfer()? {
            return Err(Error::Cancelled("transfer declined".to_string()));
        }

        let mut sink = FileSink::new(&self.output_dir, StdinPrompt)?;
        for file in &files {
            self.download_one(&client, device, manifest.session_id, file, &mut sink)
                .await?;
        }

        println!(
            "Received {} file(s) into {}",
            files.len(),
            sink.root().display()
        );
        Ok(())
    }

    /// The pinned TLS client. Building it before any request means a
    /// substituted certificate fails the handshake before a single HTTP byte
    /// is exchanged.
    fn build_client(&self, device: &Device) -> Result<reqwest::Client> {
        if device.protocol != TransferProtocol::Https {
            return Err(Error::Tls(
                "peer does not offer TLS; refusing unpinned transfer".to_string(),
            ));
        }
        let tls = pinned_client_config(&device.fingerprint)?;
        Ok(reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(Duration::from_secs(10))
            .build()?)
    }

    async fn handshake(
        &self,
        client: &reqwest::Client,
        device: &Device,
    ) -> Result<PrepareUploadResponse> {
        let timestamp = crypto::now_unix_ms().to_string();
        let proof = crypto::auth_proof(&self.phrase, &timestamp, &device.fingerprint);
        let request = PrepareUploadRequest {
            info: DeviceInfo::headless(default_alias(), self.fingerprint.clone()),
            files: BTreeMap::new(),
            cli_auth: Some(CliAuth { timestamp, proof }),
        };

        debug!("Handshaking with {}", device.addr);
        let response = client
            .post(format!("{}/prepare-upload", device.base_url()))
            .json(&request)
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(response.json::<PrepareUploadResponse>().await?),
            401 => Err(Error::Auth(
                "the sender rejected the handshake as expired; check both clocks".to_string(),
            )),
            403 => Err(Error::Auth(
                "the sender rejected the proof; is the code phrase correct?".to_string(),
            )),
            status => Err(Error::UnexpectedStatus {
                endpoint: "/prepare-upload",
                status,
            }),
        }
    }

    async fn download_one(
        &self,
        client: &reqwest::Client,
        device: &Device,
        session_id: Uuid,
        file: &FileMetadata,
        sink: &mut FileSink<StdinPrompt>,
    ) -> Result<()> {
        // Resolve first: conflicts and the a-priori size check happen before
        // any bytes are requested.
        let target = sink.resolve(&file.file_name, file.size)?;

        let response = client
            .get(format!("{}/download", device.base_url()))
            .query(&[
                ("sessionId", session_id.to_string()),
                ("fileId", file.id.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: "/download",
                status: response.status().as_u16(),
            });
        }

        let bar = ProgressBar::new(file.size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
                .unwrap(),
        );
        bar.set_message(file.file_name.clone());

        let progress = bar.clone();
        let stream = response.bytes_stream().map(move |chunk| {
            if let Ok(bytes) = &chunk {
                progress.inc(bytes.len() as u64);
            }
            chunk.map_err(Error::from)
        });
        let written = sink::write_stream(&target, Box::pin(stream), &file.file_name).await?;
        bar.finish_and_clear();

        if written != file.size {
            return Err(Error::Transfer(format!(
                "{} ended after {} of {} bytes",
                file.file_name, written, file.size
            )));
        }
        println!("  {} done", file.file_name);
        Ok(())
    }
}

fn confirm_transfer() -> Result<bool> {
    use std::io::Write as _;
    print!("Accept and start the transfer? [Y/n] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(accepts(&line))
}

/// An empty line or an explicit yes proceeds; anything else cancels.
fn accepts(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_answers() {
        assert!(accepts(""));
        assert!(accepts("\n"));
        assert!(accepts("y"));
        assert!(accepts("Y\n"));
        assert!(accepts("yes"));
        assert!(!accepts("n"));
        assert!(!accepts("no"));
        assert!(!accepts("maybe"));
    }
}
