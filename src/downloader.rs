use std::sync::Arc;
use reqwest::Client;
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use crate::download_configuration::DownloadConfiguration;
use crate::download_operation::DownloadOperation;
use crate::download_tracker;
use crate::segment_downloader;
use crate::transport::{ReqwestTransport, Transport};

pub struct Downloader {
    config: Arc<DownloadConfiguration>,
    transport: Arc<dyn Transport>,
    cancel_token: CancellationToken,
}

impl Downloader {
    pub fn new(config: DownloadConfiguration, transport: Arc<dyn Transport>) -> Downloader {
        Downloader {
            config: Arc::new(config),
            transport,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_client(config: DownloadConfiguration, client: Client) -> Downloader {
        Downloader::new(config, Arc::new(ReqwestTransport::new(client)))
    }

    pub fn config(&self) -> &DownloadConfiguration {
        &self.config
    }

    pub fn start_download(self) -> DownloadOperation {
        let (sender, receiver) = download_tracker::new();
        let handle = spawn(segment_downloader::start_download(
            self.config.clone(),
            self.transport.clone(),
            Arc::new(sender),
            self.cancel_token.clone(),
        ));
        DownloadOperation::new(handle, receiver, self.cancel_token)
    }
}
