//! Common test utilities and fixtures
#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;
use raop_renderer::pipeline::{MsgBody, Pipeline};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialize test logging (call once per test module)
pub fn init_logging() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::from_default_env().add_directive("raop_renderer=debug".parse().unwrap());

        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Pulls everything out of a pipeline, standing in for the audio driver
pub struct Driver {
    rx: mpsc::UnboundedReceiver<MsgBody>,
    task: JoinHandle<()>,
}

impl Driver {
    /// Take ownership of `pipeline` and start pulling
    pub fn start(mut pipeline: Pipeline) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(msg) = pipeline.output().pull().await {
                if tx.send(msg.into_body()).is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    /// Collect the payloads of the next `count` audio messages
    ///
    /// Panics if they do not all arrive within `wait`.
    pub async fn audio(&mut self, count: usize, wait: Duration) -> Vec<Bytes> {
        let mut audio = Vec::with_capacity(count);
        tokio::time::timeout(wait, async {
            while audio.len() < count {
                match self.rx.recv().await {
                    Some(MsgBody::Audio(chunk)) => audio.push(chunk.data),
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("got {} of {count} audio messages", audio.len()));
        audio
    }

    /// Skip messages until one matches `wanted`; false on timeout
    pub async fn until<F>(&mut self, wait: Duration, wanted: F) -> bool
    where
        F: Fn(&MsgBody) -> bool,
    {
        tokio::time::timeout(wait, async {
            while let Some(body) = self.rx.recv().await {
                if wanted(&body) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
