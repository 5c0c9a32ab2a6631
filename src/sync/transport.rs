use tokio::{sync::mpsc, time::Instant};

use crate::{
    keylight::rest::light::{get_light_state, put_light_state},
    protocols::http::HttpClient,
};

use super::device::{DeviceId, LightState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushRequest {
    pub id: DeviceId,
    pub address: String,
    pub port: u16,
    pub state: LightState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequest {
    pub id: DeviceId,
    pub address: String,
    pub port: u16,
    pub requested_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullResult {
    pub id: DeviceId,
    pub requested_at: Instant,
    pub state: LightState,
}

/// Outbound device I/O. Calls return immediately; the work happens elsewhere
/// and failures never reach the caller.
pub trait Dispatcher: Send + Sync {
    fn push(&self, request: PushRequest);
    fn pull(&self, request: PullRequest);
}

pub struct HttpDispatcher {
    client: HttpClient,
    pull_results: mpsc::UnboundedSender<PullResult>,
}

impl HttpDispatcher {
    /// Successful pulls are delivered on the returned receiver.
    pub fn new(client: HttpClient) -> (Self, mpsc::UnboundedReceiver<PullResult>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            HttpDispatcher {
                client,
                pull_results: tx,
            },
            rx,
        )
    }
}

impl Dispatcher for HttpDispatcher {
    fn push(&self, request: PushRequest) {
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = put_light_state(&client, &request.address, request.port, request.state).await;

            if let Err(e) = result {
                log::debug!("Push to {} ({}) failed: {:?}", request.id, request.address, e);
            }
        });
    }

    fn pull(&self, request: PullRequest) {
        let client = self.client.clone();
        let results = self.pull_results.clone();

        tokio::spawn(async move {
            match get_light_state(&client, &request.address, request.port).await {
                Ok(state) => {
                    // Receiver is gone only when the controller has shut down.
                    let _ = results.send(PullResult {
                        id: request.id,
                        requested_at: request.requested_at,
                        state,
                    });
                }
                Err(e) => {
                    log::debug!("Pull from {} ({}) failed: {:?}", request.id, request.address, e);
                }
            }
        });
    }
}

/// Dispatcher for tests: records requests instead of sending them.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingDispatcher {
    pub pushes: std::sync::Mutex<Vec<PushRequest>>,
    pub pulls: std::sync::Mutex<Vec<PullRequest>>,
}

#[cfg(test)]
impl RecordingDispatcher {
    pub fn take_pushes(&self) -> Vec<PushRequest> {
        std::mem::take(&mut *self.pushes.lock().unwrap())
    }

    pub fn take_pulls(&self) -> Vec<PullRequest> {
        std::mem::take(&mut *self.pulls.lock().unwrap())
    }
}

#[cfg(test)]
impl Dispatcher for RecordingDispatcher {
    fn push(&self, request: PushRequest) {
        self.pushes.lock().unwrap().push(request);
    }

    fn pull(&self, request: PullRequest) {
        self.pulls.lock().unwrap().push(request);
    }
}
