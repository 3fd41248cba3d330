use std::{
    sync::mpsc,
    thread::{self, JoinHandle},
};

use super::{
    error::SlicerError,
    slicer::{RouteSlicer, SlicedResult, SlicerParams},
};

enum RouteRequest {
    Initialize {
        segments: Option<Vec<geo::Geometry>>,
        respond_to: mpsc::Sender<Result<f64, SlicerError>>,
    },
    Query {
        progress: f64,
        respond_to: mpsc::Sender<Result<SlicedResult, SlicerError>>,
    },
}

/// Answer to a request which may not have been computed yet.
pub struct PendingResponse<T> {
    receiver: mpsc::Receiver<Result<T, SlicerError>>,
}

impl<T> PendingResponse<T> {
    /// Block until the worker answered.
    pub fn wait(self) -> Result<T, SlicerError> {
        self.receiver
            .recv()
            .unwrap_or(Err(SlicerError::WorkerDisconnected))
    }

    /// The answer if it is already available, otherwise the pending response is handed back.
    pub fn try_take(self) -> Result<Result<T, SlicerError>, Self> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(response),
            Err(mpsc::TryRecvError::Empty) => Err(self),
            Err(mpsc::TryRecvError::Disconnected) => Ok(Err(SlicerError::WorkerDisconnected)),
        }
    }
}

/// Runs a [`RouteSlicer`] on its own thread.
///
/// Requests are handled one at a time in the order they were sent. Nothing is cancelled or skipped,
/// callers that only care about the latest progress have to hold back queries themselves.
pub struct RouteWorker {
    requests: Option<mpsc::Sender<RouteRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl RouteWorker {
    pub fn spawn(params: SlicerParams) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel::<RouteRequest>();
        let handle = thread::Builder::new()
            .name("route-worker".to_string())
            .spawn(move || run_worker(RouteSlicer::new(params), receiver))?;
        Ok(Self {
            requests: Some(sender),
            handle: Some(handle),
        })
    }

    fn send(&self, request: RouteRequest) -> Result<(), SlicerError> {
        self.requests
            .as_ref()
            .ok_or(SlicerError::WorkerDisconnected)?
            .send(request)
            .map_err(|_| SlicerError::WorkerDisconnected)
    }

    pub fn submit_initialize(
        &self,
        segments: Option<Vec<geo::Geometry>>,
    ) -> Result<PendingResponse<f64>, SlicerError> {
        let (respond_to, receiver) = mpsc::channel();
        self.send(RouteRequest::Initialize {
            segments,
            respond_to,
        })?;
        Ok(PendingResponse { receiver })
    }

    pub fn submit_query(&self, progress: f64) -> Result<PendingResponse<SlicedResult>, SlicerError> {
        let (respond_to, receiver) = mpsc::channel();
        self.send(RouteRequest::Query {
            progress,
            respond_to,
        })?;
        Ok(PendingResponse { receiver })
    }

    /// Initialize the route and wait for its total length in kilometers.
    pub fn initialize(&self, segments: Option<Vec<geo::Geometry>>) -> Result<f64, SlicerError> {
        self.submit_initialize(segments)?.wait()
    }

    /// Slice the route at `progress` and wait for the result.
    pub fn query(&self, progress: f64) -> Result<SlicedResult, SlicerError> {
        self.submit_query(progress)?.wait()
    }
}

impl Drop for RouteWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Route worker thread panicked");
            }
        }
    }
}

fn run_worker(mut slicer: RouteSlicer, requests: mpsc::Receiver<RouteRequest>) {
    for request in requests {
        match request {
            RouteRequest::Initialize {
                segments,
                respond_to,
            } => {
                let response = slicer.initialize(segments);
                if let Err(err) = &response {
                    log::warn!("Route initialization rejected: {}", err);
                }
                // The caller may have stopped waiting, that is fine.
                let _ = respond_to.send(response);
            }
            RouteRequest::Query {
                progress,
                respond_to,
            } => {
                let _ = respond_to.send(slicer.slice_at(progress));
            }
        }
    }
    log::debug!("Route worker stopped");
}
