use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::{GenerateOutcome, GenerateRequest, Orchestrator};

type GenerationResult = Result<GenerateOutcome, PipelineError>;

/// A `generate` call running on its own thread.
pub struct PendingGeneration {
    content_id: u64,
    receiver: Receiver<GenerationResult>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn_generation(
    orchestrator: Arc<Orchestrator>,
    request: GenerateRequest,
) -> std::io::Result<PendingGeneration> {
    let (sender, receiver) = mpsc::channel();
    let content_id = request.content_id;
    let handle = thread::Builder::new()
        .name(format!("headliner-generate-{content_id}"))
        .spawn(move || {
            let result = orchestrator.generate(&request);
            if sender.send(result).is_err() {
                debug!(content_id, "generation result dropped; caller stopped waiting");
            }
        })?;
    Ok(PendingGeneration {
        content_id,
        receiver,
        handle: Some(handle),
    })
}

impl PendingGeneration {
    pub fn content_id(&self) -> u64 {
        self.content_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    pub fn wait(mut self) -> GenerationResult {
        let result = self.receiver.recv().map_err(|_| worker_gone());
        self.join();
        result?
    }

    /// `None` when the run is still going after `timeout`. The worker keeps
    /// running; its result is discarded once this handle is dropped.
    pub fn wait_timeout(mut self, timeout: Duration) -> Option<GenerationResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Some(Err(worker_gone()))
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_gone() -> PipelineError {
    PipelineError::Worker("generation thread exited without a result".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::spawn_generation;
    use crate::pipeline::testing::{config, harness, news_item, script_success};
    use crate::pipeline::{GenerateOutcome, GenerateRequest};

    #[test]
    fn worker_returns_the_pipeline_result() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(1));
        script_success(&h.transport, "task-w");
        let host = h.host.clone();

        let pending = spawn_generation(Arc::new(h.orchestrator), GenerateRequest::new(1))?;
        assert_eq!(pending.content_id(), 1);
        let outcome = pending
            .wait_timeout(Duration::from_secs(30))
            .expect("worker finished")?;
        assert!(matches!(outcome, GenerateOutcome::Generated(_)));
        assert!(host.record(1).has_featured_asset());
        Ok(())
    }

    #[test]
    fn worker_propagates_errors() -> anyhow::Result<()> {
        let h = harness(config());
        let pending = spawn_generation(Arc::new(h.orchestrator), GenerateRequest::new(5))?;
        let err = pending.wait().unwrap_err();
        assert_eq!(err.code(), "not_found");
        Ok(())
    }
}
