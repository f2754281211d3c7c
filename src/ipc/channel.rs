// src/ipc/channel.rs

//! Consumer end of a shared-memory style sample channel.
//!
//! The service announces a channel by handing back a `mem_address` in an
//! attribute or custom-member reply; frames for that address are routed here
//! by the client's reader task. Attribute consumers *drain* non-blockingly to
//! avoid head-of-line blocking; document reassembly awaits the next frame.

use crate::core::errors::FaultlineError;
use crate::ipc::proto::ShmFrame;
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct ShmChannel {
    address: String,
    rx: mpsc::UnboundedReceiver<ShmFrame>,
}

impl ShmChannel {
    pub(crate) fn new(address: String, rx: mpsc::UnboundedReceiver<ShmFrame>) -> Self {
        Self { address, rx }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Non-blocking receive. `None` when no frame is buffered (recoverable;
    /// callers fall back to the last known value).
    pub fn try_receive(&mut self) -> Option<ShmFrame> {
        self.rx.try_recv().ok()
    }

    /// Awaits the next frame. The stream ending while a frame is still
    /// expected is a protocol violation.
    pub async fn receive(&mut self) -> Result<ShmFrame, FaultlineError> {
        self.rx.recv().await.ok_or_else(|| {
            FaultlineError::Protocol(format!(
                "sample channel '{}' closed while a frame was expected",
                self.address
            ))
        })
    }

    /// Drains every buffered frame and returns the newest numerical value,
    /// if any arrived. Textual frames on a numeric feed are dropped.
    pub fn drain_latest_numerical(&mut self) -> Option<f64> {
        let mut latest = None;
        while let Some(frame) = self.try_receive() {
            match frame {
                ShmFrame::Numerical { value } => latest = Some(value),
                ShmFrame::Textual { .. } => {
                    tracing::debug!(
                        address = %self.address,
                        "dropping textual frame on numeric sample channel"
                    );
                }
            }
        }
        latest
    }
}
