//! Blocking HTTP client implementing the executor's `Coordinator` trait.
//!
//! Worker threads of the parallel driver call this from outside any
//! async runtime, so the blocking reqwest client is the right shape.
//! `await` long-polls; the request timeout is disabled for it.

use std::time::Duration;

use xun_exec::{CallStatus, Coordinator, ExecError};

use crate::handlers::{AssignResponse, AwaitResponse, CallRequest, DoneRequest};
use crate::ledger::WireStatus;

pub struct HttpCoordinator {
    base: String,
    client: reqwest::blocking::Client,
    /// Client without a request timeout, for long-polling `await`.
    poll_client: reqwest::blocking::Client,
}

fn coordination_error(message: impl Into<String>) -> ExecError {
    ExecError::Coordination {
        message: message.into(),
    }
}

impl HttpCoordinator {
    /// Connects to a coordination server, e.g.
    /// `HttpCoordinator::new("http://127.0.0.1:7600")`.
    pub fn new(base: impl Into<String>) -> Result<HttpCoordinator, ExecError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| coordination_error(format!("building http client: {}", e)))?;
        let poll_client = reqwest::blocking::Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| coordination_error(format!("building http client: {}", e)))?;
        Ok(HttpCoordinator {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            poll_client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base, endpoint)
    }
}

impl Coordinator for HttpCoordinator {
    fn assign(&self, call_id: &str) -> Result<bool, ExecError> {
        let response: AssignResponse = self
            .client
            .post(self.url("assign"))
            .json(&CallRequest {
                call_id: call_id.to_string(),
            })
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| coordination_error(format!("assign {}: {}", call_id, e)))?;
        Ok(response.assigned)
    }

    fn await_done(&self, call_id: &str) -> Result<CallStatus, ExecError> {
        let response: AwaitResponse = self
            .poll_client
            .post(self.url("await"))
            .json(&CallRequest {
                call_id: call_id.to_string(),
            })
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| coordination_error(format!("await {}: {}", call_id, e)))?;
        Ok(match response.status {
            WireStatus::Done => CallStatus::Done,
            WireStatus::Failed => CallStatus::Failed,
        })
    }

    fn done(&self, call_id: &str, status: CallStatus) -> Result<(), ExecError> {
        let status = match status {
            CallStatus::Done => WireStatus::Done,
            CallStatus::Failed => WireStatus::Failed,
        };
        self.client
            .post(self.url("done"))
            .json(&DoneRequest {
                call_id: call_id.to_string(),
                status,
            })
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| coordination_error(format!("done {}: {}", call_id, e)))?;
        Ok(())
    }
}
