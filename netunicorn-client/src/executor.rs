//! Executor lifecycle endpoints

use netunicorn_core::domain::executor::ExecutorState;
use netunicorn_core::dto::{ExecutorResultRequest, HeartbeatRequest};

use crate::error::Result;
use crate::GatewayClient;

impl GatewayClient {
    /// Fetch the serialized pipeline for a started executor.
    ///
    /// The gateway answers 404 for unknown or finished executors; callers
    /// can distinguish that case with [`ClientError::is_not_found`].
    ///
    /// [`ClientError::is_not_found`]: crate::ClientError::is_not_found
    pub async fn get_pipeline(&self, executor_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/pipeline/{}", self.base_url, executor_id);
        let response = self.client.get(&url).send().await?;
        self.handle_bytes_response(response).await
    }

    /// Post a heartbeat, piggybacking the executor's current state.
    pub async fn send_heartbeat(&self, executor_id: &str, state: ExecutorState) -> Result<()> {
        let url = format!("{}/heartbeat/{}", self.base_url, executor_id);
        let response = self
            .client
            .post(&url)
            .json(&HeartbeatRequest { state: Some(state) })
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Submit the final execution result.
    ///
    /// The gateway keeps the first submission; repeats are ignored.
    pub async fn post_result(
        &self,
        executor_id: &str,
        state: ExecutorState,
        result: Vec<u8>,
    ) -> Result<()> {
        let url = format!("{}/result/{}", self.base_url, executor_id);
        let response = self
            .client
            .post(&url)
            .json(&ExecutorResultRequest { state, result })
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
