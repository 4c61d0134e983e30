//! Flag operation endpoints
//!
//! Flags are the platform's cross-node synchronization primitive. All
//! operations are atomic on the gateway side; clients that need to wait for
//! a specific value poll [`GatewayClient::get_flag`].

use netunicorn_core::domain::flag::FlagValues;

use crate::error::Result;
use crate::GatewayClient;

impl GatewayClient {
    /// Read both values of a flag. 404 if the flag was never written.
    pub async fn get_flag(&self, experiment_id: &str, key: &str) -> Result<FlagValues> {
        let url = format!("{}/experiment/{}/flag/{}", self.base_url, experiment_id, key);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Overwrite flag values atomically; `None` fields are left unchanged.
    pub async fn set_flag(
        &self,
        experiment_id: &str,
        key: &str,
        values: &FlagValues,
    ) -> Result<()> {
        let url = format!("{}/experiment/{}/flag/{}", self.base_url, experiment_id, key);
        let response = self.client.post(&url).json(values).send().await?;
        self.handle_empty_response(response).await
    }

    /// Atomically add 1 to the flag's integer value.
    pub async fn increment_flag(&self, experiment_id: &str, key: &str) -> Result<()> {
        let url = format!(
            "{}/experiment/{}/flag/{}/increment",
            self.base_url, experiment_id, key
        );
        let response = self.client.post(&url).send().await?;
        self.handle_empty_response(response).await
    }

    /// Atomically subtract 1 from the flag's integer value.
    pub async fn decrement_flag(&self, experiment_id: &str, key: &str) -> Result<()> {
        let url = format!(
            "{}/experiment/{}/flag/{}/decrement",
            self.base_url, experiment_id, key
        );
        let response = self.client.post(&url).send().await?;
        self.handle_empty_response(response).await
    }
}
