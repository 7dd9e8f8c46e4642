// Command dispatch: one response per request, keyed by the caller's id

use crate::controller::session::Controller;
use crate::core::error::ControllerError;
use crate::engine::TransferEngine;
use crate::models::command::{Command, Request, Response};
use crate::models::transfer::{DescriptorSource, Fingerprint};
use tracing::{debug, info, warn};

type CommandResult = Result<Option<String>, ControllerError>;

impl<E: TransferEngine> Controller<E> {
    pub async fn dispatch(&mut self, request: Request) -> Response {
        let Request { id, command } = request;
        let name = command.name();
        debug!(request_id = %id, command = name, "Dispatching command");

        let result = match command {
            Command::ReleaseStream => self.release_stream(&id),
            Command::StreamTransfer { transfer_id } => self
                .request_stream(id.clone(), &transfer_id)
                .await
                .map(Some),
            Command::CheckTransfer { transfer_id } => self.check_transfer(&transfer_id).await,
            Command::DeleteTransfer { transfer_id } => self.delete_transfer(&transfer_id).await,
            Command::SeedTransfer { fingerprint } => self.seed_transfer(&fingerprint).await,
        };

        match result {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                warn!(request_id = %id, command = name, error = %e, "Command failed");
                Response::err(id, e)
            }
        }
    }

    fn release_stream(&mut self, id: &str) -> CommandResult {
        if self.releases.release(id) {
            info!(request_id = %id, "Stream released");
        } else {
            debug!(request_id = %id, "Nothing registered to release");
        }
        Ok(None)
    }

    async fn check_transfer(&mut self, transfer_id: &str) -> CommandResult {
        self.resolve(transfer_id).await?;
        Ok(None)
    }

    /// Drop a transfer and its files; failures past parsing are only logged
    async fn delete_transfer(&mut self, transfer_id: &str) -> CommandResult {
        let fingerprint = self
            .engine
            .parse(DescriptorSource::Identifier(transfer_id))?
            .fingerprint;

        if self.engine.get(&fingerprint).is_some() {
            if let Err(e) = self.engine.remove(&fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to remove transfer from engine");
            }
        }

        self.reporters.stop(&fingerprint);
        self.watch.disarm(&fingerprint);
        self.paused.take(&fingerprint);

        let outcome = self.media.delete(&fingerprint).await;
        info!(
            fingerprint = %fingerprint,
            descriptor_removed = outcome.descriptor_removed,
            data_removed = outcome.data_removed,
            "Transfer deleted"
        );

        Ok(None)
    }

    /// Make sure a persisted transfer is seeding and return its magnet URI
    async fn seed_transfer(&mut self, fingerprint: &str) -> CommandResult {
        let fingerprint: Fingerprint = fingerprint.parse()?;

        if let Some(active) = self.engine.get(&fingerprint) {
            return Ok(Some(active.magnet_uri));
        }

        let metadata = self.media.read_descriptor(&fingerprint).await?;
        let descriptor = self.engine.parse(DescriptorSource::Bytes(&metadata))?;
        let added = self.add_unpaused(descriptor).await?;

        info!(fingerprint = %fingerprint, "Seeding transfer");
        Ok(Some(added.magnet_uri))
    }
}
