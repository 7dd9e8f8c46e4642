use serde::{Deserialize, Serialize};

/// Caller-supplied correlation id
pub type RequestId = String;

/// Inbound command from the control process
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    ReleaseStream,
    #[serde(rename_all = "camelCase")]
    StreamTransfer { transfer_id: String },
    #[serde(rename_all = "camelCase")]
    CheckTransfer { transfer_id: String },
    #[serde(rename_all = "camelCase")]
    DeleteTransfer { transfer_id: String },
    SeedTransfer { fingerprint: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReleaseStream => "release-stream",
            Command::StreamTransfer { .. } => "stream-transfer",
            Command::CheckTransfer { .. } => "check-transfer",
            Command::DeleteTransfer { .. } => "delete-transfer",
            Command::SeedTransfer { .. } => "seed-transfer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub command: Command,
}

/// Exactly one response is produced per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub error: Option<String>,
    pub result: Option<String>,
}

impl Response {
    pub fn ok(id: RequestId, result: Option<String>) -> Self {
        Self {
            id,
            error: None,
            result,
        }
    }

    pub fn err(id: RequestId, error: impl ToString) -> Self {
        Self {
            id,
            error: Some(error.to_string()),
            result: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
