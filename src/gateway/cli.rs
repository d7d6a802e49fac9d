//! Terminal gateway used by the interactive `chat` command.

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::{GatewayKind, InboundMessage};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::io::Write as _;

/// Writes replies straight to stdout. There is no webhook surface, so
/// verification is a no-op and payload normalization yields nothing.
pub struct CliGateway;

#[async_trait]
impl Gateway for CliGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Cli
    }

    fn verify(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<(), GatewayError> {
        Ok(())
    }

    fn normalize(&self, _payload: &serde_json::Value) -> Vec<InboundMessage> {
        Vec::new()
    }

    async fn deliver(&self, _channel_id: &str, text: &str) -> bool {
        let mut stdout = std::io::stdout();
        let ok = writeln!(stdout, "{text}").is_ok();
        let _ = stdout.flush();
        ok
    }
}
