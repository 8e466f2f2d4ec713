//! Default endpoint factory.

use peerlink_core::{Connector, EventSink, Mode, NetworkEndpoint, SessionParams, TransportError};

use crate::{TcpClient, TcpServer};

/// Builds [`TcpServer`] or [`TcpClient`] endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(
        &self,
        mode: Mode,
        params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn NetworkEndpoint>, TransportError> {
        if params.host.trim().is_empty() {
            return Err(TransportError::InvalidAddress(params.address()));
        }
        let endpoint: Box<dyn NetworkEndpoint> = match mode {
            Mode::Server => Box::new(TcpServer::open(params, sink)?),
            Mode::Client => Box::new(TcpClient::open(params, sink)?),
        };
        Ok(endpoint)
    }
}
