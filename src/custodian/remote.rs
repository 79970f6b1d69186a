//! TCP transport for custodians: a client-side endpoint and a server loop

use super::endpoint::{CustodianEndpoint, HealthReport, StoreAck};
use super::protocol::{
    read_frame, write_frame, CustodianMessage, CustodianRequest, CustodianResponse, MessagePayload,
};
use super::CustodianError;
use crate::ledger::{AssetRef, OwnershipProof};
use crate::sharing::Share;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// A custodian reached over TCP. One connection per call.
pub struct RemoteCustodian {
    id: String,
    addr: SocketAddr,
    client_name: String,
}

impl RemoteCustodian {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            client_name: "coordinator".to_string(),
        }
    }

    async fn call(&self, request: CustodianRequest) -> Result<CustodianResponse, CustodianError> {
        let unreachable = |e: std::io::Error| {
            CustodianError::Unreachable(format!("{} at {}: {}", self.id, self.addr, e))
        };

        let mut stream = TcpStream::connect(self.addr).await.map_err(unreachable)?;
        let msg = CustodianMessage::request(&self.client_name, request);
        let bytes = msg
            .to_bytes()
            .map_err(|e| CustodianError::Protocol(format!("encode request: {}", e)))?;
        write_frame(&mut stream, &bytes).await.map_err(unreachable)?;

        let frame = read_frame(&mut stream)
            .await
            .map_err(unreachable)?
            .ok_or_else(|| {
                CustodianError::Unreachable(format!("{} closed the connection", self.id))
            })?;
        let reply = CustodianMessage::from_bytes(&frame)
            .map_err(|e| CustodianError::Protocol(format!("decode response: {}", e)))?;

        if reply.reply_to.as_deref() != Some(msg.id.as_str()) {
            return Err(CustodianError::Protocol(format!(
                "response from {} answers {:?}, expected {}",
                self.id, reply.reply_to, msg.id
            )));
        }
        match reply.payload {
            MessagePayload::Response(CustodianResponse::Error(e)) => Err(e),
            MessagePayload::Response(response) => Ok(response),
            MessagePayload::Request(_) => Err(CustodianError::Protocol(format!(
                "{} sent a request instead of a response",
                self.id
            ))),
        }
    }
}

fn unexpected(id: &str, response: CustodianResponse) -> CustodianError {
    CustodianError::Protocol(format!("unexpected response from {}: {:?}", id, response))
}

#[async_trait]
impl CustodianEndpoint for RemoteCustodian {
    fn id(&self) -> &str {
        &self.id
    }

    fn location(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn store_share(
        &self,
        share: &Share,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let request = CustodianRequest::StoreShare {
            share: share.clone(),
            proof: proof.clone(),
        };
        match self.call(request).await? {
            CustodianResponse::Stored(ack) => Ok(ack),
            other => Err(unexpected(&self.id, other)),
        }
    }

    async fn commit_share(
        &self,
        asset: &AssetRef,
        split_id: Uuid,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let request = CustodianRequest::CommitShare {
            asset_ref: asset.clone(),
            split_id,
            proof: proof.clone(),
        };
        match self.call(request).await? {
            CustodianResponse::Committed(ack) => Ok(ack),
            other => Err(unexpected(&self.id, other)),
        }
    }

    async fn retrieve_share(
        &self,
        asset: &AssetRef,
        share_index: u8,
        proof: &OwnershipProof,
    ) -> Result<Share, CustodianError> {
        let request = CustodianRequest::RetrieveShare {
            asset_ref: asset.clone(),
            share_index,
            proof: proof.clone(),
        };
        match self.call(request).await? {
            CustodianResponse::Share(share) => Ok(share),
            other => Err(unexpected(&self.id, other)),
        }
    }

    async fn health(&self, challenge: &str) -> Result<HealthReport, CustodianError> {
        let request = CustodianRequest::Health {
            challenge: challenge.to_string(),
        };
        match self.call(request).await? {
            CustodianResponse::Health(report) => Ok(report),
            other => Err(unexpected(&self.id, other)),
        }
    }
}

async fn dispatch(endpoint: &dyn CustodianEndpoint, request: CustodianRequest) -> CustodianResponse {
    let result = match request {
        CustodianRequest::StoreShare { share, proof } => endpoint
            .store_share(&share, &proof)
            .await
            .map(CustodianResponse::Stored),
        CustodianRequest::CommitShare {
            asset_ref,
            split_id,
            proof,
        } => endpoint
            .commit_share(&asset_ref, split_id, &proof)
            .await
            .map(CustodianResponse::Committed),
        CustodianRequest::RetrieveShare {
            asset_ref,
            share_index,
            proof,
        } => endpoint
            .retrieve_share(&asset_ref, share_index, &proof)
            .await
            .map(CustodianResponse::Share),
        CustodianRequest::Health { challenge } => endpoint
            .health(&challenge)
            .await
            .map(CustodianResponse::Health),
    };
    result.unwrap_or_else(CustodianResponse::Error)
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    endpoint: Arc<dyn CustodianEndpoint>,
) -> std::io::Result<()> {
    while let Some(frame) = read_frame(&mut stream).await? {
        let msg = match CustodianMessage::from_bytes(&frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping {}: undecodable frame: {}", peer, e);
                return Ok(());
            }
        };
        let response = match msg.payload {
            MessagePayload::Request(request) => dispatch(endpoint.as_ref(), request).await,
            MessagePayload::Response(_) => CustodianResponse::Error(CustodianError::Protocol(
                "expected a request".into(),
            )),
        };
        let reply = CustodianMessage::response(endpoint.id(), &msg.id, response);
        let bytes = reply
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_frame(&mut stream, &bytes).await?;
    }
    debug!("Connection from {} closed", peer);
    Ok(())
}

/// Serve `endpoint` on `listener` until the task is dropped or aborted
pub async fn serve_custodian(
    listener: TcpListener,
    endpoint: Arc<dyn CustodianEndpoint>,
) -> std::io::Result<()> {
    info!(
        "Custodian {} listening on {}",
        endpoint.id(),
        listener.local_addr()?
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, endpoint).await {
                warn!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}
