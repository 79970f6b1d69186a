//! Custodian wire protocol
//!
//! JSON messages in u32 big-endian length-prefixed frames. Every request
//! is answered by exactly one response whose `reply_to` names it.

use super::endpoint::{HealthReport, StoreAck};
use super::CustodianError;
use crate::ledger::{AssetRef, OwnershipProof};
use crate::sharing::Share;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodianRequest {
    StoreShare {
        share: Share,
        proof: OwnershipProof,
    },
    CommitShare {
        asset_ref: AssetRef,
        split_id: Uuid,
        proof: OwnershipProof,
    },
    RetrieveShare {
        asset_ref: AssetRef,
        share_index: u8,
        proof: OwnershipProof,
    },
    Health {
        challenge: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodianResponse {
    Stored(StoreAck),
    Committed(StoreAck),
    Share(Share),
    Health(HealthReport),
    Error(CustodianError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    Request(CustodianRequest),
    Response(CustodianResponse),
}

/// A complete protocol message with envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianMessage {
    pub id: String,
    /// Sender name
    pub from: String,
    /// Id of the request this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

impl CustodianMessage {
    pub fn request(from: impl Into<String>, request: CustodianRequest) -> Self {
        Self::new(from, None, MessagePayload::Request(request))
    }

    pub fn response(
        from: impl Into<String>,
        reply_to: &str,
        response: CustodianResponse,
    ) -> Self {
        Self::new(
            from,
            Some(reply_to.to_string()),
            MessagePayload::Response(response),
        )
    }

    fn new(from: impl Into<String>, reply_to: Option<String>, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            reply_to,
            payload,
            timestamp: Utc::now(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {}", body.len(), MAX_FRAME_LEN),
        ));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read one length-prefixed frame; `Ok(None)` on clean EOF
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = CustodianMessage::request(
            "coordinator",
            CustodianRequest::Health {
                challenge: "nonce-1".into(),
            },
        );
        let bytes = msg.to_bytes().unwrap();
        let decoded = CustodianMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert!(decoded.reply_to.is_none());
    }

    #[test]
    fn test_error_response_keeps_kind() {
        let msg = CustodianMessage::response(
            "custodian-a",
            "req-1",
            CustodianResponse::Error(CustodianError::ProofRejected("expired".into())),
        );
        let decoded = CustodianMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.reply_to.as_deref(), Some("req-1"));
        match decoded.payload {
            MessagePayload::Response(CustodianResponse::Error(e)) => {
                assert_eq!(e, CustodianError::ProofRejected("expired".into()));
                assert!(!e.is_transient());
            }
            other => panic!("Wrong payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_frame(&mut a, b"first").await.unwrap();
            write_frame(&mut a, &[7u8; 200]).await.unwrap();
        });

        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), vec![7u8; 200]);
        writer.await.unwrap();
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
