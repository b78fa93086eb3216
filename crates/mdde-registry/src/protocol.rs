//! Wire format spoken by the registry's TCP control endpoint.
//!
//! Each frame is a 4-byte big-endian payload length followed by UTF-8 JSON.
//! Requests are `{"cmd": KEYWORD, "args": {...}}`, responses are
//! `{"result": any, "error": str|null, "errcode": int|null}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::{ErrorCode, ErrorDescriptor, ResultEnvelope};
use crate::error::ClientError;

/// Upper bound for a single frame. Full-state dumps are the largest payloads.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub const ARG_NODE_ID: &str = "nid";
pub const ARG_SECOND_NODE_ID: &str = "nidb";
pub const ARG_FRAGMENT_ID: &str = "fid";
pub const ARG_TUPLE_IDS: &str = "tids";
pub const ARG_WORKLOAD_ID: &str = "workload";
pub const ARG_WORKLOAD_WORKERS: &str = "workers";
pub const ARG_FRAGMENT_META_TAG: &str = "fmtag";
pub const ARG_FRAGMENT_LOCAL_META_TAGS: &str = "fmtagsloc";
pub const ARG_FRAGMENT_GLOBAL_META_TAGS: &str = "fmtagsglb";
pub const ARG_SNAPSHOT_DEFAULT: &str = "snapisdef";

/// Registry command keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetMode,
    SetBenchmark,
    SetShuffle,
    Flush,
    InitNodes,
    GenerateData,
    SyncData,
    SnapshotCreate,
    Reset,
    RunBenchmark,
    CopyFragment,
    DeleteFragment,
    FormFragment,
    GetNodes,
    GetNodeFragments,
    GetNodeUnassignedTuples,
    CountFragment,
    FindFragment,
    GetFragmentMetaExemplar,
    GetFragmentMetaGlobal,
    GetAllFragmentsWithMeta,
    GetRegistry,
}

impl Command {
    pub fn keyword(self) -> &'static str {
        match self {
            Command::GetMode => "GET_MODE",
            Command::SetBenchmark => "SET_BENCHMARK",
            Command::SetShuffle => "SET_SHUFFLE",
            Command::Flush => "FLUSHALL",
            Command::InitNodes => "INIT_NODES",
            Command::GenerateData => "GENERATE_DATA",
            Command::SyncData => "SYNC_DATA",
            Command::SnapshotCreate => "SNAPSHOT_CREATE",
            Command::Reset => "RESET",
            Command::RunBenchmark => "RUN_BENCHMARK",
            Command::CopyFragment => "COPY_FRAGMENT",
            Command::DeleteFragment => "REMOVE_FRAGMENT_EXEMPLAR",
            Command::FormFragment => "FORM_FRAGMENT",
            Command::GetNodes => "GET_NODES",
            Command::GetNodeFragments => "GET_NODE_FRAGMENTS",
            Command::GetNodeUnassignedTuples => "GET_NODE_UNASSIGNED_TUPLES",
            Command::CountFragment => "COUNT_FRAGMENT",
            Command::FindFragment => "FIND_FRAGMENT",
            Command::GetFragmentMetaExemplar => "GET_FRAGMENT_META_EXEMPLAR",
            Command::GetFragmentMetaGlobal => "GET_FRAGMENT_META_GLOBAL",
            Command::GetAllFragmentsWithMeta => "GET_ALL_FRAGMENTS_NODES_WITH_META",
            Command::GetRegistry => "GET_REGISTRY",
        }
    }
}

/// A single registry request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub cmd: &'static str,
    pub args: Map<String, Value>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            cmd: command.keyword(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        serde_json::to_vec(self).map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Raw registry response.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errcode: Option<u32>,
}

impl Response {
    pub fn decode(bytes: &[u8]) -> Result<Self, ClientError> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Deserialization(e.to_string()))
    }

    /// Interpret the response as an envelope carrying `T`.
    pub fn into_envelope<T: DeserializeOwned>(self) -> ResultEnvelope<T> {
        if self.error.is_some() || self.errcode.is_some() {
            let message = self
                .error
                .unwrap_or_else(|| "registry reported an error without a message".to_string());
            return ResultEnvelope::failure(ErrorDescriptor {
                code: self.errcode.map(ErrorCode::from),
                message,
            });
        }
        if self.result.is_null() {
            return ResultEnvelope::empty();
        }
        match serde_json::from_value(self.result) {
            Ok(value) => ResultEnvelope::success(value),
            Err(e) => ResultEnvelope::failure(ClientError::Deserialization(e.to_string()).into()),
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ClientError::FrameTooLarge {
            len: payload.len(),
            limit: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, ClientError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ClientError::FrameTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
