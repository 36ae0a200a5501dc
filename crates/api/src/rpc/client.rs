//! Minimal RPC client: one call in flight at a time.

use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use rbac_auth::Operation;

use super::frame::{self, Code, Metadata, RpcError, RpcRequest, RpcResponse};
use crate::app::dto::{LoginRequest, LoginResponse};

pub struct RpcClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    next_id: u64,
    token: Option<String>,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, frame::codec()),
            next_id: 1,
            token: None,
        })
    }

    /// Bearer token attached to subsequent calls.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Send one request and wait for its response, whatever the status.
    pub async fn call_raw(
        &mut self,
        method: &str,
        metadata: Metadata,
        body: Value,
    ) -> Result<RpcResponse, RpcError> {
        let id = self.next_id;
        self.next_id += 1;

        let req = RpcRequest {
            id,
            method: method.to_string(),
            metadata,
            body,
        };
        self.framed.send(Bytes::from(serde_json::to_vec(&req)?)).await?;

        loop {
            let frame = self.framed.next().await.ok_or(RpcError::Closed)??;
            let resp: RpcResponse = serde_json::from_slice(&frame)?;
            if resp.id == id {
                return Ok(resp);
            }
            tracing::debug!(expected = id, got = resp.id, "discarding stale rpc response");
        }
    }

    /// Typed call; non-`OK` statuses become [`RpcError::Status`].
    pub async fn call<Req, Resp>(&mut self, operation: Operation, req: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let metadata = match &self.token {
            Some(token) => Metadata::with_bearer(token),
            None => Metadata::new(),
        };
        let resp = self
            .call_raw(&operation.rpc_method(), metadata, serde_json::to_value(req)?)
            .await?;

        if resp.code != Code::Ok {
            return Err(RpcError::Status {
                code: resp.code,
                message: resp.message,
            });
        }
        Ok(serde_json::from_value(resp.body.unwrap_or(Value::Null))?)
    }

    /// Log in and keep the returned token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginResponse, RpcError> {
        let resp: LoginResponse = self
            .call(
                Operation::Login,
                &LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        self.set_token(resp.token.clone());
        Ok(resp)
    }
}
