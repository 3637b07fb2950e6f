//! Hrana over a persistent message channel, such as a websocket carrying
//! JSON text frames.
//!
//! The channel is any `Sink<String>` + `Stream<Item = Result<String, E>>`;
//! dialing and TLS are left to the caller.

use std::fmt::Display;

use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    error::BrokenReason,
    session::Session,
    transport::Transport,
    wire::{self, StreamRequest, StreamResponse, StreamResult},
    HranaError, Result,
};

const STREAM_ID: i32 = 0;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMsg<'a> {
    Hello {
        jwt: Option<&'a str>,
    },
    Request {
        request_id: i32,
        request: Request,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    OpenStream { stream_id: i32 },
    CloseStream { stream_id: i32 },
    Execute { stream_id: i32, stmt: wire::Stmt },
    Batch { stream_id: i32, batch: wire::Batch },
    StoreSql { sql_id: i32, sql: String },
    CloseSql { sql_id: i32 },
}

impl From<StreamRequest> for Request {
    fn from(request: StreamRequest) -> Self {
        match request {
            StreamRequest::Execute { stmt } => Self::Execute {
                stream_id: STREAM_ID,
                stmt,
            },
            StreamRequest::Batch { batch } => Self::Batch {
                stream_id: STREAM_ID,
                batch,
            },
            StreamRequest::StoreSql { sql, sql_id } => Self::StoreSql { sql_id, sql },
            StreamRequest::CloseSql { sql_id } => Self::CloseSql { sql_id },
            StreamRequest::Close => Self::CloseStream {
                stream_id: STREAM_ID,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMsg {
    HelloOk,
    HelloError {
        error: wire::WireError,
    },
    ResponseOk {
        request_id: i32,
        response: Response,
    },
    ResponseError {
        request_id: i32,
        error: wire::WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    OpenStream,
    CloseStream,
    Execute { result: wire::StmtResult },
    Batch { result: wire::BatchResult },
    StoreSql,
    CloseSql,
    #[serde(other)]
    Unknown,
}

impl From<Response> for StreamResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Execute { result } => Self::Execute { result },
            Response::Batch { result } => Self::Batch { result },
            Response::StoreSql => Self::StoreSql,
            Response::CloseSql => Self::CloseSql,
            Response::CloseStream => Self::Close,
            Response::OpenStream | Response::Unknown => Self::Unknown,
        }
    }
}

/// Hrana stream over a message channel. Opens stream `0` during the handshake.
pub struct WsStream<C> {
    channel: C,
    session: Session,
    next_request_id: i32,
}

impl<C, E> WsStream<C>
where
    C: Sink<String> + Stream<Item = std::result::Result<String, E>> + Unpin,
    C::Error: Display,
    E: Display,
{
    /// Sends `hello` and `open_stream`, then waits for both to be accepted.
    pub async fn connect(channel: C, jwt: Option<&str>) -> Result<Self> {
        let mut stream = Self {
            channel,
            session: Session::default(),
            next_request_id: 0,
        };

        stream.send_frame(&ClientMsg::Hello { jwt }).await?;
        let open_id = stream.request_id();
        stream
            .send_frame(&ClientMsg::Request {
                request_id: open_id,
                request: Request::OpenStream {
                    stream_id: STREAM_ID,
                },
            })
            .await?;

        match stream.recv().await? {
            ServerMsg::HelloOk => {}
            ServerMsg::HelloError { error } => return Err(handshake_error(error.message)),
            other => return Err(handshake_error(format!("expected hello_ok, got {other:?}"))),
        }
        match stream.recv().await? {
            ServerMsg::ResponseOk { request_id, .. } if request_id == open_id => {}
            ServerMsg::ResponseError { error, .. } => return Err(handshake_error(error.message)),
            other => {
                return Err(handshake_error(format!(
                    "expected open_stream response, got {other:?}"
                )))
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("message channel handshake complete");
        stream.session.mark_open();
        Ok(stream)
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    fn request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    async fn send_frame(&mut self, message: &ClientMsg<'_>) -> Result<()> {
        let text = serde_json::to_string(message)
            .map_err(|err| HranaError::Decode(format!("cannot encode frame: {err}")))?;
        self.channel
            .send(text)
            .await
            .map_err(|err| HranaError::broken(BrokenReason::Transport, err.to_string()))
    }

    async fn recv(&mut self) -> Result<ServerMsg> {
        let text = match self.channel.next().await {
            Some(Ok(text)) => text,
            Some(Err(err)) => return Err(HranaError::broken(BrokenReason::Transport, err.to_string())),
            None => {
                return Err(HranaError::broken(
                    BrokenReason::Transport,
                    "message channel closed",
                ))
            }
        };
        serde_json::from_str(&text).map_err(|err| {
            HranaError::broken(
                BrokenReason::Protocol,
                format!("invalid server message: {err}; frame: {text}"),
            )
        })
    }
}

fn handshake_error(message: impl Into<String>) -> HranaError {
    HranaError::broken(BrokenReason::Handshake, message)
}

impl<C, E> Transport for WsStream<C>
where
    C: Sink<String> + Stream<Item = std::result::Result<String, E>> + Unpin,
    C::Error: Display,
    E: Display,
{
    fn session(&self) -> &Session {
        &self.session
    }

    async fn send(&mut self, requests: Vec<StreamRequest>) -> Result<Vec<StreamResponse>> {
        let payload = self.session.begin_exchange(requests)?;

        let mut ids = Vec::with_capacity(payload.requests.len());
        for request in &payload.requests {
            let request_id = self.request_id();
            self.send_frame(&ClientMsg::Request {
                request_id,
                request: request.clone().into(),
            })
            .await?;
            ids.push(request_id);
        }

        let mut results: Vec<Option<StreamResult>> = ids.iter().map(|_| None).collect();
        while results.iter().any(Option::is_none) {
            let (request_id, result) = match self.recv().await? {
                ServerMsg::ResponseOk {
                    request_id,
                    response,
                } => (
                    request_id,
                    StreamResult::Ok {
                        response: Some(response.into()),
                    },
                ),
                ServerMsg::ResponseError { request_id, error } => {
                    (request_id, StreamResult::Error { error: Some(error) })
                }
                other => {
                    return Err(HranaError::broken(
                        BrokenReason::Protocol,
                        format!("unexpected server message {other:?}"),
                    ))
                }
            };
            let index = ids.iter().position(|id| *id == request_id).ok_or_else(|| {
                HranaError::broken(
                    BrokenReason::Protocol,
                    format!("response for unknown request id {request_id}"),
                )
            })?;
            results[index] = Some(result);
        }

        self.session
            .finish_channel(&payload.requests, results.into_iter().flatten().collect())
    }

    fn close(&mut self) {
        if self.session.is_closed() {
            return;
        }
        self.session.close();
        let request_id = self.request_id();
        let frame = serde_json::to_string(&ClientMsg::Request {
            request_id,
            request: Request::CloseStream {
                stream_id: STREAM_ID,
            },
        });
        if let Ok(text) = frame {
            // polled once; a sink that is not ready drops the notification
            let sent = self.channel.send(text).now_or_never();
            #[cfg(feature = "tracing")]
            tracing::debug!(delivered = matches!(sent, Some(Ok(()))), "stream close sent");
            drop(sent);
        }
    }
}
