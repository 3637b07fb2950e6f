//! Per-stream state shared by every transport: baton, closed flag,
//! replication watermark and redirect target.

use crate::{
    error::ProtocolError,
    wire::{PipelineRequest, PipelineResponse, StreamRequest, StreamResponse, StreamResult},
    HranaError, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// No exchange has happened yet.
    Fresh,
    /// The stream is open. HTTP streams carry the baton to echo on the next
    /// request; message-channel streams have none.
    Active { baton: Option<String> },
    /// No further requests may be sent.
    Closed,
}

/// Mutable state of one logical stream.
///
/// Every exchange is `begin_exchange` followed by one of the `finish_*`
/// methods. The stream reads as closed in between, so an exchange that is
/// abandoned mid-flight leaves it closed.
#[derive(Clone, Debug)]
pub struct Session {
    base_url: Option<String>,
    state: StreamState,
    replication_index: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            base_url: None,
            state: StreamState::Fresh,
            replication_index: None,
        }
    }
}

impl Session {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Highest replication index observed on this stream.
    pub fn replication_index(&self) -> Option<u64> {
        self.replication_index
    }

    /// Current base URL, updated by server redirects.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn mark_open(&mut self) {
        self.state = StreamState::Active { baton: None };
    }

    /// Closes the stream and hands back the baton, if any, so the caller can
    /// notify the server.
    pub fn close(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, StreamState::Closed) {
            StreamState::Active { baton } => baton,
            _ => None,
        }
    }

    /// Checks the stream is usable, attaches baton and watermark, and marks
    /// the stream closed until the exchange finishes.
    pub fn begin_exchange(&mut self, mut requests: Vec<StreamRequest>) -> Result<PipelineRequest> {
        if self.is_closed() {
            return Err(HranaError::StreamClosed);
        }

        if let Some(index) = self.replication_index {
            for request in &mut requests {
                match request {
                    StreamRequest::Execute { stmt } => {
                        stmt.replication_index.get_or_insert(index);
                    }
                    StreamRequest::Batch { batch } => {
                        batch.replication_index.get_or_insert(index);
                    }
                    _ => {}
                }
            }
        }

        let baton = self.close();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            requests = requests.len(),
            has_baton = baton.is_some(),
            "sending pipeline request"
        );
        Ok(PipelineRequest { baton, requests })
    }

    /// Applies an HTTP pipeline response: baton, redirect, watermark and
    /// per-request results.
    pub fn finish_pipeline(
        &mut self,
        sent: &[StreamRequest],
        response: PipelineResponse,
    ) -> Result<Vec<StreamResponse>> {
        let close_requested = matches!(sent.last(), Some(StreamRequest::Close));
        self.state = match (response.baton.filter(|baton| !baton.is_empty()), close_requested) {
            (Some(baton), false) => StreamState::Active { baton: Some(baton) },
            (_, true) => StreamState::Closed,
            (None, false) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("server ended the stream");
                StreamState::Closed
            }
        };

        if let Some(base_url) = response.base_url.filter(|url| !url.is_empty()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("stream redirected to {}", base_url);
            self.base_url = Some(base_url);
        }

        self.check_results(sent, response.results)
    }

    /// Applies the results of a message-channel exchange, where the stream
    /// stays open unless it was closed explicitly.
    pub fn finish_channel(
        &mut self,
        sent: &[StreamRequest],
        results: Vec<StreamResult>,
    ) -> Result<Vec<StreamResponse>> {
        if !matches!(sent.last(), Some(StreamRequest::Close)) {
            self.mark_open();
        }
        self.check_results(sent, results)
    }

    fn observe(&mut self, index: Option<u64>) {
        if index > self.replication_index {
            #[cfg(feature = "tracing")]
            tracing::debug!(?index, "replication watermark raised");
            self.replication_index = index;
        }
    }

    fn check_results(
        &mut self,
        sent: &[StreamRequest],
        results: Vec<StreamResult>,
    ) -> Result<Vec<StreamResponse>> {
        for result in &results {
            if let StreamResult::Ok {
                response: Some(response),
            } = result
            {
                self.observe(response.max_replication_index());
            }
        }

        if results.len() > sent.len() {
            return Err(ProtocolError::ResultCount {
                expected: sent.len(),
                actual: results.len(),
            }
            .into());
        }

        let mut responses = Vec::with_capacity(results.len());
        let mut results = results.into_iter();
        for (request_index, request) in sent.iter().enumerate() {
            let expected = request.expected_response();
            let response = match results.next() {
                Some(StreamResult::Ok {
                    response: Some(response),
                }) => response,
                Some(StreamResult::Error { error: Some(error) }) => {
                    return Err(HranaError::Server {
                        message: error.message,
                        code: error.code,
                    })
                }
                Some(StreamResult::Ok { response: None } | StreamResult::Error { error: None })
                | None => return Err(ProtocolError::NoResponse { request_index }.into()),
                Some(StreamResult::Unknown) => {
                    return Err(ProtocolError::UnknownResponseType {
                        request_index,
                        expected,
                    }
                    .into())
                }
            };
            if response.kind() != expected {
                return Err(ProtocolError::UnknownResponseType {
                    request_index,
                    expected,
                }
                .into());
            }
            responses.push(response);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        error::ProtocolError,
        session::{Session, StreamState},
        wire::{PipelineResponse, Stmt, StreamRequest, StreamResponse},
        HranaError,
    };

    fn execute() -> StreamRequest {
        StreamRequest::Execute {
            stmt: Stmt {
                sql: Some("SELECT 1".to_owned()),
                want_rows: true,
                ..Stmt::default()
            },
        }
    }

    fn response(body: serde_json::Value) -> PipelineResponse {
        serde_json::from_value(body).expect("must parse")
    }

    fn ok_execute(replication_index: Option<&str>) -> serde_json::Value {
        json!({
            "type": "ok",
            "response": {"type": "execute", "result": {"replication_index": replication_index}}
        })
    }

    fn exchange(session: &mut Session, body: serde_json::Value) -> crate::Result<Vec<StreamResponse>> {
        let sent = session.begin_exchange(vec![execute()])?.requests;
        session.finish_pipeline(&sent, response(body))
    }

    #[test]
    fn baton_is_echoed_on_next_request() {
        let mut session = Session::new("http://db");
        let first = session.begin_exchange(vec![execute()]).expect("fresh");
        assert_eq!(first.baton, None);
        assert!(session.is_closed(), "closed while in flight");

        session
            .finish_pipeline(&first.requests, response(json!({"baton": "b1", "results": [ok_execute(None)]})))
            .expect("must succeed");
        assert_eq!(session.state(), &StreamState::Active { baton: Some("b1".to_owned()) });

        let second = session.begin_exchange(vec![execute()]).expect("active");
        assert_eq!(second.baton.as_deref(), Some("b1"));
    }

    #[test]
    fn empty_baton_closes_the_stream() {
        let mut session = Session::new("http://db");
        exchange(&mut session, json!({"baton": "", "results": [ok_execute(None)]})).expect("ok");
        assert!(session.is_closed());

        let err = session.begin_exchange(vec![execute()]).expect_err("must fail");
        assert!(matches!(err, HranaError::StreamClosed));
    }

    #[test]
    fn explicit_close_expects_no_baton() {
        let mut session = Session::new("http://db");
        let sent = session
            .begin_exchange(vec![StreamRequest::Close])
            .expect("fresh")
            .requests;
        let responses = session
            .finish_pipeline(
                &sent,
                response(json!({"baton": null, "results": [{"type": "ok", "response": {"type": "close"}}]})),
            )
            .expect("close must succeed");
        assert!(matches!(responses[0], StreamResponse::Close));
        assert!(session.is_closed());
    }

    #[test]
    fn watermark_only_moves_forward_and_is_attached() {
        let mut session = Session::new("http://db");
        exchange(&mut session, json!({"baton": "b", "results": [ok_execute(Some("5"))]})).expect("ok");
        exchange(&mut session, json!({"baton": "b", "results": [ok_execute(Some("3"))]})).expect("ok");
        assert_eq!(session.replication_index(), Some(5));

        let request = session.begin_exchange(vec![execute()]).expect("active");
        match &request.requests[0] {
            StreamRequest::Execute { stmt } => assert_eq!(stmt.replication_index, Some(5)),
            _ => panic!("expected execute"),
        }
    }

    #[test]
    fn explicit_watermark_is_not_overridden() {
        let mut session = Session::new("http://db");
        exchange(&mut session, json!({"baton": "b", "results": [ok_execute(Some("5"))]})).expect("ok");

        let request = session
            .begin_exchange(vec![StreamRequest::Execute {
                stmt: Stmt {
                    replication_index: Some(9),
                    ..Stmt::default()
                },
            }])
            .expect("active");
        match &request.requests[0] {
            StreamRequest::Execute { stmt } => assert_eq!(stmt.replication_index, Some(9)),
            _ => panic!("expected execute"),
        }
    }

    #[test]
    fn redirect_updates_base_url() {
        let mut session = Session::new("http://primary");
        exchange(
            &mut session,
            json!({"baton": "b", "base_url": "http://replica", "results": [ok_execute(None)]}),
        )
        .expect("ok");
        assert_eq!(session.base_url(), Some("http://replica"));
    }

    #[test]
    fn result_errors_and_gaps() {
        let mut session = Session::new("http://db");
        let err = exchange(
            &mut session,
            json!({"baton": "b", "results": [{"type": "error", "error": {"message": "no such table: t", "code": "SQLITE_ERROR"}}]}),
        )
        .expect_err("must fail");
        assert!(matches!(err, HranaError::Server { ref code, .. } if code.as_deref() == Some("SQLITE_ERROR")));
        assert!(!session.is_closed(), "server errors keep the stream");

        let err = exchange(&mut session, json!({"baton": "b", "results": [{"type": "ok"}]}))
            .expect_err("must fail");
        assert!(matches!(
            err,
            HranaError::Protocol(ProtocolError::NoResponse { request_index: 0 })
        ));

        let err = exchange(&mut session, json!({"baton": "b", "results": []})).expect_err("must fail");
        assert!(matches!(err, HranaError::Protocol(ProtocolError::NoResponse { .. })));

        let err = exchange(
            &mut session,
            json!({"baton": "b", "results": [{"type": "ok", "response": {"type": "close"}}]}),
        )
        .expect_err("must fail");
        assert!(matches!(
            err,
            HranaError::Protocol(ProtocolError::UnknownResponseType { expected: "execute", .. })
        ));
    }

    #[test]
    fn abandoned_exchange_leaves_stream_closed() {
        let mut session = Session::new("http://db");
        exchange(&mut session, json!({"baton": "b", "results": [ok_execute(None)]})).expect("ok");
        let _abandoned = session.begin_exchange(vec![execute()]).expect("active");
        assert!(matches!(
            session.begin_exchange(vec![execute()]),
            Err(HranaError::StreamClosed)
        ));
    }
}
