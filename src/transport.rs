use crate::{
    session::Session,
    wire::{StreamRequest, StreamResponse},
    ClientOptions, Result,
};

/// A stream that carries Hrana requests to a server.
///
/// Implementations own a [`Session`] and must route every exchange through
/// it, so baton, watermark and closed-state rules hold for all transports.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn session(&self) -> &Session;

    /// Sends `requests` in one exchange and returns one response per request.
    async fn send(&mut self, requests: Vec<StreamRequest>) -> Result<Vec<StreamResponse>>;

    /// Closes the stream without waiting for the server to acknowledge it.
    fn close(&mut self);

    fn apply_options(&mut self, _options: &ClientOptions) {}
}
