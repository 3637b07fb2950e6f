//! `hrana-client` is an async client for the Hrana SQL protocol.
//!
//! It speaks the HTTP `/v2/pipeline` dialect through [`HttpStream`] and the
//! message-channel dialect through [`ws::WsStream`], and drives either one
//! through a [`Connection`]:
//! - [`Connection::query`] and [`Connection::execute`] split and bind
//!   multi-statement SQL
//! - [`Connection::execute_script`] runs scripts all-or-nothing, chunking
//!   large ones
//! - [`Connection::batch`] sends conditional batches

mod batch;
mod bind;
mod codec;
mod conn;
mod error;
mod http;
mod options;
mod params;
mod rows;
mod script;
mod session;
mod split;
mod transport;
mod value;
pub mod wire;

#[cfg(not(target_arch = "wasm32"))]
pub mod ws;

pub use bind::{bind_script, BoundStatement, ParamShape};
pub use codec::{format_timestamp, parse_timestamp};
pub use conn::{Connection, Prepared, SqlId};
pub use error::{BrokenReason, HranaError, ProtocolError};
pub use http::HttpStream;
pub use options::ClientOptions;
pub use params::{Params, Statement};
pub use rows::{Column, ExecResult, ResultSet, RowRef, Rows, StepOutcome};
pub use session::{Session, StreamState};
pub use split::{split_statements, Keyword, Lexer, SplitInfo, StatementSplitter, Token, TokenKind};
pub use transport::Transport;
pub use value::Value;

pub type Result<T> = std::result::Result<T, HranaError>;
