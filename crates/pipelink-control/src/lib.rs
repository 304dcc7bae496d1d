//! Request/response control surface for pipelink.
//!
//! Callers name an operation and pass a map of arguments; the [`Dispatcher`]
//! decodes it into an [`Operation`], runs it against its [`Registry`], and
//! answers with a JSON value or a [`MethodError`] carrying an [`ErrorCode`].
//!
//! | method | arguments | value |
//! |---|---|---|
//! | `createServer` | `pipeName` | server id |
//! | `connect` | `pipeName` | client id |
//! | `listen` | `serverId` | `true` |
//! | `sendMessageFromServer` | `serverId`, `message` | `true` |
//! | `sendMessageFromClient` | `clientId`, `message` | `true` |
//! | `receiveMessageOnServer` | `serverId` | message text |
//! | `receiveMessageOnClient` | `clientId` | message text |
//! | `closeServer` | `serverId` | `true` |
//! | `disconnect` | `clientId` | `true` |
//!
//! Any other method name answers `NOT_IMPLEMENTED`. [`host::serve_lines`]
//! exposes the surface over a JSON-lines byte stream.
//!
//! [`Registry`]: pipelink_endpoint::Registry

pub mod call;
pub mod dispatcher;
pub mod error;
pub mod host;

#[cfg(test)]
mod test_support;

pub use call::{Method, MethodCall, Operation};
pub use dispatcher::Dispatcher;
pub use error::{ErrorCode, MethodError, MethodResult};
pub use host::{decode_request, serve_lines, Request, Response};
