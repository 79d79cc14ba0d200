//! Talking to package indexes: the transport session, page parsing and link
//! collection.

pub mod collector;
pub mod html;
pub mod session;

pub use collector::{
    collect_links, AllSourcesFailed, CollectError, CollectedLinks, FindLinks, Source,
};
pub use session::{ByteStream, CredentialProvider, Response, Session, SessionError, SessionOptions};
