use offsim_types::ClientId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TailError {
    #[error("no peer link registered for client {0}")]
    UnknownPeer(u32),

    #[error("server received unexpected message {msg} from client {client}")]
    UnexpectedServerMsg { client: ClientId, msg: String },

    #[error("client {client} received unexpected message {msg}")]
    UnexpectedClientMsg { client: ClientId, msg: String },
}

pub type TailResult<T> = std::result::Result<T, TailError>;
