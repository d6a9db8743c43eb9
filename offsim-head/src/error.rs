use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeadError {
    #[error("party index {0} is out of range for a committee of size {1}")]
    PartyIndexOutOfRange(u32, usize),

    #[error("no peer link registered for node {0}")]
    UnknownPeer(u32),
}

pub type HeadResult<T> = std::result::Result<T, HeadError>;
