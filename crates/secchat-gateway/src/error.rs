use thiserror::Error;

use crate::hub::ConnId;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub actor is no longer running")]
    Closed,

    #[error("connection {0} is not registered")]
    NotRegistered(ConnId),
}
