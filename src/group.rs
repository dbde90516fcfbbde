//! Consumer group initialization.

use tracing::info;

use crate::broker::StreamBroker;
use crate::error::{Error, Result};
use crate::model::StartPosition;

/// What [`ensure_group`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupInit {
    /// The group was already there; nothing was changed.
    Existing,
    /// The group was created, reading only entries appended from now on.
    Created,
}

/// Make sure `group` exists on `stream` before any consumer reads.
///
/// Creates the stream too if it is missing. Losing a creation race to
/// another process counts as [`GroupInit::Existing`]. Any other failure is
/// returned and leaves the caller without a usable group.
pub async fn ensure_group(broker: &dyn StreamBroker, stream: &str, group: &str) -> Result<GroupInit> {
    if broker.group_exists(stream, group).await? {
        info!(stream, group, "consumer group already exists");
        return Ok(GroupInit::Existing);
    }

    match broker
        .create_group(stream, group, StartPosition::NewOnly, true)
        .await
    {
        Ok(()) => {
            info!(stream, group, "created consumer group");
            Ok(GroupInit::Created)
        }
        Err(Error::GroupExists { .. }) => Ok(GroupInit::Existing),
        Err(e) => Err(e),
    }
}
