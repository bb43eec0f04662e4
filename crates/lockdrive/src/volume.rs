use crate::api::{RemoteVolume, ShareId, VolumeId};

/// The user's primary storage volume.
///
/// Only the first volume in the active state is considered; it names the
/// root share the whole session operates on.
#[derive(Debug, Clone)]
pub struct Volume {
    id: VolumeId,
    share_id: ShareId,
}

impl From<RemoteVolume> for Volume {
    fn from(remote: RemoteVolume) -> Self {
        Self {
            id: remote.id,
            share_id: remote.share_id,
        }
    }
}

impl Volume {
    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    pub fn share_id(&self) -> &ShareId {
        &self.share_id
    }
}
