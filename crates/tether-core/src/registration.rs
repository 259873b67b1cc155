//! Replica registration records as seen by election policies

use std::time::SystemTime;

use crate::{ChannelId, ChannelName};

/// One connected replica, from the hub's point of view
#[derive(Clone, Debug)]
pub struct RegistrationInfo {
    pub id: ChannelId,
    pub name: ChannelName,
    pub is_candidate: bool,
    pub is_master: bool,
    pub connected_at: SystemTime,
    /// Monotonic insertion counter, the connection order
    pub seq: u64,
}

impl RegistrationInfo {
    /// Ordering key for "who connected first"
    ///
    /// Wall-clock time can step backwards, so only `seq` is used.
    #[inline]
    pub fn arrival_key(&self) -> u64 {
        self.seq
    }
}
