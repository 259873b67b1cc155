//! Identity types for tether participants
//!
//! A channel carries two identities: the transport-assigned [`ChannelId`],
//! stable for the lifetime of one connection, and the peer-chosen
//! [`ChannelName`], which encodes the context kind of the peer.

use std::fmt;

use rand::Rng;

/// Channel identity - assigned by the transport, unique per connection
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub const ZERO: ChannelId = ChannelId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        ChannelId(id)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of execution context a participant runs in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// The authoritative hub context
    Background,
    Popup,
    Options,
    Page,
    /// One per tab; the only kind eligible for master election
    ContentScript,
}

impl ContextKind {
    pub const ALL: [ContextKind; 5] = [
        ContextKind::Background,
        ContextKind::Popup,
        ContextKind::Options,
        ContextKind::Page,
        ContextKind::ContentScript,
    ];

    /// Short tag used as channel name prefix
    pub fn tag(self) -> &'static str {
        match self {
            ContextKind::Background => "bg",
            ContextKind::Popup => "popup",
            ContextKind::Options => "options",
            ContextKind::Page => "page",
            ContextKind::ContentScript => "cs",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Whether a peer of this kind takes part in master election
    #[inline]
    pub fn is_master_candidate(self) -> bool {
        matches!(self, ContextKind::ContentScript)
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Channel name - `<context tag>:<session suffix>`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Generate a fresh, session-unique name for a context kind
    pub fn generate(kind: ContextKind) -> Self {
        let suffix: u64 = rand::thread_rng().gen();
        ChannelName(format!("{}:{:016x}", kind.tag(), suffix))
    }

    /// Wrap a name chosen by a peer
    pub fn from_raw(raw: impl Into<String>) -> Self {
        ChannelName(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Context kind encoded in the name, if it follows the naming convention
    pub fn kind(&self) -> Option<ContextKind> {
        let tag = self.0.split_once(':').map_or(self.0.as_str(), |(tag, _)| tag);
        ContextKind::from_tag(tag)
    }

    pub fn is_master_candidate(&self) -> bool {
        self.kind().map_or(false, ContextKind::is_master_candidate)
    }
}

impl fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelName({})", self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
