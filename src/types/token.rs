//! Resume positions: the precise event token and the coarse start-at time.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::time::now_since_epoch;

/// Logical cluster time of an event, or a wall-clock start-at time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u32,
    pub nano: u32,
}

impl Timestamp {
    pub fn new(
        sec: u32,
        nano: u32,
    ) -> Self {
        Self { sec, nano }
    }

    pub fn now() -> Self {
        let since_epoch = now_since_epoch();
        Self {
            sec: since_epoch.as_secs() as u32,
            nano: since_epoch.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nano)
    }
}

/// Position of one event in the source log.
///
/// `data` is opaque to the scheduler but must sort lexicographically in log
/// order within one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    pub data: String,
    pub cluster_time: Timestamp,
}

impl ResumeToken {
    pub fn new(
        data: impl Into<String>,
        cluster_time: Timestamp,
    ) -> Self {
        Self {
            data: data.into(),
            cluster_time,
        }
    }
}

/// Persisted resume position of one consumer on one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Precise resume point, absent until the consumer commits its first event
    pub token: Option<String>,
    /// Coarse resume point; for a committed token this is the event's cluster time
    pub start_at_time: Timestamp,
}

impl TokenInfo {
    pub fn start_at(time: Timestamp) -> Self {
        Self {
            token: None,
            start_at_time: time,
        }
    }

    pub fn from_token(token: &ResumeToken) -> Self {
        Self {
            token: Some(token.data.clone()),
            start_at_time: token.cluster_time,
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Returns true if the event at `token` has not been handled yet by the
    /// consumer owning this position.
    pub fn admits(
        &self,
        token: &ResumeToken,
    ) -> bool {
        match self.token.as_deref() {
            Some(committed) if !committed.is_empty() => token.data.as_str() > committed,
            _ => token.cluster_time >= self.start_at_time,
        }
    }

    /// The most conservative position among `positions`.
    ///
    /// Precise tokens only compare against each other, so as soon as one
    /// consumer holds a start-at time the watermark falls back to the
    /// earliest start-at time of all of them.
    pub fn watermark<'a, I>(positions: I) -> Option<TokenInfo>
    where
        I: IntoIterator<Item = &'a TokenInfo>,
    {
        let positions: Vec<&TokenInfo> = positions.into_iter().collect();
        if positions.is_empty() {
            return None;
        }

        if positions.iter().all(|p| p.has_token()) {
            return positions.into_iter().min_by(|a, b| a.token.cmp(&b.token)).cloned();
        }

        positions
            .iter()
            .map(|p| p.start_at_time)
            .min()
            .map(TokenInfo::start_at)
    }
}

impl fmt::Display for TokenInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => write!(f, "token({token})@{}", self.start_at_time),
            _ => write!(f, "start_at({})", self.start_at_time),
        }
    }
}
