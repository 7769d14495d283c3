//! Presence cache for browsed channels
//!
//! 浏览通道的在线缓存:新记录或内容变化时上报 `Found`,
//! 超过 TTL 未收到公告、对端撤回或连接关闭时上报 `Lost`。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cs_core::ids::PeerRef;
use cs_core::presence::{ChannelKind, DiscoveryInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Found {
        channel: ChannelKind,
        peer: PeerRef,
        info: DiscoveryInfo,
    },
    Lost {
        channel: ChannelKind,
        peer: PeerRef,
    },
}

impl PresenceChange {
    fn key(&self) -> (ChannelKind, &PeerRef) {
        match self {
            PresenceChange::Found { channel, peer, .. } | PresenceChange::Lost { channel, peer } => {
                (*channel, peer)
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    info: DiscoveryInfo,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct PresenceCache {
    ttl: Duration,
    entries: HashMap<(ChannelKind, PeerRef), Entry>,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Record an announcement. Only new or changed records are reported.
    pub fn observe(
        &mut self,
        channel: ChannelKind,
        peer: PeerRef,
        info: DiscoveryInfo,
        now: Instant,
    ) -> Option<PresenceChange> {
        let key = (channel, peer.clone());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_seen = now;
            if entry.info == info {
                return None;
            }
            entry.info = info.clone();
        } else {
            self.entries.insert(
                key,
                Entry {
                    info: info.clone(),
                    last_seen: now,
                },
            );
        }
        Some(PresenceChange::Found {
            channel,
            peer,
            info,
        })
    }

    pub fn withdraw(&mut self, channel: ChannelKind, peer: &PeerRef) -> Option<PresenceChange> {
        self.entries
            .remove(&(channel, peer.clone()))
            .map(|_| PresenceChange::Lost {
                channel,
                peer: peer.clone(),
            })
    }

    /// Drop every record not refreshed within the TTL.
    pub fn expire(&mut self, now: Instant) -> Vec<PresenceChange> {
        let ttl = self.ttl;
        let mut lost = Vec::new();
        self.entries.retain(|(channel, peer), entry| {
            let alive = now.saturating_duration_since(entry.last_seen) <= ttl;
            if !alive {
                lost.push(PresenceChange::Lost {
                    channel: *channel,
                    peer: peer.clone(),
                });
            }
            alive
        });
        lost.sort_by(|a, b| a.key().cmp(&b.key()));
        lost
    }

    /// The last connection to `peer` closed. Everything it advertised is lost.
    pub fn peer_disconnected(&mut self, peer: &PeerRef) -> Vec<PresenceChange> {
        let mut lost = Vec::new();
        self.entries.retain(|(channel, seen), _| {
            if seen == peer {
                lost.push(PresenceChange::Lost {
                    channel: *channel,
                    peer: seen.clone(),
                });
                false
            } else {
                true
            }
        });
        lost.sort_by(|a, b| a.key().cmp(&b.key()));
        lost
    }

    /// Forget a channel silently, so the next announcements are reported again.
    pub fn forget_channel(&mut self, channel: ChannelKind) {
        self.entries.retain(|(seen, _), _| *seen != channel);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(stamp: &str) -> DiscoveryInfo {
        let mut info = DiscoveryInfo::new();
        info.insert("courseId".to_string(), "c1".to_string());
        info.insert("timeStamp".to_string(), stamp.to_string());
        info
    }

    fn peer(name: &str) -> PeerRef {
        PeerRef::new(name)
    }

    #[test]
    fn test_new_record_is_found_once() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();

        let first = cache.observe(ChannelKind::Status, peer("m"), info("1"), now);
        assert!(matches!(first, Some(PresenceChange::Found { .. })));

        let repeat = cache.observe(
            ChannelKind::Status,
            peer("m"),
            info("1"),
            now + Duration::from_secs(1),
        );
        assert_eq!(repeat, None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_changed_record_is_found_again() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();
        cache.observe(ChannelKind::Status, peer("m"), info("1"), now);

        let change = cache.observe(ChannelKind::Status, peer("m"), info("2"), now);
        assert_eq!(
            change,
            Some(PresenceChange::Found {
                channel: ChannelKind::Status,
                peer: peer("m"),
                info: info("2"),
            })
        );
    }

    #[test]
    fn test_silent_peer_expires_after_ttl() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();
        cache.observe(ChannelKind::Hand, peer("a"), info("1"), now);
        cache.observe(
            ChannelKind::Hand,
            peer("b"),
            info("1"),
            now + Duration::from_secs(2),
        );

        assert!(cache.expire(now + Duration::from_secs(3)).is_empty());

        let lost = cache.expire(now + Duration::from_secs(4));
        assert_eq!(
            lost,
            vec![PresenceChange::Lost {
                channel: ChannelKind::Hand,
                peer: peer("a"),
            }]
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_refresh_keeps_peer_alive() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();
        cache.observe(ChannelKind::Hand, peer("a"), info("1"), now);
        cache.observe(
            ChannelKind::Hand,
            peer("a"),
            info("1"),
            now + Duration::from_secs(2),
        );

        assert!(cache.expire(now + Duration::from_secs(4)).is_empty());
    }

    #[test]
    fn test_withdraw_reports_lost_only_when_known() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        assert_eq!(cache.withdraw(ChannelKind::Status, &peer("m")), None);

        cache.observe(ChannelKind::Status, peer("m"), info("1"), Instant::now());
        assert!(matches!(
            cache.withdraw(ChannelKind::Status, &peer("m")),
            Some(PresenceChange::Lost { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disconnect_loses_every_channel_of_peer() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();
        cache.observe(ChannelKind::Status, peer("m"), info("1"), now);
        cache.observe(ChannelKind::Hand, peer("m"), info("1"), now);
        cache.observe(ChannelKind::Hand, peer("s"), info("1"), now);

        let lost = cache.peer_disconnected(&peer("m"));
        assert_eq!(lost.len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_forget_channel_reports_next_announcement_again() {
        let mut cache = PresenceCache::new(Duration::from_secs(3));
        let now = Instant::now();
        cache.observe(ChannelKind::Status, peer("m"), info("1"), now);

        cache.forget_channel(ChannelKind::Status);
        assert!(cache
            .observe(ChannelKind::Status, peer("m"), info("1"), now)
            .is_some());
    }
}
