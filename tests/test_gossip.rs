#[cfg(test)]
mod gossip_tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use dovepub::config::{MemoryConfig, PeerConfig};
    use dovepub::follows::FollowSet;
    use dovepub::gossip::{GossipScheduler, TickOutcome};
    use dovepub::peer::{PeerId, PeerLink};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const H1: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const KEY: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB=";

    #[derive(Default)]
    struct FakeLink {
        peers: Mutex<Vec<PeerId>>,
        sent: Mutex<Vec<(PeerId, String)>>,
        refuse: bool,
    }

    impl FakeLink {
        fn with(peers: Vec<PeerId>) -> Self {
            Self { peers: Mutex::new(peers), ..Default::default() }
        }

        fn sent(&self) -> Vec<(PeerId, String)> {
            self.sent.lock().clone()
        }
    }

    impl PeerLink for FakeLink {
        fn connected(&self) -> Vec<PeerId> {
            self.peers.lock().clone()
        }

        fn send(&self, peer: &PeerId, payload: &str) -> bool {
            if self.refuse || !self.peers.lock().contains(peer) {
                return false;
            }
            self.sent.lock().push((peer.clone(), payload.to_string()));
            true
        }
    }

    fn scheduler() -> GossipScheduler {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        GossipScheduler::new(Arc::new(FollowSet::new(Vec::new(), config)))
    }

    fn pub_peer() -> PeerId {
        PeerId::Pub("wss://pub.example".to_string())
    }

    #[test]
    fn test_no_peers_sends_nothing() {
        let g = scheduler();
        g.report_missing(H1, "test");
        let none = FakeLink::default();
        assert_eq!(g.tick(&none, &none), TickOutcome::NoPeers);
        assert!(g.backoff_for(H1, &pub_peer()).is_none());
    }

    #[test]
    fn test_report_missing_first_source_wins() {
        let g = scheduler();
        assert!(g.report_missing(H1, "yaml.previous"));
        assert!(!g.report_missing(H1, "peer-request"));
        assert!(!g.report_missing("too short", "x"));
        assert_eq!(g.source_of(H1).as_deref(), Some("yaml.previous"));
        assert_eq!(g.missing_len(), 1);
        assert!(g.retire(H1).is_some());
        assert!(!g.is_missing(H1));
    }

    #[test]
    fn test_request_then_throttle() {
        let g = scheduler();
        g.report_missing(H1, "test");
        let pubs = FakeLink::with(vec![pub_peer()]);
        let sessions = FakeLink::default();
        let mut rng = StdRng::seed_from_u64(11);
        let now = Instant::now();

        let first = g.tick_with(&pubs, &sessions, now, &mut rng);
        assert_eq!(first, TickOutcome::Requested { hash: H1.to_string(), peer: pub_peer() });
        assert_eq!(pubs.sent(), vec![(pub_peer(), H1.to_string())]);
        let record = g.backoff_for(H1, &pub_peer()).unwrap();
        assert_eq!(record.attempts, 1);

        assert_eq!(g.tick_with(&pubs, &sessions, now, &mut rng), TickOutcome::Throttled);
        assert_eq!(pubs.sent().len(), 1);

        let later = now + Duration::from_millis(1300);
        assert!(matches!(g.tick_with(&pubs, &sessions, later, &mut rng), TickOutcome::Requested { .. }));
        assert_eq!(g.backoff_for(H1, &pub_peer()).unwrap().attempts, 2);
    }

    #[test]
    fn test_skips_ineligible_peer() {
        let g = scheduler();
        g.report_missing(H1, "test");
        let mut rng = StdRng::seed_from_u64(5);
        let now = Instant::now();
        let empty = FakeLink::default();
        let pubs = FakeLink::with(vec![pub_peer()]);
        g.tick_with(&pubs, &empty, now, &mut rng);

        // the pub is backed off; the new session must be the one asked
        let sessions = FakeLink::with(vec![PeerId::Session(1)]);
        for _ in 0..5 {
            let outcome = g.tick_with(&pubs, &sessions, now, &mut rng);
            if outcome != TickOutcome::Throttled {
                assert_eq!(outcome, TickOutcome::Requested { hash: H1.to_string(), peer: PeerId::Session(1) });
            }
        }
        assert_eq!(sessions.sent(), vec![(PeerId::Session(1), H1.to_string())]);
        assert_eq!(pubs.sent().len(), 1);
    }

    #[test]
    fn test_failed_sends_do_not_back_off() {
        let g = scheduler();
        g.report_missing(H1, "test");
        let pubs = FakeLink { peers: Mutex::new(vec![pub_peer()]), refuse: true, ..Default::default() };
        let sessions = FakeLink::default();
        assert_eq!(g.tick(&pubs, &sessions), TickOutcome::Throttled);
        assert!(g.backoff_for(H1, &pub_peer()).is_none());
    }

    #[test]
    fn test_missing_takes_priority_over_follows() {
        let g = scheduler();
        g.follows().merge_from_config(&[KEY.to_string()]);
        g.report_missing(H1, "test");
        let pubs = FakeLink::with(vec![pub_peer()]);
        let sessions = FakeLink::default();
        assert!(matches!(g.tick(&pubs, &sessions), TickOutcome::Requested { .. }));
        // backed off now, so the follow is not polled either
        assert_eq!(g.tick(&pubs, &sessions), TickOutcome::Throttled);
    }

    #[test]
    fn test_polls_follow_on_pub() {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        let follows = Arc::new(FollowSet::new(vec![KEY.to_string()], config));
        let g = GossipScheduler::new(follows).with_pub_weight(1.0);
        let pubs = FakeLink::with(vec![pub_peer()]);
        let sessions = FakeLink::with(vec![PeerId::Session(4)]);

        assert_eq!(g.tick(&pubs, &sessions), TickOutcome::Polled { key: KEY.to_string(), peer: pub_peer() });
        assert!(sessions.sent().is_empty());
    }

    #[test]
    fn test_polls_follow_on_session() {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        let follows = Arc::new(FollowSet::new(vec![KEY.to_string()], config));
        let g = GossipScheduler::new(follows).with_pub_weight(0.0);
        let pubs = FakeLink::with(vec![pub_peer()]);
        let sessions = FakeLink::with(vec![PeerId::Session(4)]);

        assert_eq!(
            g.tick(&pubs, &sessions),
            TickOutcome::Polled { key: KEY.to_string(), peer: PeerId::Session(4) }
        );
        assert!(pubs.sent().is_empty());
    }

    #[test]
    fn test_follow_poll_falls_back_to_other_transport() {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        let follows = Arc::new(FollowSet::new(vec![KEY.to_string()], config));
        let g = GossipScheduler::new(follows).with_pub_weight(1.0);
        let sessions = FakeLink::with(vec![PeerId::Session(9)]);

        assert_eq!(
            g.tick(&FakeLink::default(), &sessions),
            TickOutcome::Polled { key: KEY.to_string(), peer: PeerId::Session(9) }
        );
    }

    #[test]
    fn test_follow_poll_without_peers_sends_nothing() {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        let follows = Arc::new(FollowSet::new(vec![KEY.to_string()], config));
        let g = GossipScheduler::new(follows);
        let none = FakeLink::default();
        assert_eq!(g.tick(&none, &none), TickOutcome::NoPeers);
        assert!(none.sent().is_empty());
    }

    #[test]
    fn test_idle_without_work() {
        let g = scheduler();
        let pubs = FakeLink::with(vec![pub_peer()]);
        assert_eq!(g.tick(&pubs, &FakeLink::default()), TickOutcome::Idle);
    }
}
