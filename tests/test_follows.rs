#[cfg(test)]
mod follows_tests {
    use std::sync::Arc;

    use dovepub::config::{ConfigStore, MemoryConfig, PeerConfig};
    use dovepub::follows::FollowSet;

    const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn setup() -> (Arc<MemoryConfig>, FollowSet) {
        let config = Arc::new(MemoryConfig::new(&PeerConfig::default()));
        let follows = FollowSet::new(Vec::new(), config.clone());
        (config, follows)
    }

    #[test]
    fn test_add_persists_once() {
        let (config, follows) = setup();
        assert!(follows.add(KEY));
        assert!(!follows.add(KEY));
        assert!(follows.contains(KEY));
        assert_eq!(config.writes(), 1);
        assert_eq!(config.load().unwrap().follows, vec![KEY.to_string()]);
    }

    #[test]
    fn test_add_rejects_wrong_length() {
        let (config, follows) = setup();
        assert!(!follows.add("short"));
        assert!(follows.is_empty());
        assert_eq!(config.writes(), 0);
    }

    #[test]
    fn test_concurrent_adds_insert_once() {
        let (config, follows) = setup();
        let inserted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| follows.add(KEY) as usize)).collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(inserted, 1);
        assert_eq!(follows.len(), 1);
        assert_eq!(config.writes(), 1);
    }

    #[test]
    fn test_merge_from_config_does_not_write() {
        let (config, follows) = setup();
        let keys = vec!["k1".to_string(), "k2".to_string(), "k1".to_string()];
        assert_eq!(follows.merge_from_config(&keys), 2);
        assert_eq!(follows.merge_from_config(&keys), 0);
        assert_eq!(follows.snapshot(), vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(config.writes(), 0);
    }

    #[test]
    fn test_random_draws_a_member() {
        let (_config, follows) = setup();
        assert_eq!(follows.random(), None);
        follows.add(KEY);
        assert_eq!(follows.random().as_deref(), Some(KEY));
    }
}
