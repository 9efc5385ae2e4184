mod common;

#[cfg(test)]
mod store_tests {
    use std::fs;

    use dovepub::parser::token::opened_hash;
    use dovepub::store::local::{content_hash, open_envelope};
    use dovepub::store::{LocalStore, RecordStore};
    use tempfile::tempdir;

    use crate::common::Author;

    #[test]
    fn test_content_hash_shape() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 44);
        assert!(h.ends_with('='));
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hello "));
    }

    #[test]
    fn test_open_envelope() {
        let author = Author::generate();
        let env = author.sign_at(1_700_000_000_000, "body");
        let opened = open_envelope(&env).unwrap();
        assert_eq!(opened.len(), 57);
        assert_eq!(opened_hash(&opened), Some(content_hash("body").as_str()));

        // same signed part under another author key must not verify
        let other = Author::generate();
        let forged = format!("{}{}", other.pubkey(), &env[44..]);
        assert!(open_envelope(&forged).is_err());
        assert!(open_envelope("not an envelope").is_err());
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = LocalStore::in_memory();
        let author = Author::generate();
        let env = author.sign("first");

        assert!(store.add(&env).unwrap());
        assert!(!store.add(&env).unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.has(&content_hash(&env)));
        assert!(store.add("garbage").is_err());
    }

    #[test]
    fn test_get_latest_uses_timestamp() {
        let store = LocalStore::in_memory();
        let author = Author::generate();
        let newer = author.sign_at(2_000_000_000_000, "two");
        let older = author.sign_at(1_000_000_000_000, "one");
        store.add(&newer).unwrap();
        store.add(&older).unwrap();

        assert_eq!(store.get_latest(&author.pubkey()).unwrap().unwrap().sig, newer);
        assert!(store.get_latest(&Author::generate().pubkey()).unwrap().is_none());
    }

    #[test]
    fn test_query_sorted_with_text() {
        let store = LocalStore::in_memory();
        let author = Author::generate();
        store.add(&author.sign_at(3_000, "late")).unwrap();
        store.add(&author.sign_at(1_000, "early")).unwrap();
        store.make("early").unwrap();

        let entries = store.query().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, 1_000);
        assert_eq!(entries[0].text.as_deref(), Some("early"));
        assert_eq!(entries[1].timestamp, 3_000);
        assert_eq!(entries[1].text, None);
        assert_eq!(entries[0].author, author.pubkey());
    }

    #[test]
    fn test_persists_across_restart() {
        let dir = tempdir().unwrap();
        let author = Author::generate();
        let env = author.sign("persisted");
        let blob_hash;
        {
            let store = LocalStore::start(dir.path(), "apds").unwrap();
            store.add(&env).unwrap();
            blob_hash = store.make("persisted").unwrap();
        }

        let store = LocalStore::start(dir.path(), "apds").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&blob_hash).unwrap().as_deref(), Some("persisted"));
        assert_eq!(store.get_latest(&author.pubkey()).unwrap().unwrap().sig, env);
        assert!(dir.path().join("apds").join("hashlog.json").exists());
    }

    #[test]
    fn test_repair_prunes_invalid_entries() {
        let dir = tempdir().unwrap();
        let author = Author::generate();
        let good = author.sign("good");
        let plain_hash;
        {
            let store = LocalStore::start(dir.path(), "apds").unwrap();
            store.add(&good).unwrap();
            plain_hash = store.make("not an envelope").unwrap();
        }

        let log_path = dir.path().join("apds").join("hashlog.json");
        let mut hashes: Vec<String> = serde_json::from_str(&fs::read_to_string(&log_path).unwrap()).unwrap();
        hashes.push(plain_hash);
        hashes.push("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string());
        fs::write(&log_path, serde_json::to_string(&hashes).unwrap()).unwrap();

        let store = LocalStore::start(dir.path(), "apds").unwrap();
        assert_eq!(store.len(), 1);
        let repaired: Vec<String> = serde_json::from_str(&fs::read_to_string(&log_path).unwrap()).unwrap();
        assert_eq!(repaired, vec![content_hash(&good)]);
    }

    #[test]
    fn test_corrupt_hashlog_is_left_alone() {
        let dir = tempdir().unwrap();
        let ns = dir.path().join("apds");
        fs::create_dir_all(&ns).unwrap();
        let log_path = ns.join("hashlog.json");
        fs::write(&log_path, "[\"truncated").unwrap();

        let store = LocalStore::start(dir.path(), "apds").unwrap();
        assert!(store.is_empty());
        let author = Author::generate();
        let env = author.sign("after corruption");
        assert!(store.add(&env).unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.has(&content_hash(&env)));
        assert_eq!(fs::read_to_string(&log_path).unwrap(), "[\"truncated");
    }

    #[test]
    fn test_namespaces_are_separate() {
        let dir = tempdir().unwrap();
        let a = LocalStore::start(dir.path(), "one").unwrap();
        let b = LocalStore::start(dir.path(), "two").unwrap();
        let h = a.make("only in one").unwrap();
        assert!(a.has(&h));
        assert!(!b.has(&h));
    }
}
