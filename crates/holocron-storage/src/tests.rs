//! End-to-end tests for the catalog store

use super::*;
use holocron_model::{
    CharacterAttributes, FilmAttributes, ReferenceState, ReferenceToken, StarshipAttributes,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;

fn character(key: &str, name: &str) -> EntityWrite {
    EntityWrite {
        natural_key: NaturalKey::new(key),
        attributes: Attributes::Character(CharacterAttributes {
            name: name.to_string(),
            url: format!("https://swapi.info/api/people/{key}"),
            ..Default::default()
        }),
        references: Vec::new(),
    }
}

fn starship(key: &str, name: &str) -> EntityWrite {
    EntityWrite {
        natural_key: NaturalKey::new(key),
        attributes: Attributes::Starship(StarshipAttributes {
            name: name.to_string(),
            url: format!("https://swapi.info/api/starships/{key}"),
            ..Default::default()
        }),
        references: Vec::new(),
    }
}

fn film_referencing(key: &str, title: &str, starships: &[&str]) -> EntityWrite {
    EntityWrite {
        natural_key: NaturalKey::new(key),
        attributes: Attributes::Film(FilmAttributes {
            title: title.to_string(),
            episode_id: Some(4),
            url: format!("https://swapi.info/api/films/{key}"),
            ..Default::default()
        }),
        references: starships
            .iter()
            .map(|s| Reference::pending(ReferenceToken::new(EntityKind::Starship, *s), 1))
            .collect(),
    }
}

#[tokio::test]
async fn test_upsert_inserts_then_updates_then_skips() {
    let store = MemoryStore::new();

    let first = store.upsert(character("1", "Luke Skywalker")).await.unwrap();
    assert_eq!(first.status, UpsertStatus::Inserted);

    let again = store.upsert(character("1", "Luke Skywalker")).await.unwrap();
    assert_eq!(again.status, UpsertStatus::Unchanged);
    assert_eq!(again.id, first.id);

    let renamed = store.upsert(character("1", "Luke")).await.unwrap();
    assert_eq!(renamed.status, UpsertStatus::Updated);
    assert_eq!(renamed.id, first.id);

    assert_eq!(store.count(Some(EntityKind::Character)).await, 1);
    let row = store.get(EntityKind::Character, first.id).await.unwrap();
    assert_eq!(row.display_name(), "Luke");
}

#[tokio::test]
async fn test_ids_are_shared_across_kinds() {
    let store = MemoryStore::new();
    let a = store.upsert(character("1", "Luke")).await.unwrap();
    let b = store.upsert(starship("1", "X-wing")).await.unwrap();
    assert_ne!(a.id, b.id, "same natural key in two kinds must be two rows");
    assert!(b.id > a.id);
}

#[tokio::test]
async fn test_update_preserves_votes() {
    let store = MemoryStore::new();
    let id = store.upsert(character("1", "Luke")).await.unwrap().id;
    store.increment_votes(EntityKind::Character, id).await.unwrap();
    store.increment_votes(EntityKind::Character, id).await.unwrap();

    store.upsert(character("1", "Luke Skywalker")).await.unwrap();
    let row = store.get(EntityKind::Character, id).await.unwrap();
    assert_eq!(row.vote_count, 2);
}

#[tokio::test]
async fn test_empty_natural_key_is_a_persistence_error() {
    let store = MemoryStore::new();
    let err = store.upsert(character("  ", "Nobody")).await.unwrap_err();
    assert!(matches!(err, StoreError::Persistence(_)));
    assert_eq!(store.count(None).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_upserts_of_one_key_leave_one_row() {
    let store = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for i in 0..64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .upsert(character("7", &format!("Wedge {}", i % 4)))
                .await
                .unwrap()
        }));
    }
    let mut ids = BTreeSet::new();
    let mut inserted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        ids.insert(outcome.id);
        if outcome.status == UpsertStatus::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(ids.len(), 1);
    assert_eq!(store.count(Some(EntityKind::Character)).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_thousand_concurrent_votes_are_all_counted() {
    let store = Arc::new(MemoryStore::new());
    let id = store.upsert(character("1", "Luke")).await.unwrap().id;
    store.increment_votes(EntityKind::Character, id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.increment_votes(EntityKind::Character, id).await.unwrap()
        }));
    }
    let mut returned = BTreeSet::new();
    for handle in handles {
        returned.insert(handle.await.unwrap());
    }

    // Every increment observed a distinct new value.
    assert_eq!(returned.len(), 1000);
    assert_eq!(returned.iter().next().copied(), Some(2));
    assert_eq!(returned.iter().last().copied(), Some(1001));
    let row = store.get(EntityKind::Character, id).await.unwrap();
    assert_eq!(row.vote_count, 1001);
}

#[tokio::test]
async fn test_vote_on_missing_entity_is_not_found() {
    let store = MemoryStore::new();
    let ship = store.upsert(starship("10", "Millennium Falcon")).await.unwrap().id;

    let err = store
        .increment_votes(EntityKind::Character, EntityId::new(999))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Character, .. }));

    // Right id, wrong kind.
    let err = store
        .increment_votes(EntityKind::Character, ship)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert_eq!(store.count(None).await, 1);
}

#[tokio::test]
async fn test_top_breaks_ties_by_ascending_id() {
    let store = MemoryStore::new();
    let mut ids = Vec::new();
    for (key, name) in [("1", "A"), ("2", "B"), ("3", "C"), ("4", "D")] {
        ids.push(store.upsert(character(key, name)).await.unwrap().id);
    }
    for (id, votes) in ids.iter().zip([5, 5, 3, 1]) {
        for _ in 0..votes {
            store.increment_votes(EntityKind::Character, *id).await.unwrap();
        }
    }

    let top = store.top(Some(EntityKind::Character), 3).await.unwrap();
    let names: Vec<_> = top.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["A", "B", "C"]);
    assert_eq!(top[0].vote_count, 5);

    assert!(store.top(Some(EntityKind::Character), 0).await.unwrap().is_empty());
    assert!(store.top(None, -3).await.unwrap().is_empty());
    assert_eq!(store.top(None, 100).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_top_across_kinds() {
    let store = MemoryStore::new();
    let luke = store.upsert(character("1", "Luke")).await.unwrap().id;
    let falcon = store.upsert(starship("10", "Millennium Falcon")).await.unwrap().id;
    store.increment_votes(EntityKind::Starship, falcon).await.unwrap();

    let top = store.top(None, 10).await.unwrap();
    assert_eq!(top[0].id, falcon);
    assert_eq!(top[0].kind, EntityKind::Starship);
    assert_eq!(top[1].id, luke);
    assert_eq!(top[1].vote_count, 0);
}

#[tokio::test]
async fn test_search_is_case_insensitive_and_name_ordered() {
    let store = MemoryStore::new();
    store.upsert(character("2", "Darth Vader")).await.unwrap();
    store.upsert(character("1", "Anakin Skywalker")).await.unwrap();
    store.upsert(character("3", "Luke Skywalker")).await.unwrap();

    let hits = store.search(EntityKind::Character, "SKY").await.unwrap();
    let names: Vec<_> = hits.iter().map(|e| e.display_name()).collect();
    assert_eq!(names, ["Anakin Skywalker", "Luke Skywalker"]);

    assert!(store.search(EntityKind::Character, "  ").await.unwrap().is_empty());
    assert!(store.search(EntityKind::Starship, "sky").await.unwrap().is_empty());
    assert_eq!(store.list(EntityKind::Character).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_pending_reference_backfilled_when_target_arrives() {
    let store = MemoryStore::new();
    let film = store
        .upsert(film_referencing("1", "A New Hope", &["10"]))
        .await
        .unwrap();
    let before = store.get(EntityKind::Film, film.id).await.unwrap();
    assert!(matches!(before.references[0].state, ReferenceState::Pending { passes: 1 }));

    let ship = store.upsert(starship("10", "Millennium Falcon")).await.unwrap();
    assert_eq!(ship.backfilled, 1);

    let after = store.get(EntityKind::Film, film.id).await.unwrap();
    assert_eq!(after.resolved_ids(EntityKind::Starship), vec![ship.id]);
    assert_eq!(after.attributes, before.attributes);
}

#[tokio::test]
async fn test_target_first_resolves_on_write() {
    let store = MemoryStore::new();
    let ship = store.upsert(starship("10", "Millennium Falcon")).await.unwrap();
    // A stale pending marker for a target that already exists.
    let film = store
        .upsert(film_referencing("1", "A New Hope", &["10"]))
        .await
        .unwrap();
    let row = store.get(EntityKind::Film, film.id).await.unwrap();
    assert_eq!(row.resolved_ids(EntityKind::Starship), vec![ship.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_referrers_and_targets_converge() {
    for _ in 0..20 {
        let store = Arc::new(MemoryStore::new());
        let films = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..30 {
                    let key = i.to_string();
                    let ship = (i % 10).to_string();
                    store
                        .upsert(film_referencing(&key, &format!("Film {i}"), &[ship.as_str()]))
                        .await
                        .unwrap();
                }
            })
        };
        let ships = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .upsert(starship(&i.to_string(), &format!("Ship {i}")))
                        .await
                        .unwrap();
                }
            })
        };
        films.await.unwrap();
        ships.await.unwrap();

        for film in store.list(EntityKind::Film).await.unwrap() {
            assert!(
                film.references.iter().all(Reference::is_resolved),
                "film {} left unresolved",
                film.natural_key
            );
        }
    }
}

#[tokio::test]
async fn test_wal_replay_restores_rows_votes_and_references() {
    let dir = tempdir().unwrap();
    let (film_id, ship_id) = {
        let store = MemoryStore::open(dir.path(), true).unwrap();
        let film = store
            .upsert(film_referencing("1", "A New Hope", &["10"]))
            .await
            .unwrap();
        let ship = store.upsert(starship("10", "Millennium Falcon")).await.unwrap();
        store.increment_votes(EntityKind::Film, film.id).await.unwrap();
        store.increment_votes(EntityKind::Film, film.id).await.unwrap();
        (film.id, ship.id)
    };

    let reopened = MemoryStore::open(dir.path(), true).unwrap();
    let film = reopened.get(EntityKind::Film, film_id).await.unwrap();
    assert_eq!(film.vote_count, 2);
    assert_eq!(film.resolved_ids(EntityKind::Starship), vec![ship_id]);

    // New ids continue after the replayed ones.
    let next = reopened.upsert(character("1", "Luke")).await.unwrap();
    assert!(next.id > ship_id);
}

#[tokio::test]
async fn test_checkpoint_then_more_writes_survive_reopen() {
    let dir = tempdir().unwrap();
    let luke = {
        let store = MemoryStore::open(dir.path(), false).unwrap();
        let luke = store.upsert(character("1", "Luke")).await.unwrap().id;
        store.increment_votes(EntityKind::Character, luke).await.unwrap();
        store.checkpoint().await.unwrap();

        let wal_len = std::fs::metadata(dir.path().join(persistence::WAL_FILE))
            .unwrap()
            .len();
        assert_eq!(wal_len, 0, "checkpoint truncates the log");

        store.upsert(character("2", "Leia")).await.unwrap();
        store.increment_votes(EntityKind::Character, luke).await.unwrap();
        luke
    };

    let reopened = MemoryStore::open(dir.path(), false).unwrap();
    assert_eq!(reopened.count(Some(EntityKind::Character)).await, 2);
    let row = reopened.get(EntityKind::Character, luke).await.unwrap();
    assert_eq!(row.vote_count, 2);
}

#[tokio::test]
async fn test_writes_after_a_torn_tail_survive_the_next_reopen() {
    use std::io::Write;

    let dir = tempdir().unwrap();
    {
        let store = MemoryStore::open(dir.path(), true).unwrap();
        store.upsert(character("1", "Luke")).await.unwrap();
    }
    // Crash mid-append: a length prefix with only part of its record.
    let mut wal = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join(persistence::WAL_FILE))
        .unwrap();
    wal.write_all(&64u32.to_le_bytes()).unwrap();
    wal.write_all(&[1, 2, 3]).unwrap();
    drop(wal);

    let leia = {
        let store = MemoryStore::open(dir.path(), true).unwrap();
        assert_eq!(store.count(None).await, 1);
        let leia = store.upsert(character("2", "Leia")).await.unwrap().id;
        store.increment_votes(EntityKind::Character, leia).await.unwrap();
        leia
    };

    let reopened = MemoryStore::open(dir.path(), true).unwrap();
    assert_eq!(reopened.count(Some(EntityKind::Character)).await, 2);
    assert_eq!(reopened.get(EntityKind::Character, leia).await.unwrap().vote_count, 1);
}

#[tokio::test]
async fn test_checkpoint_is_a_noop_in_memory() {
    let store = MemoryStore::new();
    store.upsert(character("1", "Luke")).await.unwrap();
    store.checkpoint().await.unwrap();
    assert!(!store.is_durable());
}

proptest! {
    #[test]
    fn prop_top_is_sorted_and_sized(votes in proptest::collection::vec(0u8..6, 0..20), n in -2i64..30) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = MemoryStore::new();
            for (i, count) in votes.iter().enumerate() {
                let id = store.upsert(character(&(i + 1).to_string(), "X")).await.unwrap().id;
                for _ in 0..*count {
                    store.increment_votes(EntityKind::Character, id).await.unwrap();
                }
            }

            let top = store.top(Some(EntityKind::Character), n).await.unwrap();
            let expected_len = if n <= 0 { 0 } else { (n as usize).min(votes.len()) };
            prop_assert_eq!(top.len(), expected_len);
            for pair in top.windows(2) {
                let ordered = pair[0].vote_count > pair[1].vote_count
                    || (pair[0].vote_count == pair[1].vote_count && pair[0].id < pair[1].id);
                prop_assert!(ordered);
            }
            Ok(())
        })?;
    }
}
