//! End-to-end scenarios across puzzle generation, validation and sync.

use std::collections::BTreeSet;
use std::sync::Arc;

use buzzword::puzzle::{
    compute_score, compute_stats, is_pangram, progress_label, valid_words, validate_word, GameDraft, GameProgress,
    WordCheck,
};
use buzzword::store::{CachedGame, MemoryCache};
use buzzword::sync::SyncOptions;
use buzzword::{
    Corpus, FoundWord, GameStore, InMemoryStore, JsonFileCache, LocalCache, PuzzleKey, PuzzleService, PuzzleStats,
    SubmitError, SyncEngine, SyncState, UserId, ValidationError,
};

fn bundled_corpus() -> Corpus {
    Corpus::load(concat!(env!("CARGO_MANIFEST_DIR"), "/data/words.txt")).unwrap()
}

#[test]
fn seeded_key_is_stable_and_has_a_pangram() {
    let corpus = bundled_corpus();

    let first = PuzzleKey::generate_seeded(&corpus, Some("20240101")).unwrap();
    let second = PuzzleKey::generate_seeded(&corpus, Some("20240101")).unwrap();
    assert_eq!(first, second);

    let others = first.others();
    assert!(!others.contains(&first.center()));
    assert!(others.windows(2).all(|pair| pair[0] < pair[1]));

    let words = valid_words(&first, &corpus);
    let pangram = words
        .iter()
        .find(|w| is_pangram(w))
        .expect("generated key must admit its pangram");
    assert!(is_pangram(pangram));
    assert!(pangram.chars().all(|c| first.contains(c)));
}

#[test]
fn small_corpus_validation() {
    let corpus = Corpus::from_words(["face", "beef", "cafe"]).unwrap();
    let key: PuzzleKey = "abcdefg".parse().unwrap();
    let none = BTreeSet::new();
    let check = |word| WordCheck {
        word,
        key: &key,
        already_found: &none,
    };

    assert_eq!(validate_word(check("face"), &corpus), Ok(()));
    assert_eq!(compute_score("face"), 1);
    assert_eq!(validate_word(check("dog"), &corpus), Err(ValidationError::TooShort));
    assert_eq!(validate_word(check("dogs"), &corpus), Err(ValidationError::InvalidLetter));
    assert_eq!(validate_word(check("beef"), &corpus), Err(ValidationError::MissingCenter));
    assert_eq!(validate_word(check("fade"), &corpus), Err(ValidationError::NotInWordList));

    let stats = compute_stats(&key, &corpus);
    assert_eq!(stats, PuzzleStats { max_words: 2, max_score: 2 });
}

#[test]
fn labels_at_the_ends() {
    assert_eq!(progress_label(0, 100), "beginner");
    assert_eq!(progress_label(100, 100), "genius");
}

#[tokio::test]
async fn resubmitting_a_word_changes_nothing() {
    let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
    let engine = SyncEngine::new(Arc::new(bundled_corpus()), cache, None, SyncOptions::default());
    let service = PuzzleService::new(engine);
    let user = UserId::new();

    let game = service.create_game(user, None).await.unwrap();
    let word = valid_words(&game.key, service.engine().corpus())[0].to_string();

    service.submit_word(user, game.id, &word).await.unwrap();
    let before = service.get_game_stats(user, game.id).await.unwrap();

    let again = service.submit_word(user, game.id, &word).await;
    assert!(matches!(again, Err(SubmitError::Rejected(ValidationError::AlreadyFound))));
    assert_eq!(service.get_game_stats(user, game.id).await.unwrap(), before);
}

#[tokio::test]
async fn bootstrap_merge_keeps_local_words() {
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();
    let key: PuzzleKey = "catdogs".parse().unwrap();

    // Remote knows the game with one word.
    let store = Arc::new(InMemoryStore::new());
    let game = store
        .add_game(GameDraft::new(key, user, PuzzleStats::default()))
        .await
        .unwrap();
    let cat = FoundWord::new(game.id, "cat", user);
    store
        .add_word(&cat, &GameProgress::from_words(["cat"]))
        .await
        .unwrap();

    // This device also found "dog" while offline.
    let cache = Arc::new(JsonFileCache::new(dir.path().join("cache.json")));
    let dog = FoundWord::new(game.id, "dog", user);
    cache
        .write(
            &user,
            &CachedGame {
                game: game.clone(),
                words: vec![cat, dog],
            },
        )
        .await
        .unwrap();

    let engine = SyncEngine::new(
        Arc::new(Corpus::from_words(["cats", "dogs"]).unwrap()),
        cache.clone(),
        Some(store.clone()),
        SyncOptions::default(),
    );
    let merged = engine.open(user).await.unwrap().unwrap();

    let words: Vec<&str> = merged.found_words.keys().map(String::as_str).collect();
    assert_eq!(words, vec!["cat", "dog"]);
    assert_eq!(merged.progress().words_found, 2);
    assert_eq!(engine.state(game.id).await, Some(SyncState::Synced));

    let remote_words: BTreeSet<String> = store
        .load_words(&game.id)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.word)
        .collect();
    assert_eq!(remote_words, BTreeSet::from(["cat".to_string(), "dog".to_string()]));
    assert_eq!(cache.read(&user).await.unwrap().unwrap().words.len(), 2);
}
