//! Buzzword Server
//!
//! Demo: generates a puzzle, plays a few words through the sync engine
//! against an in-memory remote and the JSON cache, then reports progress.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use buzzword::{
    core::rng::derive_seed,
    puzzle::{compute_stats, valid_words},
    store::{GameStore, LocalCache},
    Config, Corpus, InMemoryStore, JsonFileCache, PuzzleKey, PuzzleService, SyncEngine, SyncEvent, UserId, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Buzzword Server v{}", VERSION);

    let config = Config::from_env();
    let corpus = Arc::new(
        Corpus::load(&config.word_list).with_context(|| format!("loading {}", config.word_list.display()))?,
    );
    info!(words = corpus.len(), blocks = corpus.blocks().len(), "corpus loaded");

    demo(config, corpus).await
}

/// Play one puzzle end to end.
async fn demo(config: Config, corpus: Arc<Corpus>) -> anyhow::Result<()> {
    info!("=== Generating Puzzle ===");

    let seed = config
        .daily
        .then(|| buzzword::daily_seed(chrono::Utc::now().date_naive()));
    if let Some(seed) = &seed {
        info!("Seed: {} ({})", seed, hex::encode(derive_seed(seed).to_le_bytes()));
    }
    let key = PuzzleKey::generate_seeded(&corpus, seed.as_deref())?;
    let stats = compute_stats(&key, &corpus);
    info!("Key: {} (center '{}')", key, key.center());
    info!("Max words: {}, max score: {}", stats.max_words, stats.max_score);

    if let Some(seed) = &seed {
        let again = PuzzleKey::generate_seeded(&corpus, Some(seed))?;
        if again == key {
            info!("DETERMINISM VERIFIED: same key for seed {}", seed);
        } else {
            warn!("DETERMINISM FAILURE: {} vs {}", key, again);
        }
    }

    info!("=== Playing ===");

    let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
    let cache: Arc<dyn LocalCache> = Arc::new(JsonFileCache::new(&config.cache_path));
    let engine = SyncEngine::new(corpus.clone(), cache, Some(store.clone()), config.sync_options());
    let mut events = engine.subscribe_events();
    let service = PuzzleService::new(engine.clone());

    let user = UserId::new();
    info!("Player: {}", hex::encode(&user.0.as_bytes()[..4]));
    let game = service.create_game(user, Some(key)).await?;

    let mut answers: Vec<&str> = valid_words(&key, &corpus);
    answers.truncate(5);
    for word in answers.iter().chain(["zzzz", "a"].iter()) {
        match service.submit_word(user, game.id, word).await {
            Ok(found) => info!("+ {}", found.word),
            Err(e) => info!("- {} ({})", word, e),
        }
    }
    if let Some(first) = answers.first() {
        if let Err(e) = service.submit_word(user, game.id, first).await {
            info!("- {} again ({})", first, e);
        }
    }

    // Let background flushes land.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::StateChanged { from, to, .. } = event {
            info!("sync: {:?} -> {:?}", from, to);
        }
    }

    info!("=== Results ===");
    let result = service.get_game_stats(user, game.id).await?;
    info!(
        "Found {}/{} words, score {}/{}, rank: {}",
        result.words_found,
        result.max_words,
        result.score,
        result.max_score,
        result.rank().label()
    );
    info!("Remote holds {} words", store.load_words(&game.id).await?.len());
    info!("Sync state: {:?}", engine.state(game.id).await);
    info!("Cache: {}", config.cache_path.display());

    Ok(())
}
