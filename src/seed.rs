//! Startup seeding of spaces from a JSON file.
//!
//! The file holds an array of space records:
//!
//! ```json
//! [{ "name": "Study Room A", "category": "study", "subCategory": "east wing",
//!    "location": "B101", "capacity": 4 }]
//! ```
//!
//! A record whose name is already registered is skipped, so seeding the same
//! file on every start is harmless.

use std::collections::HashSet;
use std::path::Path;

use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::NewSpace;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("seeding space {name:?}: {source}")]
    Engine { name: String, source: EngineError },
}

pub fn parse_spaces(json: &str) -> Result<Vec<NewSpace>, SeedError> {
    Ok(serde_json::from_str(json)?)
}

/// Register every space in `drafts` whose name is not taken. Returns how many
/// were created.
pub async fn seed_spaces(engine: &Engine, drafts: Vec<NewSpace>) -> Result<usize, SeedError> {
    let mut taken: HashSet<String> = engine.list_spaces().into_iter().map(|s| s.name).collect();
    let mut created = 0;
    for draft in drafts {
        if !taken.insert(draft.name.clone()) {
            tracing::debug!(name = %draft.name, "seed skip, name exists");
            continue;
        }
        let name = draft.name.clone();
        engine
            .create_space(Ulid::new(), draft)
            .await
            .map_err(|source| SeedError::Engine { name, source })?;
        created += 1;
    }
    Ok(created)
}

pub async fn seed_from_file(engine: &Engine, path: &Path) -> Result<usize, SeedError> {
    let json = tokio::fs::read_to_string(path).await?;
    let created = seed_spaces(engine, parse_spaces(&json)?).await?;
    tracing::info!(path = %path.display(), created, "seeded spaces");
    Ok(created)
}
