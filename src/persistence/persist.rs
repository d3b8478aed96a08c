use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

use crate::story::graph::{GameId, StoryGame, UserId};
use super::store::{GameRating, PlayRecord};

/// Everything the story store keeps on disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub games: HashMap<GameId, StoryGame>,
    // user id -> display name
    pub authors: HashMap<UserId, String>,
    #[serde(default)]
    pub records: Vec<PlayRecord>,
    #[serde(default)]
    pub ratings: Vec<GameRating>,
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("ron.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

pub fn save_to_path(state: &StoreState, path: &Path) -> anyhow::Result<()> {
    ensure_parent_dir(path)?;
    let pretty = PrettyConfig::new()
        .separate_tuple_members(true)
        .enumerate_arrays(true);
    let s = ron::ser::to_string_pretty(state, pretty)?;
    atomic_write(path, s.as_bytes())?;
    log::debug!("store written to {}", path.display());
    Ok(())
}

pub fn load_from_path(path: &Path) -> anyhow::Result<StoreState> {
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let state: StoreState = ron::from_str(&buf)?;
    Ok(state)
}

/// Load the state file, or start empty when it does not exist yet.
pub fn load_or_default(path: &Path) -> anyhow::Result<StoreState> {
    if !path.exists() {
        log::info!("no store at {}, starting empty", path.display());
        return Ok(StoreState::default());
    }
    load_from_path(path)
}
