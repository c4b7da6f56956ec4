//! Name-based pairing of assets across two trees
//!
//! Identity is the lowercased base filename and nothing else: no content,
//! size or date comparison takes part.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

use crate::index::Asset;

/// A primary asset and the reference asset sharing its identity key.
#[derive(Debug, Clone)]
pub struct Match {
    pub primary: Asset,
    pub reference: Asset,
}

/// Several reference assets collided on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub key: String,
    /// The path the lookup kept.
    pub chosen: PathBuf,
    /// Every colliding path, sorted.
    pub candidates: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    /// In primary (indexer) order.
    pub matches: Vec<Match>,
    /// Primary assets with no reference counterpart, in primary order.
    pub unmatched: Vec<Asset>,
    pub ambiguous: Vec<Ambiguity>,
}

/// Pair every primary asset with the reference asset of the same key.
///
/// When the reference set holds several assets with one key, the
/// lexicographically-first path wins regardless of traversal order, and the
/// collision is reported in [`MatchSet::ambiguous`].
pub fn match_assets(primary: &[Asset], reference: &[Asset]) -> MatchSet {
    let mut lookup: HashMap<&str, &Asset> = HashMap::with_capacity(reference.len());
    let mut collisions: HashMap<&str, Vec<PathBuf>> = HashMap::new();

    for asset in reference {
        match lookup.get(asset.key.as_str()).copied() {
            Some(existing) => {
                collisions
                    .entry(asset.key.as_str())
                    .or_insert_with(|| vec![existing.path.clone()])
                    .push(asset.path.clone());
                if asset.path < existing.path {
                    lookup.insert(asset.key.as_str(), asset);
                }
            }
            None => {
                lookup.insert(asset.key.as_str(), asset);
            }
        }
    }

    let mut ambiguous: Vec<Ambiguity> = collisions
        .into_iter()
        .map(|(key, mut candidates)| {
            candidates.sort();
            let chosen = lookup[key].path.clone();
            warn!(
                "{} reference files share the name {}; using {}",
                candidates.len(),
                key,
                chosen.display()
            );
            Ambiguity {
                key: key.to_string(),
                chosen,
                candidates,
            }
        })
        .collect();
    ambiguous.sort_by(|a, b| a.key.cmp(&b.key));

    let mut set = MatchSet {
        ambiguous,
        ..Default::default()
    };
    for asset in primary {
        match lookup.get(asset.key.as_str()) {
            Some(reference) => set.matches.push(Match {
                primary: asset.clone(),
                reference: (*reference).clone(),
            }),
            None => set.unmatched.push(asset.clone()),
        }
    }
    set
}
