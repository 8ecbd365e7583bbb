//! Picks the catalog entry closest to the run's target specification.

use std::cmp::Ordering;
use tracing::debug;

use zazu_types::{RunConfig, ZazuError, ZazuResult};

use crate::catalog::{ModelEntry, ModelsSpec};
use crate::opt_model::OptModel;

/// Select the most suitable model for `opt_model`'s task.
///
/// Deterministic: identical configurations and catalogs always yield the same
/// name. Fails with [`ZazuError::NoMatch`] when no entry is compatible.
pub fn find_model(opt_model: &OptModel, models: &ModelsSpec) -> ZazuResult<String> {
    let target = opt_model.configs();

    if let Some(pinned) = &target.preferred_model {
        return match models.get(pinned) {
            Some(entry) if is_compatible(entry, target) => Ok(pinned.clone()),
            Some(_) => Err(no_match(
                target,
                format!("preferred model '{pinned}' does not satisfy the task constraints"),
            )),
            None => Err(no_match(
                target,
                format!("preferred model '{pinned}' is not in the catalog"),
            )),
        };
    }

    let mut best: Option<(&String, Rank)> = None;
    for (name, entry) in models.iter() {
        if !is_compatible(entry, target) {
            debug!(model = %name, "skipping incompatible model");
            continue;
        }
        let rank = Rank::of(entry, target);
        debug!(model = %name, tags = rank.tag_matches, score = rank.score, "ranked model");
        // Strictly-better only: catalog order is by name, so ties keep the
        // lexicographically smallest name.
        let better = best
            .as_ref()
            .map_or(true, |(_, current)| rank.cmp(current) == Ordering::Greater);
        if better {
            best = Some((name, rank));
        }
    }

    best.map(|(name, _)| name.clone()).ok_or_else(|| {
        no_match(
            target,
            format!("none of the {} catalog models are compatible", models.len()),
        )
    })
}

fn is_compatible(entry: &ModelEntry, target: &RunConfig) -> bool {
    let memory_ok = target
        .max_memory_rating
        .map_or(true, |limit| entry.ratings.memory <= limit);
    entry.supports_task(&target.task) && memory_ok
}

fn no_match(target: &RunConfig, reason: String) -> ZazuError {
    ZazuError::NoMatch {
        task: target.task.clone(),
        reason,
    }
}

#[derive(Debug, Clone, Copy)]
struct Rank {
    tag_matches: usize,
    score: f64,
}

impl Rank {
    fn of(entry: &ModelEntry, target: &RunConfig) -> Self {
        let tag_matches = target
            .preferred_tags
            .iter()
            .filter(|tag| entry.tags.iter().any(|own| own.eq_ignore_ascii_case(tag)))
            .count();
        let p = &target.priority;
        let r = &entry.ratings;
        Self {
            tag_matches,
            // Memory is a footprint: weighting it penalizes heavier models.
            score: p.accuracy * r.accuracy + p.speed * r.speed - p.memory * r.memory,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        self.tag_matches
            .cmp(&other.tag_matches)
            .then_with(|| self.score.total_cmp(&other.score))
    }
}
