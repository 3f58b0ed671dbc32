//! Reaction handler: diff two reaction snapshots.

use std::collections::HashMap;

/// The result of diffing an old and new reaction snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

pub struct ReactionHandler;

impl ReactionHandler {
    /// `added = { e : new[e] > old.get(e, 0) }`,
    /// `removed = { e : new.get(e, 0) < old[e] }`, both sorted
    /// for determinism.
    pub fn diff(old: &HashMap<String, u32>, new: &HashMap<String, u32>) -> ReactionDiff {
        let mut added: Vec<String> = new
            .iter()
            .filter(|(emoji, &count)| count > old.get(*emoji).copied().unwrap_or(0))
            .map(|(emoji, _)| emoji.clone())
            .collect();
        let mut removed: Vec<String> = old
            .iter()
            .filter(|(emoji, &count)| new.get(*emoji).copied().unwrap_or(0) < count)
            .map(|(emoji, _)| emoji.clone())
            .collect();
        added.sort();
        removed.sort();
        ReactionDiff { added, removed }
    }

    /// Apply a diff to a mutable reaction map, dropping zero-count entries
    /// so `m.reactions[e] ≥ 1` always holds.
    pub fn apply(reactions: &mut HashMap<String, u32>, new: &HashMap<String, u32>) {
        *reactions = new.iter().filter(|(_, &count)| count > 0).map(|(k, v)| (k.clone(), *v)).collect();
    }

    /// Apply a single reaction add/remove (for `added_reaction` /
    /// `removed_reaction` event types, which carry one emoji rather than a
    /// full snapshot).
    pub fn apply_single_add(reactions: &mut HashMap<String, u32>, emoji: &str) {
        *reactions.entry(emoji.to_string()).or_insert(0) += 1;
    }

    pub fn apply_single_remove(reactions: &mut HashMap<String, u32>, emoji: &str) {
        if let Some(count) = reactions.get_mut(emoji) {
            if *count <= 1 {
                reactions.remove(emoji);
            } else {
                *count -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn detects_added_and_removed() {
        let old = map(&[("thumbs_up", 1)]);
        let new = map(&[("thumbs_up", 2), ("heart", 1)]);
        let diff = ReactionHandler::diff(&old, &new);
        assert_eq!(diff.added, vec!["heart".to_string(), "thumbs_up".to_string()]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn full_removal_when_new_empty() {
        let old = map(&[("thumbs_up", 1)]);
        let new = HashMap::new();
        let diff = ReactionHandler::diff(&old, &new);
        assert_eq!(diff.removed, vec!["thumbs_up".to_string()]);
        assert!(diff.added.is_empty());
    }

    #[test]
    fn apply_never_leaves_zero_count_keys() {
        let mut reactions = map(&[("thumbs_up", 1)]);
        ReactionHandler::apply_single_remove(&mut reactions, "thumbs_up");
        assert!(!reactions.contains_key("thumbs_up"));
    }

    #[test]
    fn fold_is_commutative_per_emoji() {
        let mut a = HashMap::new();
        ReactionHandler::apply_single_add(&mut a, "x");
        ReactionHandler::apply_single_add(&mut a, "y");
        ReactionHandler::apply_single_remove(&mut a, "x");

        let mut b = HashMap::new();
        ReactionHandler::apply_single_add(&mut b, "y");
        ReactionHandler::apply_single_add(&mut b, "x");
        ReactionHandler::apply_single_remove(&mut b, "x");

        assert_eq!(a, b);
    }
}
