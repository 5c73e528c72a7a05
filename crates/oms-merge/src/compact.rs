//! DAG compaction of linear history.
//!
//! Background maintenance: maximal runs of commits with a single parent
//! and a single child — no branch points, no merges, no external
//! references — collapse into one compacted segment. Preserved nodes keep
//! their external identities; collapsed interiors remain listed in the
//! segment for audit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One commit in the history DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub parents: Vec<String>,
    /// Referenced externally (tag, branch head, changeset base): never
    /// compacted away.
    pub referenced: bool,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// A collapsed run. `head` is the newest preserved boundary, `tail` the
/// oldest; `collapsed_ids` lists the interior commits, newest first, for
/// the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactedSegment {
    pub head: String,
    pub tail: String,
    pub collapsed_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompactionResult {
    pub segments: Vec<CompactedSegment>,
    /// Commits surviving compaction, with parent edges rewired across the
    /// collapsed interiors.
    pub commits: Vec<Commit>,
}

/// Compact linear chains in `commits`.
///
/// A commit is collapsible iff it has exactly one parent, exactly one
/// child, is not a merge, and is not referenced. Chain boundaries (branch
/// points, merges, referenced commits, roots, heads) always survive with
/// their identities unchanged.
pub fn compact(commits: &[Commit]) -> CompactionResult {
    let by_id: HashMap<&str, &Commit> = commits.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut child_count: HashMap<&str, usize> = HashMap::new();
    for c in commits {
        for p in &c.parents {
            *child_count.entry(p.as_str()).or_insert(0) += 1;
        }
    }

    let collapsible = |id: &str| -> bool {
        let Some(c) = by_id.get(id) else { return false };
        c.parents.len() == 1 && !c.referenced && child_count.get(id).copied().unwrap_or(0) == 1
    };

    let mut collapsed: HashMap<&str, usize> = HashMap::new(); // id -> segment ix
    let mut segments: Vec<CompactedSegment> = Vec::new();

    // Walk from every non-collapsible commit down its single-parent chain,
    // gathering maximal collapsible runs.
    for c in commits {
        if collapsible(&c.id) {
            continue;
        }
        for parent in &c.parents {
            let mut run: Vec<&str> = Vec::new();
            let mut cur = parent.as_str();
            while collapsible(cur) && !collapsed.contains_key(cur) {
                run.push(cur);
                cur = match by_id.get(cur).and_then(|cc| cc.parents.first()) {
                    Some(p) => p.as_str(),
                    None => break,
                };
            }
            if run.is_empty() {
                continue;
            }
            let seg_ix = segments.len();
            segments.push(CompactedSegment {
                head: c.id.clone(),
                tail: cur.to_string(),
                collapsed_ids: run.iter().map(|s| s.to_string()).collect(),
            });
            for id in run {
                collapsed.insert(id, seg_ix);
            }
        }
    }

    // Rebuild surviving commits with parents rewired past the interiors.
    let mut out = Vec::new();
    for c in commits {
        if collapsed.contains_key(c.id.as_str()) {
            continue;
        }
        let mut rewired = c.clone();
        for p in rewired.parents.iter_mut() {
            let mut cur = p.clone();
            while collapsed.contains_key(cur.as_str()) {
                cur = match by_id.get(cur.as_str()).and_then(|cc| cc.parents.first()) {
                    Some(next) => next.clone(),
                    None => break,
                };
            }
            *p = cur;
        }
        out.push(rewired);
    }

    CompactionResult {
        segments,
        commits: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str, parents: &[&str]) -> Commit {
        Commit {
            id: id.to_string(),
            parents: parents.iter().map(|s| s.to_string()).collect(),
            referenced: false,
        }
    }

    #[test]
    fn linear_chain_collapses_between_boundaries() {
        // root <- a <- b <- c <- head  (root and head survive; a,b,c collapse)
        let commits = vec![
            commit("root", &[]),
            commit("a", &["root"]),
            commit("b", &["a"]),
            commit("c", &["b"]),
            commit("head", &["c"]),
        ];
        // head has no child => non-collapsible; root has no parent.
        let r = compact(&commits);
        assert_eq!(r.segments.len(), 1);
        let seg = &r.segments[0];
        assert_eq!(seg.head, "head");
        assert_eq!(seg.tail, "root");
        assert_eq!(seg.collapsed_ids, vec!["c", "b", "a"]);

        let ids: Vec<&str> = r.commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "head"]);
        // head now parents directly onto root.
        assert_eq!(r.commits[1].parents, vec!["root"]);
    }

    #[test]
    fn merges_and_branch_points_are_preserved() {
        //        ┌─ x ─┐
        // root ──┤     ├── m ── head
        //        └─ y ─┘
        let commits = vec![
            commit("root", &[]),
            commit("x", &["root"]),
            commit("y", &["root"]),
            commit("m", &["x", "y"]),
            commit("head", &["m"]),
        ];
        let r = compact(&commits);
        // root is a branch point (two children); x and y have one child
        // and one parent but collapsing either would touch the merge's
        // parents — they are each a run of length 1 and do collapse, with
        // the merge rewired onto root.
        let ids: Vec<&str> = r.commits.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"root"));
        assert!(ids.contains(&"m"), "merge commits are never compacted");
        assert!(ids.contains(&"head"));
        for c in &r.commits {
            if c.id == "m" {
                assert_eq!(c.parents, vec!["root", "root"]);
            }
        }
    }

    #[test]
    fn referenced_commits_survive() {
        let mut commits = vec![
            commit("root", &[]),
            commit("a", &["root"]),
            commit("b", &["a"]),
            commit("head", &["b"]),
        ];
        commits[2].referenced = true; // b is a changeset base

        let r = compact(&commits);
        let ids: Vec<&str> = r.commits.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"b"), "referenced commits are preserved");
        // Only `a` collapses.
        assert_eq!(r.segments.len(), 1);
        assert_eq!(r.segments[0].collapsed_ids, vec!["a"]);
    }

    #[test]
    fn already_compact_history_is_untouched() {
        let commits = vec![commit("root", &[]), commit("head", &["root"])];
        let r = compact(&commits);
        assert!(r.segments.is_empty());
        assert_eq!(r.commits.len(), 2);
    }
}
