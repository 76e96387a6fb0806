//! Process ancestry via `/proc`.
//!
//! Used to attribute windows to a launch: the launcher's pid is often a
//! wrapper script or a short-lived parent, so the window-owning process
//! is its descendant rather than the pid itself.

/// Deepest process chain followed before giving up.
const MAX_DEPTH: usize = 1024;

/// Parent of `pid`, from the fourth field of `/proc/{pid}/stat`.
///
/// The command name in field two is parenthesised and may itself contain
/// spaces or `)`, so fields are counted from the last `)`.
pub fn parent_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let (_, fields) = stat.rsplit_once(')')?;
    fields.split_whitespace().nth(1)?.parse().ok()
}

/// `pid` followed by its ancestors, nearest first. Stops at the idle
/// process, on an unreadable entry, or on a self-parented entry.
pub fn ancestry(pid: u32) -> impl Iterator<Item = u32> {
    std::iter::successors(Some(pid), |&current| {
        parent_of(current).filter(|&parent| parent != 0 && parent != current)
    })
    .take(MAX_DEPTH)
}

/// `pid` is `root` itself or runs beneath it.
///
/// Every process descends from init, so `root` of 0 or 1 only matches
/// itself.
pub fn descends_from(pid: u32, root: u32) -> bool {
    if pid == root {
        return true;
    }
    root > 1 && ancestry(pid).skip(1).any(|ancestor| ancestor == root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_self_is_known() {
        let parent = parent_of(std::process::id());
        assert!(parent.is_some_and(|p| p > 0));
    }

    #[test]
    fn parent_of_missing_process() {
        assert_eq!(parent_of(u32::MAX), None);
    }

    #[test]
    fn ancestry_starts_at_pid_and_climbs() {
        let me = std::process::id();
        let chain: Vec<u32> = ancestry(me).collect();
        assert_eq!(chain[0], me);
        assert_eq!(chain.get(1).copied(), parent_of(me));
        assert!(!chain.contains(&0));
    }

    #[test]
    fn descends_from_parent_and_self() {
        let me = std::process::id();
        let parent = parent_of(me).unwrap();
        assert!(descends_from(me, parent));
        assert!(descends_from(me, me));
        assert!(!descends_from(parent, me));
    }

    #[test]
    fn init_and_missing_roots_match_nothing_else() {
        let me = std::process::id();
        assert!(!descends_from(me, 1));
        assert!(!descends_from(me, 0));
        assert!(!descends_from(me, u32::MAX));
        assert!(descends_from(1, 1));
    }
}
