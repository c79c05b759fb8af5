//! DVB device path parsing and the adapter rewrite rule.
//!
//! The application addresses tuners under `/dev/dvb/adapter<N>/...`.
//! It assumes the built-in tuner bank is adapter 0, but on some hosts
//! the kernel enumerates it elsewhere. The rewrite rule swaps adapter
//! index 0 and the discovered main adapter index, so references to
//! either name end up on the same canonical device before any slot
//! matching or access check happens.

/// A parsed `/dev/dvb/adapter<N>/<node>` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvbPath<'a> {
    pub adapter: u32,
    /// Device node under the adapter directory, e.g. `frontend0`.
    /// Empty for a bare adapter directory reference.
    pub node: &'a str,
}

/// Parse a DVB device path. Anything outside `/dev/dvb` is `None`.
pub fn parse(path: &str) -> Option<DvbPath<'_>> {
    let rest = path.strip_prefix("/dev/dvb/adapter")?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let adapter: u32 = rest[..digits].parse().ok()?;
    let node = match &rest[digits..] {
        "" => "",
        tail => tail.strip_prefix('/')?,
    };
    Some(DvbPath { adapter, node })
}

/// Format the frontend device path of an adapter.
pub fn frontend_path(adapter: u32, frontend: u32) -> String {
    format!("/dev/dvb/adapter{adapter}/frontend{frontend}")
}

/// Format the demux device path of an adapter.
pub fn demux_path(adapter: u32) -> String {
    format!("/dev/dvb/adapter{adapter}/demux0")
}

/// Apply the adapter rewrite rule.
///
/// Returns the canonical path, or `None` when the path is unaffected.
/// The rule is active only when the main adapter is not adapter 0;
/// it swaps the two indices in both directions, exactly as the
/// application-visible naming requires.
pub fn rewrite(path: &str, main_adapter: u32) -> Option<String> {
    if main_adapter == 0 {
        return None;
    }
    let parsed = parse(path)?;
    let target = if parsed.adapter == 0 {
        main_adapter
    } else if parsed.adapter == main_adapter {
        0
    } else {
        return None;
    };
    if parsed.node.is_empty() {
        Some(format!("/dev/dvb/adapter{target}"))
    } else {
        Some(format!("/dev/dvb/adapter{}/{}", target, parsed.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frontend() {
        let p = parse("/dev/dvb/adapter2/frontend0").unwrap();
        assert_eq!(p.adapter, 2);
        assert_eq!(p.node, "frontend0");
    }

    #[test]
    fn test_parse_rejects_foreign_paths() {
        assert!(parse("/dev/ttyS0").is_none());
        assert!(parse("/dev/dvb/adapter").is_none());
        assert!(parse("/dev/dvb/adapterX/frontend0").is_none());
    }

    #[test]
    fn test_parse_bare_adapter() {
        let p = parse("/dev/dvb/adapter11").unwrap();
        assert_eq!(p.adapter, 11);
        assert_eq!(p.node, "");
    }

    #[test]
    fn test_rewrite_swaps_zero_and_main() {
        assert_eq!(
            rewrite("/dev/dvb/adapter0/frontend1", 2).as_deref(),
            Some("/dev/dvb/adapter2/frontend1")
        );
        assert_eq!(
            rewrite("/dev/dvb/adapter2/demux0", 2).as_deref(),
            Some("/dev/dvb/adapter0/demux0")
        );
    }

    #[test]
    fn test_rewrite_leaves_other_adapters_alone() {
        assert!(rewrite("/dev/dvb/adapter3/frontend0", 2).is_none());
        assert!(rewrite("/proc/self/cmdline", 2).is_none());
    }

    #[test]
    fn test_rewrite_inactive_when_main_is_zero() {
        assert!(rewrite("/dev/dvb/adapter0/frontend0", 0).is_none());
    }

    #[test]
    fn test_path_builders() {
        assert_eq!(frontend_path(2, 1), "/dev/dvb/adapter2/frontend1");
        assert_eq!(demux_path(3), "/dev/dvb/adapter3/demux0");
    }
}
