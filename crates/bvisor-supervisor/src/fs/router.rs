//! Path routing.
//!
//! Every absolute path the guest names is resolved to a `RouteResult` by
//! a static, ordered prefix-rule tree. A rule matches when the path
//! starts with its prefix at a directory boundary (exact match, or the
//! next byte is `/`). Terminal rules yield their action; branch rules
//! recurse into their children with the remainder and fall back to the
//! branch default when no child matches.
//!
//! ## Default rules
//!
//! | Prefix | Action |
//! |--------|--------|
//! | `/sys` | Block |
//! | `/run` | Block |
//! | `/dev` | Block (safe device nodes pass through) |
//! | `/proc` | Proc |
//! | `/tmp/.bvisor` | Block (the supervisor's own overlay) |
//! | `/tmp/*` | Tmp |
//! | *(else)* | Cow |

use std::sync::LazyLock;

/// Which file backend serves a routed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Passthrough,
    Cow,
    Tmp,
    Proc,
}

/// Outcome of routing an absolute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteResult {
    /// The guest may not touch this path at all.
    Block,
    /// Served by the named backend.
    Handle(Backend),
}

enum Rule {
    Terminal {
        prefix: &'static str,
        action: RouteResult,
    },
    Branch {
        prefix: &'static str,
        children: Vec<Rule>,
        default: RouteResult,
    },
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::Terminal {
            prefix: "/sys",
            action: RouteResult::Block,
        },
        Rule::Terminal {
            prefix: "/run",
            action: RouteResult::Block,
        },
        Rule::Branch {
            prefix: "/dev",
            children: ["/null", "/zero", "/full", "/random", "/urandom", "/tty"]
                .into_iter()
                .map(|prefix| Rule::Terminal {
                    prefix,
                    action: RouteResult::Handle(Backend::Passthrough),
                })
                .collect(),
            default: RouteResult::Block,
        },
        Rule::Terminal {
            prefix: "/proc",
            action: RouteResult::Handle(Backend::Proc),
        },
        Rule::Branch {
            prefix: "/tmp",
            children: vec![Rule::Terminal {
                prefix: "/.bvisor",
                action: RouteResult::Block,
            }],
            default: RouteResult::Handle(Backend::Tmp),
        },
    ]
});

/// Route a normalised absolute path.
///
/// Paths that match no rule fall through to the copy-on-write backend.
pub fn route(path: &str) -> RouteResult {
    match_rules(&RULES, path).unwrap_or(RouteResult::Handle(Backend::Cow))
}

fn match_rules(rules: &[Rule], path: &str) -> Option<RouteResult> {
    for rule in rules {
        let prefix = match rule {
            Rule::Terminal { prefix, .. } | Rule::Branch { prefix, .. } => prefix,
        };
        if let Some(rest) = strip_component(path, prefix) {
            return Some(match rule {
                Rule::Terminal { action, .. } => *action,
                Rule::Branch {
                    children, default, ..
                } => match_rules(children, rest).unwrap_or(*default),
            });
        }
    }
    None
}

/// Matches `prefix` at a directory boundary and returns the remainder.
fn strip_component<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Collapse `.` and `..` components of an absolute path, textually.
///
/// `..` at the root stays at the root, as the kernel resolves it. The
/// result never ends in `/` except for the root itself.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".into()
    } else {
        let mut out = String::with_capacity(path.len());
        for p in parts {
            out.push('/');
            out.push_str(p);
        }
        out
    }
}

/// Join a (possibly relative) guest path onto a base directory and
/// normalise the result.
pub fn resolve(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{base}/{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_prefixes() {
        assert_eq!(route("/sys"), RouteResult::Block);
        assert_eq!(route("/sys/class/net"), RouteResult::Block);
        assert_eq!(route("/run/user/1000"), RouteResult::Block);
        assert_eq!(route("/dev/sda"), RouteResult::Block);
        assert_eq!(route("/dev"), RouteResult::Block);
    }

    #[test]
    fn boundary_matters() {
        // "/system" is not "/sys"
        assert_eq!(route("/system"), RouteResult::Handle(Backend::Cow));
        assert_eq!(route("/tmpfiles"), RouteResult::Handle(Backend::Cow));
    }

    #[test]
    fn safe_devices_pass_through() {
        assert_eq!(route("/dev/null"), RouteResult::Handle(Backend::Passthrough));
        assert_eq!(route("/dev/zero"), RouteResult::Handle(Backend::Passthrough));
        assert_eq!(
            route("/dev/urandom"),
            RouteResult::Handle(Backend::Passthrough)
        );
    }

    #[test]
    fn proc_is_virtualised() {
        assert_eq!(route("/proc"), RouteResult::Handle(Backend::Proc));
        assert_eq!(route("/proc/self/status"), RouteResult::Handle(Backend::Proc));
    }

    #[test]
    fn tmp_routing() {
        assert_eq!(route("/tmp"), RouteResult::Handle(Backend::Tmp));
        assert_eq!(route("/tmp/foo"), RouteResult::Handle(Backend::Tmp));
        assert_eq!(route("/tmp/.bvisor"), RouteResult::Block);
        assert_eq!(route("/tmp/.bvisor/x/cow/etc"), RouteResult::Block);
        // Not the overlay, just a similar name
        assert_eq!(route("/tmp/.bvisorish"), RouteResult::Handle(Backend::Tmp));
    }

    #[test]
    fn everything_else_is_cow() {
        assert_eq!(route("/etc/hosts"), RouteResult::Handle(Backend::Cow));
        assert_eq!(route("/home/user/x.txt"), RouteResult::Handle(Backend::Cow));
        assert_eq!(route("/"), RouteResult::Handle(Backend::Cow));
    }

    #[test]
    fn routing_is_pure() {
        for p in ["/etc/passwd", "/tmp/a", "/proc/1", "/sys/x"] {
            assert_eq!(route(p), route(p));
        }
    }

    #[test]
    fn trailing_slash_equivalence() {
        for p in ["/sys/class", "/tmp/dir", "/etc"] {
            let with = format!("{p}/");
            assert_eq!(route(&normalize(p)), route(&normalize(&with)));
        }
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize("/a/./b"), "/a/b");
        assert_eq!(normalize("/a/b/../c"), "/a/c");
        assert_eq!(normalize("/../x"), "/x");
        assert_eq!(normalize("/a//b/"), "/a/b");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/b/.."), "/a");
    }

    #[test]
    fn resolve_relative_against_cwd() {
        assert_eq!(resolve("/home/user", "x.txt"), "/home/user/x.txt");
        assert_eq!(resolve("/home/user", "../etc/passwd"), "/home/etc/passwd");
        assert_eq!(resolve("/home/user", "/abs"), "/abs");
    }
}
