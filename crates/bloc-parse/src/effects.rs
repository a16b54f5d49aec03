use std::collections::BTreeSet;

use bloc_core::SideEffect;

/// Keyword table for side-effect classification. A call belongs to a
/// category when any keyword is a substring of its dotted name.
pub const SIDE_EFFECT_PATTERNS: &[(SideEffect, &[&str])] = &[
    (
        SideEffect::FileIo,
        &["open", "read", "write", "readline", "readlines", "writelines"],
    ),
    (
        SideEffect::EnvRead,
        &["os.environ", "os.getenv", "environ.get", "getenv"],
    ),
    (
        SideEffect::Network,
        &["requests", "urllib", "httpx", "aiohttp", "socket"],
    ),
    (
        SideEffect::Db,
        &[
            "execute",
            "cursor",
            "commit",
            "rollback",
            "session.add",
            "session.query",
        ],
    ),
    (
        SideEffect::Subprocess,
        &["subprocess", "os.system", "Popen"],
    ),
];

pub fn classify_call(call_name: &str) -> BTreeSet<SideEffect> {
    SIDE_EFFECT_PATTERNS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| call_name.contains(keyword)))
        .map(|(effect, _)| *effect)
        .collect()
}

/// Attribute reads like `os.environ["KEY"]` count as environment access even
/// without a call.
pub fn is_env_attribute(dotted: &str) -> bool {
    dotted == "os.environ" || dotted.starts_with("os.environ.")
}
