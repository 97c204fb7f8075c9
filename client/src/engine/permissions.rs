use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use tracing::warn;

bitflags! {
    /// Capability bitfield attached to every Refractor user.
    /// Bit positions are fixed by the server and must not be reordered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        // ── Escape hatches ──
        const SUPER_ADMIN            = 1 << 0;
        const FULL_ACCESS            = 1 << 1;

        // ── Infraction logging ──
        const LOG_WARNING            = 1 << 2;
        const LOG_MUTE               = 1 << 3;
        const LOG_KICK               = 1 << 4;
        const LOG_BAN                = 1 << 5;

        // ── Infraction management ──
        const EDIT_OWN_INFRACTIONS   = 1 << 6;
        const EDIT_ANY_INFRACTION    = 1 << 7;
        const DELETE_OWN_INFRACTIONS = 1 << 8;
        const DELETE_ANY_INFRACTION  = 1 << 9;

        // ── Records ──
        const VIEW_CHAT_RECORDS      = 1 << 10;
    }
}

/// Flags that satisfy every capability check on their own.
pub const FULL_ACCESS_FLAGS: Permissions = Permissions::SUPER_ADMIN.union(Permissions::FULL_ACCESS);

/// How a list of required flags is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every flag must be held.
    All,
    /// At least one flag must be held.
    Any,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a match mode string is neither `all` nor `any`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown match mode {0:?}")]
pub struct UnknownMatchMode(pub String);

impl FromStr for MatchMode {
    type Err = UnknownMatchMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else if s.eq_ignore_ascii_case("any") {
            Ok(Self::Any)
        } else {
            Err(UnknownMatchMode(s.to_string()))
        }
    }
}

/// True iff every bit of `flag` is set in `mask`.
///
/// Passing a combined value as `flag` requires *all* of its bits. Use
/// [`evaluate`] with [`MatchMode::Any`] for "any of" checks.
pub fn has_capability(mask: Permissions, flag: Permissions) -> bool {
    mask.contains(flag)
}

/// True iff the mask carries SUPER_ADMIN or FULL_ACCESS.
pub fn has_full_access(mask: Permissions) -> bool {
    mask.intersects(FULL_ACCESS_FLAGS)
}

/// Decide whether `mask` satisfies `required` under `mode`.
///
/// Full access short-circuits to true. An empty `required` list is
/// vacuously satisfied under `All` and never satisfied under `Any`.
pub fn evaluate(mask: Permissions, required: &[Permissions], mode: MatchMode) -> bool {
    if has_full_access(mask) {
        return true;
    }

    match mode {
        MatchMode::All => required.iter().all(|flag| has_capability(mask, *flag)),
        MatchMode::Any => required.iter().any(|flag| has_capability(mask, *flag)),
    }
}

/// Same as [`evaluate`], but takes the mode as it arrives from callers that
/// only have a string. An unrecognised mode grants nothing and is logged.
pub fn evaluate_named(mask: Permissions, required: &[Permissions], mode: &str) -> bool {
    if has_full_access(mask) {
        return true;
    }

    match mode.parse::<MatchMode>() {
        Ok(mode) => evaluate(mask, required, mode),
        Err(e) => {
            warn!(error = %e, "permission check denied: unknown match mode");
            false
        }
    }
}

/// Names of every known flag the mask satisfies, in bit order.
/// For display and audit only; gate actions with [`evaluate`].
pub fn granted_flags(mask: Permissions) -> Vec<&'static str> {
    Permissions::all()
        .iter_names()
        .filter(|(_, flag)| has_capability(mask, *flag))
        .map(|(name, _)| name)
        .collect()
}

/// Look up a single flag by its table name, ignoring case.
pub fn parse_flag(name: &str) -> Option<Permissions> {
    let name = name.trim();
    Permissions::all()
        .iter_names()
        .find(|(flag_name, _)| flag_name.eq_ignore_ascii_case(name))
        .map(|(_, flag)| flag)
}

/// Parse the decimal permission string carried on a user object.
///
/// Missing, blank or malformed input yields an empty mask. Bits the local
/// table doesn't know about are kept.
pub fn parse_mask(raw: Option<&str>) -> Permissions {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Permissions::empty();
    };

    match raw.parse::<u64>() {
        Ok(bits) => Permissions::from_bits_retain(bits),
        Err(e) => {
            warn!(%raw, error = %e, "unparsable permission mask, treating as empty");
            Permissions::empty()
        }
    }
}
