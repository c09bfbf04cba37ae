//! Component H: the parameter resolver.
//!
//! Reads signed network parameters off an installed consensus, applying
//! the local-override and clip-with-warning rules of §4.H. Grounded on
//! `networkstatus_get_param`/`networkstatus_get_bw_weight` in
//! `original_source/networkstatus.c`.

use std::collections::BTreeMap;

use tracing::warn;

use crate::consensus::Consensus;

/// Clip `value` into `[low, high]`, warning once per call if clipping was
/// needed (the original's `warn_consensus_param`-style behavior).
fn clip(name: &str, value: i32, low: i32, high: i32) -> i32 {
    if value < low {
        warn!(param = name, value, low, high, "consensus parameter below minimum; clipping");
        low
    } else if value > high {
        warn!(param = name, value, low, high, "consensus parameter above maximum; clipping");
        high
    } else {
        value
    }
}

/// `get_int(doc, name, default, low, high)`: look up a signed network
/// parameter, falling back to `default` if absent, and clipping the result
/// (whether looked up or defaulted) into `[low, high]`.
pub fn get_int(doc: &Consensus, name: &str, default: i32, low: i32, high: i32) -> i32 {
    let value = doc.net_params.get(name).copied().unwrap_or(default);
    clip(name, value, low, high)
}

/// `get_overridable_int(doc, overrides, name, default, low, high)`: as
/// [`get_int`], but a local configuration override in `overrides` takes
/// priority over the signed value, per §4.H's "returns `override` if it is
/// itself in `[min, max]`, else delegates to `get_int`" rule — an
/// out-of-range override is discarded rather than clipped into range, so
/// a misconfigured override can't force a value `get_int` would never
/// produce on its own.
pub fn get_overridable_int(
    doc: &Consensus,
    overrides: &BTreeMap<String, i32>,
    name: &str,
    default: i32,
    low: i32,
    high: i32,
) -> i32 {
    if let Some(&value) = overrides.get(name) {
        if value >= low && value <= high {
            return value;
        }
    }
    get_int(doc, name, default, low, high)
}

/// The default fixed-point scale bandwidth weights are expressed in, and the
/// range its own `bwweightscale` consensus parameter is clipped to. Mirrors
/// `BW_WEIGHT_SCALE`/`BW_MIN_WEIGHT_SCALE`/`BW_MAX_WEIGHT_SCALE` in
/// `original_source/networkstatus.c`.
const BW_WEIGHT_SCALE: i32 = 10_000;
const BW_MIN_WEIGHT_SCALE: i32 = 1;
const BW_MAX_WEIGHT_SCALE: i32 = i32::MAX;

/// `get_bw_weight(doc, name, default)`: look up a bandwidth-weighting
/// parameter from the document's distinct `weight_params` namespace,
/// clipped to `[-1, bwweightscale]` where `bwweightscale` is itself a signed
/// network parameter (default [`BW_WEIGHT_SCALE`], clipped to
/// `[BW_MIN_WEIGHT_SCALE, BW_MAX_WEIGHT_SCALE]`), per §4.H.
pub fn get_bw_weight(doc: &Consensus, name: &str, default: i32) -> i32 {
    let max = get_int(doc, "bwweightscale", BW_WEIGHT_SCALE, BW_MIN_WEIGHT_SCALE, BW_MAX_WEIGHT_SCALE);
    let value = doc.weight_params.get(name).copied().unwrap_or(default);
    let value = clip(name, value, -1, BW_MAX_WEIGHT_SCALE);
    if value > max {
        warn!(param = name, value, max, "consensus weight too large; capping");
        max
    } else {
        value
    }
}
