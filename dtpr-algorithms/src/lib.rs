//! dtpr-algorithms: Matching and shower algorithms over built events.
//!
//! This crate provides the passes that run inside preprocessors:
//! - **Matching** - generator muon ↔ segment ↔ trigger-primitive references
//! - **Showers** - duplicate-location and hit-origin tagging of generator muons
//! - **Confusion** - per-chamber classification of found showers against truth
//! - **Stages** - the `dtpr.*` registry of built-in classes and stages
//!
#![warn(missing_docs)]

mod confusion;
pub mod geometry;
mod matching;
mod shower;
mod stages;

pub use confusion::{
    classify, interesting_locations, Class, ConfusionConfig, ConfusionMatrix, LocationMode,
};
pub use geometry::{angular_difference, delta_phi, delta_r, Chamber};
pub use matching::{
    apply_matches, find_matches, match_genmuons, match_quality, max_deta, max_dphi,
    max_segment_dphi, max_tp_dphi, segment_dphis, segment_matches, tp_dphis, tp_matches,
    MatchQuality, Matches, MatchingConfig, MATCHED_GENMUONS, MATCHED_SEGMENTS, MATCHED_TPS,
};
pub use shower::{
    drop_showered_tps, has_duplicate_location, matched_chambers, shower_hit_counts, tag_showers,
    DropShoweredConfig, ShowerConfig, ShowerMethod, SHOWERED,
};
pub use stages::{builtin_registry, register_builtins, BX_LENGTH_NS, TP_BX_OFFSET};
