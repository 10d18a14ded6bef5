//! Inspect core: primitives shared by every lookup path of the inspect gateway.
//!
//! Responsibilities:
//! - parsing inspection references into stable [`Fingerprint`]s
//! - the canonical [`ItemDetails`] entity and its raw upstream records
//! - normalizing coordinator and REST payloads into [`ItemDetails`]
//! - the TTL [`ResultCache`] consulted before either path

pub mod cache;
pub mod fingerprint;
pub mod item;
pub mod normalize;

pub use cache::ResultCache;
pub use fingerprint::{extract, ExtractionError, Fingerprint};
pub use item::{ItemDetails, Sticker};
pub use normalize::{
    normalize_coordinator, normalize_rest, CoordinatorItemInfo, CoordinatorSticker, RestItemInfo,
    RestSticker,
};
