pub mod adapter;
pub mod component;
pub mod data_item;
pub mod error;

pub use adapter::Adapter;
pub use component::{Component, Descendants, Reference, ReferenceKind};
pub use data_item::{
    ASSET_CHANGED, ASSET_REMOVED, AVAILABILITY, DataItem, DataItemCategory, WellKnownItem,
};
pub use error::{CoreError, CoreErrorKind};
