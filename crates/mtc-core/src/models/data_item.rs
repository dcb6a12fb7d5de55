use serde::{Deserialize, Serialize};

pub const AVAILABILITY: &str = "AVAILABILITY";
pub const ASSET_CHANGED: &str = "ASSET_CHANGED";
pub const ASSET_REMOVED: &str = "ASSET_REMOVED";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataItemCategory {
    Sample,
    #[default]
    Event,
    Condition,
}

/// Data items the device keeps a direct shortcut to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WellKnownItem {
    Availability,
    AssetChanged,
    AssetRemoved,
}

impl WellKnownItem {
    pub fn from_type(data_item_type: &str) -> Option<Self> {
        match data_item_type {
            AVAILABILITY => Some(Self::Availability),
            ASSET_CHANGED => Some(Self::AssetChanged),
            ASSET_REMOVED => Some(Self::AssetRemoved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataItem {
    id: String,
    name: Option<String>,
    source: Option<String>,
    data_item_type: String,
    category: DataItemCategory,
}

impl DataItem {
    pub fn new(id: impl Into<String>, data_item_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            source: None,
            data_item_type: data_item_type.into(),
            category: DataItemCategory::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_category(mut self, category: DataItemCategory) -> Self {
        self.category = category;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Wire-level channel name the feeding adapter uses for this item.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref().filter(|source| !source.is_empty())
    }

    pub fn data_item_type(&self) -> &str {
        &self.data_item_type
    }

    pub fn category(&self) -> DataItemCategory {
        self.category
    }

    pub fn well_known(&self) -> Option<WellKnownItem> {
        WellKnownItem::from_type(&self.data_item_type)
    }
}

#[cfg(test)]
mod tests {
    use super::{DataItem, WellKnownItem};

    #[test]
    fn empty_source_is_treated_as_absent() {
        let item = DataItem::new("x1", "POSITION").with_source("");
        assert_eq!(item.source(), None);
    }

    #[test]
    fn well_known_markers_are_exact_type_matches() {
        assert_eq!(
            DataItem::new("a", "AVAILABILITY").well_known(),
            Some(WellKnownItem::Availability)
        );
        assert_eq!(DataItem::new("a", "availability").well_known(), None);
        assert_eq!(DataItem::new("a", "EXECUTION").well_known(), None);
    }
}
