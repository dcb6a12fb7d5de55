use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use serde::Serialize;

use crate::config::{
    ComponentConfig, ConfigOptions, DataItemConfig, DeviceConfig, PRESERVE_UUID, ReferenceConfig,
};
use crate::models::{Adapter, Component, DataItem, Reference, ReferenceKind, WellKnownItem};

pub const DEVICE_KIND: &str = "Device";

/// Property bag a device is constructed from.
pub type Properties = BTreeMap<String, String>;

/// Outcome of a lookup that keeps "never registered" apart from "registered
/// but since dropped".
#[derive(Clone, Debug)]
pub enum Lookup<T> {
    Found(Arc<T>),
    Expired,
    Missing,
}

impl<T> Lookup<T> {
    fn from_entry(entry: Option<&Weak<T>>) -> Self {
        match entry {
            None => Self::Missing,
            Some(weak) => weak.upgrade().map_or(Self::Expired, Self::Found),
        }
    }

    pub fn found(self) -> Option<Arc<T>> {
        match self {
            Self::Found(value) => Some(value),
            Self::Expired | Self::Missing => None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

fn upgrade<T>(entry: Option<&Weak<T>>) -> Option<Arc<T>> {
    entry.and_then(Weak::upgrade)
}

/// Root of a composition tree plus the non-owning indices over it.
///
/// The device owns its subtree through `Arc`s held by its components. Every
/// index and cached shortcut is a `Weak`, so dropping a node from the tree
/// makes lookups for it come back empty. Indices are not synchronized;
/// mutation needs `&mut Device`.
pub struct Device {
    component: Component,
    mtconnect_version: Option<String>,
    preserve_uuid: bool,
    initialized: bool,
    adapters: Vec<Weak<dyn Adapter>>,
    data_items_by_name: HashMap<String, Weak<DataItem>>,
    data_items_by_id: HashMap<String, Weak<DataItem>>,
    data_items_by_source: HashMap<String, Weak<DataItem>>,
    components_by_id: HashMap<String, Weak<Component>>,
    availability: Option<Weak<DataItem>>,
    asset_changed: Option<Weak<DataItem>>,
    asset_removed: Option<Weak<DataItem>>,
}

impl Device {
    /// Recognised properties: `id` (defaults to the name), `uuid`,
    /// `mtconnectVersion`.
    pub fn new(name: impl Into<String>, properties: &Properties) -> Self {
        let name = name.into();
        let id = properties
            .get("id")
            .cloned()
            .unwrap_or_else(|| name.clone());
        let mut component = Component::new(DEVICE_KIND, id).with_name(name);
        if let Some(uuid) = properties.get("uuid") {
            component = component.with_uuid(uuid.clone());
        }

        Self {
            component,
            mtconnect_version: properties.get("mtconnectVersion").cloned(),
            preserve_uuid: false,
            initialized: false,
            adapters: Vec::new(),
            data_items_by_name: HashMap::new(),
            data_items_by_id: HashMap::new(),
            data_items_by_source: HashMap::new(),
            components_by_id: HashMap::new(),
            availability: None,
            asset_changed: None,
            asset_removed: None,
        }
    }

    pub fn from_config(config: &DeviceConfig, options: &ConfigOptions) -> Self {
        let mut properties = Properties::new();
        if let Some(id) = &config.id {
            properties.insert("id".to_string(), id.clone());
        }
        if let Some(uuid) = &config.uuid {
            properties.insert("uuid".to_string(), uuid.clone());
        }
        if let Some(version) = &config.mtconnect_version {
            properties.insert("mtconnectVersion".to_string(), version.clone());
        }

        let mut device = Self::new(config.name.clone(), &properties);
        device.set_options(options);
        for data_item in &config.data_items {
            device
                .component
                .add_data_item(data_item_from_config(data_item));
        }
        for component in &config.components {
            device
                .component
                .add_component(component_from_config(component));
        }
        for reference in &config.references {
            device
                .component
                .add_reference(reference_from_config(reference));
        }
        device
    }

    pub fn id(&self) -> &str {
        self.component.id()
    }

    pub fn name(&self) -> &str {
        self.component.name().unwrap_or_else(|| self.component.id())
    }

    pub fn uuid(&self) -> Option<&str> {
        self.component.uuid()
    }

    /// Replaces the uuid unless the device is configured to keep the one it
    /// already has. Returns whether the uuid changed.
    pub fn merge_uuid(&mut self, uuid: impl Into<String>) -> bool {
        if self.preserve_uuid && self.component.uuid().is_some() {
            return false;
        }
        self.component.set_uuid(Some(uuid.into()));
        true
    }

    pub fn mtconnect_version(&self) -> Option<&str> {
        self.mtconnect_version.as_deref()
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_options(&mut self, options: &ConfigOptions) {
        if let Some(preserve) = options.get_bool(PRESERVE_UUID) {
            self.preserve_uuid = preserve;
        }
    }

    pub fn set_preserve_uuid(&mut self, preserve: bool) {
        self.preserve_uuid = preserve;
    }

    pub fn preserve_uuid(&self) -> bool {
        self.preserve_uuid
    }

    pub fn add_adapter(&mut self, adapter: &Arc<dyn Adapter>) {
        self.adapters.push(Arc::downgrade(adapter));
    }

    /// Adapters that are still alive.
    pub fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters.iter().filter_map(Weak::upgrade).collect()
    }

    /// Attaches a child component to the device root. Once the device is
    /// initialized the new subtree is indexed immediately.
    pub fn attach_component(&mut self, component: Component) -> Arc<Component> {
        let component = self.component.add_component(component);
        if self.initialized {
            self.index_subtree(&component);
        }
        component
    }

    /// Attaches a data item to the device root; indexed immediately once the
    /// device is initialized.
    pub fn attach_data_item(&mut self, data_item: DataItem) -> Arc<DataItem> {
        let data_item = self.component.add_data_item(data_item);
        if self.initialized {
            self.register_data_item(&data_item);
            self.cache_pointers(&data_item);
        }
        data_item
    }

    /// Releases the device's strong handle on a root data item. Index
    /// entries are left in place and expire with the item.
    pub fn detach_data_item(&mut self, id: &str) -> Option<Arc<DataItem>> {
        self.component.remove_data_item(id)
    }

    pub fn detach_component(&mut self, id: &str) -> Option<Arc<Component>> {
        self.component.remove_component(id)
    }

    /// Builds every index, then binds deferred references. Safe to repeat.
    pub fn initialize(&mut self) {
        self.build_device_maps();
        self.resolve_references();
        self.initialized = true;
        tracing::debug!(
            device = %self.name(),
            components = self.components_by_id.len(),
            data_items = self.data_items_by_id.len(),
            sources = self.data_items_by_source.len(),
            "device indices built"
        );
    }

    fn build_device_maps(&mut self) {
        let root_items: Vec<Arc<DataItem>> = self.component.data_items().to_vec();
        for data_item in &root_items {
            self.register_data_item(data_item);
            self.cache_pointers(data_item);
        }

        let children: Vec<Arc<Component>> = self.component.components().to_vec();
        for child in &children {
            self.index_subtree(child);
        }
    }

    fn index_subtree(&mut self, root: &Arc<Component>) {
        self.register_component(root);
        for data_item in root.data_items() {
            self.register_data_item(data_item);
            self.cache_pointers(data_item);
        }
        for component in root.descendants() {
            self.register_component(component);
            for data_item in component.data_items() {
                self.register_data_item(data_item);
                self.cache_pointers(data_item);
            }
        }
    }

    fn resolve_references(&self) {
        let device = self.name();
        let mut unresolved = 0usize;
        let nodes = std::iter::once(&self.component)
            .chain(self.component.descendants().map(|component| &**component));

        for node in nodes {
            for reference in node.references() {
                if !self.resolve_reference(reference) {
                    unresolved += 1;
                    tracing::warn!(
                        device = %device,
                        component = %node.id(),
                        id_ref = %reference.id_ref(),
                        kind = ?reference.kind(),
                        "unresolved reference"
                    );
                }
            }
        }

        if unresolved > 0 {
            tracing::debug!(device = %device, unresolved, "reference resolution incomplete");
        }
    }

    fn resolve_reference(&self, reference: &Reference) -> bool {
        match reference.kind() {
            ReferenceKind::DataItemRef => match self.lookup_data_item_by_id(reference.id_ref()) {
                Lookup::Found(item) => {
                    reference.bind_data_item(&item);
                    true
                }
                _ => {
                    reference.unbind();
                    false
                }
            },
            ReferenceKind::ComponentRef => match self.lookup_component_by_id(reference.id_ref()) {
                Lookup::Found(component) => {
                    reference.bind_component(&component);
                    true
                }
                _ => {
                    reference.unbind();
                    false
                }
            },
        }
    }

    pub fn add_device_data_item(&mut self, data_item: &Arc<DataItem>) {
        self.register_data_item(data_item);
    }

    /// Looks a data item up by name. Never-registered and dropped items both
    /// come back as `None`.
    pub fn get_device_data_item(&self, name: &str) -> Option<Arc<DataItem>> {
        upgrade(self.data_items_by_name.get(name))
    }

    pub fn data_item_by_id(&self, id: &str) -> Option<Arc<DataItem>> {
        upgrade(self.data_items_by_id.get(id))
    }

    pub fn data_item_by_source(&self, source: &str) -> Option<Arc<DataItem>> {
        upgrade(self.data_items_by_source.get(source))
    }

    /// Resolves a feeder-supplied key: source first, then name, then id.
    pub fn find_data_item(&self, key: &str) -> Option<Arc<DataItem>> {
        self.data_item_by_source(key)
            .or_else(|| self.get_device_data_item(key))
            .or_else(|| self.data_item_by_id(key))
    }

    pub fn lookup_data_item_by_name(&self, name: &str) -> Lookup<DataItem> {
        Lookup::from_entry(self.data_items_by_name.get(name))
    }

    pub fn lookup_data_item_by_id(&self, id: &str) -> Lookup<DataItem> {
        Lookup::from_entry(self.data_items_by_id.get(id))
    }

    pub fn lookup_component_by_id(&self, id: &str) -> Lookup<Component> {
        Lookup::from_entry(self.components_by_id.get(id))
    }

    /// Live data items keyed by id.
    pub fn device_data_items(&self) -> BTreeMap<String, Arc<DataItem>> {
        self.data_items_by_id
            .iter()
            .filter_map(|(id, item)| item.upgrade().map(|item| (id.clone(), item)))
            .collect()
    }

    /// The only way entries reach the data item indices. Name and source
    /// keys are used only when the item carries them; later registrations
    /// overwrite earlier ones under the same key.
    pub fn register_data_item(&mut self, data_item: &Arc<DataItem>) {
        let weak = Arc::downgrade(data_item);
        if let Some(source) = data_item.source() {
            self.data_items_by_source
                .insert(source.to_string(), weak.clone());
        }
        if let Some(name) = data_item.name() {
            self.data_items_by_name
                .insert(name.to_string(), weak.clone());
        }
        self.data_items_by_id.insert(data_item.id().to_string(), weak);
    }

    pub fn add_component(&mut self, component: &Arc<Component>) {
        self.register_component(component);
    }

    pub fn register_component(&mut self, component: &Arc<Component>) {
        if let Some(previous) = self
            .components_by_id
            .insert(component.id().to_string(), Arc::downgrade(component))
            && previous.strong_count() > 0
            && !std::ptr::eq(previous.as_ptr(), Arc::as_ptr(component))
        {
            tracing::debug!(
                device = %self.name(),
                id = %component.id(),
                "component id registered twice; keeping the latest"
            );
        }
    }

    pub fn get_component_by_id(&self, id: &str) -> Option<Arc<Component>> {
        upgrade(self.components_by_id.get(id))
    }

    /// Keeps a direct handle to availability / asset-changed / asset-removed
    /// items. The last matching item wins.
    pub fn cache_pointers(&mut self, data_item: &Arc<DataItem>) {
        let slot = match data_item.well_known() {
            Some(WellKnownItem::Availability) => &mut self.availability,
            Some(WellKnownItem::AssetChanged) => &mut self.asset_changed,
            Some(WellKnownItem::AssetRemoved) => &mut self.asset_removed,
            None => return,
        };
        *slot = Some(Arc::downgrade(data_item));
    }

    pub fn availability(&self) -> Option<Arc<DataItem>> {
        upgrade(self.availability.as_ref())
    }

    pub fn asset_changed(&self) -> Option<Arc<DataItem>> {
        upgrade(self.asset_changed.as_ref())
    }

    pub fn asset_removed(&self) -> Option<Arc<DataItem>> {
        upgrade(self.asset_removed.as_ref())
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id().to_string(),
            name: self.name().to_string(),
            uuid: self.uuid().map(str::to_string),
            preserve_uuid: self.preserve_uuid,
            components: sorted_live_keys(&self.components_by_id),
            data_items: sorted_live_keys(&self.data_items_by_id),
            sources: sorted_live_keys(&self.data_items_by_source),
            availability: self.availability().map(|item| item.id().to_string()),
            asset_changed: self.asset_changed().map(|item| item.id().to_string()),
            asset_removed: self.asset_removed().map(|item| item.id().to_string()),
            adapters: self
                .adapters()
                .iter()
                .map(|adapter| adapter.name().to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub uuid: Option<String>,
    pub preserve_uuid: bool,
    pub components: Vec<String>,
    pub data_items: Vec<String>,
    pub sources: Vec<String>,
    pub availability: Option<String>,
    pub asset_changed: Option<String>,
    pub asset_removed: Option<String>,
    pub adapters: Vec<String>,
}

fn sorted_live_keys<T>(index: &HashMap<String, Weak<T>>) -> Vec<String> {
    let mut keys: Vec<String> = index
        .iter()
        .filter(|(_, entry)| entry.strong_count() > 0)
        .map(|(key, _)| key.clone())
        .collect();
    keys.sort();
    keys
}

fn data_item_from_config(config: &DataItemConfig) -> DataItem {
    let mut data_item = DataItem::new(config.id.clone(), config.data_item_type.clone())
        .with_category(config.category);
    if let Some(name) = &config.name {
        data_item = data_item.with_name(name.clone());
    }
    if let Some(source) = &config.source {
        data_item = data_item.with_source(source.clone());
    }
    data_item
}

fn reference_from_config(config: &ReferenceConfig) -> Reference {
    let reference = Reference::new(config.kind, config.id_ref.clone());
    match &config.name {
        Some(name) => reference.with_name(name.clone()),
        None => reference,
    }
}

fn component_from_config(config: &ComponentConfig) -> Component {
    let mut component = Component::new(config.kind.clone(), config.id.clone());
    if let Some(name) = &config.name {
        component = component.with_name(name.clone());
    }
    if let Some(uuid) = &config.uuid {
        component = component.with_uuid(uuid.clone());
    }
    for data_item in &config.data_items {
        component.add_data_item(data_item_from_config(data_item));
    }
    for child in &config.components {
        component.add_component(component_from_config(child));
    }
    for reference in &config.references {
        component.add_reference(reference_from_config(reference));
    }
    component
}
