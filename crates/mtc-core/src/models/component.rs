use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};

use crate::models::DataItem;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    DataItemRef,
    ComponentRef,
}

#[derive(Clone, Debug, Default)]
enum ReferenceTarget {
    #[default]
    Unresolved,
    DataItem(Weak<DataItem>),
    Component(Weak<Component>),
}

/// Id-based cross reference declared in configuration and bound once the
/// device indices exist.
#[derive(Debug)]
pub struct Reference {
    kind: ReferenceKind,
    id_ref: String,
    name: Option<String>,
    target: RwLock<ReferenceTarget>,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id_ref: impl Into<String>) -> Self {
        Self {
            kind,
            id_ref: id_ref.into(),
            name: None,
            target: RwLock::new(ReferenceTarget::Unresolved),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn id_ref(&self) -> &str {
        &self.id_ref
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data_item(&self) -> Option<Arc<DataItem>> {
        match &*self.target.read().unwrap_or_else(PoisonError::into_inner) {
            ReferenceTarget::DataItem(item) => item.upgrade(),
            _ => None,
        }
    }

    pub fn component(&self) -> Option<Arc<Component>> {
        match &*self.target.read().unwrap_or_else(PoisonError::into_inner) {
            ReferenceTarget::Component(component) => component.upgrade(),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match &*self.target.read().unwrap_or_else(PoisonError::into_inner) {
            ReferenceTarget::Unresolved => false,
            ReferenceTarget::DataItem(item) => item.strong_count() > 0,
            ReferenceTarget::Component(component) => component.strong_count() > 0,
        }
    }

    pub(crate) fn bind_data_item(&self, item: &Arc<DataItem>) {
        self.set_target(ReferenceTarget::DataItem(Arc::downgrade(item)));
    }

    pub(crate) fn bind_component(&self, component: &Arc<Component>) {
        self.set_target(ReferenceTarget::Component(Arc::downgrade(component)));
    }

    pub(crate) fn unbind(&self) {
        self.set_target(ReferenceTarget::Unresolved);
    }

    fn set_target(&self, target: ReferenceTarget) {
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = target;
    }
}

/// A node of the device composition tree. Children are owned here; nothing
/// else in the crate holds a strong handle to them.
#[derive(Debug)]
pub struct Component {
    id: String,
    name: Option<String>,
    kind: String,
    uuid: Option<String>,
    components: Vec<Arc<Component>>,
    data_items: Vec<Arc<DataItem>>,
    references: Vec<Reference>,
}

impl Component {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: kind.into(),
            uuid: None,
            components: Vec::new(),
            data_items: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.add_component(component);
        self
    }

    pub fn with_data_item(mut self, data_item: DataItem) -> Self {
        self.add_data_item(data_item);
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.add_reference(reference);
        self
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.references.push(reference);
    }

    pub fn add_component(&mut self, component: Component) -> Arc<Component> {
        let component = Arc::new(component);
        self.components.push(component.clone());
        component
    }

    pub fn add_data_item(&mut self, data_item: DataItem) -> Arc<DataItem> {
        let data_item = Arc::new(data_item);
        self.data_items.push(data_item.clone());
        data_item
    }

    /// Drops this node's strong handle; registry entries pointing at the
    /// item expire once no other owner remains.
    pub fn remove_data_item(&mut self, id: &str) -> Option<Arc<DataItem>> {
        let index = self.data_items.iter().position(|item| item.id() == id)?;
        Some(self.data_items.remove(index))
    }

    pub fn remove_component(&mut self, id: &str) -> Option<Arc<Component>> {
        let index = self
            .components
            .iter()
            .position(|component| component.id() == id)?;
        Some(self.components.remove(index))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn components(&self) -> &[Arc<Component>] {
        &self.components
    }

    pub fn data_items(&self) -> &[Arc<DataItem>] {
        &self.data_items
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub(crate) fn set_uuid(&mut self, uuid: Option<String>) {
        self.uuid = uuid;
    }

    /// Depth-first walk over every component strictly below this node.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.components.iter().rev().collect(),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Arc<Component>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Arc<Component>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.components.iter().rev());
        Some(next)
    }
}
