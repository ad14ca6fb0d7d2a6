// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination registry: the catalog of every known print target.
//!
//! Destinations live in a generation-checked slab; the sorted catalog
//! orders their names case-insensitively and drives every in-order
//! traversal. A printer and a class may share a name (remote peers),
//! so catalog keys carry the class bit as a tie-break.

use spool_core::{
    AttrBag, Attribute, CapabilityRecord, Catalog, Compare, DestHandle, DestKind, Destination,
    MimeType, PrinterState,
};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("destination \"{0}\" not found")]
    NotFound(String),
    #[error("destination \"{0}\" already exists")]
    AlreadyExists(String),
    #[error("\"{0}\" is not a class")]
    NotAClass(String),
    #[error("\"{0}\" is not a local printer")]
    NotALocalPrinter(String),
}

/// Catalog key: folded name plus the class bit.
#[derive(Debug, Clone)]
struct NameKey {
    folded: String,
    class: bool,
    handle: DestHandle,
}

impl NameKey {
    fn probe(name: &str, class: bool) -> Self {
        Self {
            folded: name.to_lowercase(),
            class,
            handle: DestHandle { index: u32::MAX, generation: u32::MAX },
        }
    }
}

/// Case-insensitive name order, printers before classes.
#[derive(Debug, Clone, Default)]
struct NameOrder;

impl Compare<NameKey> for NameOrder {
    fn compare(&self, a: &NameKey, b: &NameKey) -> Ordering {
        a.folded.cmp(&b.folded).then(a.class.cmp(&b.class))
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    dest: Option<Destination>,
}

/// Result of deleting a destination.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub dest: Destination,
    /// Classes that lost their last member and were deleted with it.
    pub emptied_classes: Vec<String>,
}

#[derive(Debug)]
pub struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    catalog: Catalog<NameKey, NameOrder>,
    dirty: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            catalog: Catalog::new(NameOrder),
            dirty: false,
        }
    }

    pub fn count(&self) -> usize {
        self.catalog.count()
    }

    pub fn get(&self, handle: DestHandle) -> Option<&Destination> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.dest.as_ref()
    }

    pub fn get_mut(&mut self, handle: DestHandle) -> Option<&mut Destination> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.dest.as_mut()
    }

    fn handle_of(&mut self, name: &str, class: bool) -> Option<DestHandle> {
        self.catalog.find(&NameKey::probe(name, class)).map(|k| k.handle)
    }

    /// Look up a destination of either kind; printers win when both
    /// exist under one name (an explicit record always beats a
    /// discovery artifact; see also [`Registry::lookup_class`]).
    pub fn lookup(&mut self, name: &str) -> Option<&Destination> {
        let handle =
            self.handle_of(name, false).or_else(|| self.handle_of(name, true))?;
        self.get(handle)
    }

    pub fn lookup_printer(&mut self, name: &str) -> Option<&Destination> {
        let handle = self.handle_of(name, false)?;
        self.get(handle)
    }

    pub fn lookup_class(&mut self, name: &str) -> Option<&Destination> {
        let handle = self.handle_of(name, true)?;
        self.get(handle)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Destination> {
        let handle =
            self.handle_of(name, false).or_else(|| self.handle_of(name, true))?;
        self.get_mut(handle)
    }

    pub fn lookup_class_mut(&mut self, name: &str) -> Option<&mut Destination> {
        let handle = self.handle_of(name, true)?;
        self.get_mut(handle)
    }

    pub fn lookup_printer_mut(&mut self, name: &str) -> Option<&mut Destination> {
        let handle = self.handle_of(name, false)?;
        self.get_mut(handle)
    }

    /// Insert a destination. Fails when a destination of the same name
    /// and kind-class already exists.
    pub fn insert(&mut self, dest: Destination) -> Result<DestHandle, RegistryError> {
        let class = dest.kind.is_class();
        if self.handle_of(&dest.name, class).is_some() {
            return Err(RegistryError::AlreadyExists(dest.name.clone()));
        }
        let key_name = dest.name.to_lowercase();
        let persisted = dest.kind.is_local();

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.dest = Some(dest);
                DestHandle { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, dest: Some(dest) });
                DestHandle { index, generation: 0 }
            }
        };
        self.catalog.add(NameKey { folded: key_name, class, handle });
        if persisted {
            self.dirty = true;
        }
        Ok(handle)
    }

    /// Create a local printer. New queues start stopped and rejecting.
    pub fn create_printer(&mut self, name: &str) -> Result<DestHandle, RegistryError> {
        self.insert(Destination::new(name, DestKind::LocalPrinter))
    }

    /// Create an empty local class.
    pub fn create_class(&mut self, name: &str) -> Result<DestHandle, RegistryError> {
        self.insert(Destination::new(name, DestKind::LocalClass))
    }

    /// Delete a destination by name. Deleting a local printer also pulls
    /// it out of every class; classes left empty are deleted too.
    pub fn delete(&mut self, name: &str, class: bool) -> Result<DeleteOutcome, RegistryError> {
        let handle = self
            .handle_of(name, class)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let dest = self.take(handle, class)?;

        let mut emptied = Vec::new();
        if dest.kind == DestKind::LocalPrinter {
            let holding: Vec<String> = self
                .iter()
                .filter(|d| d.kind == DestKind::LocalClass && d.members.iter().any(|m| m == name))
                .map(|d| d.name.clone())
                .collect();
            for class_name in holding {
                let now_empty = match self.lookup_class_mut(&class_name) {
                    Some(class_dest) => {
                        class_dest.members.retain(|m| m != name);
                        class_dest.members.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    let _ = self.delete(&class_name, true);
                    emptied.push(class_name);
                }
                self.dirty = true;
            }
        }

        if dest.kind.is_local() {
            self.dirty = true;
        }
        Ok(DeleteOutcome { dest, emptied_classes: emptied })
    }

    fn take(&mut self, handle: DestHandle, class: bool) -> Result<Destination, RegistryError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation);
        let Some(slot) = slot else {
            return Err(RegistryError::NotFound(format!("#{}", handle.index)));
        };
        let Some(dest) = slot.dest.take() else {
            return Err(RegistryError::NotFound(format!("#{}", handle.index)));
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.catalog.remove(&NameKey::probe(&dest.name, class));
        Ok(dest)
    }

    /// Recompute a destination's derived capabilities from a parsed
    /// device description record.
    pub fn set_capabilities(
        &mut self,
        name: &str,
        record: CapabilityRecord,
    ) -> Result<(), RegistryError> {
        let dest = self
            .lookup_printer_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !record.make_model.is_empty() {
            dest.make_model = record.make_model.clone();
        }
        dest.capability = record;
        self.dirty = true;
        Ok(())
    }

    /// Apply a reasons delta (`+a,b` / `-a,b` / replace).
    pub fn set_reasons(&mut self, name: &str, delta: &str) -> Result<(), RegistryError> {
        let dest = self
            .lookup_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        dest.reasons.apply(delta);
        let local = dest.kind.is_local();
        if local {
            self.dirty = true;
        }
        Ok(())
    }

    /// Record a state change with history and force re-advertisement.
    pub fn record_state(
        &mut self,
        name: &str,
        state: PrinterState,
        message: &str,
        at_ms: u64,
    ) -> Result<(), RegistryError> {
        let dest = self
            .lookup_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        dest.record_state(state, message, at_ms);
        let local = dest.kind.is_local();
        if local {
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_accepting(&mut self, name: &str, accepting: bool) -> Result<(), RegistryError> {
        let dest = self
            .lookup_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        dest.accepting = accepting;
        dest.last_advertised_ms = 0;
        let local = dest.kind.is_local();
        if local {
            self.dirty = true;
        }
        Ok(())
    }

    /// In-order traversal (case-insensitive name order).
    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.catalog.iter().filter_map(|key| {
            let slot = self.slots.get(key.handle.index as usize)?;
            if slot.generation != key.handle.generation {
                return None;
            }
            slot.dest.as_ref()
        })
    }

    /// Names in catalog order, for traversals that need mutation.
    pub fn names(&self) -> Vec<(String, bool)> {
        self.catalog.iter().map(|k| (k.folded.clone(), k.class)).collect()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear and return the dirty flag; the persistence writer coalesces
    /// on this.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

/// MIME types a destination accepts directly.
pub fn input_types(dest: &Destination) -> Vec<MimeType> {
    dest.capability
        .input_formats
        .iter()
        .filter_map(|f| MimeType::parse(f).ok())
        .collect()
}

/// Build the derived attribute bag served by GET-PRINTER-ATTRIBUTES.
pub fn derived_attributes(dest: &Destination) -> AttrBag {
    let mut attrs = AttrBag::new();
    attrs.insert("printer-name".into(), Attribute::name(dest.name.clone()));
    attrs.insert("printer-type".into(), Attribute::Keyword(dest.kind.to_string()));
    attrs.insert("printer-state".into(), Attribute::Enum(dest.state.to_string()));
    attrs.insert(
        "printer-state-message".into(),
        Attribute::Text(dest.state_message.clone()),
    );
    attrs.insert(
        "printer-state-reasons".into(),
        Attribute::Set(
            dest.reasons.iter().map(|r| Attribute::Keyword(r.to_string())).collect(),
        ),
    );
    attrs.insert("printer-is-accepting-jobs".into(), Attribute::Boolean(dest.accepting));
    attrs.insert("printer-info".into(), Attribute::Text(dest.info.clone()));
    attrs.insert("printer-location".into(), Attribute::Text(dest.location.clone()));
    attrs.insert(
        "printer-make-and-model".into(),
        Attribute::Text(dest.make_model.clone()),
    );
    if let Some(uri) = &dest.device_uri {
        attrs.insert("device-uri".into(), Attribute::Text(uri.clone()));
    }
    attrs.insert("color-supported".into(), Attribute::Boolean(dest.capability.color));
    attrs.insert(
        "sides-supported".into(),
        Attribute::Set(if dest.capability.duplex {
            vec![
                Attribute::Keyword("one-sided".into()),
                Attribute::Keyword("two-sided-long-edge".into()),
                Attribute::Keyword("two-sided-short-edge".into()),
            ]
        } else {
            vec![Attribute::Keyword("one-sided".into())]
        }),
    );
    attrs.insert(
        "media-supported".into(),
        Attribute::Set(
            dest.capability.page_sizes.iter().map(|s| Attribute::Keyword(s.clone())).collect(),
        ),
    );
    attrs.insert(
        "printer-resolution-supported".into(),
        Attribute::Set(
            dest.capability.resolutions.iter().map(|r| Attribute::Resolution(*r)).collect(),
        ),
    );
    attrs.insert(
        "finishings-supported".into(),
        Attribute::Set(
            dest.capability.finishings.iter().map(|f| Attribute::Keyword(f.clone())).collect(),
        ),
    );
    attrs.insert(
        "output-bin-supported".into(),
        Attribute::Set(
            dest.capability.output_bins.iter().map(|b| Attribute::Keyword(b.clone())).collect(),
        ),
    );
    let mut formats: Vec<Attribute> = dest
        .capability
        .input_formats
        .iter()
        .map(|f| Attribute::Keyword(f.clone()))
        .collect();
    formats.push(Attribute::Keyword(spool_core::mime::RAW_MIME.into()));
    attrs.insert("document-format-supported".into(), Attribute::Set(formats));
    if dest.kind.is_class() {
        attrs.insert(
            "member-names".into(),
            Attribute::Set(dest.members.iter().map(|m| Attribute::name(m.clone())).collect()),
        );
    }
    attrs.insert("job-quota-period".into(), Attribute::Integer(dest.quota.period_secs as i64));
    attrs.insert("job-page-limit".into(), Attribute::Integer(dest.quota.page_limit as i64));
    attrs.insert("job-k-limit".into(), Attribute::Integer(dest.quota.k_limit as i64));
    attrs
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
