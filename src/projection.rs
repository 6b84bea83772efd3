//! Attribute projection between local stores and remote attribute bags
//!
//! A ProjectionTable declares, once at startup, how each locally-typed
//! field maps onto a remote string attribute. The table then converts in
//! both directions with the create/update asymmetry eventually consistent
//! services expect: creates withhold zero values so the service applies
//! its own defaults, updates send exactly the fields the caller declared
//! changed.

use crate::error::{ProjectionError, Result};
use crate::types::{AttrKind, AttrValue, RemoteAttributes, ResourceData};
use std::collections::{HashMap, HashSet};

/// Declares how one local field maps onto one remote attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub local_name: String,
    pub remote_name: String,
    pub kind: AttrKind,
    /// Marks an attribute whose value the remote service computes when it
    /// is not explicitly set. Informational to the projection itself:
    /// create withholds every zero value whether or not a spec carries
    /// this flag, and updates always send the fields they list. Adapters
    /// read it to tell a server-assigned default apart from an explicit
    /// zero when reconciling refreshed state.
    pub optional_computed: bool,
}

impl AttributeSpec {
    pub fn new(
        local_name: impl Into<String>,
        remote_name: impl Into<String>,
        kind: AttrKind,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            remote_name: remote_name.into(),
            kind,
            optional_computed: false,
        }
    }

    pub fn bool(local_name: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self::new(local_name, remote_name, AttrKind::Bool)
    }

    pub fn int(local_name: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self::new(local_name, remote_name, AttrKind::Int)
    }

    pub fn string(local_name: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self::new(local_name, remote_name, AttrKind::String)
    }

    /// Marks the attribute as optional+computed.
    pub fn optional_computed(mut self) -> Self {
        self.optional_computed = true;
        self
    }
}

/// Builder for ProjectionTable
#[derive(Debug, Default)]
pub struct ProjectionTableBuilder {
    specs: Vec<AttributeSpec>,
}

impl ProjectionTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Validates that the mapping is injective in both name columns and
    /// freezes the table.
    pub fn build(self) -> Result<ProjectionTable> {
        let mut specs = HashMap::with_capacity(self.specs.len());
        let mut remote_seen = HashSet::with_capacity(self.specs.len());

        for spec in self.specs {
            if !remote_seen.insert(spec.remote_name.clone()) {
                return Err(ProjectionError::DuplicateAttribute(spec.remote_name));
            }
            if let Some(previous) = specs.insert(spec.local_name.clone(), spec) {
                return Err(ProjectionError::DuplicateAttribute(previous.local_name));
            }
        }

        Ok(ProjectionTable { specs })
    }
}

/// Immutable mapping between local fields and remote attributes.
///
/// Iteration order over the table is irrelevant to every operation; the
/// output bags are themselves unordered maps.
#[derive(Debug, Clone)]
pub struct ProjectionTable {
    specs: HashMap<String, AttributeSpec>,
}

impl ProjectionTable {
    pub fn builder() -> ProjectionTableBuilder {
        ProjectionTableBuilder::new()
    }

    pub fn spec(&self, local_name: &str) -> Option<&AttributeSpec> {
        self.specs.get(local_name)
    }

    pub fn spec_for_remote(&self, remote_name: &str) -> Option<&AttributeSpec> {
        self.specs
            .values()
            .find(|spec| spec.remote_name == remote_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every remote attribute name in the table, sorted, for describe
    /// calls that must enumerate the attributes to fetch.
    pub fn remote_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .specs
            .values()
            .map(|spec| spec.remote_name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Decodes a remote attribute bag into the local store.
    ///
    /// Every attribute in the table is written: a present key parses
    /// strictly per its kind, an absent key writes the kind's zero value.
    /// Store fields outside the table are left untouched.
    pub fn to_resource_data(
        &self,
        remote: &RemoteAttributes,
        data: &mut ResourceData,
    ) -> Result<()> {
        for spec in self.specs.values() {
            match remote.get(&spec.remote_name) {
                Some(raw) => {
                    let value = AttrValue::parse(spec.kind, raw).ok_or_else(|| {
                        ProjectionError::InvalidRemoteValue {
                            name: spec.local_name.clone(),
                            value: raw.clone(),
                            kind: spec.kind,
                        }
                    })?;
                    data.set(spec.local_name.clone(), value);
                }
                None => data.set(spec.local_name.clone(), AttrValue::zero(spec.kind)),
            }
        }
        Ok(())
    }

    /// Encodes the store for a create call.
    ///
    /// Zero values are withheld: a false boolean is never sent, and a zero
    /// integer or empty string stays with the service default rather than
    /// overriding it.
    pub fn to_api_attributes_for_create(&self, data: &ResourceData) -> Result<RemoteAttributes> {
        let mut attributes = RemoteAttributes::new();

        for spec in self.specs.values() {
            let value = self.store_value(data, spec)?;
            if value.is_zero() {
                continue;
            }
            attributes.insert(spec.remote_name.clone(), value.encode());
        }

        Ok(attributes)
    }

    /// Encodes exactly the fields listed in `changed` for an update call.
    ///
    /// Encoding is unconditional: an explicit revert to zero must reach
    /// the remote API. A name without a table entry fails fast rather
    /// than being silently dropped.
    pub fn to_api_attributes_for_update(
        &self,
        data: &ResourceData,
        changed: &[&str],
    ) -> Result<RemoteAttributes> {
        let mut attributes = RemoteAttributes::new();

        for &name in changed {
            let spec = self
                .specs
                .get(name)
                .ok_or_else(|| ProjectionError::UnknownAttribute(name.to_string()))?;
            let value = self.store_value(data, spec)?;
            attributes.insert(spec.remote_name.clone(), value.encode());
        }

        Ok(attributes)
    }

    /// Reads the store value for a spec, zero-filling absent fields and
    /// rejecting kind mismatches.
    fn store_value(&self, data: &ResourceData, spec: &AttributeSpec) -> Result<AttrValue> {
        match data.get(&spec.local_name) {
            None => Ok(AttrValue::zero(spec.kind)),
            Some(value) if value.kind() == spec.kind => Ok(value.clone()),
            Some(value) => Err(ProjectionError::TypeMismatch {
                name: spec.local_name.clone(),
                expected: spec.kind,
                actual: value.kind(),
            }),
        }
    }
}
