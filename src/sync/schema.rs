use std::collections::HashSet;
use std::sync::Arc;

use super::SyncError;

type Getter<E> = Arc<dyn Fn(&E) -> serde_json::Value + Send + Sync>;

/// Emit behavior of one registered field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldOptions {
    /// Ride along whenever any other field is emitted.
    pub sync_always: bool,
    /// Emit at most once per client while the value stays unchanged.
    pub one_time: bool,
    /// 0 emits on every tick; N emits only when `current_tick % N == 0`.
    pub frequency: u64,
}

impl FieldOptions {
    pub fn every_tick() -> Self {
        Self::default()
    }

    pub fn always() -> Self {
        Self {
            sync_always: true,
            ..Self::default()
        }
    }

    pub fn every_n_ticks(frequency: u64) -> Self {
        Self {
            frequency,
            ..Self::default()
        }
    }

    pub fn once() -> Self {
        Self {
            one_time: true,
            ..Self::default()
        }
    }
}

/// One synced field: its wire name, bit position and emit behavior.
pub struct SyncFieldSpec<E> {
    pub name: String,
    pub bit_index: usize,
    pub options: FieldOptions,
    pub(super) getter: Getter<E>,
}

impl<E> SyncFieldSpec<E> {
    pub fn value_of(&self, entity: &E) -> serde_json::Value {
        (self.getter)(entity)
    }
}

impl<E> Clone for SyncFieldSpec<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            bit_index: self.bit_index,
            options: self.options,
            getter: Arc::clone(&self.getter),
        }
    }
}

/// Field table of one entity type, fields ordered by global bit index.
///
/// Built once at boot through [`SyncSchemaBuilder`]; the steady state needs
/// no type introspection, only the recorded getter closures.
pub struct SyncSchema<E> {
    entity_type: String,
    fields: Vec<SyncFieldSpec<E>>,
}

impl<E> std::fmt::Debug for SyncSchema<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSchema")
            .field("entity_type", &self.entity_type)
            .field(
                "fields",
                &self.fields.iter().map(|field| &field.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<E> SyncSchema<E> {
    pub fn builder(entity_type: impl Into<String>) -> SyncSchemaBuilder<E> {
        SyncSchemaBuilder {
            entity_type: entity_type.into(),
            inherited: Vec::new(),
            declared: Vec::new(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn fields(&self) -> &[SyncFieldSpec<E>] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Explicit registration step replacing attribute discovery: fields are
/// declared with their per-type bit index; inheriting a base schema offsets
/// the declared indices so base bits precede derived bits.
pub struct SyncSchemaBuilder<E> {
    entity_type: String,
    inherited: Vec<SyncFieldSpec<E>>,
    declared: Vec<SyncFieldSpec<E>>,
}

impl<E> SyncSchemaBuilder<E> {
    /// Flatten a base type's fields in front of this type's own.
    ///
    /// `project` maps the derived entity onto its embedded base state; every
    /// base getter is rewired through it. Must be called before `field`
    /// declarations are finalized by `build` so the offsets stay stable.
    pub fn inherit<P>(
        mut self,
        base: &SyncSchema<P>,
        project: impl Fn(&E) -> &P + Send + Sync + Copy + 'static,
    ) -> Self
    where
        P: 'static,
    {
        for spec in base.fields() {
            let base_getter = Arc::clone(&spec.getter);
            self.inherited.push(SyncFieldSpec {
                name: spec.name.clone(),
                bit_index: self.inherited.len(),
                options: spec.options,
                getter: Arc::new(move |entity: &E| base_getter(project(entity))),
            });
        }
        self
    }

    /// Declare a field at `bit_index` (relative to this type's own fields).
    pub fn field(
        mut self,
        name: impl Into<String>,
        bit_index: usize,
        options: FieldOptions,
        getter: impl Fn(&E) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.declared.push(SyncFieldSpec {
            name: name.into(),
            bit_index,
            options,
            getter: Arc::new(getter),
        });
        self
    }

    pub fn build(self) -> Result<SyncSchema<E>, SyncError> {
        let offset = self.inherited.len();
        let mut fields = self.inherited;

        for mut spec in self.declared {
            spec.bit_index += offset;
            fields.push(spec);
        }
        fields.sort_by_key(|spec| spec.bit_index);

        let mut seen_bits = HashSet::new();
        let mut seen_names = HashSet::new();
        for spec in &fields {
            if !seen_bits.insert(spec.bit_index) {
                return Err(SyncError::DuplicateBitIndex {
                    entity_type: self.entity_type,
                    bit_index: spec.bit_index,
                });
            }
            if !seen_names.insert(spec.name.clone()) {
                return Err(SyncError::DuplicateFieldName {
                    entity_type: self.entity_type,
                    field: spec.name.clone(),
                });
            }
        }
        if fields
            .last()
            .is_some_and(|spec| spec.bit_index != fields.len() - 1)
        {
            return Err(SyncError::SparseBitLayout {
                entity_type: self.entity_type,
            });
        }

        Ok(SyncSchema {
            entity_type: self.entity_type,
            fields,
        })
    }
}
