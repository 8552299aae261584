// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Data slots: named, typed, single-assignment publication cells.
//!
//! A slot is the junction between vertices. It promises its consumers that
//! once `ready` is observed the value can be used without synchronization,
//! which holds because the slot is written by exactly one acquirer per run
//! and published with release ordering. The whole protocol is lock-free on
//! the hot path: a CAS decides the writer, an atomic three-state counter
//! arbitrates mutability, and publication walks the successor edges.
//!
//! Writing goes through a [`Committer`], a scoped single-winner handle that
//! publishes on drop unless cancelled. A separate empty flag lets a producer
//! publish "no value" while keeping the underlying storage for reuse.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::engine::closure::ClosureContext;
use crate::engine::dependency::Dependency;
use crate::engine::lock;
use crate::engine::value::{write_cell, AnyValue, Cell, Coerce, SharedValue, SlotValue, ValueMut, ValueRef};
use crate::engine::vertex::Vertex;
use crate::errors::codes;
use crate::observability::messages::engine::{DoubleRelease, TypeDeclarationConflict};

/// Hook invoked just before successor notification when a slot publishes.
pub type EmitHook = Arc<dyn Fn(&Arc<Vertex>, &AnyValue) + Send + Sync>;

enum Binding {
    Unbound,
    Bound(Arc<ClosureContext>),
    Sealed,
}

#[derive(Default)]
struct Declared {
    type_id: Option<(TypeId, &'static str)>,
    error: bool,
}

pub struct Slot {
    name: String,
    index: usize,

    // Static wiring, set once during build.
    producer: OnceLock<Weak<Vertex>>,
    successors: OnceLock<Vec<Weak<Dependency>>>,
    on_emit: OnceLock<EmitHook>,
    declared: StdMutex<Declared>,

    // Per-run state.
    acquired: AtomicBool,
    value: Arc<RwLock<AnyValue>>,
    empty: AtomicBool,
    has_preset: AtomicBool,
    active: AtomicBool,
    binding: StdMutex<Binding>,
    ready: AtomicBool,
    dep_state: AtomicI32,
}

impl Slot {
    pub(crate) fn new(name: String, index: usize) -> Arc<Self> {
        Arc::new(Slot {
            name,
            index,
            producer: OnceLock::new(),
            successors: OnceLock::new(),
            on_emit: OnceLock::new(),
            declared: StdMutex::new(Declared::default()),
            acquired: AtomicBool::new(false),
            value: Arc::new(RwLock::new(AnyValue::default())),
            empty: AtomicBool::new(true),
            has_preset: AtomicBool::new(false),
            active: AtomicBool::new(false),
            binding: StdMutex::new(Binding::Unbound),
            ready: AtomicBool::new(false),
            dep_state: AtomicI32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the value has been published for the current run.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Ready with no value counts as empty, as does untouched storage left
    /// over from a previous run.
    pub fn is_empty(&self) -> bool {
        if self.empty.load(Ordering::Relaxed) {
            return true;
        }
        self.value.try_read().map(|v| v.is_empty()).unwrap_or(false)
    }

    pub fn producer(&self) -> Option<Arc<Vertex>> {
        self.producer.get().and_then(Weak::upgrade)
    }

    /// True when a downstream dependency declared mutable access; producers
    /// use this to decide between aliasing and copying on `forward`.
    pub fn need_mutable(&self) -> bool {
        self.dep_state.load(Ordering::Relaxed) == 2
    }

    pub fn has_preset_value(&self) -> bool {
        self.has_preset.load(Ordering::Relaxed)
    }

    /// Records the value type emitted into this slot. The first declaration
    /// wins; a later conflicting declaration flags the slot and fails the
    /// graph build. Declaring [`AnyValue`] never conflicts.
    pub fn declare_type<T: SlotValue>(self: &Arc<Self>) -> OutputData<T> {
        if TypeId::of::<T>() == TypeId::of::<AnyValue>() {
            return OutputData::bound(self.clone());
        }
        let mut declared = lock(&self.declared);
        match declared.type_id {
            None => {
                declared.type_id = Some((TypeId::of::<T>(), std::any::type_name::<T>()));
                OutputData::bound(self.clone())
            }
            Some((id, _)) if id == TypeId::of::<T>() => OutputData::bound(self.clone()),
            Some((_, previous)) => {
                tracing::warn!(
                    "{}",
                    TypeDeclarationConflict {
                        slot: &self.name,
                        declared: std::any::type_name::<T>(),
                        previous,
                    }
                );
                declared.error = true;
                OutputData::unbound()
            }
        }
    }

    /// Competes for write access; the single winning committer publishes on
    /// drop. Losers receive an inert committer.
    pub fn emit<T: SlotValue>(self: &Arc<Self>) -> Committer<T> {
        Committer::new(self.clone())
    }

    /// Injects caller-owned storage the next committer will reuse instead of
    /// constructing fresh storage. The caller keeps the [`SharedValue`]
    /// handle to read the result back after the run.
    pub fn preset<T: SlotValue>(&self, shared: &SharedValue<T>) {
        if let Ok(mut value) = self.value.try_write() {
            value.set_cell(shared.cell(), false);
            self.has_preset.store(true, Ordering::Relaxed);
        }
    }

    /// Publishes this slot from a resolved dependency, aliasing when the
    /// mutability contract allows it and copying otherwise.
    pub fn forward(self: &Arc<Self>, dependency: &Dependency) -> bool {
        if !dependency.ready() {
            return false;
        }
        if !self.acquire() {
            return false;
        }
        let source = match dependency.target().any_snapshot() {
            Some(any) => any,
            None => return false,
        };
        {
            let mut destination = match self.value.try_write() {
                Ok(v) => v,
                Err(_) => return false,
            };
            if self.need_mutable() {
                if dependency.is_mutable() && !source.is_readonly() {
                    destination.alias_from(&source);
                } else {
                    destination.assign_from(&source);
                }
            } else if dependency.is_mutable() {
                destination.alias_from(&source);
            } else {
                destination.alias_const_from(&source);
            }
        }
        self.empty.store(false, Ordering::Relaxed);
        self.release();
        true
    }

    /// Read-only typed access; `None` before publication, when empty, or on
    /// a type mismatch.
    pub fn value<T: 'static>(&self) -> Option<ValueRef<T>> {
        let guard = self.value.clone().try_read_owned().ok()?;
        if self.empty.load(Ordering::Relaxed) || guard.is_empty() {
            return None;
        }
        if guard.scalar_slot::<T>().is_some() {
            return OwnedRwLockReadGuard::try_map(guard, |v| v.scalar_slot::<T>())
                .ok()
                .map(ValueRef::Inline);
        }
        let (cell, _) = guard.cell()?;
        drop(guard);
        crate::engine::value::read_cell(cell)
    }

    /// Numeric coercion of the slot value; zero when empty.
    pub fn coerce<T: Coerce>(&self) -> T {
        if self.is_empty() {
            return T::zero();
        }
        match self.value.try_read() {
            Ok(guard) => guard.coerce::<T>(),
            Err(_) => T::zero(),
        }
    }

    // ---- committer support -------------------------------------------------

    pub(crate) fn acquire(&self) -> bool {
        self.acquired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::Relaxed);
    }

    pub(crate) fn set_value<T: SlotValue>(&self, value: T) -> bool {
        match self.value.try_write() {
            Ok(mut guard) => {
                *guard = AnyValue::of(value);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn set_alias(&self, cell: Cell, readonly: bool) -> bool {
        match self.value.try_write() {
            Ok(mut guard) => {
                guard.set_cell(cell, readonly);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn any_snapshot(&self) -> Option<AnyValue> {
        self.value.try_read().ok().map(|guard| guard.clone())
    }

    /// Mutable typed access to existing storage, used for preset reuse and
    /// mutable dependencies. Refuses read-only aliases.
    pub(crate) fn value_mut<T: 'static>(&self) -> Option<ValueMut<T>> {
        let guard = self.value.clone().try_write_owned().ok()?;
        if guard.scalar_slot::<T>().is_some() {
            return OwnedRwLockWriteGuard::try_map(guard, |v| v.scalar_slot_mut::<T>())
                .ok()
                .map(ValueMut::Inline);
        }
        let (cell, readonly) = guard.cell()?;
        if readonly {
            return None;
        }
        drop(guard);
        write_cell(cell)
    }

    /// Mutable typed access that guarantees exclusively owned storage of
    /// type `T`, constructing it on demand and discarding aliases.
    pub(crate) fn certain_value_mut<T: SlotValue + Default>(&self) -> Option<ValueMut<T>> {
        let mut guard = self.value.clone().try_write_owned().ok()?;
        let reuse_inline = guard.scalar_slot::<T>().is_some();
        let reuse_cell = !reuse_inline
            && guard.is_exclusive_instance()
            && guard
                .cell()
                .and_then(|(cell, _)| cell.try_read().ok().map(|v| v.as_any().is::<T>()))
                .unwrap_or(false);
        if !reuse_inline && !reuse_cell {
            *guard = AnyValue::of(T::default());
        }
        if guard.scalar_slot::<T>().is_some() {
            return OwnedRwLockWriteGuard::try_map(guard, |v| v.scalar_slot_mut::<T>())
                .ok()
                .map(ValueMut::Inline);
        }
        let (cell, _) = guard.cell()?;
        drop(guard);
        write_cell(cell)
    }

    // ---- dependency support ------------------------------------------------

    /// Moves the slot into the immutable-readers state. Fails only if a
    /// mutable reader already claimed it.
    pub(crate) fn acquire_immutable_depend(&self) -> bool {
        self.dep_state.swap(1, Ordering::Relaxed) != 2
    }

    /// Moves the slot into the single-mutable-reader state. Succeeds only
    /// from the unclaimed state.
    pub(crate) fn acquire_mutable_depend(&self) -> bool {
        self.dep_state.swap(2, Ordering::Relaxed) == 0
    }

    // ---- wiring ------------------------------------------------------------

    pub(crate) fn set_producer(&self, producer: Weak<Vertex>) {
        let _ = self.producer.set(producer);
    }

    pub(crate) fn set_successors(&self, successors: Vec<Weak<Dependency>>) {
        let _ = self.successors.set(successors);
    }

    pub(crate) fn set_on_emit(&self, hook: EmitHook) {
        let _ = self.on_emit.set(hook);
    }

    pub(crate) fn declared_error(&self) -> bool {
        lock(&self.declared).error
    }

    // ---- run lifecycle -----------------------------------------------------

    /// Clears run state while keeping the value storage for reuse.
    pub(crate) fn reset(&self) {
        self.acquired.store(false, Ordering::Relaxed);
        self.empty.store(true, Ordering::Relaxed);
        self.has_preset.store(false, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        *lock(&self.binding) = Binding::Unbound;
        self.ready.store(false, Ordering::Relaxed);
        self.dep_state.store(0, Ordering::Relaxed);
    }

    /// Attaches this slot to a run's closure. Returns false when the slot is
    /// already published or already bound, in which case the closure does
    /// not wait on it.
    pub(crate) fn bind(self: &Arc<Self>, closure: &Arc<ClosureContext>) -> bool {
        closure.depend_data_add();
        closure.add_waiting_slot(self.clone());
        let mut binding = lock(&self.binding);
        match &*binding {
            Binding::Unbound => {
                *binding = Binding::Bound(closure.clone());
                true
            }
            Binding::Bound(_) | Binding::Sealed => {
                drop(binding);
                closure.data_published();
                false
            }
        }
    }

    /// Publishes the slot: seals the binding, flips `ready`, notifies the
    /// closure and every successor edge, and drains vertices that became
    /// runnable. A second release in one run is a wiring bug and aborts.
    pub(crate) fn release(self: &Arc<Self>) {
        let bound = {
            let mut binding = lock(&self.binding);
            match std::mem::replace(&mut *binding, Binding::Sealed) {
                Binding::Sealed => {
                    tracing::error!("{}", DoubleRelease { slot: &self.name });
                    panic!("slot '{}' released twice in one run", self.name);
                }
                Binding::Bound(closure) => Some(closure),
                Binding::Unbound => None,
            }
        };
        self.ready.store(true, Ordering::Release);
        if let Some(closure) = bound {
            closure.data_published();
        }
        if let Some(hook) = self.on_emit.get() {
            if let Some(producer) = self.producer() {
                if let Ok(guard) = self.value.try_read() {
                    hook(&producer, &guard);
                }
            }
        }

        let successors = match self.successors.get() {
            Some(successors) => successors,
            None => return,
        };

        // A trivial producer mid-invoke collects follow-on runnables so the
        // outer drain loop picks them up instead of recursing.
        if let Some(producer) = self.producer() {
            let mut collector = producer.inline_collector();
            if let Some(pending) = collector.as_mut() {
                for successor in successors {
                    if let Some(edge) = successor.upgrade() {
                        edge.on_slot_ready(self, pending);
                    }
                }
                return;
            }
        }

        let mut runnable = Vec::new();
        for successor in successors {
            if let Some(edge) = successor.upgrade() {
                edge.on_slot_ready(self, &mut runnable);
            }
        }
        while let Some(vertex) = runnable.pop() {
            vertex.invoke(&mut runnable);
        }
    }

    /// Publishes the slot with no value. Used when an operator is skipped so
    /// downstream consumers observe an empty dependency instead of waiting
    /// forever.
    pub(crate) fn release_empty(self: &Arc<Self>) {
        if self.acquire() {
            self.release();
        }
    }

    // ---- activation --------------------------------------------------------

    /// First-pass dedup for the derivation phase. The vertex activation CAS
    /// is the real once-only gate; this flag only prunes repeat triggers.
    pub(crate) fn mark_active(&self) -> bool {
        self.active.swap(true, Ordering::Relaxed)
    }

    pub(crate) fn trigger(self: &Arc<Self>, pending: &mut Vec<Arc<Slot>>) {
        if !self.mark_active() && !self.ready() {
            tracing::trace!(slot = %self.name, "slot triggered for activation");
            pending.push(self.clone());
        }
    }

    /// Activates the producer of this slot. Reaching a slot nobody produces
    /// is an activation error.
    pub(crate) fn activate(
        &self,
        pending: &mut Vec<Arc<Slot>>,
        runnable: &mut Vec<Arc<Vertex>>,
        closure: &Arc<ClosureContext>,
    ) -> Result<(), i32> {
        let producer = match self.producer() {
            Some(producer) => producer,
            None => {
                tracing::warn!(slot = %self.name, "cannot activate slot with no producer");
                return Err(codes::NO_PRODUCER);
            }
        };
        producer.activate(pending, runnable, closure)
    }

    /// Activates everything this slot transitively depends on, collecting
    /// vertices that are immediately runnable.
    pub(crate) fn recursive_activate(
        self: &Arc<Self>,
        runnable: &mut Vec<Arc<Vertex>>,
        closure: &Arc<ClosureContext>,
    ) -> Result<(), i32> {
        let mut pending = Vec::new();
        self.trigger(&mut pending);
        while let Some(slot) = pending.pop() {
            slot.activate(&mut pending, runnable, closure)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("ready", &self.ready())
            .finish()
    }
}

/// Typed emit handle returned by [`Slot::declare_type`]. Unbound handles
/// come from conflicting declarations and emit inert committers.
pub struct OutputData<T: SlotValue> {
    slot: Option<Arc<Slot>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: SlotValue> OutputData<T> {
    fn bound(slot: Arc<Slot>) -> Self {
        OutputData {
            slot: Some(slot),
            _marker: std::marker::PhantomData,
        }
    }

    fn unbound() -> Self {
        OutputData {
            slot: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.slot.is_some()
    }

    pub fn slot(&self) -> Option<&Arc<Slot>> {
        self.slot.as_ref()
    }

    pub fn emit(&self) -> Committer<T> {
        match &self.slot {
            Some(slot) => slot.emit(),
            None => Committer::inert(),
        }
    }
}

impl<T: SlotValue> Clone for OutputData<T> {
    fn clone(&self) -> Self {
        OutputData {
            slot: self.slot.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

/// Scoped single-winner writer for a slot.
///
/// Created by [`Slot::emit`]; only the committer that won the acquire race
/// is valid. Dropping a valid committer publishes the slot; `cancel`
/// renounces publication. Publishing without touching the value publishes
/// empty.
pub struct Committer<T: SlotValue> {
    slot: Option<Arc<Slot>>,
    valid: bool,
    keep_reference: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: SlotValue> Committer<T> {
    fn new(slot: Arc<Slot>) -> Self {
        let valid = slot.acquire();
        let keep_reference = slot.has_preset_value();
        Committer {
            slot: Some(slot),
            valid,
            keep_reference,
            _marker: std::marker::PhantomData,
        }
    }

    fn inert() -> Self {
        Committer {
            slot: None,
            valid: false,
            keep_reference: false,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// In-place mutable access to the outgoing value, constructing default
    /// storage on demand. Preset storage is reused rather than replaced.
    pub fn get(&mut self) -> Option<ValueMut<T>>
    where
        T: Default,
    {
        if !self.valid {
            return None;
        }
        let slot = self.slot.as_ref()?;
        slot.set_empty(false);
        if self.keep_reference {
            slot.value_mut::<T>()
        } else {
            slot.certain_value_mut::<T>()
        }
    }

    /// Replaces the outgoing value.
    pub fn set(&mut self, value: T) {
        if !self.valid {
            return;
        }
        if let Some(slot) = &self.slot {
            slot.set_empty(false);
            slot.set_value(value);
        }
    }

    /// Publishes a mutable alias of externally owned storage.
    pub fn alias(&mut self, shared: &SharedValue<T>) {
        if !self.valid {
            return;
        }
        if let Some(slot) = &self.slot {
            slot.set_empty(false);
            slot.set_alias(shared.cell(), false);
            self.keep_reference = true;
        }
    }

    /// Publishes a read-only alias of externally owned storage.
    pub fn alias_const(&mut self, shared: &SharedValue<T>) {
        if !self.valid {
            return;
        }
        if let Some(slot) = &self.slot {
            slot.set_empty(false);
            slot.set_alias(shared.cell(), true);
            self.keep_reference = true;
        }
    }

    /// Marks the publication as empty without clearing the storage.
    pub fn clear(&mut self) {
        if !self.valid {
            return;
        }
        if let Some(slot) = &self.slot {
            slot.set_empty(true);
        }
    }

    /// Publishes now instead of at drop.
    pub fn release(&mut self) {
        if self.valid {
            self.valid = false;
            if let Some(slot) = self.slot.take() {
                slot.release();
            }
        }
    }

    /// Renounces publication; the drop becomes a no-op.
    pub fn cancel(&mut self) {
        if self.valid {
            self.valid = false;
            self.slot = None;
        }
    }
}

impl<T: SlotValue> Drop for Committer<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str) -> Arc<Slot> {
        let slot = Slot::new(name.to_string(), 0);
        slot.set_successors(Vec::new());
        slot
    }

    #[test]
    fn acquire_has_a_single_winner() {
        let data = slot("a");
        assert!(data.acquire());
        assert!(!data.acquire());
    }

    #[test]
    fn committer_publishes_on_drop() {
        let data = slot("a");
        {
            let mut committer = data.emit::<String>();
            assert!(committer.valid());
            committer.set("published".to_string());
        }
        assert!(data.ready());
        assert!(!data.is_empty());
        let value = data.value::<String>().expect("value");
        assert_eq!(&*value, "published");
    }

    #[test]
    fn losing_committer_is_inert() {
        let data = slot("a");
        let mut winner = data.emit::<String>();
        let mut loser = data.emit::<String>();
        assert!(winner.valid());
        assert!(!loser.valid());
        loser.set("ignored".to_string());
        drop(loser);
        assert!(!data.ready());
        winner.set("kept".to_string());
        drop(winner);
        assert_eq!(&*data.value::<String>().expect("value"), "kept");
    }

    #[test]
    fn cancelled_committer_does_not_publish() {
        let data = slot("a");
        {
            let mut committer = data.emit::<String>();
            committer.set("dropped".to_string());
            committer.cancel();
        }
        assert!(!data.ready());
    }

    #[test]
    fn untouched_committer_publishes_empty() {
        let data = slot("a");
        drop(data.emit::<String>());
        assert!(data.ready());
        assert!(data.is_empty());
        assert!(data.value::<String>().is_none());
    }

    #[test]
    fn clear_publishes_empty_but_keeps_storage() {
        let data = slot("a");
        {
            let mut committer = data.emit::<String>();
            committer.set("hidden".to_string());
            committer.clear();
        }
        assert!(data.ready());
        assert!(data.is_empty());
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_aborts() {
        let data = slot("a");
        data.acquire();
        data.release();
        data.release();
    }

    #[test]
    fn type_declaration_conflict_flags_the_slot() {
        let data = slot("a");
        let first = data.declare_type::<String>();
        assert!(first.valid());
        let again = data.declare_type::<String>();
        assert!(again.valid());
        let conflicting = data.declare_type::<i64>();
        assert!(!conflicting.valid());
        assert!(data.declared_error());
    }

    #[test]
    fn any_value_declaration_never_conflicts() {
        let data = slot("a");
        data.declare_type::<String>();
        let dynamic = data.declare_type::<AnyValue>();
        assert!(dynamic.valid());
        assert!(!data.declared_error());
    }

    #[test]
    fn preset_storage_is_reused_by_the_committer() {
        let data = slot("a");
        let shared = SharedValue::new(String::from("preset"));
        data.preset(&shared);
        {
            let mut committer = data.emit::<String>();
            let mut value = committer.get().expect("preset storage");
            value.push_str("-amended");
        }
        assert!(data.ready());
        assert_eq!(&*data.value::<String>().expect("value"), "preset-amended");
        // The caller still observes the mutation through its own handle.
        assert_eq!(&*shared.get().expect("shared"), "preset-amended");
    }

    #[test]
    fn scalar_emit_coerces() {
        let data = slot("a");
        {
            let mut committer = data.emit::<bool>();
            committer.set(true);
        }
        assert!(data.coerce::<bool>());
        assert_eq!(data.coerce::<i32>(), 1);
    }

    #[test]
    fn reset_keeps_value_storage_but_clears_state() {
        let data = slot("a");
        {
            let mut committer = data.emit::<String>();
            committer.set("round one".to_string());
        }
        assert!(data.ready());
        data.reset();
        assert!(!data.ready());
        assert!(data.is_empty());
        assert!(data.acquire());
    }
}
