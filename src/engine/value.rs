// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Runtime-typed value container backing data slots.
//!
//! A slot may carry any value type. Primitives are kept inline as a tagged
//! scalar so numeric coercion stays allocation-free; everything else lives in
//! a shared, lockable storage cell so that forwarding operators can alias a
//! value instead of copying it. The container has four observable states:
//! empty, scalar, owned instance, and aliased instance (mutable or
//! read-only).
//!
//! Typed access hands out owned lock guards ([`ValueRef`] / [`ValueMut`]) so
//! accessors can outlive the borrow of the slot that produced them. The
//! publication protocol guarantees a cell is never contended (one writer
//! before publication, at most one mutable reader after), so all lock
//! acquisition here is `try_`-based and a failed acquisition is reported as
//! an absent value rather than a wait.

use std::any::Any as StdAny;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{
    OwnedRwLockMappedWriteGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

/// Bound for values that can travel through a slot.
///
/// Implemented automatically for every `Clone + Send + Sync + 'static` type.
/// `Clone` is required because `forward` falls back to a deep copy when a
/// downstream consumer demands mutable access the dependency cannot grant.
pub trait SlotValue: Send + Sync + 'static {
    fn as_any(&self) -> &dyn StdAny;
    fn as_any_mut(&mut self) -> &mut dyn StdAny;
    fn clone_value(&self) -> Box<dyn SlotValue>;
    fn type_name(&self) -> &'static str;
}

impl<T: Clone + Send + Sync + 'static> SlotValue for T {
    fn as_any(&self) -> &dyn StdAny {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn StdAny {
        self
    }

    fn clone_value(&self) -> Box<dyn SlotValue> {
        Box::new(self.clone())
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Shared storage cell for instance values. Aliased slots clone the `Arc`,
/// so a preset -> forward chain keeps a single physical storage.
pub(crate) type Cell = Arc<RwLock<Box<dyn SlotValue>>>;

macro_rules! scalar_variants {
    ($(($variant:ident, $ty:ty)),* $(,)?) => {
        /// Inline storage for the primitive set, preserving the exact
        /// declared type alongside the coercible payload.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum Scalar {
            $($variant($ty),)*
        }

        impl Scalar {
            /// Captures `value` as a scalar if its concrete type is in the
            /// primitive set.
            pub(crate) fn capture(value: &dyn StdAny) -> Option<Scalar> {
                $(
                    if let Some(v) = value.downcast_ref::<$ty>() {
                        return Some(Scalar::$variant(*v));
                    }
                )*
                None
            }

            /// Exact-typed view; `None` unless `T` matches the stored
            /// variant precisely.
            pub(crate) fn get<T: 'static>(&self) -> Option<&T> {
                match self {
                    $(Scalar::$variant(v) => (v as &dyn StdAny).downcast_ref::<T>(),)*
                }
            }

            pub(crate) fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
                match self {
                    $(Scalar::$variant(v) => (v as &mut dyn StdAny).downcast_mut::<T>(),)*
                }
            }

            fn widen(&self) -> Widened {
                match *self {
                    Scalar::Bool(v) => Widened::Bool(v),
                    Scalar::I8(v) => Widened::Signed(v as i64),
                    Scalar::I16(v) => Widened::Signed(v as i64),
                    Scalar::I32(v) => Widened::Signed(v as i64),
                    Scalar::I64(v) => Widened::Signed(v),
                    Scalar::U8(v) => Widened::Unsigned(v as u64),
                    Scalar::U16(v) => Widened::Unsigned(v as u64),
                    Scalar::U32(v) => Widened::Unsigned(v as u64),
                    Scalar::U64(v) => Widened::Unsigned(v),
                    Scalar::F32(v) => Widened::Float(v as f64),
                    Scalar::F64(v) => Widened::Float(v),
                }
            }
        }
    };
}

scalar_variants! {
    (Bool, bool),
    (I8, i8),
    (I16, i16),
    (I32, i32),
    (I64, i64),
    (U8, u8),
    (U16, u16),
    (U32, u32),
    (U64, u64),
    (F32, f32),
    (F64, f64),
}

enum Widened {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// Conversion target for [`AnyValue::coerce`], the `as`-cast style numeric
/// coercion across the scalar set.
pub trait Coerce: Copy + 'static {
    fn coerce(scalar: Scalar) -> Self;

    /// Value reported for empty or non-scalar storage.
    fn zero() -> Self;
}

macro_rules! coerce_numeric {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Coerce for $ty {
                fn coerce(scalar: Scalar) -> Self {
                    match scalar.widen() {
                        Widened::Bool(b) => (b as u8) as $ty,
                        Widened::Signed(v) => v as $ty,
                        Widened::Unsigned(v) => v as $ty,
                        Widened::Float(v) => v as $ty,
                    }
                }

                fn zero() -> Self {
                    0 as $ty
                }
            }
        )*
    };
}

coerce_numeric!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Coerce for bool {
    fn coerce(scalar: Scalar) -> Self {
        match scalar.widen() {
            Widened::Bool(b) => b,
            Widened::Signed(v) => v != 0,
            Widened::Unsigned(v) => v != 0,
            Widened::Float(v) => v != 0.0,
        }
    }

    fn zero() -> Self {
        false
    }
}

#[derive(Clone, Default)]
enum Storage {
    #[default]
    Empty,
    Scalar(Scalar),
    Instance {
        cell: Cell,
        /// Read-only alias (`alias_const` / const forward). Mutable access
        /// through this storage is refused.
        readonly: bool,
    },
}

/// The dynamic container held by every slot.
///
/// Cloning is cheap: scalars copy, instances share their storage cell.
#[derive(Clone, Default)]
pub struct AnyValue {
    storage: Storage,
}

impl AnyValue {
    /// Wraps `value`, choosing inline scalar storage for the primitive set
    /// and a fresh shared cell otherwise.
    pub fn of<T: SlotValue>(value: T) -> Self {
        let storage = match Scalar::capture(&value) {
            Some(scalar) => Storage::Scalar(scalar),
            None => Storage::Instance {
                cell: Arc::new(RwLock::new(Box::new(value) as Box<dyn SlotValue>)),
                readonly: false,
            },
        };
        AnyValue { storage }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.storage, Storage::Empty)
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self.storage, Storage::Instance { readonly: true, .. })
    }

    pub(crate) fn scalar_slot<T: 'static>(&self) -> Option<&T> {
        match &self.storage {
            Storage::Scalar(s) => s.get::<T>(),
            _ => None,
        }
    }

    pub(crate) fn scalar_slot_mut<T: 'static>(&mut self) -> Option<&mut T> {
        match &mut self.storage {
            Storage::Scalar(s) => s.get_mut::<T>(),
            _ => None,
        }
    }

    pub(crate) fn cell(&self) -> Option<(Cell, bool)> {
        match &self.storage {
            Storage::Instance { cell, readonly } => Some((cell.clone(), *readonly)),
            _ => None,
        }
    }

    pub(crate) fn set_cell(&mut self, cell: Cell, readonly: bool) {
        self.storage = Storage::Instance { cell, readonly };
    }

    /// Whether the instance storage is exclusively ours: not aliased by any
    /// other slot or external handle, and writable.
    pub(crate) fn is_exclusive_instance(&self) -> bool {
        match &self.storage {
            Storage::Instance { cell, readonly } => !*readonly && Arc::strong_count(cell) == 1,
            _ => false,
        }
    }

    /// Mutable alias: shares the other container's storage cell. Scalars
    /// have no cell and copy instead.
    pub(crate) fn alias_from(&mut self, other: &AnyValue) {
        self.storage = other.storage.clone();
    }

    /// Read-only alias of the other container's storage.
    pub(crate) fn alias_const_from(&mut self, other: &AnyValue) {
        self.storage = match &other.storage {
            Storage::Instance { cell, .. } => Storage::Instance {
                cell: cell.clone(),
                readonly: true,
            },
            s => s.clone(),
        };
    }

    /// Independent copy: scalars copy inline, instances deep-copy into a
    /// fresh cell via [`SlotValue::clone_value`].
    pub(crate) fn assign_from(&mut self, other: &AnyValue) {
        self.storage = match &other.storage {
            Storage::Empty => Storage::Empty,
            Storage::Scalar(s) => Storage::Scalar(*s),
            Storage::Instance { cell, .. } => match cell.try_read() {
                Ok(guard) => Storage::Instance {
                    cell: Arc::new(RwLock::new(guard.clone_value())),
                    readonly: false,
                },
                Err(_) => Storage::Empty,
            },
        };
    }

    /// Numeric coercion over scalar storage; instance storage is probed for
    /// a primitive payload. Empty or non-primitive storage yields zero.
    pub(crate) fn coerce<T: Coerce>(&self) -> T {
        match &self.storage {
            Storage::Scalar(s) => T::coerce(*s),
            Storage::Instance { cell, .. } => cell
                .try_read()
                .ok()
                .and_then(|guard| Scalar::capture(guard.as_any()))
                .map(T::coerce)
                .unwrap_or_else(T::zero),
            Storage::Empty => T::zero(),
        }
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.storage {
            Storage::Empty => write!(f, "AnyValue::Empty"),
            Storage::Scalar(s) => write!(f, "AnyValue::Scalar({:?})", s),
            Storage::Instance { readonly, .. } => {
                write!(f, "AnyValue::Instance {{ readonly: {} }}", readonly)
            }
        }
    }
}

/// Owned read access to a typed slot value. Holds the storage lock for its
/// lifetime; drop promptly inside operators.
pub enum ValueRef<T: 'static> {
    /// Scalar payload read through the slot's own container lock.
    Inline(OwnedRwLockReadGuard<AnyValue, T>),
    /// Instance payload read through the shared storage cell.
    Cell(OwnedRwLockReadGuard<Box<dyn SlotValue>, T>),
}

impl<T: 'static> Deref for ValueRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            ValueRef::Inline(g) => g,
            ValueRef::Cell(g) => g,
        }
    }
}

/// Owned write access to a typed slot value; the mutable counterpart of
/// [`ValueRef`]. Only committers and mutable dependencies can obtain one.
pub enum ValueMut<T: 'static> {
    Inline(OwnedRwLockMappedWriteGuard<AnyValue, T>),
    Cell(OwnedRwLockMappedWriteGuard<Box<dyn SlotValue>, T>),
}

impl<T: 'static> Deref for ValueMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            ValueMut::Inline(g) => g,
            ValueMut::Cell(g) => g,
        }
    }
}

impl<T: 'static> DerefMut for ValueMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            ValueMut::Inline(g) => g,
            ValueMut::Cell(g) => g,
        }
    }
}

pub(crate) fn read_cell<T: 'static>(cell: Cell) -> Option<ValueRef<T>> {
    let guard = cell.try_read_owned().ok()?;
    OwnedRwLockReadGuard::try_map(guard, |boxed: &Box<dyn SlotValue>| {
        let value: &dyn SlotValue = boxed.as_ref();
        value.as_any().downcast_ref::<T>()
    })
        .ok()
        .map(ValueRef::Cell)
}

pub(crate) fn write_cell<T: 'static>(cell: Cell) -> Option<ValueMut<T>> {
    let guard = cell.try_write_owned().ok()?;
    OwnedRwLockWriteGuard::try_map(guard, |boxed: &mut Box<dyn SlotValue>| {
        let value: &mut dyn SlotValue = boxed.as_mut();
        value.as_any_mut().downcast_mut::<T>()
    })
        .ok()
        .map(ValueMut::Cell)
}

/// Caller-owned shared storage, used to preset a slot before a run or to
/// alias an externally owned object into a committer. The caller keeps the
/// handle and can read the (possibly transformed) value back after the run.
pub struct SharedValue<T: SlotValue> {
    cell: Cell,
    _marker: PhantomData<fn() -> T>,
}

impl<T: SlotValue> SharedValue<T> {
    pub fn new(value: T) -> Self {
        SharedValue {
            cell: Arc::new(RwLock::new(Box::new(value) as Box<dyn SlotValue>)),
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> Option<ValueRef<T>> {
        read_cell(self.cell.clone())
    }

    pub fn get_mut(&self) -> Option<ValueMut<T>> {
        write_cell(self.cell.clone())
    }

    pub(crate) fn cell(&self) -> Cell {
        self.cell.clone()
    }
}

impl<T: SlotValue> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        SharedValue {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}
