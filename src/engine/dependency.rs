//! Dependency edges: the combined target + condition state machine.
//!
//! A dependency couples target readiness and condition evaluation into one
//! edge that stays correct when either slot resolves concurrently. The whole
//! state lives in a single signed counter driven by edge-triggered
//! increments: activation adds one token for an unconditional edge and two
//! for a conditional one, and every slot publication subtracts one. The
//! terminal values are 0 (resolved, possibly awaited) and -1 (condition
//! proven false, target never awaited). When a condition resolves false
//! after the target already published, the extra decrement below is what
//! keeps the two paths from double-counting.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::engine::slot::Slot;
use crate::engine::value::{Coerce, ValueMut, ValueRef};
use crate::engine::vertex::Vertex;
use crate::errors::codes;
use crate::observability::messages::engine::MutabilityConflict;

/// How an unsatisfied dependency affects its owning vertex at invoke time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EssentialLevel {
    /// Empty input is acceptable; the operator decides what to do.
    Optional,
    /// Empty input skips the operator; its emits are published empty.
    SkipIfEmpty,
    /// Empty input fails the run.
    Required,
}

impl EssentialLevel {
    pub(crate) fn from_u8(level: u8) -> Self {
        match level {
            0 => EssentialLevel::Optional,
            1 => EssentialLevel::SkipIfEmpty,
            _ => EssentialLevel::Required,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EssentialLevel::Optional => 0,
            EssentialLevel::SkipIfEmpty => 1,
            EssentialLevel::Required => 2,
        }
    }
}

pub struct Dependency {
    source: Weak<Vertex>,
    target: Arc<Slot>,
    condition: Option<Arc<Slot>>,
    establish_value: bool,
    mutable: AtomicBool,
    essential: AtomicU8,

    waiting: AtomicI64,
    established: AtomicBool,
    ready: AtomicBool,
}

impl Dependency {
    pub(crate) fn new(
        source: Weak<Vertex>,
        target: Arc<Slot>,
        condition: Option<Arc<Slot>>,
        establish_value: bool,
        mutable: bool,
        essential: EssentialLevel,
    ) -> Arc<Self> {
        Arc::new(Dependency {
            source,
            target,
            condition,
            establish_value,
            mutable: AtomicBool::new(mutable),
            essential: AtomicU8::new(essential.as_u8()),
            waiting: AtomicI64::new(0),
            established: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> &Arc<Slot> {
        &self.target
    }

    pub fn condition(&self) -> Option<&Arc<Slot>> {
        self.condition.as_ref()
    }

    /// Established and target published.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Condition (if any) resolved with the expected polarity.
    pub fn established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Ready with no published value.
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.load(Ordering::Relaxed)
    }

    pub fn essential_level(&self) -> EssentialLevel {
        EssentialLevel::from_u8(self.essential.load(Ordering::Relaxed))
    }

    /// Setup/on_activate hook: forwarding operators mirror downstream
    /// mutability demand onto their upstream dependency here.
    pub fn declare_mutable(&self, mutable: bool) {
        self.mutable.store(mutable, Ordering::Relaxed);
    }

    pub fn declare_essential(&self, level: EssentialLevel) {
        self.essential.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Declares the target slot's value type; conflicts surface at build.
    pub fn declare_type<T: crate::engine::value::SlotValue>(&self) -> bool {
        self.target.clone().declare_type::<T>().valid()
    }

    /// Read access to the resolved value; `None` until ready or when empty.
    pub fn value<T: 'static>(&self) -> Option<ValueRef<T>> {
        if !self.ready() || self.target.is_empty() {
            return None;
        }
        self.target.value::<T>()
    }

    /// Numeric coercion of the resolved value; zero until ready.
    pub fn coerce<T: Coerce>(&self) -> T {
        if !self.ready() {
            return T::zero();
        }
        self.target.coerce::<T>()
    }

    /// Mutable access to the resolved value; requires a mutable declaration
    /// honored during acquisition.
    pub fn mutable_value<T: 'static>(&self) -> Option<ValueMut<T>> {
        if !self.ready() || !self.is_mutable() {
            return None;
        }
        self.target.value_mut::<T>()
    }

    pub(crate) fn reset(&self) {
        self.waiting.store(0, Ordering::Relaxed);
        self.established.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
    }

    fn check_established(&self) -> bool {
        if self.condition.is_none() {
            self.established.store(true, Ordering::Release);
        } else if let Some(condition) = &self.condition {
            if condition.coerce::<bool>() == self.establish_value {
                self.established.store(true, Ordering::Release);
            }
        }
        self.established()
    }

    fn acquire_target(&self) -> Result<(), i32> {
        let acquired = if self.is_mutable() {
            self.target.acquire_mutable_depend()
        } else {
            self.target.acquire_immutable_depend()
        };
        if acquired {
            Ok(())
        } else {
            tracing::warn!(
                "{}",
                MutabilityConflict {
                    slot: self.target.name(),
                    mutable: self.is_mutable(),
                }
            );
            Err(codes::MUTABILITY_CONFLICT)
        }
    }

    /// Activates the edge once per run. Returns the number of edges (0 or 1)
    /// that were already satisfied at activation so the owning vertex can
    /// settle its waiting count; slots that still need activation are pushed
    /// to `pending`.
    pub(crate) fn activate(&self, pending: &mut Vec<Arc<Slot>>) -> Result<i64, i32> {
        let tokens = if self.condition.is_none() { 1 } else { 2 };
        let post = self.waiting.fetch_add(tokens, Ordering::AcqRel) + tokens;
        tracing::trace!(
            target_slot = %self.target.name(),
            waiting = post,
            "dependency activation"
        );
        // Terminal domain after activation: -1 and 0 mean both slots already
        // resolved before activation; 1 and 2 wait on future publications.
        match post {
            -1 => Ok(1),
            0 => {
                if self.check_established() {
                    self.acquire_target()?;
                    self.ready.store(self.target.ready(), Ordering::Release);
                }
                Ok(1)
            }
            1 => {
                if self.condition.is_none() {
                    self.established.store(true, Ordering::Release);
                    self.acquire_target()?;
                    self.target.trigger(pending);
                } else if let Some(condition) = &self.condition {
                    if !condition.ready() {
                        condition.trigger(pending);
                    } else if self.check_established() {
                        self.acquire_target()?;
                        self.target.trigger(pending);
                    }
                    // Condition resolved false while its second decrement is
                    // still in flight; that decrement finishes the edge.
                }
                Ok(0)
            }
            2 => {
                if let Some(condition) = &self.condition {
                    condition.trigger(pending);
                }
                Ok(0)
            }
            unexpected => {
                tracing::warn!(waiting = unexpected, "unexpected dependency counter value");
                Ok(0)
            }
        }
    }

    /// Publication notification from the target or condition slot. When the
    /// edge fully resolves, the owning vertex's waiting count is settled and
    /// the vertex is collected into `runnable` if this was its last edge.
    pub(crate) fn on_slot_ready(
        self: &Arc<Self>,
        slot: &Arc<Slot>,
        runnable: &mut Vec<Arc<Vertex>>,
    ) {
        let mut post = self.waiting.fetch_sub(1, Ordering::AcqRel) - 1;
        let is_condition = self
            .condition
            .as_ref()
            .map(|condition| Arc::ptr_eq(condition, slot))
            .unwrap_or(false);

        if is_condition {
            if self.check_established() {
                if post == 1 {
                    // Condition satisfied and the target is still pending:
                    // claim it and pull its producer into the active set.
                    let closure = self.source.upgrade().and_then(|v| v.closure());
                    if let Err(code) = self.acquire_target() {
                        if let Some(closure) = closure {
                            closure.finish(code);
                        }
                        return;
                    }
                    if let Some(closure) = closure {
                        if let Err(code) = self.target.recursive_activate(runnable, &closure) {
                            tracing::warn!(
                                slot = %self.target.name(),
                                code,
                                "recursive activation from condition failed"
                            );
                            closure.finish(code);
                            return;
                        }
                    }
                }
            } else if post != 0 {
                // Condition resolved false: the target will never be
                // awaited, so retire its token as well. The {0, -1} terminal
                // pair keeps a concurrent target publication from punching
                // through.
                post = self.waiting.fetch_sub(1, Ordering::AcqRel) - 1;
            }
        }

        if post == 0 {
            let ready = if is_condition {
                self.established() && self.target.ready()
            } else {
                self.check_established()
            };
            self.ready.store(ready, Ordering::Release);
            if let Some(source) = self.source.upgrade() {
                tracing::trace!(
                    vertex = source.index(),
                    slot = %slot.name(),
                    "dependency resolved"
                );
                if source.dependency_resolved() {
                    runnable.push(source);
                }
            }
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("target", &self.target.name())
            .field(
                "condition",
                &self.condition.as_ref().map(|c| c.name().to_string()),
            )
            .field("mutable", &self.is_mutable())
            .field("ready", &self.ready())
            .finish()
    }
}
