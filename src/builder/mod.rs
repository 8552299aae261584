// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Graph construction: wiring specs, linking, and materialization.
//!
//! The builder accepts operator wiring in arbitrary order. `finish` links
//! it: every symbolic slot name gets a stable index (first come, first
//! served) and structural errors such as duplicate producers surface as
//! [`BuildError`]. A finished builder materializes any number of
//! independent [`Graph`] instances through `build`.

mod registry;
mod spec;

pub use registry::OperatorRegistry;
pub use spec::{DependencySpec, EmitSpec, VertexSpec};

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::engine::dependency::Dependency;
use crate::engine::executor::TokioExecutor;
use crate::engine::graph::{Graph, GraphContexts};
use crate::engine::slot::Slot;
use crate::errors::BuildError;
use crate::observability::messages::link::{GraphBuilt, LinkFinished};
use crate::traits::executor::GraphExecutor;
use crate::traits::operator::Operator;

pub struct GraphBuilder {
    name: String,
    executor: Option<Arc<dyn GraphExecutor>>,
    registry: Option<Arc<OperatorRegistry>>,
    specs: Vec<Box<VertexSpec>>,
    slot_index_by_name: HashMap<String, usize>,
    producer_by_slot_index: HashMap<usize, usize>,
    finished: bool,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            name: String::new(),
            executor: None,
            registry: None,
            specs: Vec::new(),
            slot_index_by_name: HashMap::new(),
            producer_by_slot_index: HashMap::new(),
            finished: false,
        }
    }

    /// Display name used in diagnostics.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Executor driving graphs built from this builder. Defaults to a
    /// [`TokioExecutor`] bound to the current runtime.
    pub fn executor(&mut self, executor: Arc<dyn GraphExecutor>) -> &mut Self {
        self.executor = Some(executor);
        self
    }

    /// Registry resolving operators referenced by name.
    pub fn registry(&mut self, registry: Arc<OperatorRegistry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a vertex bound to a shared operator instance.
    pub fn add_vertex(&mut self, operator: Arc<dyn Operator>) -> &mut VertexSpec {
        let index = self.specs.len();
        self.specs
            .push(Box::new(VertexSpec::with_operator(index, operator)));
        &mut *self.specs[index]
    }

    /// Appends a vertex whose operator is resolved from the registry at
    /// build time.
    pub fn add_vertex_named(&mut self, operator_name: &str) -> &mut VertexSpec {
        let index = self.specs.len();
        self.specs.push(Box::new(VertexSpec::with_operator_name(
            index,
            operator_name,
        )));
        &mut *self.specs[index]
    }

    /// Revisits an earlier vertex spec by the index it reported.
    pub fn vertex(&mut self, index: usize) -> Option<&mut VertexSpec> {
        self.specs.get_mut(index).map(|spec| spec.as_mut())
    }

    pub fn vertex_specs(&self) -> impl Iterator<Item = &VertexSpec> {
        self.specs.iter().map(|spec| spec.as_ref())
    }

    /// Links the wiring: assigns stable slot indices in declaration order
    /// and validates that every slot has at most one producer and that
    /// named operators exist.
    pub fn finish(&mut self) -> Result<(), BuildError> {
        self.slot_index_by_name.clear();
        self.producer_by_slot_index.clear();
        for spec in &mut self.specs {
            spec.finish(&mut self.slot_index_by_name, &mut self.producer_by_slot_index)?;
        }
        for spec in &self.specs {
            if let Some(name) = spec.operator_name() {
                let known = self
                    .registry
                    .as_ref()
                    .map(|registry| registry.contains(name))
                    .unwrap_or(false);
                if !known {
                    return Err(BuildError::UnknownOperator {
                        vertex: spec.index(),
                        name: name.to_string(),
                    });
                }
            }
        }
        self.finished = true;
        tracing::debug!(
            "{}",
            LinkFinished {
                builder: &self.name,
                vertices: self.specs.len(),
                slots: self.slot_index_by_name.len(),
            }
        );
        Ok(())
    }

    /// Materializes an executable graph: slots, vertices, wired edges, and
    /// one `setup` call per vertex. May be called repeatedly; each graph is
    /// independent.
    pub fn build(&self) -> Result<Graph, BuildError> {
        if !self.finished {
            return Err(BuildError::NotFinished);
        }
        let executor: Arc<dyn GraphExecutor> = match &self.executor {
            Some(executor) => executor.clone(),
            None => Arc::new(TokioExecutor::current().ok_or(BuildError::NoExecutor)?),
        };

        let mut names: Vec<(&str, usize)> = self
            .slot_index_by_name
            .iter()
            .map(|(name, index)| (name.as_str(), *index))
            .collect();
        names.sort_by_key(|(_, index)| *index);
        let slots: Vec<Arc<Slot>> = names
            .into_iter()
            .map(|(name, index)| Slot::new(name.to_string(), index))
            .collect();

        let mut successors: Vec<Vec<Weak<Dependency>>> =
            (0..slots.len()).map(|_| Vec::new()).collect();
        let contexts = Arc::new(GraphContexts::default());

        let mut vertices = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            vertices.push(spec.build(
                executor.clone(),
                self.registry.as_deref(),
                &slots,
                &mut successors,
                contexts.clone(),
            )?);
        }

        for (slot, successor) in slots.iter().zip(successors) {
            slot.set_successors(successor);
        }
        for slot in &slots {
            if slot.declared_error() {
                return Err(BuildError::TypeConflict {
                    slot: slot.name().to_string(),
                });
            }
        }

        tracing::debug!(
            "{}",
            GraphBuilt {
                vertices: vertices.len(),
                slots: slots.len(),
            }
        );
        Ok(Graph::new(
            executor,
            vertices,
            slots,
            self.slot_index_by_name.clone(),
            contexts,
        ))
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
