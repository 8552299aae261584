// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Vertex specifications: the wiring description the builder links.

use std::any::Any as StdAny;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::builder::registry::OperatorRegistry;
use crate::engine::dependency::{Dependency, EssentialLevel};
use crate::engine::graph::GraphContexts;
use crate::engine::slot::{EmitHook, Slot};
use crate::engine::value::AnyValue;
use crate::engine::vertex::Vertex;
use crate::errors::BuildError;
use crate::observability::messages::link::SlotIndexAssigned;
use crate::traits::executor::GraphExecutor;
use crate::traits::operator::Operator;

fn slot_index(names: &mut HashMap<String, usize>, name: &str) -> usize {
    if let Some(index) = names.get(name) {
        return *index;
    }
    let index = names.len();
    names.insert(name.to_string(), index);
    tracing::trace!("{}", SlotIndexAssigned { slot: name, index });
    index
}

/// One dependency of a vertex under construction. Obtained from
/// [`VertexSpec::named_depend`] or [`VertexSpec::anonymous_depend`] and
/// refined with the fluent setters.
pub struct DependencySpec {
    name: Option<String>,
    target: String,
    condition: Option<String>,
    establish_value: bool,
    mutable: bool,
    essential: EssentialLevel,
    target_index: usize,
    condition_index: Option<usize>,
}

impl DependencySpec {
    fn new(name: Option<String>) -> Self {
        DependencySpec {
            name,
            target: String::new(),
            condition: None,
            establish_value: false,
            mutable: false,
            essential: EssentialLevel::Optional,
            target_index: 0,
            condition_index: None,
        }
    }

    /// Depends on the slot with the given symbolic name.
    pub fn to(&mut self, target: &str) -> &mut Self {
        self.target = target.to_string();
        self
    }

    /// Establishes only when the condition slot resolves `true`.
    pub fn on(&mut self, condition: &str) -> &mut Self {
        self.condition = Some(condition.to_string());
        self.establish_value = true;
        self
    }

    /// Establishes only when the condition slot resolves `false`.
    pub fn unless(&mut self, condition: &str) -> &mut Self {
        self.condition = Some(condition.to_string());
        self.establish_value = false;
        self
    }

    /// Declares mutable access to the target; at most one mutable reader
    /// per slot is honored at activation.
    pub fn set_mutable(&mut self, mutable: bool) -> &mut Self {
        self.mutable = mutable;
        self
    }

    pub fn set_essential(&mut self, level: EssentialLevel) -> &mut Self {
        self.essential = level;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn finish(&mut self, names: &mut HashMap<String, usize>) {
        self.target_index = slot_index(names, &self.target);
        self.condition_index = self
            .condition
            .as_ref()
            .map(|condition| slot_index(names, condition));
    }

    pub(crate) fn build(&self, source: &Weak<Vertex>, slots: &[Arc<Slot>]) -> Arc<Dependency> {
        Dependency::new(
            source.clone(),
            slots[self.target_index].clone(),
            self.condition_index.map(|index| slots[index].clone()),
            self.establish_value,
            self.mutable,
            self.essential,
        )
    }

    fn successor_indices(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.target_index).chain(self.condition_index)
    }
}

/// One emit of a vertex under construction.
pub struct EmitSpec {
    name: Option<String>,
    target: String,
    on_emit: Option<EmitHook>,
    target_index: usize,
}

impl EmitSpec {
    fn new(name: Option<String>) -> Self {
        EmitSpec {
            name,
            target: String::new(),
            on_emit: None,
            target_index: 0,
        }
    }

    /// Emits into the slot with the given symbolic name.
    pub fn to(&mut self, target: &str) -> &mut Self {
        self.target = target.to_string();
        self
    }

    /// Installs a hook invoked when the slot publishes, before successor
    /// notification.
    pub fn on_emit<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Arc<Vertex>, &AnyValue) + Send + Sync + 'static,
    {
        self.on_emit = Some(Arc::new(hook));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn finish(
        &mut self,
        vertex_index: usize,
        names: &mut HashMap<String, usize>,
        producers: &mut HashMap<usize, usize>,
    ) -> Result<(), BuildError> {
        self.target_index = slot_index(names, &self.target);
        if let Some(previous) = producers.insert(self.target_index, vertex_index) {
            if previous != vertex_index {
                return Err(BuildError::DuplicateProducer {
                    slot: self.target.clone(),
                    vertex: vertex_index,
                    previous,
                });
            }
        }
        Ok(())
    }
}

enum OperatorBinding {
    Unbound,
    Instance(Arc<dyn Operator>),
    Named(String),
}

/// Wiring description for one vertex. Handles returned by the builder stay
/// addressable through [`crate::builder::GraphBuilder::vertex`] across later
/// `add_vertex` calls.
pub struct VertexSpec {
    index: usize,
    name: String,
    operator: OperatorBinding,
    option: Option<Arc<dyn StdAny + Send + Sync>>,

    named_dependencies: Vec<DependencySpec>,
    dependency_index_by_name: HashMap<String, usize>,
    anonymous_dependencies: Vec<DependencySpec>,
    named_emits: Vec<EmitSpec>,
    emit_index_by_name: HashMap<String, usize>,
    anonymous_emits: Vec<EmitSpec>,

    dependency_names: Arc<HashMap<String, usize>>,
    emit_names: Arc<HashMap<String, usize>>,
}

impl VertexSpec {
    pub(crate) fn with_operator(index: usize, operator: Arc<dyn Operator>) -> Self {
        let mut spec = Self::empty(index);
        spec.operator = OperatorBinding::Instance(operator);
        spec
    }

    pub(crate) fn with_operator_name(index: usize, name: &str) -> Self {
        let mut spec = Self::empty(index);
        spec.operator = OperatorBinding::Named(name.to_string());
        spec
    }

    fn empty(index: usize) -> Self {
        VertexSpec {
            index,
            name: String::new(),
            operator: OperatorBinding::Unbound,
            option: None,
            named_dependencies: Vec::new(),
            dependency_index_by_name: HashMap::new(),
            anonymous_dependencies: Vec::new(),
            named_emits: Vec::new(),
            emit_index_by_name: HashMap::new(),
            anonymous_emits: Vec::new(),
            dependency_names: Arc::new(HashMap::new()),
            emit_names: Arc::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Display name used in diagnostics.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Operator-specific configuration, retrievable in `setup` through
    /// `Vertex::option`.
    pub fn option<T: Send + Sync + 'static>(&mut self, payload: T) -> &mut Self {
        self.option = Some(Arc::new(payload));
        self
    }

    /// Adds or revisits the named dependency `name`.
    pub fn named_depend(&mut self, name: &str) -> &mut DependencySpec {
        if !self.dependency_index_by_name.contains_key(name) {
            let index = self.named_dependencies.len();
            self.dependency_index_by_name.insert(name.to_string(), index);
            self.named_dependencies
                .push(DependencySpec::new(Some(name.to_string())));
        }
        let index = self.dependency_index_by_name[name];
        &mut self.named_dependencies[index]
    }

    /// Adds an anonymous dependency; its index is the order of addition.
    pub fn anonymous_depend(&mut self) -> &mut DependencySpec {
        let index = self.anonymous_dependencies.len();
        self.anonymous_dependencies.push(DependencySpec::new(None));
        &mut self.anonymous_dependencies[index]
    }

    /// Adds or revisits the named emit `name`.
    pub fn named_emit(&mut self, name: &str) -> &mut EmitSpec {
        if !self.emit_index_by_name.contains_key(name) {
            let index = self.named_emits.len();
            self.emit_index_by_name.insert(name.to_string(), index);
            self.named_emits.push(EmitSpec::new(Some(name.to_string())));
        }
        let index = self.emit_index_by_name[name];
        &mut self.named_emits[index]
    }

    /// Adds an anonymous emit; its index is the order of addition.
    pub fn anonymous_emit(&mut self) -> &mut EmitSpec {
        let index = self.anonymous_emits.len();
        self.anonymous_emits.push(EmitSpec::new(None));
        &mut self.anonymous_emits[index]
    }

    pub fn named_dependencies(&self) -> &[DependencySpec] {
        &self.named_dependencies
    }

    pub fn anonymous_dependencies(&self) -> &[DependencySpec] {
        &self.anonymous_dependencies
    }

    pub fn named_emits(&self) -> &[EmitSpec] {
        &self.named_emits
    }

    pub fn anonymous_emits(&self) -> &[EmitSpec] {
        &self.anonymous_emits
    }

    pub(crate) fn operator_name(&self) -> Option<&str> {
        match &self.operator {
            OperatorBinding::Named(name) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn finish(
        &mut self,
        names: &mut HashMap<String, usize>,
        producers: &mut HashMap<usize, usize>,
    ) -> Result<(), BuildError> {
        for dependency in &mut self.named_dependencies {
            dependency.finish(names);
        }
        for dependency in &mut self.anonymous_dependencies {
            dependency.finish(names);
        }
        for emit in &mut self.named_emits {
            emit.finish(self.index, names, producers)?;
        }
        for emit in &mut self.anonymous_emits {
            emit.finish(self.index, names, producers)?;
        }
        self.dependency_names = Arc::new(self.dependency_index_by_name.clone());
        self.emit_names = Arc::new(self.emit_index_by_name.clone());
        Ok(())
    }

    pub(crate) fn build(
        &self,
        executor: Arc<dyn GraphExecutor>,
        registry: Option<&OperatorRegistry>,
        slots: &[Arc<Slot>],
        successors: &mut [Vec<Weak<Dependency>>],
        contexts: Arc<GraphContexts>,
    ) -> Result<Arc<Vertex>, BuildError> {
        let operator = match &self.operator {
            OperatorBinding::Instance(operator) => operator.clone(),
            OperatorBinding::Named(name) => registry
                .and_then(|registry| registry.resolve(name))
                .ok_or_else(|| BuildError::UnknownOperator {
                    vertex: self.index,
                    name: name.clone(),
                })?,
            OperatorBinding::Unbound => {
                return Err(BuildError::MissingOperator { vertex: self.index })
            }
        };

        let emit_specs = self.named_emits.iter().chain(&self.anonymous_emits);
        let emits: Vec<Arc<Slot>> = emit_specs
            .clone()
            .map(|emit| slots[emit.target_index].clone())
            .collect();

        let dependency_specs: Vec<&DependencySpec> = self
            .named_dependencies
            .iter()
            .chain(&self.anonymous_dependencies)
            .collect();

        let vertex = Vertex::new_cyclic(
            self.index,
            self.name.clone(),
            operator,
            self.option.clone(),
            executor,
            self.dependency_names.clone(),
            self.emit_names.clone(),
            self.named_dependencies.len(),
            self.named_emits.len(),
            emits,
            |weak| {
                dependency_specs
                    .iter()
                    .map(|spec| spec.build(weak, slots))
                    .collect()
            },
        );

        for (spec, dependency) in dependency_specs.iter().zip(vertex.dependencies()) {
            for index in spec.successor_indices() {
                successors[index].push(Arc::downgrade(dependency));
            }
        }
        for emit in emit_specs {
            let slot = &slots[emit.target_index];
            slot.set_producer(Arc::downgrade(&vertex));
            if let Some(hook) = &emit.on_emit {
                slot.set_on_emit(hook.clone());
            }
        }
        vertex.set_graph_contexts(contexts);

        let code = vertex.setup();
        if code != 0 {
            return Err(BuildError::OperatorSetup {
                vertex: self.index,
                code,
            });
        }
        Ok(vertex)
    }
}
