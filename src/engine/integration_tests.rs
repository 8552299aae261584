// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end scenarios exercising the full build/activate/execute cycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::builder::GraphBuilder;
use crate::engine::dependency::EssentialLevel;
use crate::engine::value::SharedValue;
use crate::engine::vertex::Vertex;
use crate::errors::codes;
use crate::traits::operator::Operator;

/// Emits a fixed string through its first anonymous emit.
struct ConstString {
    value: &'static str,
    runs: Arc<AtomicUsize>,
    trivial: bool,
}

impl ConstString {
    fn new(value: &'static str, runs: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(ConstString {
            value,
            runs: runs.clone(),
            trivial: false,
        })
    }

    fn trivial(value: &'static str, runs: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(ConstString {
            value,
            runs: runs.clone(),
            trivial: true,
        })
    }
}

impl Operator for ConstString {
    fn setup(&self, vertex: &Arc<Vertex>) -> i32 {
        if self.trivial {
            vertex.set_trivial(true);
        }
        match vertex.anonymous_emit(0) {
            Some(slot) => {
                slot.declare_type::<String>();
                0
            }
            None => -1,
        }
    }

    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        let mut committer = slot.emit::<String>();
        committer.set(self.value.to_string());
        0
    }
}

/// Joins every anonymous dependency value with `+` into its first emit.
struct Concat {
    runs: Arc<AtomicUsize>,
}

impl Concat {
    fn new(runs: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Concat { runs: runs.clone() })
    }
}

impl Operator for Concat {
    fn setup(&self, vertex: &Arc<Vertex>) -> i32 {
        for index in 0..vertex.anonymous_dependency_size() {
            if let Some(dependency) = vertex.anonymous_dependency(index) {
                dependency.declare_type::<String>();
            }
        }
        match vertex.anonymous_emit(0) {
            Some(slot) => {
                slot.declare_type::<String>();
                0
            }
            None => -1,
        }
    }

    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut parts = Vec::new();
        for index in 0..vertex.anonymous_dependency_size() {
            let dependency = match vertex.anonymous_dependency(index) {
                Some(dependency) => dependency,
                None => return -1,
            };
            match dependency.value::<String>() {
                Some(value) => parts.push(value.clone()),
                None => return -1,
            }
        }
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        let mut committer = slot.emit::<String>();
        committer.set(parts.join("+"));
        0
    }
}

/// Publishes whatever storage was preset on its emit slot.
struct PublishPreset {
    runs: Arc<AtomicUsize>,
}

impl PublishPreset {
    fn new(runs: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(PublishPreset { runs: runs.clone() })
    }
}

impl Operator for PublishPreset {
    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        let mut committer = slot.emit::<bool>();
        match committer.get() {
            Some(_) => 0,
            None => -1,
        }
    }
}

/// Selects whichever of its `primary`/`fallback` dependencies resolved and
/// forwards the value to `out`.
struct Select {
    runs: Arc<AtomicUsize>,
}

impl Select {
    fn new(runs: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Select { runs: runs.clone() })
    }
}

impl Operator for Select {
    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let out = match vertex.named_emit("out") {
            Some(slot) => slot,
            None => return -1,
        };
        for name in ["primary", "fallback"] {
            let dependency = match vertex.named_dependency(name) {
                Some(dependency) => dependency,
                None => return -1,
            };
            if dependency.ready() && !dependency.is_empty() {
                if out.forward(&dependency) {
                    return 0;
                }
                return -1;
            }
        }
        -1
    }
}

/// Mutates its mutable dependency in place and forwards it.
struct MutateAndForward {
    suffix: &'static str,
}

impl Operator for MutateAndForward {
    fn setup(&self, vertex: &Arc<Vertex>) -> i32 {
        match vertex.anonymous_dependency(0) {
            Some(dependency) => {
                dependency.declare_mutable(true);
                dependency.declare_type::<String>();
                0
            }
            None => -1,
        }
    }

    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        let dependency = match vertex.anonymous_dependency(0) {
            Some(dependency) => dependency,
            None => return -1,
        };
        match dependency.mutable_value::<String>() {
            Some(mut value) => value.push_str(self.suffix),
            None => return -1,
        }
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        if slot.forward(&dependency) {
            0
        } else {
            -1
        }
    }
}

/// Reads its dependency without any mutability declaration.
struct ReadOnly {
    runs: Arc<AtomicUsize>,
}

impl Operator for ReadOnly {
    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let dependency = match vertex.anonymous_dependency(0) {
            Some(dependency) => dependency,
            None => return -1,
        };
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        if slot.forward(&dependency) {
            0
        } else {
            -1
        }
    }
}

/// Publishes its emit with no value.
struct EmitEmpty;

impl Operator for EmitEmpty {
    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        match vertex.anonymous_emit(0) {
            Some(slot) => {
                drop(slot.emit::<String>());
                0
            }
            None => -1,
        }
    }
}

/// Fails with a fixed operator code.
struct AlwaysFail {
    code: i32,
}

impl Operator for AlwaysFail {
    fn process(&self, _vertex: &Arc<Vertex>) -> i32 {
        self.code
    }
}

/// Streams `count` integers through a channel emit.
struct StreamProducer {
    count: i32,
}

#[async_trait]
impl Operator for StreamProducer {
    async fn process_async(&self, vertex: Arc<Vertex>) -> i32 {
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        let channel = slot.declare_channel::<i32>();
        let publisher = match channel.open() {
            Some(publisher) => publisher,
            None => return -1,
        };
        for item in 0..self.count {
            publisher.publish(item);
            tokio::task::yield_now().await;
        }
        0
    }
}

/// Sums a channel dependency into an integer emit.
struct StreamSum;

#[async_trait]
impl Operator for StreamSum {
    async fn process_async(&self, vertex: Arc<Vertex>) -> i32 {
        let dependency = match vertex.anonymous_dependency(0) {
            Some(dependency) => dependency,
            None => return -1,
        };
        let input = dependency.declare_channel::<i32>();
        let mut consumer = match input.subscribe() {
            Some(consumer) => consumer,
            None => return -1,
        };
        let mut sum = 0;
        while let Some(item) = consumer.next().await {
            sum += *item;
        }
        let slot = match vertex.anonymous_emit(0) {
            Some(slot) => slot,
            None => return -1,
        };
        let mut committer = slot.emit::<i32>();
        committer.set(sum);
        0
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Diamond: V1 emits A; V2 and V3 both consume A; V4 joins B and C into D.
/// Every vertex runs exactly once and D resolves.
#[tokio::test]
async fn diamond_runs_every_vertex_once() {
    let (v1, v2, v3, v4) = (counter(), counter(), counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.name("diamond");
    builder.add_vertex(ConstString::new("a", &v1)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v2));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("B");
    }
    {
        let spec = builder.add_vertex(Concat::new(&v3));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("C");
    }
    {
        let spec = builder.add_vertex(Concat::new(&v4));
        spec.anonymous_depend().to("B");
        spec.anonymous_depend().to("C");
        spec.anonymous_emit().to("D");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let d = graph.find_slot("D").expect("slot D");
    let closure = graph.run(&[d.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(d.ready());
    assert_eq!(&*d.value::<String>().expect("value"), "a+a");
    assert_eq!(count(&v1), 1);
    assert_eq!(count(&v2), 1);
    assert_eq!(count(&v3), 1);
    assert_eq!(count(&v4), 1);
}

/// Conditional skip: with `cond` preset true, the `unless` branch never
/// activates and its producer never runs.
#[tokio::test]
async fn conditional_branch_skips_the_untaken_side() {
    let (v1, v2, v3, v4) = (counter(), counter(), counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.add_vertex(PublishPreset::new(&v1)).anonymous_emit().to("cond");
    builder.add_vertex(ConstString::new("alpha", &v2)).anonymous_emit().to("A");
    builder.add_vertex(ConstString::new("beta", &v3)).anonymous_emit().to("B");
    {
        let spec = builder.add_vertex(Select::new(&v4));
        spec.named_depend("primary").to("A").on("cond");
        spec.named_depend("fallback").to("B").unless("cond");
        spec.named_emit("out").to("R");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let cond_value = SharedValue::new(true);
    graph.find_slot("cond").expect("slot").preset(&cond_value);

    let r = graph.find_slot("R").expect("slot R");
    let closure = graph.run(&[r.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(r.ready());
    assert_eq!(&*r.value::<String>().expect("value"), "alpha");
    assert_eq!(count(&v1), 1);
    assert_eq!(count(&v2), 1);
    assert_eq!(count(&v3), 0, "untaken branch must not run");
    assert_eq!(count(&v4), 1);
    assert!(!graph.find_slot("B").expect("slot B").ready());
}

/// Mutable forwarding: the downstream slot aliases the upstream storage and
/// the in-place mutation is visible through both.
#[tokio::test]
async fn mutable_forwarding_shares_storage() {
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("base", &v1)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Arc::new(MutateAndForward { suffix: "-mutated" }));
        spec.anonymous_depend().to("A").set_mutable(true);
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot A");
    let b = graph.find_slot("B").expect("slot B");
    let closure = graph.run(&[b.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert_eq!(&*a.value::<String>().expect("value"), "base-mutated");
    assert_eq!(&*b.value::<String>().expect("value"), "base-mutated");
    assert!(a.need_mutable());

    let (a_cell, _) = a.any_snapshot().expect("snapshot").cell().expect("cell");
    let (b_cell, _) = b.any_snapshot().expect("snapshot").cell().expect("cell");
    assert!(Arc::ptr_eq(&a_cell, &b_cell), "B must alias A's storage");
}

/// A second dependency on a mutably-acquired slot is an activation error.
#[tokio::test]
async fn second_dependency_on_mutable_slot_fails_activation() {
    let (v1, v3) = (counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("base", &v1)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Arc::new(MutateAndForward { suffix: "-mutated" }));
        spec.anonymous_depend().to("A").set_mutable(true);
        spec.anonymous_emit().to("B");
    }
    {
        let spec = builder.add_vertex(Arc::new(ReadOnly { runs: v3.clone() }));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("C");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let b = graph.find_slot("B").expect("slot B");
    let c = graph.find_slot("C").expect("slot C");
    let closure = graph.run(&[b, c]);
    assert_eq!(closure.get().await, codes::MUTABILITY_CONFLICT);
    closure.wait().await;
}

/// Required dependency published empty fails the run; the consumer's emit
/// stays unpublished.
#[tokio::test]
async fn required_dependency_empty_fails_the_run() {
    let v2 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(EmitEmpty)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v2));
        spec.anonymous_depend()
            .to("A")
            .set_essential(EssentialLevel::Required);
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let b = graph.find_slot("B").expect("slot B");
    let closure = graph.run(&[b.clone()]);
    assert_eq!(closure.get().await, codes::ESSENTIAL_MISSING);
    closure.wait().await;

    assert!(!b.ready());
    assert_eq!(count(&v2), 0, "operator must not run");
}

/// Skip-if-empty publishes the consumer's emits empty and the run still
/// succeeds; downstream observers see the emit empty.
#[tokio::test]
async fn skippable_dependency_empty_skips_the_vertex() {
    let v2 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(EmitEmpty)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v2));
        spec.anonymous_depend()
            .to("A")
            .set_essential(EssentialLevel::SkipIfEmpty);
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let b = graph.find_slot("B").expect("slot B");
    let closure = graph.run(&[b.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(b.ready());
    assert!(b.is_empty());
    assert_eq!(count(&v2), 0, "operator must not run");
}

/// Requesting a slot whose dependency chain reaches an unproduced root
/// fails the run immediately.
#[tokio::test]
async fn unreachable_target_fails_activation() {
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    {
        let spec = builder.add_vertex(Concat::new(&v1));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let b = graph.find_slot("B").expect("slot B");
    let closure = graph.run(&[b.clone()]);
    assert_eq!(closure.get().await, codes::NO_PRODUCER);
    closure.wait().await;

    assert!(!b.ready());
    assert_eq!(count(&v1), 0);
}

/// Zero-dependency vertex runs exactly once and publishes its emits.
#[tokio::test]
async fn zero_dependency_vertex_runs_once() {
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("root", &v1)).anonymous_emit().to("A");
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot A");
    let closure = graph.run(&[a.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(a.ready());
    assert_eq!(count(&v1), 1);
}

/// All dependencies conditional-false with skip semantics: the operator is
/// never invoked and its emit resolves empty.
#[tokio::test]
async fn vertex_with_all_branches_untaken_never_runs() {
    let (v1, v2, v3) = (counter(), counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.add_vertex(PublishPreset::new(&v1)).anonymous_emit().to("cond");
    builder.add_vertex(ConstString::new("alpha", &v2)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v3));
        spec.anonymous_depend()
            .to("A")
            .unless("cond")
            .set_essential(EssentialLevel::SkipIfEmpty);
        spec.anonymous_emit().to("R");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let cond_value = SharedValue::new(true);
    graph.find_slot("cond").expect("slot").preset(&cond_value);

    let r = graph.find_slot("R").expect("slot R");
    let closure = graph.run(&[r.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(r.ready());
    assert!(r.is_empty());
    assert_eq!(count(&v3), 0);
    assert!(!graph.find_slot("A").expect("slot A").ready());
}

/// Trivial operators run inline and the run still resolves normally.
#[tokio::test]
async fn trivial_chain_runs_inline() {
    let (v1, v2) = (counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::trivial("root", &v1)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v2));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let b = graph.find_slot("B").expect("slot B");
    let closure = graph.run(&[b.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert_eq!(&*b.value::<String>().expect("value"), "root");
    assert_eq!(count(&v1), 1);
    assert_eq!(count(&v2), 1);
}

/// Operator failure codes surface through the closure unchanged.
#[tokio::test]
async fn operator_error_code_terminates_the_run() {
    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(AlwaysFail { code: -42 })).anonymous_emit().to("A");
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot A");
    let closure = graph.run(&[a.clone()]);
    assert_eq!(closure.get().await, -42);
    closure.wait().await;
    assert!(!a.ready());
}

/// Reset restores the graph to a runnable state and a rerun reproduces the
/// same outputs.
#[tokio::test]
async fn reset_and_rerun_reproduce_outputs() {
    let (v1, v2) = (counter(), counter());
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("a", &v1)).anonymous_emit().to("A");
    {
        let spec = builder.add_vertex(Concat::new(&v2));
        spec.anonymous_depend().to("A");
        spec.anonymous_emit().to("B");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");
    let b = graph.find_slot("B").expect("slot B");

    for round in 1..=2 {
        let closure = graph.run(&[b.clone()]);
        assert_eq!(closure.get().await, codes::SUCCESS);
        closure.wait().await;
        assert_eq!(&*b.value::<String>().expect("value"), "a");
        assert_eq!(count(&v1), round);
        graph.reset();
        assert!(!b.ready());
    }
    // Reset is idempotent.
    graph.reset();
    graph.reset();
}

/// The finish callback observes the final code and fires exactly once.
#[tokio::test]
async fn on_finish_callback_fires_once() {
    let fired = counter();
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("a", &v1)).anonymous_emit().to("A");
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot A");
    let closure = graph.run(&[a.clone()]);
    let observed = fired.clone();
    closure.on_finish(move |done| {
        assert_eq!(done.error_code(), codes::SUCCESS);
        observed.fetch_add(1, Ordering::SeqCst);
    });
    closure.wait().await;
    for _ in 0..100 {
        if count(&fired) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(count(&fired), 1);
}

/// Streaming: the consumer subscribes as soon as the channel opens and
/// drains items published after its own vertex started.
#[tokio::test]
async fn channel_streams_between_vertices() {
    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(StreamProducer { count: 5 })).anonymous_emit().to("items");
    {
        let spec = builder.add_vertex(Arc::new(StreamSum));
        spec.anonymous_depend().to("items");
        spec.anonymous_emit().to("total");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let total = graph.find_slot("total").expect("slot");
    let closure = graph.run(&[total.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert_eq!(*total.value::<i32>().expect("value"), 10);
}

/// Several graphs from one builder run independently.
#[tokio::test]
async fn graphs_from_one_builder_are_independent() {
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("x", &v1)).anonymous_emit().to("A");
    builder.finish().expect("link");

    let first = builder.build().expect("first");
    let second = builder.build().expect("second");

    let a1 = first.find_slot("A").expect("slot");
    let closure = first.run(&[a1.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert!(a1.ready());
    assert!(!second.find_slot("A").expect("slot").ready());
}

/// Graph contexts are visible to operators.
#[tokio::test]
async fn graph_context_reaches_operators() {
    struct ReadContext;
    impl Operator for ReadContext {
        fn process(&self, vertex: &Arc<Vertex>) -> i32 {
            let prefix = match vertex.graph_context::<String>() {
                Some(prefix) => prefix.clone(),
                None => return -1,
            };
            let slot = match vertex.anonymous_emit(0) {
                Some(slot) => slot,
                None => return -1,
            };
            let mut committer = slot.emit::<String>();
            committer.set(format!("{}-done", prefix));
            0
        }
    }

    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(ReadContext)).anonymous_emit().to("A");
    builder.finish().expect("link");
    let graph = builder.build().expect("build");
    graph.set_context(String::from("ctx"));

    let a = graph.find_slot("A").expect("slot");
    let closure = graph.run(&[a.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;
    assert_eq!(&*a.value::<String>().expect("value"), "ctx-done");
}

/// The emit hook observes publications before successors run.
#[tokio::test]
async fn emit_hook_observes_publication() {
    let seen = counter();
    let v1 = counter();
    let mut builder = GraphBuilder::new();
    {
        let hook_counter = seen.clone();
        builder
            .add_vertex(ConstString::new("x", &v1))
            .anonymous_emit()
            .to("A")
            .on_emit(move |_, value| {
                assert!(!value.is_empty());
                hook_counter.fetch_add(1, Ordering::SeqCst);
            });
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot");
    let closure = graph.run(&[a.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;
    assert_eq!(count(&seen), 1);
}

/// Vertex run logs accumulate during a run, collect graph-wide, and clear
/// on reset.
#[tokio::test]
async fn vertex_run_logs_collect_and_reset() {
    struct Noisy;
    impl Operator for Noisy {
        fn process(&self, vertex: &Arc<Vertex>) -> i32 {
            vertex.log_append("noisy ran; ");
            match vertex.anonymous_emit(0) {
                Some(slot) => {
                    let mut committer = slot.emit::<String>();
                    committer.set("done".to_string());
                    0
                }
                None => -1,
            }
        }
    }

    let mut builder = GraphBuilder::new();
    builder.add_vertex(Arc::new(Noisy)).anonymous_emit().to("A");
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let a = graph.find_slot("A").expect("slot");
    let closure = graph.run(&[a.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;

    assert_eq!(graph.collect_run_logs(), "noisy ran; ");
    graph.reset();
    assert!(graph.collect_run_logs().is_empty());
}

/// An operator writing through the graph interface macro round-trips.
#[tokio::test]
async fn graph_interface_macro_wires_typed_io() {
    crate::graph_interface! {
        struct DoubleIo {
            (depend, input, String),
            (emit, output, String),
        }
    }

    struct Doubler;
    impl Operator for Doubler {
        fn setup(&self, vertex: &Arc<Vertex>) -> i32 {
            match DoubleIo::resolve(vertex) {
                Ok(io) => {
                    vertex.init_context(io);
                    0
                }
                Err(code) => code,
            }
        }

        fn process(&self, vertex: &Arc<Vertex>) -> i32 {
            let io = match vertex.context::<DoubleIo>() {
                Some(io) => io,
                None => return -1,
            };
            let input = match io.input() {
                Some(input) => input.clone(),
                None => return -1,
            };
            let mut committer = io.output.emit();
            committer.set(format!("{0}{0}", input));
            0
        }
    }

    let runs = counter();
    let mut builder = GraphBuilder::new();
    builder.add_vertex(ConstString::new("ab", &runs)).anonymous_emit().to("in");
    {
        let spec = builder.add_vertex(Arc::new(Doubler));
        spec.named_depend("input").to("in");
        spec.named_emit("output").to("out");
    }
    builder.finish().expect("link");
    let graph = builder.build().expect("build");

    let out = graph.find_slot("out").expect("slot");
    let closure = graph.run(&[out.clone()]);
    assert_eq!(closure.get().await, codes::SUCCESS);
    closure.wait().await;
    assert_eq!(&*out.value::<String>().expect("value"), "abab");
}
