//! The bounded-parallel graph walker. Worker threads execute one vertex
//! each and report back over a channel; the scheduler thread owns the graph,
//! tracks per-vertex status, skips the descendants of failures, and splices
//! in dynamically-expanded subgraphs as they arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use tracing::{debug, trace, warn};

use super::{Graph, GraphNode, NodeId};
use crate::error::{Diagnostic, Diagnostics};

/// Cooperative cancellation signal shared by the walker and every node.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WalkOpts {
    /// Maximum concurrently-executing vertices. Zero is rejected by the
    /// engine before any walk starts.
    pub parallelism: usize,
}

impl Default for WalkOpts {
    fn default() -> Self {
        Self { parallelism: 10 }
    }
}

/// What one vertex execution produced: diagnostics plus, for expandable
/// vertices, the subgraph to splice in.
pub struct NodeResult<N> {
    pub diagnostics: Diagnostics,
    pub expansion: Option<Graph<N>>,
}

impl<N> NodeResult<N> {
    pub fn ok() -> Self {
        Self {
            diagnostics: Diagnostics::new(),
            expansion: None,
        }
    }

    pub fn diags(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            expansion: None,
        }
    }

    pub fn expanded(diagnostics: Diagnostics, subgraph: Graph<N>) -> Self {
        Self {
            diagnostics,
            expansion: Some(subgraph),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// Walk the graph. Eligibility is all-predecessors-complete; an erroring
/// vertex marks its descendants skipped while unrelated branches continue;
/// cancellation stops scheduling and drains in-flight work.
pub fn walk<N, F>(
    graph: &mut Graph<N>,
    opts: &WalkOpts,
    cancel: &CancelToken,
    execute: F,
) -> Diagnostics
where
    N: GraphNode + Send + Sync + 'static,
    F: Fn(&N) -> NodeResult<N> + Send + Sync + 'static,
{
    let execute = Arc::new(execute);
    let (tx, rx) = mpsc::channel::<(usize, NodeResult<N>)>();

    let mut status: HashMap<usize, Status> = graph
        .ids()
        .into_iter()
        .map(|id| (id.0, Status::Pending))
        .collect();
    let mut diags = Diagnostics::new();
    let mut in_flight = 0usize;
    let mut cancel_noted = false;

    loop {
        propagate_skips(graph, &mut status);

        if cancel.is_cancelled() {
            if !cancel_noted {
                debug!("walk cancelled; no new vertices will be scheduled");
                cancel_noted = true;
            }
        } else {
            for id in graph.ids() {
                if in_flight >= opts.parallelism {
                    break;
                }
                if status[&id.0] != Status::Pending {
                    continue;
                }
                let ready = graph
                    .predecessors(id)
                    .iter()
                    .all(|p| status[&p.0] == Status::Done);
                if !ready {
                    continue;
                }

                status.insert(id.0, Status::Running);
                in_flight += 1;
                let idx = id.0;
                let node = graph.node(id).unwrap().clone();
                let tx = tx.clone();
                let execute = execute.clone();
                trace!(vertex = %node.node_name(), "scheduling");
                std::thread::spawn(move || {
                    let result = execute(node.as_ref());
                    // The scheduler may already have shut down on
                    // cancellation; a dead channel is fine then.
                    let _ = tx.send((idx, result));
                });
            }
        }

        let all_settled = graph.ids().into_iter().all(|id| {
            matches!(
                status[&id.0],
                Status::Done | Status::Failed | Status::Skipped
            )
        });

        if in_flight == 0 {
            if all_settled || cancel.is_cancelled() {
                break;
            }
            // Nothing running and nothing became eligible: the graph has an
            // unsatisfiable remainder, which validation should have caught.
            diags.push(Diagnostic::internal(
                "graph walk stalled with unrunnable vertices remaining",
            ));
            break;
        }

        let (idx, result) = match rx.recv() {
            Ok(message) => message,
            Err(_) => break,
        };
        in_flight -= 1;

        let failed = result.diagnostics.has_errors();
        diags.extend(result.diagnostics);

        if failed {
            warn!(vertex = idx, "vertex failed; descendants will be skipped");
            status.insert(idx, Status::Failed);
            continue;
        }
        status.insert(idx, Status::Done);

        if let Some(subgraph) = result.expansion {
            if let Err(e) = subgraph.validate(false) {
                diags.push(Diagnostic::from(e));
                status.insert(idx, Status::Failed);
                continue;
            }
            let expanded = NodeId(idx);
            let original_successors = graph.successors(expanded);
            let mapping = graph.subsume(subgraph);
            let mut added = 0usize;
            for new_id in mapping.into_iter().flatten() {
                graph.connect(expanded, new_id);
                for succ in &original_successors {
                    graph.connect(new_id, *succ);
                }
                status.insert(new_id.0, Status::Pending);
                added += 1;
            }
            trace!(vertex = idx, added, "dynamic expansion subsumed");
        }
    }

    diags
}

fn propagate_skips<N: GraphNode>(graph: &Graph<N>, status: &mut HashMap<usize, Status>) {
    loop {
        let mut changed = false;
        for id in graph.ids() {
            if status[&id.0] != Status::Pending {
                continue;
            }
            let blocked = graph
                .predecessors(id)
                .iter()
                .any(|p| matches!(status[&p.0], Status::Failed | Status::Skipped));
            if blocked {
                status.insert(id.0, Status::Skipped);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct TestNode {
        name: String,
        fail: bool,
        expand: bool,
        sleep_ms: u64,
    }

    impl TestNode {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail: false,
                expand: false,
                sleep_ms: 0,
            }
        }
    }

    impl GraphNode for TestNode {
        fn node_name(&self) -> String {
            self.name.clone()
        }
    }

    #[derive(Default)]
    struct Trace {
        order: Mutex<Vec<String>>,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    fn run(graph: &mut Graph<TestNode>, parallelism: usize) -> (Diagnostics, Arc<Trace>) {
        let trace = Arc::new(Trace::default());
        let trace_clone = trace.clone();
        let cancel = CancelToken::new();
        let diags = walk(
            graph,
            &WalkOpts { parallelism },
            &cancel,
            move |node: &TestNode| {
                let now = trace_clone.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                trace_clone.max_concurrent.fetch_max(now, Ordering::SeqCst);
                if node.sleep_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(node.sleep_ms));
                }
                trace_clone.order.lock().unwrap().push(node.name.clone());
                trace_clone.concurrent.fetch_sub(1, Ordering::SeqCst);

                if node.fail {
                    return NodeResult::diags(
                        Diagnostic::error("boom", format!("{} failed", node.name)).into(),
                    );
                }
                if node.expand {
                    let mut sub = Graph::new();
                    let x = sub.add(TestNode::named(&format!("{}.sub0", node.name)));
                    let y = sub.add(TestNode::named(&format!("{}.sub1", node.name)));
                    sub.connect(x, y);
                    return NodeResult::expanded(Diagnostics::new(), sub);
                }
                NodeResult::ok()
            },
        );
        (diags, trace)
    }

    #[test]
    fn respects_topological_order() {
        let mut g = Graph::new();
        let a = g.add(TestNode::named("a"));
        let b = g.add(TestNode::named("b"));
        let c = g.add(TestNode::named("c"));
        g.connect(a, b);
        g.connect(b, c);

        let (diags, trace) = run(&mut g, 4);
        assert!(!diags.has_errors());
        let order = trace.order.lock().unwrap().clone();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn bounds_concurrency() {
        let mut g = Graph::new();
        for i in 0..12 {
            let mut node = TestNode::named(&format!("n{}", i));
            node.sleep_ms = 10;
            g.add(node);
        }
        let (diags, trace) = run(&mut g, 3);
        assert!(!diags.has_errors());
        assert!(trace.max_concurrent.load(Ordering::SeqCst) <= 3);
        assert_eq!(trace.order.lock().unwrap().len(), 12);
    }

    #[test]
    fn failure_skips_descendants_but_not_siblings() {
        let mut g = Graph::new();
        let bad = g.add(TestNode {
            fail: true,
            ..TestNode::named("bad")
        });
        let child = g.add(TestNode::named("child"));
        let grandchild = g.add(TestNode::named("grandchild"));
        let unrelated = g.add(TestNode::named("unrelated"));
        g.connect(bad, child);
        g.connect(child, grandchild);
        let _ = unrelated;

        let (diags, trace) = run(&mut g, 2);
        assert!(diags.has_errors());
        let order = trace.order.lock().unwrap().clone();
        assert!(order.contains(&"bad".to_string()));
        assert!(order.contains(&"unrelated".to_string()));
        assert!(!order.contains(&"child".to_string()));
        assert!(!order.contains(&"grandchild".to_string()));
    }

    #[test]
    fn dynamic_expansion_runs_before_successors() {
        let mut g = Graph::new();
        let expander = g.add(TestNode {
            expand: true,
            ..TestNode::named("expander")
        });
        let after = g.add(TestNode::named("after"));
        g.connect(expander, after);

        let (diags, trace) = run(&mut g, 4);
        assert!(!diags.has_errors());
        let order = trace.order.lock().unwrap().clone();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("expander") < pos("expander.sub0"));
        assert!(pos("expander.sub0") < pos("expander.sub1"));
        assert!(pos("expander.sub1") < pos("after"));
    }

    #[test]
    fn cancellation_stops_scheduling() {
        let mut g = Graph::new();
        let first = g.add(TestNode {
            sleep_ms: 20,
            ..TestNode::named("first")
        });
        let second = g.add(TestNode::named("second"));
        g.connect(first, second);

        let cancel = CancelToken::new();
        cancel.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let diags = walk(
            &mut g,
            &WalkOpts { parallelism: 2 },
            &cancel,
            move |_node: &TestNode| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                NodeResult::ok()
            },
        );
        assert!(!diags.has_errors());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
