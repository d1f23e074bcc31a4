use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use fb_core::error::{ExecError, ExecResult};

use crate::data_logger::DataLogger;
use crate::module::{CancelMode, Module};
use crate::port::{InPort, OutPort};
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The only route for inter-module communication.
///
/// Every bind / unbind / publish and every cancellation traversal passes
/// through here, so deleting any participant can never leave a dangling
/// edge: a removed port is replaced by the expired sentinel in its peers'
/// tables, and any operation on a sentinel raises `PortExpired`.
pub struct Dispatcher {
    /// Serialises binding mutations; lookups take the read half.
    tables: RwLock<()>,
    empty_in: Arc<InPort>,
    empty_out: Arc<OutPort>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: RwLock::new(()),
            empty_in: InPort::expired_sentinel(),
            empty_out: OutPort::expired_sentinel(),
        })
    }

    /// The sentinel replacing deleted in-ports.
    pub fn empty_in(&self) -> &Arc<InPort> {
        &self.empty_in
    }

    /// The sentinel replacing deleted out-ports.
    pub fn empty_out(&self) -> &Arc<OutPort> {
        &self.empty_out
    }

    // -- Binding ------------------------------------------------------------

    /// Create a data connection between two ports.
    ///
    /// An existing incoming binding at the target is replaced. Re-binding
    /// the same pair, a type mismatch, or a direct self-loop raise
    /// `Binding`; no partial state persists on failure.
    pub fn bind(&self, source: &Arc<OutPort>, target: &Arc<InPort>) -> ExecResult<()> {
        let _write = self.tables.write().expect("port tables lock poisoned");
        source.check_live()?;
        target.check_live()?;
        target.accepts(source.value_type())?;

        let source_parent = source.parent()?;
        let target_parent = target.parent()?;
        if source_parent.id() == target_parent.id() {
            return Err(ExecError::Binding(format!(
                "refusing self-loop on module {}",
                source_parent.name()
            )));
        }

        if let Some(existing) = target.source() {
            if Arc::ptr_eq(&existing, source) {
                return Err(ExecError::Binding(format!(
                    "{} is already bound to {}",
                    target.name(),
                    source.name()
                )));
            }
            existing.remove_target(target);
        }

        target.set_source(source);
        source.add_target(target);
        fb_log!(debug, port,
            source = %format_port(source_parent.name(), source.name()),
            target = %format_port(target_parent.name(), target.name()),
            "bound"
        );
        Ok(())
    }

    /// Remove the incoming connection of the given target. Silent when
    /// already unbound.
    pub fn unbind(&self, target: &Arc<InPort>) {
        let _write = self.tables.write().expect("port tables lock poisoned");
        if let Some(source) = target.source() {
            source.remove_target(target);
        }
        target.clear_source();
    }

    /// Remove every outgoing connection of the given source.
    pub fn unbind_source(&self, source: &Arc<OutPort>) {
        let _write = self.tables.write().expect("port tables lock poisoned");
        let (targets, seq_targets, _) = source.snapshot();
        for target in targets {
            target.clear_source();
        }
        for target in seq_targets {
            target.clear_seq_source();
        }
        source.clear_targets();
    }

    /// Create a sequence connection: start / end events only, no payload.
    pub fn seq_bind(&self, source: &Arc<OutPort>, target: &Arc<InPort>) -> ExecResult<()> {
        let _write = self.tables.write().expect("port tables lock poisoned");
        source.check_live()?;
        target.check_live()?;
        if let Some(existing) = target.seq_source() {
            if Arc::ptr_eq(&existing, source) {
                return Err(ExecError::Binding(format!(
                    "{} already follows sequences of {}",
                    target.name(),
                    source.name()
                )));
            }
            existing.remove_seq_target(target);
        }
        target.set_seq_source(source);
        source.add_seq_target(target);
        Ok(())
    }

    /// Remove a sequence connection. Silent when already unbound.
    pub fn seq_unbind(&self, target: &Arc<InPort>) {
        let _write = self.tables.write().expect("port tables lock poisoned");
        if let Some(source) = target.seq_source() {
            source.remove_seq_target(target);
        }
        target.clear_seq_source();
    }

    /// Attach a data logger to a source; it runs on every publication.
    pub fn attach_logger(&self, source: &Arc<OutPort>, logger: Arc<dyn DataLogger>) -> ExecResult<()> {
        let _write = self.tables.write().expect("port tables lock poisoned");
        source.check_live()?;
        source.add_logger(logger);
        Ok(())
    }

    /// Detach all the ports of a module being deleted. Peers that still
    /// reference them are pointed at the expired sentinels.
    pub fn remove_module(&self, module: &Arc<Module>) {
        let _write = self.tables.write().expect("port tables lock poisoned");
        for in_port in module.in_ports() {
            if let Some(source) = in_port.source() {
                source.remove_target(in_port);
            }
            in_port.clear_source();
            if let Some(source) = in_port.seq_source() {
                source.remove_seq_target(in_port);
            }
            in_port.clear_seq_source();
        }
        for out_port in module.out_ports() {
            let (targets, seq_targets, _) = out_port.snapshot();
            for target in targets {
                target.expire_source(&self.empty_out);
            }
            for target in seq_targets {
                target.clear_seq_source();
            }
            out_port.clear_targets();
            out_port.clear_loggers();
        }
        fb_log!(debug, port, module = %module.name(), "ports detached");
    }

    // -- Data publication ---------------------------------------------------

    /// Called when new data is ready at a source: register a hold per
    /// bound data target and per logger, deliver sequence events, then
    /// activate every target module.
    ///
    /// Targets are enumerated under a snapshot; a bind arriving after the
    /// snapshot does not receive this publication. A target refused by
    /// the scheduler during a graph cancellation surfaces as `Cancelled`
    /// after the remaining targets were activated.
    pub(crate) async fn publish(
        &self,
        source: &Arc<OutPort>,
        scheduler: &Arc<Scheduler>,
    ) -> ExecResult<()> {
        source.check_live()?;
        let (targets, seq_targets, loggers) = {
            let _read = self.tables.read().expect("port tables lock poisoned");
            source.snapshot()
        };
        let attr = source.item().attribute();

        // Register every hold up front so the producer cannot start the
        // next cycle before all of this cycle's consumers released.
        for target in &targets {
            if !target.is_trig() {
                source.inc_user();
            }
        }
        for _ in &loggers {
            source.inc_user();
        }

        for target in &seq_targets {
            target.push_seq_event(attr.clone());
        }

        let mut aborted = false;
        for target in &targets {
            target.notify_from_source(&attr);
            match target.run_target(false).await {
                Ok(()) => {}
                Err(ExecError::Cancelled) | Err(ExecError::Scheduling(_)) => {
                    aborted = true;
                }
                Err(e) => {
                    fb_log!(warn, port, target = %target.name(), error = %e, "target activation failed");
                    aborted = true;
                }
            }
        }

        for logger in loggers {
            let port = Arc::clone(source);
            scheduler.start_data_logger(async move {
                let guard = port.item().read_owned().await;
                let attr = port.item().attribute();
                if let Err(e) = logger.log(&guard, &attr).await {
                    fb_log!(warn, port, logger = %logger.name(), error = %e, "data logger failed");
                }
                drop(guard);
                port.dec_user();
            });
        }

        if aborted {
            return Err(ExecError::Cancelled);
        }
        Ok(())
    }

    // -- Cancellation traversals -------------------------------------------

    /// Fan a cancellation out from `start` over the port graph.
    ///
    /// Upstream neighbours (sources feeding this module) receive an
    /// immediate cancel; downstream neighbours (targets of this module's
    /// outputs) receive a lazy cancel so they may flush what they already
    /// hold. The walk keeps a visited set keyed by module identity and
    /// therefore terminates on cyclic graphs.
    pub(crate) fn cancel_from(&self, start: &Arc<Module>, mode: CancelMode) {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack: Vec<(Arc<Module>, CancelMode)> = vec![(Arc::clone(start), mode)];
        while let Some((module, mode)) = stack.pop() {
            if !visited.insert(module.id()) {
                continue;
            }
            module.cancel_local(mode);
            for upstream in self.upstream(&module) {
                stack.push((upstream, CancelMode::Immediate));
            }
            for downstream in self.downstream(&module) {
                stack.push((downstream, CancelMode::Lazy));
            }
        }
    }

    /// Block until every module reachable from `start` has quiesced.
    pub(crate) async fn wait_cancelled_from(&self, start: &Arc<Module>) {
        for module in self.reachable(start) {
            module.wait_local_quiesced().await;
        }
    }

    /// Reset every module reachable from `start`: downstream targets
    /// first, then the module itself, then upstream sources.
    pub(crate) fn reset_from(&self, start: &Arc<Module>) {
        let mut visited = HashSet::new();
        self.reset_rec(start, &mut visited);
    }

    fn reset_rec(&self, module: &Arc<Module>, visited: &mut HashSet<u64>) {
        if !visited.insert(module.id()) {
            return;
        }
        for downstream in self.downstream(module) {
            self.reset_rec(&downstream, visited);
        }
        module.local_reset();
        for upstream in self.upstream(module) {
            self.reset_rec(&upstream, visited);
        }
    }

    /// Modules feeding `module` through data or sequence bindings.
    fn upstream(&self, module: &Arc<Module>) -> Vec<Arc<Module>> {
        let _read = self.tables.read().expect("port tables lock poisoned");
        let mut result = Vec::new();
        for in_port in module.in_ports() {
            for source in [in_port.source(), in_port.seq_source()].into_iter().flatten() {
                if let Ok(parent) = source.parent() {
                    result.push(parent);
                }
            }
        }
        result
    }

    /// Modules consuming `module`'s outputs through data or sequence
    /// bindings.
    fn downstream(&self, module: &Arc<Module>) -> Vec<Arc<Module>> {
        let _read = self.tables.read().expect("port tables lock poisoned");
        let mut result = Vec::new();
        for out_port in module.out_ports() {
            let (targets, seq_targets, _) = out_port.snapshot();
            for target in targets.iter().chain(seq_targets.iter()) {
                if let Ok(parent) = target.parent() {
                    result.push(parent);
                }
            }
        }
        result
    }

    /// Every module reachable from `start` in either direction.
    fn reachable(&self, start: &Arc<Module>) -> Vec<Arc<Module>> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack = vec![Arc::clone(start)];
        let mut result = Vec::new();
        while let Some(module) = stack.pop() {
            if !visited.insert(module.id()) {
                continue;
            }
            for neighbour in self
                .upstream(&module)
                .into_iter()
                .chain(self.downstream(&module))
            {
                stack.push(neighbour);
            }
            result.push(module);
        }
        result
    }
}

fn format_port(module: &str, port: &str) -> String {
    format!("{module}.{port}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use fb_core::value::ValueType;

    use crate::module::{ModuleHost, PortLayout};
    use crate::process::{ProcessCtx, Processor, StartCondition};
    use crate::registry::ModuleRegistry;
    use crate::scheduler::Scheduler;

    struct Hooked {
        cancels: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Processor for Hooked {
        async fn process(
            &self,
            _ctx: &mut ProcessCtx<'_>,
            _start: StartCondition,
        ) -> ExecResult<()> {
            Ok(())
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn host() -> ModuleHost {
        ModuleHost {
            scheduler: Scheduler::new(&fb_config::SchedulerConfig::default()),
            dispatcher: Dispatcher::new(),
            registry: ModuleRegistry::new(),
        }
    }

    struct Node {
        module: Arc<Module>,
        cancels: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    fn node(host: &ModuleHost, name: &str) -> Node {
        let cancels = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let layout = PortLayout::new()
            .in_data("in", "", ValueType::Int64)
            .out("out", "", ValueType::Int64);
        let module = Module::create(
            host,
            name,
            "test node",
            layout,
            Box::new(Hooked {
                cancels: Arc::clone(&cancels),
                resets: Arc::clone(&resets),
            }),
        )
        .unwrap();
        Node {
            module,
            cancels,
            resets,
        }
    }

    fn bind_chain(host: &ModuleHost, from: &Node, to: &Node) {
        host.dispatcher
            .bind(
                from.module.out_port("out").unwrap(),
                to.module.in_port("in").unwrap(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn bind_unbind_roundtrip() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let source = a.module.out_port("out").unwrap();
        let target = b.module.in_port("in").unwrap();

        host.dispatcher.bind(source, target).unwrap();
        assert!(target.has_source());
        assert_eq!(source.target_count(), 1);

        host.dispatcher.unbind(target);
        assert!(!target.has_source());
        assert_eq!(source.target_count(), 0);

        // Unbinding an unbound target stays silent.
        host.dispatcher.unbind(target);
    }

    #[tokio::test]
    async fn rebind_replaces_previous_source() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let c = node(&host, "c");
        let target = c.module.in_port("in").unwrap();

        host.dispatcher
            .bind(a.module.out_port("out").unwrap(), target)
            .unwrap();
        host.dispatcher
            .bind(b.module.out_port("out").unwrap(), target)
            .unwrap();

        assert_eq!(a.module.out_port("out").unwrap().target_count(), 0);
        assert_eq!(b.module.out_port("out").unwrap().target_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_bind_is_rejected() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let source = a.module.out_port("out").unwrap();
        let target = b.module.in_port("in").unwrap();

        host.dispatcher.bind(source, target).unwrap();
        assert!(matches!(
            host.dispatcher.bind(source, target),
            Err(ExecError::Binding(_))
        ));
        // The graph is unchanged by the failed bind.
        assert_eq!(source.target_count(), 1);
    }

    #[tokio::test]
    async fn type_mismatch_is_rejected() {
        let host = host();
        let a = node(&host, "a");
        let layout = PortLayout::new().in_data("in", "", ValueType::Str);
        let b = Module::create(
            &host,
            "strsink",
            "",
            layout,
            Box::new(Hooked {
                cancels: Arc::new(AtomicUsize::new(0)),
                resets: Arc::new(AtomicUsize::new(0)),
            }),
        )
        .unwrap();

        assert!(matches!(
            host.dispatcher
                .bind(a.module.out_port("out").unwrap(), b.in_port("in").unwrap()),
            Err(ExecError::Binding(_))
        ));
    }

    #[tokio::test]
    async fn self_loop_is_rejected() {
        let host = host();
        let a = node(&host, "a");
        assert!(matches!(
            host.dispatcher.bind(
                a.module.out_port("out").unwrap(),
                a.module.in_port("in").unwrap()
            ),
            Err(ExecError::Binding(_))
        ));
    }

    #[tokio::test]
    async fn expired_sentinels_raise_port_expired() {
        let host = host();
        let a = node(&host, "a");

        assert!(matches!(
            host.dispatcher
                .bind(host.dispatcher.empty_out(), a.module.in_port("in").unwrap()),
            Err(ExecError::PortExpired(_))
        ));
        assert!(matches!(
            host.dispatcher
                .bind(a.module.out_port("out").unwrap(), host.dispatcher.empty_in()),
            Err(ExecError::PortExpired(_))
        ));
        assert!(host.dispatcher.empty_in().parent().is_err());
    }

    #[tokio::test]
    async fn removed_module_leaves_expired_edges() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        bind_chain(&host, &a, &b);

        host.dispatcher.remove_module(&a.module);
        host.registry.remove("a");

        // The target now points at the expired sentinel.
        let target = b.module.in_port("in").unwrap();
        let source = target.source().unwrap();
        assert!(matches!(source.check_live(), Err(ExecError::PortExpired(_))));
    }

    async fn settle() {
        // Give spawned cancellation listeners a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn cancel_wave_is_immediate_upstream_lazy_downstream() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let c = node(&host, "c");
        bind_chain(&host, &a, &b);
        bind_chain(&host, &b, &c);

        b.module.immediate_cancel();
        settle().await;

        // Upstream sources are cancelled immediately (user hook fires);
        // downstream targets get the lazy flavour (no user hook).
        assert_eq!(a.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(b.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(c.cancels.load(Ordering::SeqCst), 0);

        b.module.wait_cancelled().await;
        assert!(a.module.module_ready());
        assert!(b.module.module_ready());
        assert!(c.module.module_ready());
    }

    #[tokio::test]
    async fn repeated_immediate_cancel_is_one_wave() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        bind_chain(&host, &a, &b);

        a.module.immediate_cancel();
        a.module.immediate_cancel();
        a.module.wait_cancelled().await;

        assert_eq!(a.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_wave_reaches_every_neighbour() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let c = node(&host, "c");
        bind_chain(&host, &a, &b);
        bind_chain(&host, &b, &c);

        b.module.immediate_cancel();
        b.module.module_reset().await;

        assert_eq!(a.resets.load(Ordering::SeqCst), 1);
        assert_eq!(b.resets.load(Ordering::SeqCst), 1);
        assert_eq!(c.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn traversals_terminate_on_cycles() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        bind_chain(&host, &a, &b);
        bind_chain(&host, &b, &a);

        a.module.immediate_cancel();
        a.module.wait_cancelled().await;
        a.module.module_reset().await;

        assert!(a.module.module_ready());
        assert!(b.module.module_ready());
        assert_eq!(a.resets.load(Ordering::SeqCst), 1);
        assert_eq!(b.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn seq_bind_roundtrip() {
        let host = host();
        let a = node(&host, "a");
        let b = node(&host, "b");
        let source = a.module.out_port("out").unwrap();
        let target = b.module.in_port("in").unwrap();

        host.dispatcher.seq_bind(source, target).unwrap();
        assert!(matches!(
            host.dispatcher.seq_bind(source, target),
            Err(ExecError::Binding(_))
        ));
        host.dispatcher.seq_unbind(target);
        host.dispatcher.seq_unbind(target);
    }
}
