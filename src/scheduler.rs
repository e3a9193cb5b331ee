//! Named systems with dependency ordering.
//!
//! A system is a `Fn(&Registry)` closure registered under a unique name,
//! optionally depending on other named systems that must run first. The
//! execution order is computed once (Kahn's algorithm) and cached; it is
//! invalidated and recomputed lazily the next time [`SystemScheduler::run`]
//! is called after any registration change.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::registry::Registry;
use crate::{EcsError, EcsResult};

pub type SystemFn = Box<dyn Fn(&Registry) + Send + Sync>;

struct SystemNode {
    func: SystemFn,
    dependencies: Vec<String>,
    enabled: bool,
}

struct State {
    systems: HashMap<String, SystemNode>,
    execution_order: Vec<String>,
    needs_reorder: bool,
}

/// Runs named systems in dependency order.
pub struct SystemScheduler {
    state: Mutex<State>,
}

impl SystemScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                systems: HashMap::new(),
                execution_order: Vec::new(),
                needs_reorder: true,
            }),
        }
    }

    /// Registers a system under `name`, with an optional list of system
    /// names that must run before it. Fails if `name` is already taken.
    pub fn add(
        &self,
        name: impl Into<String>,
        func: impl Fn(&Registry) + Send + Sync + 'static,
        dependencies: Vec<String>,
    ) -> EcsResult<()> {
        let name = name.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.systems.contains_key(&name) {
            return Err(EcsError::DuplicateSystem(name));
        }
        state.systems.insert(
            name,
            SystemNode {
                func: Box::new(func),
                dependencies,
                enabled: true,
            },
        );
        state.needs_reorder = true;
        Ok(())
    }

    pub fn remove(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.systems.remove(name);
        state.needs_reorder = true;
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.systems.clear();
        state.execution_order.clear();
        state.needs_reorder = true;
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> EcsResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let node = state
            .systems
            .get_mut(name)
            .ok_or_else(|| EcsError::UnknownSystem(name.to_string()))?;
        node.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> EcsResult<bool> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .systems
            .get(name)
            .map(|n| n.enabled)
            .ok_or_else(|| EcsError::UnknownSystem(name.to_string()))
    }

    /// The cached execution order, recomputing it first if stale.
    pub fn execution_order(&self) -> EcsResult<Vec<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_order(&mut state)?;
        Ok(state.execution_order.clone())
    }

    fn ensure_order(&self, state: &mut State) -> EcsResult<()> {
        if !state.needs_reorder {
            return Ok(());
        }
        if has_cycle(&state.systems) {
            return Err(EcsError::CycleDetected);
        }
        state.execution_order = topological_sort(&state.systems)?;
        state.needs_reorder = false;
        Ok(())
    }

    /// Runs every enabled system in dependency order.
    pub fn run(&self, registry: &Registry) -> EcsResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_order(&mut state)?;
        for name in state.execution_order.clone() {
            if let Some(node) = state.systems.get(&name) {
                if node.enabled {
                    (node.func)(registry);
                }
            }
        }
        Ok(())
    }

    /// Runs one system by name, ignoring its position in the dependency
    /// order and its enabled flag.
    pub fn run_system(&self, name: &str, registry: &Registry) -> EcsResult<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let node = state
            .systems
            .get(name)
            .ok_or_else(|| EcsError::UnknownSystem(name.to_string()))?;
        (node.func)(registry);
        Ok(())
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn has_cycle(systems: &HashMap<String, SystemNode>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(name: &str, systems: &HashMap<String, SystemNode>, marks: &mut HashMap<String, Mark>) -> bool {
        match marks.get(name) {
            Some(Mark::Done) => return false,
            Some(Mark::InProgress) => return true,
            _ => {}
        }
        marks.insert(name.to_string(), Mark::InProgress);
        if let Some(node) = systems.get(name) {
            for dep in &node.dependencies {
                if systems.contains_key(dep) && visit(dep, systems, marks) {
                    return true;
                }
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        false
    }

    let mut marks = HashMap::new();
    systems.keys().any(|name| visit(name, systems, &mut marks))
}

fn topological_sort(systems: &HashMap<String, SystemNode>) -> EcsResult<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = systems.keys().map(|n| (n.as_str(), 0)).collect();

    // Edge direction: dependency -> dependent. in_degree counts how many
    // registered dependencies a system still has unresolved.
    for (name, node) in systems {
        for dep in &node.dependencies {
            if !systems.contains_key(dep) {
                return Err(EcsError::UnknownDependency {
                    system: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        *in_degree.get_mut(name.as_str()).unwrap() = node.dependencies.len();
    }

    let mut ready: Vec<&str> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&name, _)| name).collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into();

    let mut order = Vec::with_capacity(systems.len());
    let mut remaining_deps: HashMap<&str, HashSet<&str>> = systems
        .iter()
        .map(|(name, node)| (name.as_str(), node.dependencies.iter().map(String::as_str).collect()))
        .collect();

    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        let mut newly_ready = Vec::new();
        for (dependent, deps) in remaining_deps.iter_mut() {
            if deps.remove(name) && deps.is_empty() {
                newly_ready.push(*dependent);
            }
        }
        newly_ready.sort_unstable();
        for dependent in newly_ready {
            queue.push_back(dependent);
        }
    }

    if order.len() != systems.len() {
        return Err(EcsError::CycleDetected);
    }

    Ok(order)
}
